/// Label of the authenticated user. Lives exactly as long as the dashboard
/// that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    label: String,
}

impl SessionIdentity {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// The confidential view shown after a successful authentication.
#[derive(Debug)]
pub struct Dashboard {
    session: SessionIdentity,
}

impl Dashboard {
    pub fn open(session: SessionIdentity) -> Self {
        log::info!("dashboard opened for {}", session.label());
        Self { session }
    }

    pub fn user(&self) -> &str {
        self.session.label()
    }

    pub fn title(&self) -> String {
        format!("Confidential Dashboard - {}", self.user())
    }

    pub fn welcome(&self) -> String {
        format!(
            "Welcome, {}! This is the confidential dashboard.",
            self.user()
        )
    }

    pub fn close(self) {
        log::info!("dashboard closed for {}", self.session.label());
    }
}
