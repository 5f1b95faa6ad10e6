//! Authentication controller: frame → temporary query image → matcher →
//! threshold decision.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::{Distance, FaceMatcher, MatchOutcome, MatchQuery, MatcherError};

/// What to do when the top candidate carries no distance value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDistancePolicy {
    Accept,
    Deny,
    Error,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub store_dir: PathBuf,
    /// Maximum accepted distance, inclusive.
    pub threshold: f64,
    pub missing_distance: MissingDistancePolicy,
    pub model_name: String,
    pub detector_backend: String,
    pub enforce_detection: bool,
    /// Where query images are written. `None` means the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Capturing,
    Matching,
}

impl AuthState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AuthState::Capturing,
            2 => AuthState::Matching,
            _ => AuthState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    NotRecognized,
    AboveThreshold {
        label: String,
        distance: Distance,
        threshold: f64,
    },
    NoDistance {
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthDecision {
    Granted {
        label: String,
        distance: Option<Distance>,
    },
    Denied(DenyReason),
}

impl AuthDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthDecision::Granted { .. })
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotRecognized => f.write_str("Face not recognized or not authorized"),
            DenyReason::AboveThreshold {
                label,
                distance,
                threshold,
            } => write!(
                f,
                "Face not authorized: closest match {} at {} {:.4} exceeds {:.4}",
                label, distance.metric, distance.value, threshold
            ),
            DenyReason::NoDistance { label } => write!(
                f,
                "Face not authorized: matcher reported {label} without a distance"
            ),
        }
    }
}

impl fmt::Display for AuthDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthDecision::Granted {
                label,
                distance: Some(d),
            } => write!(f, "Access granted to {} ({} {:.4})", label, d.metric, d.value),
            AuthDecision::Granted {
                label,
                distance: None,
            } => write!(f, "Access granted to {label}"),
            AuthDecision::Denied(reason) => write!(f, "Access denied: {reason}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No camera frame available")]
    NoFrame,
    #[error("an authentication attempt is already in progress")]
    Busy,
    #[error("creating query image")]
    TempFile(#[source] std::io::Error),
    #[error("encoding query image")]
    Encode(#[source] image::ImageError),
    #[error("error during face recognition")]
    Matcher(#[from] MatcherError),
    #[error("matcher reported {label} without a distance")]
    MissingDistance { label: String },
}

pub struct Authenticator<M> {
    matcher: M,
    settings: AuthSettings,
    state: AtomicU8,
}

/// Returns the controller to `Idle` however the attempt ends.
struct Attempt<'a>(&'a AtomicU8);

impl Attempt<'_> {
    fn enter(&self, state: AuthState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        self.0.store(AuthState::Idle as u8, Ordering::SeqCst);
    }
}

impl<M: FaceMatcher> Authenticator<M> {
    pub fn new(matcher: M, settings: AuthSettings) -> Self {
        Self {
            matcher,
            settings,
            state: AtomicU8::new(AuthState::Idle as u8),
        }
    }

    pub fn state(&self) -> AuthState {
        AuthState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn begin(&self, first: AuthState) -> Result<Attempt<'_>, AuthError> {
        self.state
            .compare_exchange(
                AuthState::Idle as u8,
                first as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| AuthError::Busy)?;
        Ok(Attempt(&self.state))
    }

    /// Authenticate the given frame. The query image is written to a
    /// temporary file that is removed before this returns, on every path.
    pub fn authenticate(&self, frame: Option<&RgbImage>) -> Result<AuthDecision, AuthError> {
        let frame = frame.ok_or(AuthError::NoFrame)?;
        let attempt = self.begin(AuthState::Capturing)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("facegate-query-").suffix(".jpg");
        let mut query = match &self.settings.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(AuthError::TempFile)?;
        frame
            .write_to(query.as_file_mut(), ImageFormat::Jpeg)
            .map_err(AuthError::Encode)?;
        log::debug!("query image written to {}", query.path().display());

        attempt.enter(AuthState::Matching);
        self.run_match(query.path())
    }

    /// Authenticate an image that already exists on disk.
    pub fn authenticate_file(&self, image: &Path) -> Result<AuthDecision, AuthError> {
        let _attempt = self.begin(AuthState::Matching)?;
        self.run_match(image)
    }

    fn run_match(&self, image: &Path) -> Result<AuthDecision, AuthError> {
        let query = MatchQuery {
            image,
            store: &self.settings.store_dir,
            model: &self.settings.model_name,
            detector: &self.settings.detector_backend,
            enforce_detection: self.settings.enforce_detection,
        };
        let outcome = self.matcher.find(&query).map_err(|e| {
            log::warn!("face matcher failed: {}", e);
            e
        })?;
        let decision = self.decide(outcome)?;
        log::info!("{}", decision);
        Ok(decision)
    }

    /// Apply the threshold to the top-ranked candidate.
    pub fn decide(&self, outcome: MatchOutcome) -> Result<AuthDecision, AuthError> {
        let Some(top) = outcome.top else {
            return Ok(AuthDecision::Denied(DenyReason::NotRecognized));
        };
        match top.distance {
            Some(distance) if distance.value <= self.settings.threshold => {
                Ok(AuthDecision::Granted {
                    label: top.label,
                    distance: Some(distance),
                })
            }
            Some(distance) => Ok(AuthDecision::Denied(DenyReason::AboveThreshold {
                label: top.label,
                distance,
                threshold: self.settings.threshold,
            })),
            None => match self.settings.missing_distance {
                MissingDistancePolicy::Accept => {
                    log::warn!("accepting {} without a distance", top.label);
                    Ok(AuthDecision::Granted {
                        label: top.label,
                        distance: None,
                    })
                }
                MissingDistancePolicy::Deny => {
                    Ok(AuthDecision::Denied(DenyReason::NoDistance { label: top.label }))
                }
                MissingDistancePolicy::Error => {
                    Err(AuthError::MissingDistance { label: top.label })
                }
            },
        }
    }
}
