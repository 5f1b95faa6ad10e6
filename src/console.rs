//! Line-oriented operator surface for authentication and enrollment.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use facegate_vision::{FrameReceiver, Health};

use crate::auth::{AuthDecision, Authenticator};
use crate::dashboard::{Dashboard, SessionIdentity};
use crate::matcher::FaceMatcher;
use crate::store::IdentityStore;

fn read_command<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_ascii_lowercase()))
}

fn describe_health(health: &Health) -> String {
    match health {
        Health::Starting => "starting".into(),
        Health::Healthy => "healthy".into(),
        Health::Degraded {
            consecutive_failures,
        } => format!("degraded ({consecutive_failures} failed reads)"),
        Health::Failed {
            consecutive_failures,
            last_error,
        } => format!("failed after {consecutive_failures} reads: {last_error}"),
        Health::Stopped => "stopped".into(),
    }
}

fn write_status<W: Write>(frames: &FrameReceiver, out: &mut W) -> io::Result<()> {
    match frames.latest() {
        Some(frame) => writeln!(
            out,
            "frame #{} {}x{}, camera {}",
            frame.seq,
            frame.image.width(),
            frame.image.height(),
            describe_health(&frames.health())
        ),
        None => writeln!(
            out,
            "no frame yet, camera {}",
            describe_health(&frames.health())
        ),
    }
}

/// Stay in the dashboard until the operator logs out. Returns `false` when
/// the operator quit instead.
fn dashboard_session<R: BufRead, W: Write>(
    dashboard: Dashboard,
    input: &mut R,
    out: &mut W,
) -> io::Result<bool> {
    writeln!(out, "== {} ==", dashboard.title())?;
    writeln!(out, "{}", dashboard.welcome())?;
    loop {
        write!(out, "[{}] logout or [q]uit> ", dashboard.user())?;
        out.flush()?;
        match read_command(input)?.as_deref() {
            Some("logout") | Some("l") => {
                dashboard.close();
                writeln!(out, "Logged out.")?;
                return Ok(true);
            }
            Some("q") | Some("quit") | None => {
                dashboard.close();
                return Ok(false);
            }
            Some(_) => writeln!(out, "{}", dashboard.welcome())?,
        }
    }
}

pub fn run_auth_console<M, R, W>(
    frames: &FrameReceiver,
    auth: &Authenticator<M>,
    mut input: R,
    mut out: W,
) -> io::Result<()>
where
    M: FaceMatcher,
    R: BufRead,
    W: Write,
{
    loop {
        write!(out, "[a]uthenticate, [s]tatus, [q]uit> ")?;
        out.flush()?;
        let Some(cmd) = read_command(&mut input)? else {
            return Ok(());
        };
        match cmd.as_str() {
            "a" | "authenticate" | "" => {
                let frame = frames.latest();
                match auth.authenticate(frame.as_ref().map(|f| &*f.image)) {
                    Ok(AuthDecision::Granted { label, .. }) => {
                        let dashboard = Dashboard::open(SessionIdentity::new(label));
                        if !dashboard_session(dashboard, &mut input, &mut out)? {
                            return Ok(());
                        }
                    }
                    Ok(AuthDecision::Denied(reason)) => {
                        writeln!(out, "Access Denied: {reason}")?;
                    }
                    Err(e) => {
                        let e = anyhow::Error::new(e);
                        log::error!("authentication failed: {:#}", e);
                        writeln!(out, "Error: {e:#}")?;
                    }
                }
            }
            "s" | "status" => write_status(frames, &mut out)?,
            "q" | "quit" => return Ok(()),
            other => writeln!(out, "unknown command {other:?}")?,
        }
    }
}

/// Capture one labelled reference image. Returns the saved path, or `None`
/// if the operator quit without capturing.
pub fn run_enroll_console<R, W>(
    frames: &FrameReceiver,
    store: &IdentityStore,
    default_label: Option<&str>,
    mut input: R,
    mut out: W,
) -> io::Result<Option<PathBuf>>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(out, "[c]apture, [s]tatus, [q]uit> ")?;
        out.flush()?;
        let Some(cmd) = read_command(&mut input)? else {
            return Ok(None);
        };
        match cmd.as_str() {
            "c" | "capture" => {
                // Hold on to the frame that was current when the operator asked.
                let Some(frame) = frames.latest() else {
                    writeln!(out, "No camera frame available")?;
                    continue;
                };
                match default_label {
                    Some(d) => write!(out, "Enter label for this face [{d}]: ")?,
                    None => write!(out, "Enter label for this face (e.g. alice): ")?,
                }
                out.flush()?;
                let mut line = String::new();
                if input.read_line(&mut line)? == 0 {
                    writeln!(out)?;
                    writeln!(out, "Input closed, capture discarded.")?;
                    return Ok(None);
                }
                let label = match (line.trim(), default_label) {
                    ("", Some(d)) => d.to_string(),
                    ("", None) => {
                        writeln!(out, "No label given, capture discarded.")?;
                        continue;
                    }
                    (l, _) => l.to_string(),
                };
                match store.enroll(&label, &frame.image) {
                    Ok(path) => {
                        writeln!(out, "Saved {}", path.display())?;
                        return Ok(Some(path));
                    }
                    Err(e) => writeln!(out, "Error: {:#}", anyhow::Error::new(e))?,
                }
            }
            "s" | "status" => write_status(frames, &mut out)?,
            "q" | "quit" => return Ok(None),
            other => writeln!(out, "unknown command {other:?}")?,
        }
    }
}
