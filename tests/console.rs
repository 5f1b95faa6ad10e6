use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use facegate::auth::MissingDistancePolicy;
use facegate::console::{run_auth_console, run_enroll_console};
use facegate::source::SourceSettings;
use facegate::{
    AuthSettings, Authenticator, FrameSource, IdentityStore, MatchOutcome, MatchQuery,
    MatcherError,
};
use image::{Rgb, RgbImage};

fn live_source() -> FrameSource {
    let source = FrameSource::spawn(
        || -> Result<RgbImage> { Ok(RgbImage::from_pixel(16, 12, Rgb([90, 120, 150]))) },
        SourceSettings {
            interval: Duration::from_millis(2),
            max_consecutive_failures: 10,
        },
    );
    source
        .receiver()
        .wait_newer(None, Duration::from_secs(5))
        .expect("fake camera produced no frame");
    source
}

fn dead_source() -> FrameSource {
    let source = FrameSource::spawn(
        || -> Result<RgbImage> { anyhow::bail!("no device") },
        SourceSettings {
            interval: Duration::from_millis(1),
            max_consecutive_failures: 1,
        },
    );
    source.receiver().wait_newer(None, Duration::from_secs(1));
    source
}

fn settings(store: &Path, temp: &Path) -> AuthSettings {
    AuthSettings {
        store_dir: store.to_path_buf(),
        threshold: 0.6,
        missing_distance: MissingDistancePolicy::Deny,
        model_name: "Facenet".into(),
        detector_backend: "mtcnn".into(),
        enforce_detection: false,
        temp_dir: Some(temp.to_path_buf()),
    }
}

fn auth_session(
    source: &FrameSource,
    outcome: MatchOutcome,
    script: &str,
) -> Result<String> {
    let store = tempfile::tempdir()?;
    let temp = tempfile::tempdir()?;
    let auth = Authenticator::new(
        move |_: &MatchQuery<'_>| -> Result<MatchOutcome, MatcherError> { Ok(outcome.clone()) },
        settings(store.path(), temp.path()),
    );
    let mut out = Vec::new();
    run_auth_console(&source.receiver(), &auth, Cursor::new(script), &mut out)?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn grant_opens_dashboard_until_logout() -> Result<()> {
    let source = live_source();
    let out = auth_session(
        &source,
        MatchOutcome::candidate("alice", Some(0.2)),
        "a\nhello\nlogout\nq\n",
    )?;
    assert!(out.contains("== Confidential Dashboard - alice =="));
    assert_eq!(
        out.matches("Welcome, alice! This is the confidential dashboard.")
            .count(),
        2
    );
    assert!(out.contains("Logged out."));
    Ok(())
}

#[test]
fn quitting_from_dashboard_ends_the_console() -> Result<()> {
    let source = live_source();
    let out = auth_session(
        &source,
        MatchOutcome::candidate("alice", Some(0.2)),
        "a\nq\na\n",
    )?;
    assert_eq!(out.matches("== Confidential Dashboard").count(), 1);
    Ok(())
}

#[test]
fn denial_is_reported_and_console_continues() -> Result<()> {
    let source = live_source();
    let out = auth_session(&source, MatchOutcome::none(), "a\na\nq\n")?;
    assert_eq!(
        out.matches("Access Denied: Face not recognized or not authorized")
            .count(),
        2
    );
    assert!(!out.contains("Dashboard"));
    Ok(())
}

#[test]
fn missing_frame_is_an_error_not_a_denial() -> Result<()> {
    let source = dead_source();
    let out = auth_session(
        &source,
        MatchOutcome::candidate("alice", Some(0.0)),
        "a\ns\nq\n",
    )?;
    assert!(out.contains("Error: No camera frame available"));
    assert!(out.contains("no frame yet, camera failed after 1 reads: no device"));
    assert!(!out.contains("Dashboard"));
    Ok(())
}

#[test]
fn status_reports_latest_frame() -> Result<()> {
    let source = live_source();
    let out = auth_session(&source, MatchOutcome::none(), "s\n")?;
    assert!(out.contains("16x12, camera healthy"));
    Ok(())
}

#[test]
fn enroll_saves_labelled_capture() -> Result<()> {
    let source = live_source();
    let dir = tempfile::tempdir()?;
    let store = IdentityStore::open(dir.path());
    let mut out = Vec::new();
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        None,
        Cursor::new("c\nalice\n"),
        &mut out,
    )?;
    assert_eq!(saved, Some(dir.path().join("alice.jpg")));
    let known = store.list()?;
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].label, "alice");
    assert!(String::from_utf8(out)?.contains("Saved"));
    Ok(())
}

#[test]
fn enroll_uses_default_label_on_empty_input() -> Result<()> {
    let source = live_source();
    let dir = tempfile::tempdir()?;
    let store = IdentityStore::open(dir.path());
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        Some("bob"),
        Cursor::new("c\n\n"),
        Vec::new(),
    )?;
    assert_eq!(saved, Some(dir.path().join("bob.jpg")));
    Ok(())
}

#[test]
fn enroll_without_label_discards_capture() -> Result<()> {
    let source = live_source();
    let dir = tempfile::tempdir()?;
    let store = IdentityStore::open(dir.path());
    let mut out = Vec::new();
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        None,
        Cursor::new("c\n   \nq\n"),
        &mut out,
    )?;
    assert_eq!(saved, None);
    assert!(store.list()?.is_empty());
    assert!(String::from_utf8(out)?.contains("capture discarded"));
    Ok(())
}

#[test]
fn enroll_quit_saves_nothing() -> Result<()> {
    let source = dead_source();
    let dir = tempfile::tempdir()?;
    let store = IdentityStore::open(dir.path());
    let mut out = Vec::new();
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        Some("carol"),
        Cursor::new("c\nq\n"),
        &mut out,
    )?;
    assert_eq!(saved, None);
    assert!(!dir.path().join("carol.jpg").exists());
    assert!(String::from_utf8(out)?.contains("No camera frame available"));
    Ok(())
}

#[test]
fn enroll_end_of_input_at_label_prompt_saves_nothing() -> Result<()> {
    let source = live_source();
    let dir = tempfile::tempdir()?;
    let store = IdentityStore::open(dir.path());
    let mut out = Vec::new();
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        Some("dave"),
        Cursor::new("c\n"),
        &mut out,
    )?;
    assert_eq!(saved, None);
    assert!(store.list()?.is_empty());
    assert!(String::from_utf8(out)?.contains("capture discarded"));
    Ok(())
}

#[test]
fn enroll_error_is_reported_once_with_its_cause() -> Result<()> {
    let source = live_source();
    let dir = tempfile::tempdir()?;
    // A regular file where the store directory should be.
    let blocked = dir.path().join("known");
    std::fs::write(&blocked, "")?;
    let store = IdentityStore::open(&blocked);
    let mut out = Vec::new();
    let saved = run_enroll_console(
        &source.receiver(),
        &store,
        None,
        Cursor::new("c\nerin\nq\n"),
        &mut out,
    )?;
    assert_eq!(saved, None);
    let out = String::from_utf8(out)?;
    let line = out
        .lines()
        .find(|l| l.contains("Error: creating"))
        .expect("error line");
    let path = blocked.display().to_string();
    assert_eq!(line.matches(&*path).count(), 1);
    let cause = line.split(&*path).nth(1).unwrap_or_default();
    assert!(cause.starts_with(": ") && cause.len() > 2, "{line}");
    Ok(())
}
