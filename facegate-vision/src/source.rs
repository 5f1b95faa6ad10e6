//! Background frame sampling with a single-slot latest-value channel.
//!
//! The sampling thread owns the grabber (and therefore the camera device)
//! for its whole lifetime. Consumers only ever see the most recent frame;
//! anything they did not pick up in time is overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

/// Anything that can produce RGB frames on demand.
pub trait FrameGrabber: Send {
    fn grab(&mut self) -> Result<RgbImage>;
}

impl<F> FrameGrabber for F
where
    F: FnMut() -> Result<RgbImage> + Send,
{
    fn grab(&mut self) -> Result<RgbImage> {
        self()
    }
}

/// A published frame. `seq` increases by one per successful grab.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub image: Arc<RgbImage>,
}

/// Camera health as observed by the sampling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Starting,
    Healthy,
    Degraded { consecutive_failures: u32 },
    Failed { consecutive_failures: u32, last_error: String },
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub interval: Duration,
    /// Consecutive grab failures tolerated before the source gives up.
    pub max_consecutive_failures: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30),
            max_consecutive_failures: 100,
        }
    }
}

struct Slot {
    latest: Option<Frame>,
    health: Health,
}

struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A poisoned slot still holds a valid frame; keep serving it.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_health(&self, health: Health) {
        let mut slot = self.lock();
        if slot.health != health {
            slot.health = health;
            self.changed.notify_all();
        }
    }
}

/// Read side of the latest-value channel. Cheap to clone.
#[derive(Clone)]
pub struct FrameReceiver {
    shared: Arc<Shared>,
}

impl FrameReceiver {
    /// The most recent frame, if any has been captured yet.
    pub fn latest(&self) -> Option<Frame> {
        self.shared.lock().latest.clone()
    }

    pub fn health(&self) -> Health {
        self.shared.lock().health.clone()
    }

    /// Block until a frame newer than `after` is published, the source
    /// stops, or `timeout` elapses.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if let Some(frame) = &slot.latest {
                if after.map_or(true, |seq| frame.seq > seq) {
                    return Some(frame.clone());
                }
            }
            if matches!(slot.health, Health::Failed { .. } | Health::Stopped) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .shared
                .changed
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

/// Handle to a running sampling thread. Dropping it stops the thread and
/// releases the grabber.
pub struct FrameSource {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FrameSource {
    pub fn spawn<G>(grabber: G, settings: SourceSettings) -> Self
    where
        G: FrameGrabber + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                latest: None,
                health: Health::Starting,
            }),
            changed: Condvar::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("frame-source".into())
                .spawn(move || sample_loop(grabber, settings, &shared, &stop))
                .ok()
        };
        if thread.is_none() {
            shared.set_health(Health::Failed {
                consecutive_failures: 0,
                last_error: "failed to spawn sampling thread".into(),
            });
        }
        Self {
            shared,
            stop,
            thread,
        }
    }

    pub fn receiver(&self) -> FrameReceiver {
        FrameReceiver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop sampling and wait for the thread to release the grabber.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("frame source thread panicked");
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_loop<G: FrameGrabber>(
    mut grabber: G,
    settings: SourceSettings,
    shared: &Shared,
    stop: &AtomicBool,
) {
    let mut seq = 0u64;
    let mut failures = 0u32;

    while !stop.load(Ordering::Relaxed) {
        match grabber.grab() {
            Ok(image) => {
                if failures > 0 {
                    log::info!("camera recovered after {} failed read(s)", failures);
                }
                failures = 0;
                seq += 1;
                let mut slot = shared.lock();
                slot.latest = Some(Frame {
                    seq,
                    image: Arc::new(image),
                });
                slot.health = Health::Healthy;
                shared.changed.notify_all();
            }
            Err(e) => {
                failures += 1;
                log::debug!("frame read failed ({}): {:#}", failures, e);
                if failures >= settings.max_consecutive_failures {
                    log::warn!(
                        "camera failed {} consecutive reads, giving up: {:#}",
                        failures,
                        e
                    );
                    shared.set_health(Health::Failed {
                        consecutive_failures: failures,
                        last_error: format!("{e:#}"),
                    });
                    return;
                }
                shared.set_health(Health::Degraded {
                    consecutive_failures: failures,
                });
            }
        }
        thread::sleep(settings.interval);
    }

    drop(grabber);
    shared.set_health(Health::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn solid(v: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, image::Rgb([v, v, v]))
    }

    fn fast(max_failures: u32) -> SourceSettings {
        SourceSettings {
            interval: Duration::from_millis(1),
            max_consecutive_failures: max_failures,
        }
    }

    #[test]
    fn publishes_latest_frame() {
        let mut n = 0u8;
        let source = FrameSource::spawn(
            move || -> Result<RgbImage> {
                n = n.wrapping_add(1);
                Ok(solid(n))
            },
            fast(10),
        );
        let rx = source.receiver();
        let first = rx.wait_newer(None, Duration::from_secs(2)).unwrap();
        let later = rx.wait_newer(Some(first.seq + 3), Duration::from_secs(2)).unwrap();
        assert!(later.seq > first.seq + 3);
        assert_eq!(rx.health(), Health::Healthy);
        source.stop();
        assert_eq!(rx.health(), Health::Stopped);
    }

    #[test]
    fn transient_failures_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = FrameSource::spawn(
            move || -> Result<RgbImage> {
                let i = counter.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    anyhow::bail!("dropout")
                }
                Ok(solid(1))
            },
            fast(3),
        );
        let rx = source.receiver();
        let frame = rx.wait_newer(Some(4), Duration::from_secs(2)).unwrap();
        assert!(frame.seq > 4);
        assert!(!matches!(rx.health(), Health::Failed { .. }));
    }

    #[test]
    fn gives_up_after_failure_budget() {
        let source = FrameSource::spawn(
            || -> Result<RgbImage> { anyhow::bail!("unplugged") },
            fast(5),
        );
        let rx = source.receiver();
        assert!(rx.wait_newer(None, Duration::from_secs(2)).is_none());
        match rx.health() {
            Health::Failed {
                consecutive_failures,
                last_error,
            } => {
                assert_eq!(consecutive_failures, 5);
                assert!(last_error.contains("unplugged"));
            }
            other => panic!("unexpected health {other:?}"),
        }
        assert!(rx.latest().is_none());
    }

    struct Tracked(Arc<AtomicBool>);

    impl FrameGrabber for Tracked {
        fn grab(&mut self) -> Result<RgbImage> {
            Ok(solid(0))
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_releases_grabber() {
        let released = Arc::new(AtomicBool::new(false));
        let source = FrameSource::spawn(Tracked(Arc::clone(&released)), fast(1));
        source.receiver().wait_newer(None, Duration::from_secs(2));
        source.stop();
        assert!(released.load(Ordering::SeqCst));
    }
}
