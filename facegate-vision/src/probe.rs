//! One-shot camera index probe, used to pick the `camera` config value.

use v4l::Device;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub index: usize,
    pub path: String,
    /// Card name on success, error text otherwise.
    pub outcome: Result<String, String>,
}

impl ProbeResult {
    pub fn is_available(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Try to open `/dev/video0` .. `/dev/video{count-1}`. Each device is closed
/// again before the next index is tried.
pub fn probe_devices(count: usize) -> Vec<ProbeResult> {
    (0..count).map(probe_index).collect()
}

pub fn probe_index(index: usize) -> ProbeResult {
    let path = format!("/dev/video{index}");
    let outcome = Device::new(index)
        .and_then(|dev| dev.query_caps())
        .map(|caps| format!("{} ({})", caps.card, caps.driver))
        .map_err(|e| e.to_string());
    match &outcome {
        Ok(card) => log::debug!("{} available: {}", path, card),
        Err(e) => log::debug!("{} unavailable: {}", path, e),
    }
    ProbeResult {
        index,
        path,
        outcome,
    }
}
