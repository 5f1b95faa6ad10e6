pub mod model;
pub mod probe;
pub mod source;
pub mod video;

// Re-export commonly used types
pub use model::Embedding;
pub use ort::session::Session;
pub use probe::{probe_devices, ProbeResult};
pub use source::{Frame, FrameGrabber, FrameReceiver, FrameSource, Health, SourceSettings};
pub use video::Camera;
