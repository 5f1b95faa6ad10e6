pub mod auth;
pub mod config;
pub mod console;
pub mod dashboard;
pub mod identity;
pub mod matcher;
pub mod store;

// Re-export vision types for convenience
pub use facegate_vision::{probe, source, video, Camera, Frame, FrameReceiver, FrameSource, Health};

pub use auth::{AuthDecision, AuthError, AuthSettings, Authenticator, DenyReason};
pub use matcher::{FaceMatcher, MatchOutcome, MatchQuery, MatcherError};
pub use store::{IdentityStore, KnownIdentity};

