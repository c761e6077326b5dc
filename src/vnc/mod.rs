//! VNC/RFB crate: sub-modules.

pub mod audio;
pub mod auth;
pub mod encoding;
pub mod error;
pub mod framebuffer;
pub mod protocol;
pub mod session;
pub mod types;
pub mod zlib;

// Re-export top-level items for convenience.
pub use audio::{AudioFormat, AudioSink, NullAudioSink};
pub use error::{CertProblem, VncError};
pub use framebuffer::{Framebuffer, RgbaBuffer};
pub use session::{SessionCommand, SessionEvent, VncSessionHandle};
pub use types::*;
