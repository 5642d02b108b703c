//! Editing-session wiring for the skin studio: one surface, one scheduler,
//! one sync bridge and a performance monitor, driven by the host's frame
//! callback.

pub mod config;
pub mod logging;
pub mod mirror;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use mirror::MirrorCanvas;
pub use session::{EditorSession, FrameReport, SessionDiagnostics};
