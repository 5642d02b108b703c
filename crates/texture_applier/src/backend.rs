use protocol::Snapshot;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{width}x{height} exceeds the backend's {max} texel limit")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("device error: {0}")]
    Device(String),
}

/// Owner of the live texture memory.
///
/// Every resource returned by `upload` must come back through `dispose`
/// exactly once.
pub trait TextureBackend {
    type Resource;

    fn upload(&self, snapshot: &Snapshot) -> Result<Self::Resource, BackendError>;

    fn dispose(&self, resource: Self::Resource);
}
