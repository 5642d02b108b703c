use protocol::Version;

/// The live texture and the version it holds.
///
/// `applied_version` never goes backwards, even after the live resource is
/// taken out for teardown.
#[derive(Debug)]
pub struct TextureSlot<R> {
    applied: Version,
    live: Option<R>,
}

/// What the caller must do after [`TextureSlot::offer`]: whichever resource
/// is handed back is no longer referenced by the slot and must be disposed.
#[derive(Debug)]
pub enum SlotOffer<R> {
    Accepted { replaced: Option<(Version, R)> },
    Rejected { applied: Version, resource: R },
}

impl<R> Default for TextureSlot<R> {
    fn default() -> Self {
        Self {
            applied: Version::ZERO,
            live: None,
        }
    }
}

impl<R> TextureSlot<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_version(&self) -> Version {
        self.applied
    }

    pub fn live(&self) -> Option<(Version, &R)> {
        self.live.as_ref().map(|resource| (self.applied, resource))
    }

    /// Installs `resource` iff `version` is strictly newer than the live one.
    pub fn offer(&mut self, version: Version, resource: R) -> SlotOffer<R> {
        let applied = self.applied_version();
        if version <= applied {
            return SlotOffer::Rejected { applied, resource };
        }
        self.applied = version;
        SlotOffer::Accepted {
            replaced: self
                .live
                .replace(resource)
                .map(|previous| (applied, previous)),
        }
    }

    pub fn take(&mut self) -> Option<(Version, R)> {
        self.live.take().map(|resource| (self.applied, resource))
    }
}
