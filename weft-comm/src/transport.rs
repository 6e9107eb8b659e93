use thiserror::Error;

/// Index of one participant process, stable for the lifetime of the run.
/// Locale 0 is the coordinator for broadcast and shutdown sequencing.
pub type LocaleId = usize;

pub const COORDINATOR: LocaleId = 0;

/// Transport message tag. Messages are delivered by tag match, not queue
/// order; FIFO holds only per (sender, receiver, tag).
pub type Tag = u32;

/// Upper bound of the addressable tag space.
pub const TAG_MASK: Tag = 0x3F_FFFF;
/// Every data transfer is preceded by one envelope message on this tag.
pub const ENVELOPE_TAG: Tag = TAG_MASK + 1;
/// Collective broadcasts (global variables, barrier gating) use this tag.
pub const BCAST_TAG: Tag = TAG_MASK - 4;
/// Data tags are minted strictly below the reserved band.
pub const DATA_TAG_LIMIT: Tag = TAG_MASK - 9;

/// A transport primitive reported failure. The runtime assumes a reliable
/// transport: any reported failure is unrecoverable and is promoted to an
/// internal-fatal error naming the failing primitive.
#[derive(Debug, Error)]
#[error("transport {primitive} failed: {reason}")]
pub struct TransportError {
    pub primitive: &'static str,
    pub reason: String,
}

impl TransportError {
    pub fn new(primitive: &'static str, reason: impl Into<String>) -> TransportError {
        TransportError {
            primitive,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recv {
    pub source: LocaleId,
    pub len: usize,
}

/// Point-to-point tagged message passing plus the two collectives the
/// coordination protocol needs. Implementations must deliver messages
/// between a fixed (sender, receiver, tag) triple in FIFO order; no
/// ordering is guaranteed across distinct tags.
pub trait Transport: Send + Sync {
    /// This process's locale index within the group.
    fn locale(&self) -> LocaleId;

    /// Number of participants in the group.
    fn num_locales(&self) -> usize;

    fn send(&self, dest: LocaleId, tag: Tag, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until a message with `tag` arrives from `src` (or from anyone,
    /// when `src` is `None`); copy its payload into `buf` and return the
    /// source and payload length.
    fn recv(&self, src: Option<LocaleId>, tag: Tag, buf: &mut [u8]) -> Result<Recv, TransportError>;

    /// Deliver `bytes` on `tag` to every other member of the group.
    fn broadcast(&self, tag: Tag, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until `participants` group members have entered the barrier.
    fn barrier(&self, participants: usize) -> Result<(), TransportError>;
}

/// Uniform wrapper applied after every transport call; a mid-run transport
/// failure has no safe local recovery.
pub(crate) fn comm_check<T>(result: Result<T, TransportError>, context: &'static str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("fatal comm error in {context}: {e}"),
    }
}
