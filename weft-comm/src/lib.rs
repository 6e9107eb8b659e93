#![forbid(unsafe_code)]

mod locale;
mod mem;
mod memory;
mod message;
mod transport;

pub use locale::{
    CommCounters, Locale, RemoteRef, BARRIER_BEFORE_MAIN, BARRIER_EXIT_ALL, SLOT_COMM_DIAGNOSTICS,
    SLOT_VERBOSE_COMM,
};
pub use mem::{MemHub, MemTransport};
pub use memory::{AddressSpace, CommFn, FnId, FnTable, GlobalsRegistry, PrivateTable};
pub use message::{CodecError, Envelope, MsgKind, TagGen, Target};
pub use transport::{
    LocaleId, Recv, Tag, Transport, TransportError, BCAST_TAG, COORDINATOR, DATA_TAG_LIMIT,
    ENVELOPE_TAG, TAG_MASK,
};
