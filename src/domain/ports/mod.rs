//! Protocol Ports
//!
//! The seams between the protocol core and its collaborators: the store
//! binding a concrete database implements, the conflict policy a caller
//! supplies, and the provider surface a host consumes.

mod conflict;
mod provider;
mod store_binding;

pub use conflict::{ConflictResolution, ConflictResolver};
pub use provider::SyncProvider;
pub use store_binding::{PeerState, StoreBinding, StoreSession, TxnMode};
