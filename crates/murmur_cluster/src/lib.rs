//! Cluster layer: who is in the cluster, who owns which table, and how
//! requests reach the owner.
//!
//! Membership is SWIM-style (direct ping, indirect ping through
//! witnesses, anti-entropy gossip) over a last-writer-wins register
//! stamped by a hybrid logical clock. Table ownership is a Maglev hash
//! table rebuilt on every membership change. The router consults the
//! table and either coordinates locally or forwards the batch to the
//! leaseholder.

pub mod crdt;
pub mod hlc;
pub mod maglev;
pub mod membership;
pub mod peer;
pub mod router;
pub mod transport;

pub use crdt::LwwRegister;
pub use hlc::{Hlc, HlcTimestamp};
pub use maglev::Maglev;
pub use membership::Membership;
pub use peer::Peer;
pub use router::Router;
pub use transport::{BatchRequest, BatchResponse, Op, PeerTransport, ResponseStatus, WireState};
