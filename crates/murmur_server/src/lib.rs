//! Network edge: the line protocol clients speak, the JSON wire peers
//! speak, and the node wiring behind `murmurd`.

pub mod client;
pub mod json_transport;
pub mod peer_server;
pub mod statement;
