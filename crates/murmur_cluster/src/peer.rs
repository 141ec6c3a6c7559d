//! Peer identity: a unique name plus the peer wire address, carried in
//! the membership register as the element `name=host:port`.

use murmur_common::error::ClusterError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub name: String,
    pub addr: String,
}

impl Peer {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }

    /// The register element for this peer.
    pub fn element(&self) -> Vec<u8> {
        format!("{}={}", self.name, self.addr).into_bytes()
    }

    /// Parse a register element back into a peer.
    pub fn from_element(element: &[u8]) -> Result<Self, ClusterError> {
        let text = std::str::from_utf8(element)
            .map_err(|_| ClusterError::UnknownPeer(format!("{element:?}")))?;
        match text.split_once('=') {
            Some((name, addr)) if !name.is_empty() && !addr.is_empty() => {
                Ok(Self::new(name, addr))
            }
            _ => Err(ClusterError::UnknownPeer(text.to_string())),
        }
    }
}
