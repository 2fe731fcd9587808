#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: libp2p transport and the gossip broadcaster it backs.

pub mod gossip;
pub mod p2p_identity;
pub mod transport;
