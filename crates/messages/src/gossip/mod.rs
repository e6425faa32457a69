//! Gossip messages relayed peer-to-peer.
//!
//! Every hop is a point-to-point send over an authenticated link: the
//! receiver learns the sender's id from the transport, never from the message.

mod broadcast;

pub use broadcast::{BroadcastGossip, MessageError};
