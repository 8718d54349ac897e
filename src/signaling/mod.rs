//! Offer/answer exchange with each viewer over a message channel.

pub mod channel;
pub mod message;
pub mod session;
