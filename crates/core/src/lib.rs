//! Sample-rate/channel negotiation and duplex stream lifecycle for
//! multichannel audio interfaces.

pub mod domain;
