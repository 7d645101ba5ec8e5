//! Simulated collaborators for the fwpcm negotiation core

pub mod firewire;
