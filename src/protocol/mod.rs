// src/protocol/mod.rs

//! The wire protocol spoken with monitored nodes and peer monitors.

pub mod resp;

pub use resp::{RespFrame, RespFrameCodec};
