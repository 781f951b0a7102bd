//! The transfer engine: wire-level handshake/teardown shared by both ARQ
//! strategies, plus the Stop-and-Wait and Selective Repeat implementations
//! themselves (§4.3, §4.4, §4.5).

pub mod common;
pub mod saw;
pub mod sr;
