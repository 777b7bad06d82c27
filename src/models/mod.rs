//! Passive data types shared by the codecs and the filter VM.

pub mod bgp;
pub mod mrt;
pub mod network;

pub use bgp::*;
pub use mrt::*;
pub use network::*;
