//! Stack model
//!
//! Typed settings parsed from the stack file. Defaults reproduce a small
//! two-zone web stack on Amazon Linux 2.

mod compute;
mod network;
mod stack;

pub use compute::*;
pub use network::*;
pub use stack::*;
