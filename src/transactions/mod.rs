pub mod commitment;
pub mod fees;
pub mod htlc;

pub use commitment::*;
pub use fees::*;
pub use htlc::*;
