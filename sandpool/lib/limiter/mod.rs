//! Rate and concurrency admission control.

mod rate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use rate::*;
