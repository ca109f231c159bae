//! Configuration types and environment loading.

mod defaults;
mod orchestrator;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use orchestrator::*;
