// core.rs splits responsibilities into submodules for easier maintenance.
pub mod chain;
pub mod chain_data;
pub mod validation;

pub use chain::*;
pub use chain_data::*;
pub use validation::*;
