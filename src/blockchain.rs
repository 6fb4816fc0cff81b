// Thin re-export module: implementation is in `blockchain/core.rs` to allow
// progressive decomposition of blockchain responsibilities (validation,
// fork tracking, rebranching).

pub mod core;
pub use self::core::*;
