//! Tree layout lives in `flowsplit_core::layout` so the rebuild engine can share it
//! without depending on this crate. Re-exported here under the name the rest of this
//! crate already uses.
pub use flowsplit_core::layout::*;
