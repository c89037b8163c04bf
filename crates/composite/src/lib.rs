#![doc = include_str!("../README.md")]

pub mod error;
pub mod function;
pub mod oidmap;
pub mod request;
pub mod rpn;
pub mod tree;

mod scan;
mod value;

// --- 주요 타입 re-export ---

pub use error::CompositeError;
pub use function::{FnCtx, FunctionTable};
pub use oidmap::OidMap;
pub use request::{CompositeEngine, CompositeRequest, DEFAULT_PERIOD};
pub use rpn::RpnProgram;
pub use tree::{RowCell, SampleLeaf, Tree};
