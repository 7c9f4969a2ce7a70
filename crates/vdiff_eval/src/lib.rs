//! MySQL-compatible comparison and coercion kernel.
//!
//! This crate is the equality oracle used by the diff engine and the local
//! predicate evaluator used by the query layer. The API surface is
//! intentionally small: callers build [`Value`]s, then either ask for an
//! ordered comparison ([`compare`]) or evaluate a full three-valued
//! comparison operator ([`evaluate`]). Type coercion follows the MySQL §12
//! type-conversion rules: integers compare as integers, anything touching a
//! float compares as a double, decimal-vs-integer compares as decimal, and
//! everything else falls back to floating point.

mod arith;
mod compare;
mod error;
mod eval;
mod like;
mod value;

pub use arith::{arithmetic, ArithOp};
pub use compare::{compare, null_safe_equal, row_key_cmp};
pub use error::EvalError;
pub use eval::{evaluate, CmpOp, Truth};
pub use value::{Collation, Value};
