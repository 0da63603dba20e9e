//! Declarative boolean tags and queries over the transcript model.
//!
//! Tags are named expressions (`HIGH_COVER`, `INTERNAL_PRIMING`, ...)
//! registered per context; queries are one-off expressions compiled
//! against the registry. See [`parser`] for the grammar and [`core`] for
//! registration, validation and evaluation semantics.

pub mod core;
pub mod parser;

pub use crate::core::{CompiledQuery, FilterContext, FilterError, FilterRegistry, PropValue};
pub use crate::parser::{parse, CmpOp, Expr, Literal};
