//! # Backend Emission
//!
//! Backends consume [`ResolvedFunction`]s only; nothing from an unresolved
//! context ever reaches them.

mod bytecode;
mod rust_codegen;

pub use bytecode::*;
pub use rust_codegen::*;

use crate::error::Result;
use crate::resolution::ResolvedFunction;

/// Turns resolved functions into an output artifact
pub trait Backend {
    type Artifact;

    fn emit(&mut self, function: &ResolvedFunction) -> Result<Self::Artifact>;

    fn emit_all(&mut self, functions: &[ResolvedFunction]) -> Result<Vec<Self::Artifact>> {
        functions.iter().map(|f| self.emit(f)).collect()
    }
}
