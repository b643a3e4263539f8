//! # symbols
//! Seam for mapping an origin program counter to a source location. The
//! collaborator that loads the tracker supplies a resolver wired to its
//! debug-symbol machinery; the default resolves nothing and reports fall
//! back to raw program counters.
use core::fmt::{self, Debug};

use crate::Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

pub trait Symbols: Debug + Send + Sync {
    fn resolve(&self, pc: Addr) -> Option<SourceLocation>;
}

#[derive(Debug, Copy, Clone, Default)]
pub struct NopSymbols;

impl Symbols for NopSymbols {
    fn resolve(&self, _pc: Addr) -> Option<SourceLocation> {
        None
    }
}
