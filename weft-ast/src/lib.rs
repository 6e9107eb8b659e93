#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn no_span() -> Span {
    span(0, 0)
}

mod arena;
mod node;
mod symbol;

pub use arena::Arena;
pub use node::{BlockTag, Callee, Lit, Node, NodeId, NodeKind, PrimOp, SymRef};
pub use symbol::{
    ArgInfo, FnInfo, Intent, ModuleInfo, NameGen, Pragma, Symbol, SymbolId, SymbolKind, VarFlags,
};
