use std::collections::BTreeSet;

use crate::node::NodeId;
use crate::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// Pragmas alter downstream codegen policy without changing AST shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pragma {
    Inline,
    /// Function is the body of an asynchronous task launch.
    Begin,
    /// Function is the body of a remote-on statement.
    On,
    NoHeapAlloc,
    /// One independent copy of the variable per locale.
    Private,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarFlags {
    /// Compiler-synthesized temporary.
    pub is_temp: bool,
    /// May be folded to a compile-time constant.
    pub can_param: bool,
    /// May stand for a type.
    pub can_type: bool,
    /// Module-level configuration override.
    pub is_config: bool,
    pub is_const: bool,
    pub is_param: bool,
}

impl VarFlags {
    pub fn temp() -> VarFlags {
        VarFlags {
            is_temp: true,
            ..VarFlags::default()
        }
    }

    pub fn param_temp() -> VarFlags {
        VarFlags {
            is_temp: true,
            can_param: true,
            ..VarFlags::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Intent {
    #[default]
    Blank,
    ByValue,
    ByRef,
    TypeOnly,
}

#[derive(Clone, Debug, Default)]
pub struct ArgInfo {
    pub intent: Intent,
    pub flags: VarFlags,
    pub ty: Option<NodeId>,
    pub default: Option<NodeId>,
}

#[derive(Clone, Debug, Default)]
pub struct FnInfo {
    /// Return-intent: result is a compile-time constant.
    pub ret_param: bool,
    pub can_param: bool,
    pub can_type: bool,
    pub formals: Vec<SymbolId>,
    pub body: Option<NodeId>,
    /// Overload-resolution guard, stored as a single-statement block.
    pub where_clause: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub struct ModuleInfo {
    pub body: NodeId,
    pub init_fn: Option<SymbolId>,
    pub guard: Option<SymbolId>,
}

#[derive(Clone, Debug)]
pub enum SymbolKind {
    Var(VarFlags),
    Arg(ArgInfo),
    Fn(FnInfo),
    Module(ModuleInfo),
    Type,
    Label,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub pragmas: BTreeSet<Pragma>,
    pub span: Span,
}

impl Symbol {
    pub fn has_pragma(&self, p: Pragma) -> bool {
        self.pragmas.contains(&p)
    }
}

/// Fresh-name context for compiler-synthesized symbols.
///
/// Counters are per prefix, so `_if_fn1` and `_let_fn1` can coexist while
/// two if-expressions never share a name.
#[derive(Debug, Default)]
pub struct NameGen {
    counters: std::collections::BTreeMap<String, u32>,
}

impl NameGen {
    pub fn next(&mut self, prefix: &str) -> u32 {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.next(prefix);
        format!("{prefix}{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_unique_per_prefix() {
        let mut names = NameGen::default();
        assert_eq!(names.fresh("_if_fn"), "_if_fn1");
        assert_eq!(names.fresh("_if_fn"), "_if_fn2");
        assert_eq!(names.fresh("_let_fn"), "_let_fn1");
    }
}
