use crate::symbol::SymbolId;
use crate::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// The primitive-operation vocabulary every surface construct lowers into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimOp {
    Move,
    Return,
    Yield,
    GetRef,
    SetRef,
    LogicalFolder,
    CondTest,
    CondInvalid,
    Error,
    When,
    IsTuple,
    Typeof,
    New,
    Init,
    GetEndCount,
    SetEndCount,
    GetSerial,
    SetSerial,
    GetLocale,
    LoopWhileDo,
    LoopDoWhile,
    LoopParam,
    LoopFor,
}

impl PrimOp {
    pub fn name(self) -> &'static str {
        match self {
            PrimOp::Move => "move",
            PrimOp::Return => "return",
            PrimOp::Yield => "yield",
            PrimOp::GetRef => "get ref",
            PrimOp::SetRef => "set ref",
            PrimOp::LogicalFolder => "fold logical",
            PrimOp::CondTest => "cond test",
            PrimOp::CondInvalid => "cond invalid",
            PrimOp::Error => "error",
            PrimOp::When => "when",
            PrimOp::IsTuple => "is tuple",
            PrimOp::Typeof => "typeof",
            PrimOp::New => "new",
            PrimOp::Init => "init",
            PrimOp::GetEndCount => "get end count",
            PrimOp::SetEndCount => "set end count",
            PrimOp::GetSerial => "get serial",
            PrimOp::SetSerial => "set serial",
            PrimOp::GetLocale => "get locale",
            PrimOp::LoopWhileDo => "loop while do",
            PrimOp::LoopDoWhile => "loop do while",
            PrimOp::LoopParam => "loop param",
            PrimOp::LoopFor => "loop for",
        }
    }

    pub fn from_name(name: &str) -> Option<PrimOp> {
        const ALL: &[PrimOp] = &[
            PrimOp::Move,
            PrimOp::Return,
            PrimOp::Yield,
            PrimOp::GetRef,
            PrimOp::SetRef,
            PrimOp::LogicalFolder,
            PrimOp::CondTest,
            PrimOp::CondInvalid,
            PrimOp::Error,
            PrimOp::When,
            PrimOp::IsTuple,
            PrimOp::Typeof,
            PrimOp::New,
            PrimOp::Init,
            PrimOp::GetEndCount,
            PrimOp::SetEndCount,
            PrimOp::GetSerial,
            PrimOp::SetSerial,
            PrimOp::GetLocale,
            PrimOp::LoopWhileDo,
            PrimOp::LoopDoWhile,
            PrimOp::LoopParam,
            PrimOp::LoopFor,
        ];
        ALL.iter().copied().find(|p| p.name() == name)
    }
}

/// How a block behaves with respect to scoping, looping, and task launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    Plain,
    /// Statement wrapper that introduces no scope of its own.
    Scopeless,
    Normal,
    /// Body of an asynchronous task launch.
    Begin,
    /// Body executed on a remote locale.
    On,
    Serial,
    WhileDo,
    DoWhile,
    ParamFor,
    For,
    Forall,
    Coforall,
    /// Evaluated for type inference only; produces no runtime code.
    TypeOnly,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Lit {
    Int(i64),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymRef {
    /// Reference to a known symbol.
    Id(SymbolId),
    /// Name left for a later resolution pass.
    Unresolved(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Callee {
    Prim(PrimOp),
    Named(String),
    Sym(SymbolId),
    Expr(NodeId),
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Block {
        tag: BlockTag,
        body: Vec<NodeId>,
        /// Loop-descriptor primitive call for loop-carrying blocks.
        loop_info: Option<NodeId>,
        pre_loop: Option<SymbolId>,
        post_loop: Option<SymbolId>,
    },
    Cond {
        cond: NodeId,
        then_stmt: NodeId,
        else_stmt: Option<NodeId>,
    },
    Call {
        callee: Callee,
        args: Vec<NodeId>,
    },
    SymUse(SymRef),
    Def {
        sym: SymbolId,
        init: Option<NodeId>,
        ty: Option<NodeId>,
    },
    Label(SymbolId),
    Lit(Lit),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub span: Span,
}
