use weft_ast::{
    Arena, BlockTag, Callee, ModuleInfo, NameGen, NodeId, NodeKind, PrimOp, Span, SymbolId,
    SymbolKind, VarFlags,
};

use crate::error::{LowerError, Warning};

/// Builder context for one translation unit.
///
/// Owns the fresh-name counters and the warning sink; every surface
/// construct has one entry point here (spread across the sibling modules).
/// Lowering is a single-threaded synchronous pass; recursion depth equals
/// the nesting depth of the construct being lowered.
pub struct Lowerer<'a> {
    pub arena: &'a mut Arena,
    pub(crate) names: NameGen,
    warnings: Vec<Warning>,
    /// Single-locale compilation: `on` statements degrade to plain blocks.
    pub local: bool,
    pub(crate) program_module: SymbolId,
    pub(crate) init_module_guards: Option<SymbolId>,
    pub(crate) module_number: u32,
}

impl<'a> Lowerer<'a> {
    pub fn new(arena: &'a mut Arena) -> Lowerer<'a> {
        let span = weft_ast::no_span();
        let body = arena.block(BlockTag::Normal, span);
        let init_fn = arena.func("__init__program", span);
        let program_module = arena.new_symbol(
            "_program",
            SymbolKind::Module(ModuleInfo {
                body,
                init_fn: Some(init_fn),
                guard: None,
            }),
            span,
        );
        let init_def = arena.def(init_fn, None, None, span);
        arena.insert_at_head(body, init_def);
        // Force the body block into existence so later head-inserts line up.
        arena.fn_body(init_fn);
        Lowerer {
            arena,
            names: NameGen::default(),
            warnings: Vec::new(),
            local: false,
            program_module,
            init_module_guards: None,
            module_number: 0,
        }
    }

    pub fn program_module(&self) -> SymbolId {
        self.program_module
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.warnings.push(Warning {
            message: message.into(),
            span,
        });
    }

    // ---- shared fragment helpers ----

    pub(crate) fn temp(&mut self, name: &str, span: Span) -> SymbolId {
        self.arena.var(name, VarFlags::temp(), span)
    }

    pub(crate) fn param_temp(&mut self, name: &str, span: Span) -> SymbolId {
        self.arena.var(name, VarFlags::param_temp(), span)
    }

    /// `move dst, src` — the primitive assignment every construct bottoms
    /// out in.
    pub(crate) fn move_into(&mut self, dst: SymbolId, src: NodeId, span: Span) -> NodeId {
        let d = self.arena.sym_use(dst, span);
        self.arena.call_prim(PrimOp::Move, vec![d, src], span)
    }

    /// Scopeless statement wrapper.
    pub fn stmt_block(&mut self, span: Span) -> NodeId {
        self.arena.block(BlockTag::Scopeless, span)
    }

    pub fn stmt_block_of(&mut self, stmt: NodeId) -> NodeId {
        let span = self.arena.span_of(stmt);
        let block = self.stmt_block(span);
        self.arena.insert_at_tail(block, stmt);
        block
    }

    /// Member access: a `.` call carrying the member name as a string.
    pub fn dot(&mut self, base: NodeId, member: &str) -> NodeId {
        let span = self.arena.span_of(base);
        let m = self.arena.str_lit(member, span);
        self.arena.call_named(".", vec![base, m], span)
    }

    /// A call whose callee is the inline definition of a synthesized
    /// function.
    pub(crate) fn fn_def_call(&mut self, f: SymbolId, span: Span) -> NodeId {
        let d = self.arena.def(f, None, None, span);
        self.arena.call(Callee::Expr(d), vec![], span)
    }

    /// Mint the paired entry/exit labels every loop form carries for
    /// non-local exits to target.
    pub(crate) fn loop_labels(&mut self, body: NodeId, span: Span) -> (SymbolId, SymbolId) {
        let n = self.names.next("_loop");
        let pre = self.arena.label_sym(format!("_pre_loop{n}"), span);
        let post = self.arena.label_sym(format!("_post_loop{n}"), span);
        self.arena.set_loop_labels(body, pre, post);
        (pre, post)
    }

    /// Build a primitive call from a name-first argument list, as delivered
    /// by the parser for `__primitive("name", ...)` syntax.
    pub fn primitive_call(&mut self, mut args: Vec<NodeId>) -> Result<NodeId, LowerError> {
        if args.is_empty() {
            return Err(LowerError::internal(
                "primitive has no name",
                weft_ast::no_span(),
            ));
        }
        let name_node = args.remove(0);
        let span = self.arena.span_of(name_node);
        let NodeKind::Lit(weft_ast::Lit::Str(name)) = &self.arena.node(name_node).kind else {
            return Err(LowerError::internal(
                "primitive with non-literal string name",
                span,
            ));
        };
        let Some(op) = PrimOp::from_name(name) else {
            return Err(LowerError::internal(
                format!("primitive not found '{name}'"),
                span,
            ));
        };
        Ok(self.arena.call_prim(op, args, span))
    }

    /// Fill initializer/type expressions right-to-left across a
    /// multi-variable declaration, so `var a, b, c = 0` gives every name
    /// the trailing init.
    pub fn back_propagate_inits_types(&mut self, decls: NodeId) -> Result<(), LowerError> {
        let body: Vec<NodeId> = self.arena.block_body(decls).to_vec();
        let mut init: Option<NodeId> = None;
        let mut ty: Option<NodeId> = None;
        for &stmt in body.iter().rev() {
            let span = self.arena.span_of(stmt);
            let NodeKind::Def {
                init: cur_init,
                ty: cur_ty,
                ..
            } = self.arena.node(stmt).kind.clone()
            else {
                return Err(LowerError::internal(
                    "non-definition in multi-variable declaration",
                    span,
                ));
            };
            if cur_init.is_some() || cur_ty.is_some() {
                init = cur_init;
                ty = cur_ty;
                continue;
            }
            if let Some(i) = init {
                let c = self.arena.copy(i);
                self.arena.set_def_init(stmt, c);
            }
            if let Some(t) = ty {
                let c = self.arena.copy(t);
                self.arena.set_def_ty(stmt, c);
            }
        }
        Ok(())
    }

    /// Apply config/param/const flags across every variable in a
    /// declaration block.
    pub fn set_var_flags(
        &mut self,
        decls: NodeId,
        is_config: bool,
        is_param: bool,
        is_const: bool,
    ) -> Result<(), LowerError> {
        let body: Vec<NodeId> = self.arena.block_body(decls).to_vec();
        for stmt in body {
            let span = self.arena.span_of(stmt);
            let NodeKind::Def { sym, .. } = self.arena.node(stmt).kind.clone() else {
                return Err(LowerError::internal(
                    "non-definition in variable declaration",
                    span,
                ));
            };
            let SymbolKind::Var(flags) = &mut self.arena.symbol_mut(sym).kind else {
                return Err(LowerError::internal(
                    "non-variable definition in variable declaration",
                    span,
                ));
            };
            flags.is_config = is_config;
            flags.is_param = is_param;
            flags.is_const = is_const;
        }
        Ok(())
    }
}
