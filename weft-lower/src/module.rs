use weft_ast::{ModuleInfo, NodeId, NodeKind, Pragma, PrimOp, Span, SymbolId, SymbolKind};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Build a module and synthesize its guarded initializer in one step.
    pub fn build_module(
        &mut self,
        name: &str,
        block: NodeId,
        span: Span,
    ) -> Result<SymbolId, LowerError> {
        let module = self.arena.new_symbol(
            name,
            SymbolKind::Module(ModuleInfo {
                body: block,
                init_fn: None,
                guard: None,
            }),
            span,
        );
        self.create_init_fn(module)?;
        Ok(module)
    }

    /// Synthesize a module's initialization function: created at most once,
    /// guarded by a per-locale one-time flag (except for the distinguished
    /// program module, which runs exactly once by construction), with every
    /// top-level statement relocated into it in order — except nested
    /// module definitions, which stay at top level so nested modules remain
    /// independently lowerable.
    pub fn create_init_fn(&mut self, module: SymbolId) -> Result<(), LowerError> {
        let span = self.arena.symbol(module).span;
        let SymbolKind::Module(info) = self.arena.symbol(module).kind.clone() else {
            return Err(LowerError::internal("symbol is not a module", span));
        };
        if info.init_fn.is_some() {
            return Err(LowerError::internal(
                "module initializer already synthesized",
                span,
            ));
        }
        let mod_name = self.arena.symbol(module).name.clone();
        let init_fn = self.arena.func(format!("__init_{mod_name}"), span);
        self.arena.fn_body(init_fn);

        let guards_fn = self.guards_fn(span);
        let program_init = self.module_init_fn(self.program_module);

        let guard = if module != self.program_module {
            let n = self.module_number;
            self.module_number += 1;
            let guard = self.arena.var(
                format!("__run_{mod_name}_firsttime{n}"),
                weft_ast::VarFlags::default(),
                span,
            );
            self.arena.symbol_mut(guard).pragmas.insert(Pragma::Private);

            let t = self.arena.true_ref(span);
            let d = self.arena.def(guard, Some(t), None, span);
            self.arena.fn_insert_at_head(program_init, d);

            let t = self.arena.true_ref(span);
            let reset = self.move_into(guard, t, span);
            self.arena.fn_insert_at_tail(guards_fn, reset);

            let g = self.arena.sym_use(guard, span);
            let not_first = self.arena.call_named("!", vec![g], span);
            let void = self.arena.void_ref(span);
            let early_return = self.arena.call_prim(PrimOp::Return, vec![void], span);
            let check = self.arena.cond(not_first, early_return, None, span);
            self.arena.fn_insert_at_tail(init_fn, check);

            let g = self.arena.sym_use(guard, span);
            let f = self.arena.false_ref(span);
            let flip = self.arena.call_named("=", vec![g, f], span);
            self.arena.fn_insert_at_tail(init_fn, flip);
            Some(guard)
        } else {
            None
        };

        for stmt in self.arena.block_body(info.body).to_vec() {
            if self.is_single_module_def(stmt) {
                continue;
            }
            self.arena.remove(stmt);
            self.arena.fn_insert_at_tail(init_fn, stmt);
        }
        let d = self.arena.def(init_fn, None, None, span);
        self.arena.insert_at_head(info.body, d);

        let SymbolKind::Module(info) = &mut self.arena.symbol_mut(module).kind else {
            unreachable!();
        };
        info.init_fn = Some(init_fn);
        info.guard = guard;
        Ok(())
    }

    /// The process-wide guard-reset function, synthesized on first use and
    /// wired to run at the head of the program initializer.
    fn guards_fn(&mut self, span: Span) -> SymbolId {
        if let Some(f) = self.init_module_guards {
            return f;
        }
        let f = self.arena.func("_init_module_guards", span);
        self.arena.fn_body(f);
        let program_body = self.module_body(self.program_module);
        let d = self.arena.def(f, None, None, span);
        self.arena.insert_at_head(program_body, d);
        let program_init = self.module_init_fn(self.program_module);
        let call = self.arena.call(weft_ast::Callee::Sym(f), vec![], span);
        self.arena.fn_insert_at_head(program_init, call);
        self.init_module_guards = Some(f);
        f
    }

    pub fn module_body(&self, module: SymbolId) -> NodeId {
        match &self.arena.symbol(module).kind {
            SymbolKind::Module(info) => info.body,
            other => panic!("symbol is not a module: {other:?}"),
        }
    }

    pub fn module_init_fn(&self, module: SymbolId) -> SymbolId {
        match &self.arena.symbol(module).kind {
            SymbolKind::Module(info) => info
                .init_fn
                .expect("module initializer not yet synthesized"),
            other => panic!("symbol is not a module: {other:?}"),
        }
    }

    pub fn module_guard(&self, module: SymbolId) -> Option<SymbolId> {
        match &self.arena.symbol(module).kind {
            SymbolKind::Module(info) => info.guard,
            other => panic!("symbol is not a module: {other:?}"),
        }
    }

    /// A statement that is (possibly a one-statement wrapper around) a
    /// nested module definition.
    fn is_single_module_def(&self, stmt: NodeId) -> bool {
        let inner = match &self.arena.node(stmt).kind {
            NodeKind::Block { body, .. } if body.len() == 1 => body[0],
            _ => stmt,
        };
        match &self.arena.node(inner).kind {
            NodeKind::Def { sym, .. } => {
                matches!(self.arena.symbol(*sym).kind, SymbolKind::Module(_))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use weft_ast::{Arena, BlockTag};

    use super::*;

    #[test]
    fn non_program_modules_get_private_guards() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let work = lower.arena.call_named("setup", vec![], sp);
        let body = lower.arena.block_with(BlockTag::Normal, vec![work], sp);
        let m = lower.build_module("m", body, sp).expect("lower");

        let guard = lower.module_guard(m).expect("guarded");
        assert!(lower.arena.symbol(guard).has_pragma(Pragma::Private));
        assert!(lower.arena.symbol(guard).name.starts_with("__run_m_firsttime"));

        // Body shape: guard check with early return, guard flip, then the
        // relocated statement.
        let init = lower.module_init_fn(m);
        let init_body = lower.arena.fn_info(init).body.expect("body");
        let stmts = lower.arena.block_body(init_body).to_vec();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(lower.arena.node(stmts[0]).kind, NodeKind::Cond { .. }));
        assert_eq!(stmts[2], work);

        // The module body retains only the initializer definition.
        let remaining = lower.arena.block_body(body).to_vec();
        assert_eq!(remaining.len(), 1);
        assert!(matches!(lower.arena.node(remaining[0]).kind, NodeKind::Def { .. }));
    }

    #[test]
    fn program_module_is_unguarded() {
        let mut arena = Arena::new();
        let lower = Lowerer::new(&mut arena);
        assert!(lower.module_guard(lower.program_module()).is_none());
    }

    #[test]
    fn nested_module_definitions_stay_at_top_level() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();

        let inner_body = lower.arena.block(BlockTag::Normal, sp);
        let inner = lower.build_module("inner", inner_body, sp).expect("lower");
        let inner_def = lower.arena.def(inner, None, None, sp);
        let wrapper = lower
            .arena
            .block_with(BlockTag::Scopeless, vec![inner_def], sp);
        let work = lower.arena.call_named("setup", vec![], sp);
        let outer_body = lower
            .arena
            .block_with(BlockTag::Normal, vec![wrapper, work], sp);
        let outer = lower.build_module("outer", outer_body, sp).expect("lower");

        let remaining = lower.arena.block_body(outer_body).to_vec();
        // Initializer def at head, nested module wrapper untouched.
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[1], wrapper);

        let init = lower.module_init_fn(outer);
        let init_body = lower.arena.fn_info(init).body.expect("body");
        let stmts = lower.arena.block_body(init_body).to_vec();
        assert_eq!(*stmts.last().expect("non-empty"), work);
    }

    #[test]
    fn guards_reset_function_is_created_once() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let b1 = lower.arena.block(BlockTag::Normal, sp);
        let m1 = lower.build_module("a", b1, sp).expect("lower");
        let b2 = lower.arena.block(BlockTag::Normal, sp);
        let m2 = lower.build_module("b", b2, sp).expect("lower");
        let _ = (m1, m2);

        let guards = lower.init_module_guards.expect("created");
        let body = lower.arena.fn_info(guards).body.expect("body");
        // One reset move per guarded module.
        assert_eq!(lower.arena.block_body(body).len(), 2);
    }

    #[test]
    fn double_synthesis_is_an_internal_error() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let body = lower.arena.block(BlockTag::Normal, sp);
        let m = lower.build_module("m", body, sp).expect("lower");
        let err = lower.create_init_fn(m).unwrap_err();
        assert!(!err.is_user());
    }
}
