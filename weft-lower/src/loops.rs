use weft_ast::{BlockTag, Callee, Lit, NodeId, NodeKind, PrimOp, SymRef, SymbolId, VarFlags};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// `while cond do body`. The condition lands in a temporary that is
    /// evaluated once before the loop and re-evaluated at the body tail.
    pub fn while_do(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        let span = self.arena.span_of(cond);
        let cond_var = self.temp("_cond", span);

        let wrap = self.arena.block_with(BlockTag::WhileDo, vec![body], span);
        let cv = self.arena.sym_use(cond_var, span);
        let info = self.arena.call_prim(PrimOp::LoopWhileDo, vec![cv], span);
        self.arena.set_loop_info(wrap, info);
        let tail_cond = self.arena.copy(cond);
        let tail_mv = self.move_into(cond_var, tail_cond, span);
        self.arena.insert_at_tail(wrap, tail_mv);
        let (pre, post) = self.loop_labels(wrap, span);

        let stmts = self.stmt_block(span);
        let pre_def = self.arena.label(pre, span);
        self.arena.insert_at_tail(stmts, pre_def);
        let d = self.arena.def(cond_var, None, None, span);
        self.arena.insert_at_tail(stmts, d);
        let head_mv = self.move_into(cond_var, cond, span);
        self.arena.insert_at_tail(stmts, head_mv);
        self.arena.insert_at_tail(stmts, wrap);
        let post_def = self.arena.label(post, span);
        self.arena.insert_at_tail(stmts, post_def);
        stmts
    }

    /// `do body while cond`. The condition is evaluated only at the body
    /// tail; when the body is a single nested block the evaluation is
    /// injected inside it, because the body and condition share a lexical
    /// scope in source.
    pub fn do_while(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        let span = self.arena.span_of(cond);
        let cond_var = self.temp("_cond", span);

        let inner_block = match &self.arena.node(body).kind {
            NodeKind::Block { body: stmts, .. } if stmts.len() == 1 => {
                let only = stmts[0];
                matches!(self.arena.node(only).kind, NodeKind::Block { .. }).then_some(only)
            }
            _ => None,
        };
        let tail_mv = self.move_into(cond_var, cond, span);
        self.arena.insert_at_tail(inner_block.unwrap_or(body), tail_mv);

        let wrap = self.arena.block_with(BlockTag::DoWhile, vec![body], span);
        let cv = self.arena.sym_use(cond_var, span);
        let info = self.arena.call_prim(PrimOp::LoopDoWhile, vec![cv], span);
        self.arena.set_loop_info(wrap, info);
        let (pre, post) = self.loop_labels(wrap, span);

        let stmts = self.stmt_block(span);
        let pre_def = self.arena.label(pre, span);
        self.arena.insert_at_tail(stmts, pre_def);
        let d = self.arena.def(cond_var, None, None, span);
        self.arena.insert_at_tail(stmts, d);
        self.arena.insert_at_tail(stmts, wrap);
        let post_def = self.arena.label(post, span);
        self.arena.insert_at_tail(stmts, post_def);
        stmts
    }

    /// Counted parameter loop. Parameter loops must fully unroll at compile
    /// time, so the range operand is restricted to a literal
    /// `low..high [by stride]` triple.
    pub fn param_for(
        &mut self,
        index: &str,
        range: NodeId,
        body: NodeId,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(range);
        let block = self.arena.block_with(BlockTag::ParamFor, vec![body], span);
        let outer = self.arena.block_with(BlockTag::Plain, vec![block], span);
        let index_var = self.arena.var(index, VarFlags::default(), span);
        let zero = self.arena.int_lit(0, span);
        let d = self.arena.def(index_var, Some(zero), None, span);
        self.arena.insert_before(block, d);

        let (range_call, stride) = match self.arena.node(range).kind.clone() {
            NodeKind::Call { callee, args }
                if callee == Callee::Named("by".to_string()) && args.len() == 2 =>
            {
                let stride = self.arena.remove(args[1]);
                let inner = self.arena.remove(args[0]);
                (inner, Some(stride))
            }
            _ => (range, None),
        };
        let (low, high) = match self.arena.node(range_call).kind.clone() {
            NodeKind::Call { callee, args }
                if callee == Callee::Named("_build_range".to_string()) && args.len() == 2 =>
            {
                let low = self.arena.remove(args[0]);
                let high = self.arena.remove(args[1]);
                (low, high)
            }
            _ => {
                return Err(LowerError::user(
                    "iterators for param-for-loops must be literal ranges",
                    span,
                ));
            }
        };
        let stride = match stride {
            Some(s) => s,
            None => self.arena.int_lit(1, span),
        };
        for bound in [low, high, stride] {
            if !matches!(self.arena.node(bound).kind, NodeKind::Lit(Lit::Int(_))) {
                return Err(LowerError::user(
                    "iterators for param-for-loops must be literal ranges",
                    self.arena.span_of(bound),
                ));
            }
        }

        let low_var = self.insert_before_temp(block, low);
        let high_var = self.insert_before_temp(block, high);
        let stride_var = self.insert_before_temp(block, stride);
        let iv = self.arena.sym_use(index_var, span);
        let lv = self.arena.sym_use(low_var, span);
        let hv = self.arena.sym_use(high_var, span);
        let sv = self.arena.sym_use(stride_var, span);
        let info = self
            .arena
            .call_prim(PrimOp::LoopParam, vec![iv, lv, hv, sv], span);
        self.arena.set_loop_info(block, info);
        Ok(self.stmt_block_of(outer))
    }

    fn insert_before_temp(&mut self, stmt: NodeId, expr: NodeId) -> SymbolId {
        let span = self.arena.span_of(expr);
        let v = self.param_temp("_tmp", span);
        let d = self.arena.def(v, None, None, span);
        self.arena.insert_before(stmt, d);
        let mv = self.move_into(v, expr, span);
        self.arena.insert_before(stmt, mv);
        v
    }

    /// Iterator-driven loop, uniform across for/forall/coforall surface
    /// forms. The iterator is materialized into a temporary, the index is
    /// seeded inside a type-only block, and the index pattern is
    /// destructured at the body head.
    pub fn for_loop(
        &mut self,
        tag: BlockTag,
        indices: NodeId,
        iterator: NodeId,
        body: NodeId,
    ) -> Result<NodeId, LowerError> {
        self.check_indices(indices)?;
        let span = self.arena.span_of(iterator);

        if tag == BlockTag::Coforall {
            return self.coforall_loop(indices, iterator, body, span);
        }

        let wrap = self.arena.block_with(tag, vec![body], span);
        let stmts = self.stmt_block(span);
        let (pre, post) = self.loop_labels(wrap, span);

        let get_iter = self.arena.call_named("_getIterator", vec![iterator], span);
        let iter_sym = self.temp("_iterator", span);
        let d = self.arena.def(iter_sym, None, None, span);
        self.arena.insert_at_tail(stmts, d);
        let mv = self.move_into(iter_sym, get_iter, span);
        self.arena.insert_at_tail(stmts, mv);

        let index = self.temp("_index", span);
        let d = self.arena.def(index, None, None, span);
        self.arena.insert_at_tail(stmts, d);

        let it = self.arena.sym_use(iter_sym, span);
        let cursor_dot = self.dot(it, "getHeadCursor");
        let cursor = self.arena.call(Callee::Expr(cursor_dot), vec![], span);
        let it = self.arena.sym_use(iter_sym, span);
        let value_dot = self.dot(it, "getValue");
        let value = self.arena.call(Callee::Expr(value_dot), vec![cursor], span);
        let seed = self.move_into(index, value, span);
        let type_block = self
            .arena
            .block_with(BlockTag::TypeOnly, vec![seed], span);
        self.arena.insert_at_tail(stmts, type_block);

        let index_use = self.arena.sym_use(index, span);
        self.destructure_indices(wrap, indices, index_use);

        let iv = self.arena.sym_use(index, span);
        let itv = self.arena.sym_use(iter_sym, span);
        let info = self.arena.call_prim(PrimOp::LoopFor, vec![iv, itv], span);
        self.arena.set_loop_info(wrap, info);

        let pre_def = self.arena.label(pre, span);
        self.arena.insert_at_tail(wrap, pre_def);
        self.arena.insert_at_tail(stmts, wrap);
        let post_def = self.arena.label(post, span);
        self.arena.insert_at_tail(stmts, post_def);
        Ok(stmts)
    }

    /// Loop-expression form: the body yields the expression, optionally
    /// filtered by a conditional.
    pub fn for_expr(
        &mut self,
        indices: NodeId,
        iterator: NodeId,
        expr: NodeId,
        cond: Option<NodeId>,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(expr);
        let mut stmt = self.arena.call_prim(PrimOp::Yield, vec![expr], span);
        if let Some(c) = cond {
            stmt = self.arena.cond(c, stmt, None, span);
        }
        let body = self.arena.block_with(BlockTag::Plain, vec![stmt], span);
        let lowered = self.for_loop(BlockTag::Forall, indices, iterator, body)?;
        let wrapped = self.arena.block_with(BlockTag::Plain, vec![lowered], span);
        Ok(self.stmt_block_of(wrapped))
    }

    /// Loop indices must be a plain name or a nested tuple of names.
    fn check_indices(&self, indices: NodeId) -> Result<(), LowerError> {
        let span = self.arena.span_of(indices);
        match &self.arena.node(indices).kind {
            NodeKind::Call { callee, args } => {
                if *callee != Callee::Named("_build_tuple".to_string()) {
                    return Err(LowerError::user("invalid index expression", span));
                }
                for &a in args {
                    self.check_indices(a)?;
                }
                Ok(())
            }
            NodeKind::SymUse(_) => Ok(()),
            _ => Err(LowerError::user("invalid index expression", span)),
        }
    }

    /// Bind each leaf of a (possibly nested) index pattern at the head of
    /// the loop body via indexed MOVEs out of the induction value.
    pub(crate) fn destructure_indices(&mut self, block: NodeId, indices: NodeId, init: NodeId) {
        let span = self.arena.span_of(indices);
        match self.arena.node(indices).kind.clone() {
            NodeKind::Call { callee, args }
                if callee == Callee::Named("_build_tuple".to_string()) =>
            {
                for (i, &actual) in args.iter().enumerate() {
                    if let NodeKind::SymUse(SymRef::Unresolved(name)) =
                        &self.arena.node(actual).kind
                    {
                        if name == "_" {
                            continue;
                        }
                    }
                    let base = self.arena.copy(init);
                    let idx = self.arena.int_lit((i + 1) as i64, span);
                    let sub = self.arena.call(Callee::Expr(base), vec![idx], span);
                    self.destructure_indices(block, actual, sub);
                }
            }
            NodeKind::SymUse(SymRef::Unresolved(name)) => {
                let var = self.arena.var(name, VarFlags::temp(), span);
                let mv = self.move_into(var, init, span);
                self.arena.insert_at_head(block, mv);
                let d = self.arena.def(var, None, None, span);
                self.arena.insert_at_head(block, d);
            }
            NodeKind::SymUse(SymRef::Id(sym)) => {
                let mv = self.move_into(sym, init, span);
                self.arena.insert_at_head(block, mv);
            }
            _ => {}
        }
    }

    /// `serial cond { body }` — save the serial state, conditionally set
    /// it, restore it after the body.
    pub fn serial(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        let span = self.arena.span_of(cond);
        let sbody = self.arena.block(BlockTag::Serial, span);
        let state = self.temp("_tmp_serial_state", span);
        let get = self.arena.call_prim(PrimOp::GetSerial, vec![], span);
        let d = self.arena.def(state, Some(get), None, span);
        self.arena.insert_at_tail(sbody, d);
        let t = self.arena.true_ref(span);
        let set = self.arena.call_prim(PrimOp::SetSerial, vec![t], span);
        let c = self.arena.cond(cond, set, None, span);
        self.arena.insert_at_tail(sbody, c);
        self.arena.insert_at_tail(sbody, body);
        let s = self.arena.sym_use(state, span);
        let restore = self.arena.call_prim(PrimOp::SetSerial, vec![s], span);
        self.arena.insert_at_tail(sbody, restore);
        sbody
    }
}
