use weft_ast::{NodeId, Pragma, PrimOp, SymbolId, VarFlags};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Lower an if/else expression into a synthesized always-inline
    /// function. Two temporaries are wired through a conditional so that
    /// exactly one branch MOVE executes; both arms pass through the
    /// logical-folder primitive so later folding can collapse provably
    /// one-sided conditionals.
    ///
    /// A bare if-expression is rejected: expression-position conditionals
    /// must always produce a value.
    pub fn if_expr(
        &mut self,
        cond: NodeId,
        then_e: NodeId,
        else_e: Option<NodeId>,
    ) -> Result<SymbolId, LowerError> {
        let span = self.arena.span_of(cond);
        let Some(else_e) = else_e else {
            return Err(LowerError::user(
                "if-then expressions require an else-clause",
                span,
            ));
        };

        let name = self.names.fresh("_if_fn");
        let if_fn = self.arena.func(name, span);
        self.arena.symbol_mut(if_fn).pragmas.insert(Pragma::Inline);
        {
            let info = self.arena.fn_info_mut(if_fn);
            info.can_param = true;
            info.can_type = true;
        }

        let tmp1 = self.param_temp("_if_tmp1", span);
        let tmp2 = self.arena.var(
            "_if_tmp2",
            VarFlags {
                is_temp: true,
                can_type: true,
                ..VarFlags::default()
            },
            span,
        );
        let d1 = self.arena.def(tmp1, None, None, span);
        self.arena.fn_insert_at_tail(if_fn, d1);
        let d2 = self.arena.def(tmp2, None, None, span);
        self.arena.fn_insert_at_tail(if_fn, d2);

        let mv_cond = self.move_into(tmp1, cond, span);
        self.arena.fn_insert_at_tail(if_fn, mv_cond);

        let then_ref = self.arena.call_prim(PrimOp::GetRef, vec![then_e], span);
        let t1 = self.arena.sym_use(tmp1, span);
        let then_folded = self
            .arena
            .call_prim(PrimOp::LogicalFolder, vec![t1, then_ref], span);
        let then_mv = self.move_into(tmp2, then_folded, span);

        let else_ref = self.arena.call_prim(PrimOp::GetRef, vec![else_e], span);
        let t1 = self.arena.sym_use(tmp1, span);
        let else_folded = self
            .arena
            .call_prim(PrimOp::LogicalFolder, vec![t1, else_ref], span);
        let else_mv = self.move_into(tmp2, else_folded, span);

        let test = self.arena.sym_use(tmp1, span);
        let branch = self.arena.cond(test, then_mv, Some(else_mv), span);
        self.arena.fn_insert_at_tail(if_fn, branch);

        let result = self.arena.sym_use(tmp2, span);
        let ret = self.arena.call_prim(PrimOp::Return, vec![result], span);
        self.arena.fn_insert_at_tail(if_fn, ret);
        Ok(if_fn)
    }

    /// `if_expr` packaged as an insertable fragment: a call of the inline
    /// function definition.
    pub fn if_expr_call(
        &mut self,
        cond: NodeId,
        then_e: NodeId,
        else_e: Option<NodeId>,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(cond);
        let f = self.if_expr(cond, then_e, else_e)?;
        Ok(self.fn_def_call(f, span))
    }

    pub fn logical_and(&mut self, left: NodeId, right: NodeId) -> Result<NodeId, LowerError> {
        self.short_circuit(left, right, true)
    }

    pub fn logical_or(&mut self, left: NodeId, right: NodeId) -> Result<NodeId, LowerError> {
        self.short_circuit(left, right, false)
    }

    /// Short-circuit lowering: the left operand always lands in a
    /// temporary first; the right operand only exists inside the taken
    /// branch of the synthesized if-expression. A value that cannot be
    /// validated for the promotion path trips the guarded primitive error.
    fn short_circuit(
        &mut self,
        left: NodeId,
        right: NodeId,
        is_and: bool,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(left);
        let lvar = self.param_temp("tmp", span);

        let l = self.arena.sym_use(lvar, span);
        let l_true = self.arena.call_named("isTrue", vec![l], span);
        let cond = self.arena.call_prim(PrimOp::CondTest, vec![l_true], span);
        let r_true = self.arena.call_named("isTrue", vec![right], span);
        let (then_e, else_e) = if is_and {
            let f = self.arena.false_ref(span);
            (r_true, f)
        } else {
            let t = self.arena.true_ref(span);
            (t, r_true)
        };
        let if_fn = self.if_expr(cond, then_e, Some(else_e))?;

        let op = if is_and { "&&" } else { "||" };
        let l = self.arena.sym_use(lvar, span);
        let invalid = self.arena.call_prim(PrimOp::CondInvalid, vec![l], span);
        let msg = self.arena.str_lit(
            format!("cannot promote short-circuiting {op} operator"),
            span,
        );
        let err = self.arena.call_prim(PrimOp::Error, vec![msg], span);
        let guard = self.arena.cond(invalid, err, None, span);
        self.arena.fn_insert_at_head(if_fn, guard);

        let mv = self.move_into(lvar, left, span);
        self.arena.fn_insert_at_head(if_fn, mv);
        let d = self.arena.def(lvar, None, None, span);
        self.arena.fn_insert_at_head(if_fn, d);

        Ok(self.fn_def_call(if_fn, span))
    }

    /// `let` expression: declarations plus a returned body, packaged in a
    /// synthesized inline function.
    pub fn let_expr(&mut self, decls: NodeId, expr: NodeId) -> NodeId {
        let span = self.arena.span_of(expr);
        let name = self.names.fresh("_let_fn");
        let f = self.arena.func(name, span);
        self.arena.symbol_mut(f).pragmas.insert(Pragma::Inline);
        self.arena.fn_insert_at_tail(f, decls);
        let ret = self.arena.call_prim(PrimOp::Return, vec![expr], span);
        self.arena.fn_insert_at_tail(f, ret);
        self.fn_def_call(f, span)
    }
}
