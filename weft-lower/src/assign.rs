use weft_ast::{BlockTag, NodeId, PrimOp};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Compound assignment (`+=` and friends): read-modify-write through a
    /// reference temporary. Set-like domain receivers dispatch `+=`/`-=`
    /// to `add`/`remove` method calls instead; primitive numeric receivers
    /// get a type-matching cast, except the shift operators, whose result
    /// width follows the left operand alone.
    pub fn compound_assign(&mut self, op: &str, lhs: NodeId, rhs: NodeId) -> NodeId {
        let span = self.arena.span_of(lhs);
        let stmt = self.stmt_block(span);

        let ltmp = self.param_temp("_ltmp", span);
        let d = self.arena.def(ltmp, None, None, span);
        self.arena.insert_at_tail(stmt, d);
        let lref = self.arena.call_prim(PrimOp::SetRef, vec![lhs], span);
        let mv = self.move_into(ltmp, lref, span);
        self.arena.insert_at_tail(stmt, mv);

        let rtmp = self.param_temp("_rtmp", span);
        let d = self.arena.def(rtmp, None, None, span);
        self.arena.insert_at_tail(stmt, d);
        let mv = self.move_into(rtmp, rhs, span);
        self.arena.insert_at_tail(stmt, mv);

        let l = self.arena.sym_use(ltmp, span);
        let l_ty = self.arena.call_prim(PrimOp::Typeof, vec![l], span);
        let l = self.arena.sym_use(ltmp, span);
        let l_val = self.arena.call_prim(PrimOp::GetRef, vec![l], span);
        let r = self.arena.sym_use(rtmp, span);
        let applied = self.arena.call_named(op, vec![l_val, r], span);
        let cast = self.arena.call_named("_cast", vec![l_ty, applied], span);
        let l = self.arena.sym_use(ltmp, span);
        let cast_assign = self.arena.call_named("=", vec![l, cast], span);
        let cast_block = self
            .arena
            .block_with(BlockTag::Plain, vec![cast_assign], span);
        if op != "<<" && op != ">>" {
            let l = self.arena.sym_use(ltmp, span);
            let r = self.arena.sym_use(rtmp, span);
            let seed = self.arena.call_named("=", vec![l, r], span);
            let type_block = self.arena.block_with(BlockTag::TypeOnly, vec![seed], span);
            self.arena.insert_at_head(cast_block, type_block);
        }

        let l = self.arena.sym_use(ltmp, span);
        let l_val = self.arena.call_prim(PrimOp::GetRef, vec![l], span);
        let l_ty = self.arena.call_prim(PrimOp::Typeof, vec![l_val], span);
        let is_prim = self.arena.call_named("_isPrimitiveType", vec![l_ty], span);
        let l = self.arena.sym_use(ltmp, span);
        let l_val = self.arena.call_prim(PrimOp::GetRef, vec![l], span);
        let r = self.arena.sym_use(rtmp, span);
        let applied = self.arena.call_named(op, vec![l_val, r], span);
        let l = self.arena.sym_use(ltmp, span);
        let plain = self.arena.call_named("=", vec![l, applied], span);
        let inner = self.arena.cond(is_prim, cast_block, Some(plain), span);

        let method = match op {
            "+" => Some("add"),
            "-" => Some("remove"),
            _ => None,
        };
        match method {
            Some(m) => {
                let l = self.arena.sym_use(ltmp, span);
                let target = self.dot(l, m);
                let r = self.arena.sym_use(rtmp, span);
                let span_m = span;
                let call = self
                    .arena
                    .call(weft_ast::Callee::Expr(target), vec![r], span_m);
                let l = self.arena.sym_use(ltmp, span);
                let is_domain = self.arena.call_named("_isDomain", vec![l], span);
                let dispatch = self.arena.cond(is_domain, call, Some(inner), span);
                self.arena.insert_at_tail(stmt, dispatch);
            }
            None => {
                self.arena.insert_at_tail(stmt, inner);
            }
        }
        stmt
    }

    pub fn logical_and_assign(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, LowerError> {
        self.logical_op_assign(lhs, rhs, true)
    }

    pub fn logical_or_assign(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, LowerError> {
        self.logical_op_assign(lhs, rhs, false)
    }

    fn logical_op_assign(
        &mut self,
        lhs: NodeId,
        rhs: NodeId,
        is_and: bool,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(lhs);
        let stmt = self.stmt_block(span);
        let ltmp = self.temp("_ltmp", span);
        let d = self.arena.def(ltmp, None, None, span);
        self.arena.insert_at_tail(stmt, d);
        let lref = self.arena.call_prim(PrimOp::SetRef, vec![lhs], span);
        let mv = self.move_into(ltmp, lref, span);
        self.arena.insert_at_tail(stmt, mv);
        let l = self.arena.sym_use(ltmp, span);
        let combined = if is_and {
            self.logical_and(l, rhs)?
        } else {
            self.logical_or(l, rhs)?
        };
        let l = self.arena.sym_use(ltmp, span);
        let assign = self.arena.call_named("=", vec![l, combined], span);
        self.arena.insert_at_tail(stmt, assign);
        Ok(stmt)
    }

    /// `++x`/`--x` are not pre-increment/decrement; warn and lower to the
    /// doubled unary operator.
    pub fn pre_inc_dec(&mut self, expr: NodeId, sign: char) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(expr);
        match sign {
            '+' => {
                self.warn("++ is not a pre-increment", span);
                let inner = self.arena.call_named("+", vec![expr], span);
                Ok(self.arena.call_named("+", vec![inner], span))
            }
            '-' => {
                self.warn("-- is not a pre-decrement", span);
                let inner = self.arena.call_named("-", vec![expr], span);
                Ok(self.arena.call_named("-", vec![inner], span))
            }
            _ => Err(LowerError::internal("error in parser", span)),
        }
    }
}
