use weft_ast::{ArgInfo, Callee, Intent, NodeId, NodeKind, PrimOp, VarFlags};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// `select` over values: a chain of guarded conditionals, one per
    /// when-clause, with multi-value clauses OR-folded through the
    /// short-circuit builder. The parser delivers each clause as a
    /// conditional guarded by the `when` primitive marker; anything else is
    /// a defect in an earlier pass.
    pub fn select(&mut self, select_cond: NodeId, when_stmts: NodeId) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(select_cond);
        let mut otherwise: Option<NodeId> = None;
        let mut top: Option<NodeId> = None;
        let mut current: Option<NodeId> = None;

        for stmt in self.arena.block_body(when_stmts).to_vec() {
            let stmt_span = self.arena.span_of(stmt);
            if !matches!(self.arena.node(stmt).kind, NodeKind::Cond { .. }) {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            }
            let (when_cond, then_stmt, _) = self.arena.dissolve_cond(stmt);
            let NodeKind::Call { callee, args } = self.arena.node(when_cond).kind.clone() else {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            };
            if callee != Callee::Prim(PrimOp::When) {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            }

            if args.is_empty() {
                if otherwise.is_some() {
                    return Err(LowerError::user(
                        "select has multiple otherwise clauses",
                        span,
                    ));
                }
                otherwise = Some(then_stmt);
                continue;
            }

            let mut expr: Option<NodeId> = None;
            for when_val in args {
                let v = self.arena.remove(when_val);
                let sc = self.arena.copy(select_cond);
                let eq = self.arena.call_named("==", vec![sc, v], span);
                expr = Some(match expr {
                    None => eq,
                    Some(e) => self.logical_or(e, eq)?,
                });
            }
            let test = self
                .arena
                .call_prim(PrimOp::CondTest, vec![expr.expect("non-empty clause")], span);
            let clause = self.arena.cond(test, then_stmt, None, stmt_span);
            match current {
                None => top = Some(clause),
                Some(prev) => {
                    let wrapped = self.stmt_block_of(clause);
                    self.arena.set_cond_else(prev, wrapped);
                }
            }
            current = Some(clause);
        }

        if let Some(ow) = otherwise {
            let Some(cur) = current else {
                return Err(LowerError::user("select has no when clauses", span));
            };
            self.arena.set_cond_else(cur, ow);
        }
        top.ok_or_else(|| LowerError::user("select has no when clauses", span))
    }

    /// Multi-way branch on the types of N selector expressions. Each
    /// when-clause becomes one overload of a synthesized
    /// compile-time-constant-returning function, selected by static
    /// overload resolution on the selector types; the returned case ordinal
    /// drives a second-stage value select over the clause bodies.
    pub fn type_select(
        &mut self,
        exprs: Vec<NodeId>,
        when_stmts: NodeId,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(when_stmts);
        let fn_name = self.names.fresh("_typeselect");
        let stmts = self.stmt_block(span);
        let new_whens = self.stmt_block(span);
        let mut case_id = 1i64;
        let mut has_otherwise = false;
        let mut any_fn = false;

        for stmt in self.arena.block_body(when_stmts).to_vec() {
            let stmt_span = self.arena.span_of(stmt);
            let NodeKind::Cond {
                cond, then_stmt, ..
            } = self.arena.node(stmt).kind.clone()
            else {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            };
            let NodeKind::Call { callee, args } = self.arena.node(cond).kind.clone() else {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            };
            if callee != Callee::Prim(PrimOp::When) {
                return Err(LowerError::internal("malformed select clause", stmt_span));
            }

            let f = self.arena.func(fn_name.clone(), stmt_span);
            if args.is_empty() {
                if has_otherwise {
                    return Err(LowerError::user(
                        "type select statement has multiple otherwise clauses",
                        stmt_span,
                    ));
                }
                has_otherwise = true;
                // Fully generic formals: the otherwise overload accepts any
                // selector types.
                for lid in 1..=exprs.len() {
                    let a = self.arena.arg(
                        format!("_t{lid}"),
                        ArgInfo {
                            intent: Intent::Blank,
                            ..ArgInfo::default()
                        },
                        stmt_span,
                    );
                    self.arena.fn_insert_formal_at_tail(f, a);
                }
            } else {
                if args.len() != exprs.len() {
                    return Err(LowerError::user(
                        "type select statement requires number of selectors \
                         to be equal to number of when conditions",
                        stmt_span,
                    ));
                }
                for (lid, &sel) in args.iter().enumerate() {
                    let ty = self.arena.copy(sel);
                    let a = self.arena.arg(
                        format!("_t{}", lid + 1),
                        ArgInfo {
                            intent: Intent::Blank,
                            ty: Some(ty),
                            ..ArgInfo::default()
                        },
                        stmt_span,
                    );
                    self.arena.fn_insert_formal_at_tail(f, a);
                }
            }
            self.arena.fn_info_mut(f).ret_param = true;
            let ordinal = self.arena.int_lit(case_id, stmt_span);
            let ret = self.arena.call_prim(PrimOp::Return, vec![ordinal], stmt_span);
            self.arena.fn_insert_at_tail(f, ret);

            let body_copy = self.arena.copy(then_stmt);
            let ordinal = self.arena.int_lit(case_id, stmt_span);
            let marker = self.arena.call_prim(PrimOp::When, vec![ordinal], stmt_span);
            let clause = self.arena.cond(marker, body_copy, None, stmt_span);
            self.arena.insert_at_tail(new_whens, clause);

            let fd = self.arena.def(f, None, None, stmt_span);
            self.arena.insert_at_tail(stmts, fd);
            case_id += 1;
            any_fn = true;
        }

        if !any_fn {
            return Err(LowerError::user("type select has no when clauses", span));
        }

        let tmp = self.arena.var(
            "_tmp",
            VarFlags {
                is_temp: true,
                can_param: true,
                ..VarFlags::default()
            },
            span,
        );
        let d = self.arena.def(tmp, None, None, span);
        self.arena.insert_at_head(stmts, d);
        let resolve = self.arena.call_named(&fn_name, exprs, span);
        let mv = self.move_into(tmp, resolve, span);
        self.arena.insert_at_tail(stmts, mv);
        let t = self.arena.sym_use(tmp, span);
        let dispatch = self.select(t, new_whens)?;
        self.arena.insert_at_tail(stmts, dispatch);
        Ok(stmts)
    }
}
