use weft_ast::{ArgInfo, Callee, Intent, NodeId, NodeKind, PrimOp, SymbolId, VarFlags};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Destructure a declaration-position tuple pattern: each leaf
    /// definition gets an indexed access out of `base` as its initializer
    /// and is spliced before `insert_point` in pattern order; `_` leaves
    /// bind nothing and discard their component; nested patterns recurse
    /// with the indexing expression prepended.
    pub fn tuple_var_decl(
        &mut self,
        base: NodeId,
        decls: NodeId,
        insert_point: NodeId,
    ) -> Result<(), LowerError> {
        let mut count = 1i64;
        for expr in self.arena.block_body(decls).to_vec() {
            let span = self.arena.span_of(expr);
            match self.arena.node(expr).kind.clone() {
                NodeKind::Def { sym, .. } => {
                    if self.arena.symbol(sym).name != "_" {
                        let b = self.arena.copy(base);
                        let idx = self.arena.int_lit(count, span);
                        let init = self.arena.call(Callee::Expr(b), vec![idx], span);
                        let def = self.arena.remove(expr);
                        self.arena.set_def_init(def, init);
                        self.arena.insert_before(insert_point, def);
                    } else {
                        self.arena.remove(expr);
                    }
                }
                NodeKind::Block { .. } => {
                    let b = self.arena.copy(base);
                    let idx = self.arena.int_lit(count, span);
                    let sub = self.arena.call(Callee::Expr(b), vec![idx], span);
                    self.tuple_var_decl(sub, expr, insert_point)?;
                }
                _ => {
                    return Err(LowerError::internal(
                        "unexpected expression in tuple declaration",
                        span,
                    ));
                }
            }
            count += 1;
        }
        self.arena.remove(decls);
        Ok(())
    }

    /// Destructure a tuple-shaped function argument. Synthesizes a hidden
    /// tuple formal on the outermost call, splices leaf bindings at the
    /// function head, and accumulates a where-clause conjunct requiring the
    /// actual argument's component count and nested shape to match the
    /// pattern — so mismatched calls are rejected at overload resolution,
    /// not at run time.
    pub fn tuple_arg(
        &mut self,
        f: SymbolId,
        pattern: NodeId,
        base: Option<NodeId>,
    ) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(pattern);
        let mut outermost = false;
        let base = match base {
            Some(b) => b,
            None => {
                let ty = self.arena.name_use("_tuple", span);
                let name = self.names.fresh("_tuple_arg_tmp");
                let arg = self.arena.arg(
                    name,
                    ArgInfo {
                        intent: Intent::Blank,
                        flags: VarFlags::param_temp(),
                        ty: Some(ty),
                        default: None,
                    },
                    span,
                );
                self.arena.fn_insert_formal_at_tail(f, arg);
                outermost = true;
                self.arena.sym_use(arg, span)
            }
        };

        let mut count = 0i64;
        let mut where_acc: Option<NodeId> = None;
        for expr in self.arena.block_body(pattern).to_vec() {
            count += 1;
            let expr_span = self.arena.span_of(expr);
            match self.arena.node(expr).kind.clone() {
                NodeKind::Def { sym, .. } => {
                    if self.arena.symbol(sym).name != "_" {
                        let b = self.arena.copy(base);
                        let idx = self.arena.int_lit(count, expr_span);
                        let init = self.arena.call(Callee::Expr(b), vec![idx], expr_span);
                        let def = self.arena.remove(expr);
                        self.arena.set_def_init(def, init);
                        self.arena.fn_insert_at_head(f, def);
                    } else {
                        self.arena.remove(expr);
                    }
                }
                NodeKind::Block { .. } => {
                    let b = self.arena.copy(base);
                    let idx = self.arena.int_lit(count, expr_span);
                    let component = self.arena.call(Callee::Expr(b), vec![idx], expr_span);
                    let is_tuple = self
                        .arena
                        .call_prim(PrimOp::IsTuple, vec![component], expr_span);
                    let b = self.arena.copy(base);
                    let idx = self.arena.int_lit(count, expr_span);
                    let sub_base = self.arena.call(Callee::Expr(b), vec![idx], expr_span);
                    let sub = self.tuple_arg(f, expr, Some(sub_base))?;
                    let clause = self.logical_and(is_tuple, sub)?;
                    where_acc = Some(match where_acc {
                        Some(w) => self.logical_and(w, clause)?,
                        None => clause,
                    });
                }
                _ => {
                    return Err(LowerError::internal(
                        "unexpected expression in tuple argument pattern",
                        expr_span,
                    ));
                }
            }
        }

        let b = self.arena.copy(base);
        let size = self.dot(b, "size");
        let n = self.arena.int_lit(count, span);
        let size_clause = self.arena.call_named("==", vec![n, size], span);
        let where_clause = match where_acc {
            Some(w) => self.logical_and(size_clause, w)?,
            None => size_clause,
        };

        if outermost {
            match self.arena.fn_info(f).where_clause {
                Some(existing) => {
                    let head = self.arena.block_body(existing)[0];
                    let old = self.arena.remove(head);
                    let merged = self.logical_and(old, where_clause)?;
                    self.arena.insert_at_head(existing, merged);
                }
                None => {
                    let span = self.arena.span_of(where_clause);
                    let block = self
                        .arena
                        .block_with(weft_ast::BlockTag::Plain, vec![where_clause], span);
                    self.arena.fn_info_mut(f).where_clause = Some(block);
                }
            }
        }
        Ok(where_clause)
    }
}

#[cfg(test)]
mod tests {
    use weft_ast::{Arena, BlockTag};

    use super::*;

    fn leaf(lower: &mut Lowerer, name: &str) -> NodeId {
        let sp = weft_ast::no_span();
        let v = lower.arena.var(name, VarFlags::default(), sp);
        lower.arena.def(v, None, None, sp)
    }

    #[test]
    fn nested_pattern_visits_leaves_in_order_and_skips_wildcards() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();

        // (a, (b, _), c)
        let a = leaf(&mut lower, "a");
        let b = leaf(&mut lower, "b");
        let w = leaf(&mut lower, "_");
        let inner = lower.arena.block_with(BlockTag::Plain, vec![b, w], sp);
        let c = leaf(&mut lower, "c");
        let decls = lower.arena.block_with(BlockTag::Plain, vec![a, inner, c], sp);

        let anchor = lower.arena.call_named("anchor", vec![], sp);
        let host = lower.arena.block_with(BlockTag::Normal, vec![anchor], sp);
        let base = lower.arena.name_use("t", sp);
        lower.tuple_var_decl(base, decls, anchor).expect("lower");

        let body = lower.arena.block_body(host).to_vec();
        // a, b, c defs land before the anchor, in pattern order; the
        // wildcard binds nothing.
        assert_eq!(body.len(), 4);
        let names: Vec<String> = body[..3]
            .iter()
            .map(|&s| match &lower.arena.node(s).kind {
                NodeKind::Def { sym, .. } => lower.arena.symbol(*sym).name.clone(),
                other => panic!("expected definition, got {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        for &s in &body[..3] {
            let NodeKind::Def { init, .. } = &lower.arena.node(s).kind else {
                unreachable!();
            };
            assert!(init.is_some(), "every bound leaf gets an indexed move");
        }
    }

    #[test]
    fn tuple_arg_builds_shape_where_clause() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let f = lower.arena.func("f", sp);

        // (x, (y, z))
        let x = leaf(&mut lower, "x");
        let y = leaf(&mut lower, "y");
        let z = leaf(&mut lower, "z");
        let inner = lower.arena.block_with(BlockTag::Plain, vec![y, z], sp);
        let pattern = lower.arena.block_with(BlockTag::Plain, vec![x, inner], sp);

        lower.tuple_arg(f, pattern, None).expect("lower");

        let info = lower.arena.fn_info(f);
        assert_eq!(info.formals.len(), 1, "one synthesized tuple formal");
        let formal = info.formals[0];
        assert!(info.where_clause.is_some(), "shape guard attached");
        assert!(
            lower
                .arena
                .symbol(formal)
                .name
                .starts_with("_tuple_arg_tmp"),
            "hidden formal is compiler-named"
        );

        // Three leaf bindings at the function head.
        let body = lower.arena.fn_info(f).body.expect("body");
        let defs = lower
            .arena
            .block_body(body)
            .iter()
            .filter(|&&s| matches!(lower.arena.node(s).kind, NodeKind::Def { .. }))
            .count();
        assert_eq!(defs, 3);
    }

    #[test]
    fn wildcard_leaves_bind_zero_temporaries() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let f = lower.arena.func("f", sp);
        let w1 = leaf(&mut lower, "_");
        let w2 = leaf(&mut lower, "_");
        let pattern = lower.arena.block_with(BlockTag::Plain, vec![w1, w2], sp);
        lower.tuple_arg(f, pattern, None).expect("lower");
        let body = lower.arena.fn_info(f).body;
        let bound = body
            .map(|b| {
                lower
                    .arena
                    .block_body(b)
                    .iter()
                    .filter(|&&s| matches!(lower.arena.node(s).kind, NodeKind::Def { .. }))
                    .count()
            })
            .unwrap_or(0);
        assert_eq!(bound, 0);
    }
}
