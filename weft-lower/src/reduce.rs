use weft_ast::{BlockTag, Callee, NodeId, NodeKind, Pragma, PrimOp, SymRef, VarFlags};

use crate::lower::Lowerer;

impl Lowerer<'_> {
    pub fn reduce(&mut self, op: NodeId, data: NodeId) -> NodeId {
        self.reduce_scan(op, data, false)
    }

    pub fn scan(&mut self, op: NodeId, data: NodeId) -> NodeId {
        self.reduce_scan(op, data, true)
    }

    /// Reduction/scan: materialize an iterator over the reduced
    /// expression, infer its element type in a type-only block, and invoke
    /// the generic reduce/scan operator parameterized by that type.
    /// `max`/`min` are canonicalized to internal operator names so they do
    /// not collide with user-overloadable symbols.
    fn reduce_scan(&mut self, op: NodeId, data: NodeId, scan: bool) -> NodeId {
        let span = self.arena.span_of(op);
        if let NodeKind::SymUse(SymRef::Unresolved(name)) = &self.arena.node(op).kind {
            let canonical = match name.as_str() {
                "max" => Some("_max"),
                "min" => Some("_min"),
                _ => None,
            };
            if let Some(c) = canonical {
                self.arena.node_mut(op).kind =
                    NodeKind::SymUse(SymRef::Unresolved(c.to_string()));
            }
        }

        let name = self.names.fresh("_reduce_scan");
        let f = self.arena.func(name, span);
        self.arena.symbol_mut(f).pragmas.insert(Pragma::Inline);

        let tmp = self.temp("_tmp", span);
        let d = self.arena.def(tmp, None, None, span);
        self.arena.fn_insert_at_tail(f, d);
        let mv = self.move_into(tmp, data, span);
        self.arena.fn_insert_at_tail(f, mv);

        let elt_type = self.arena.var(
            "_tmp",
            VarFlags {
                is_temp: true,
                can_type: true,
                ..VarFlags::default()
            },
            span,
        );
        let d = self.arena.def(elt_type, None, None, span);
        self.arena.fn_insert_at_tail(f, d);

        let t = self.arena.sym_use(tmp, span);
        let iter1 = self.arena.call_named("_getIterator", vec![t], span);
        let cursor_dot = self.dot(iter1, "getHeadCursor");
        let cursor = self.arena.call(Callee::Expr(cursor_dot), vec![], span);
        let t = self.arena.sym_use(tmp, span);
        let iter2 = self.arena.call_named("_getIterator", vec![t], span);
        let value_dot = self.dot(iter2, "getValue");
        let value = self.arena.call(Callee::Expr(value_dot), vec![cursor], span);
        let ty = self.arena.call_prim(PrimOp::Typeof, vec![value], span);
        let seed = self.move_into(elt_type, ty, span);
        let type_block = self.arena.block_with(BlockTag::TypeOnly, vec![seed], span);
        self.arena.fn_insert_at_tail(f, type_block);

        let e = self.arena.sym_use(elt_type, span);
        let op_instance = self.arena.call(Callee::Expr(op), vec![e], span);
        let constructed = self.arena.call_prim(PrimOp::New, vec![op_instance], span);
        let t = self.arena.sym_use(tmp, span);
        let applied = self.arena.call_named(
            if scan { "_scan" } else { "_reduce" },
            vec![constructed, t],
            span,
        );
        let ret = self.arena.call_prim(PrimOp::Return, vec![applied], span);
        self.arena.fn_insert_at_tail(f, ret);

        self.fn_def_call(f, span)
    }
}

#[cfg(test)]
mod tests {
    use weft_ast::Arena;

    use super::*;

    fn fragment_fn(arena: &Arena, call: NodeId) -> weft_ast::SymbolId {
        let NodeKind::Call { callee, .. } = &arena.node(call).kind else {
            panic!("expected call");
        };
        let Callee::Expr(def) = callee else {
            panic!("expected inline definition callee");
        };
        match &arena.node(*def).kind {
            NodeKind::Def { sym, .. } => *sym,
            other => panic!("expected definition, got {other:?}"),
        }
    }

    #[test]
    fn max_is_canonicalized() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();
        let op = lower.arena.name_use("max", sp);
        let data = lower.arena.name_use("xs", sp);
        let _ = lower.reduce(op, data);
        let NodeKind::SymUse(SymRef::Unresolved(name)) = &lower.arena.node(op).kind else {
            panic!("expected name reference");
        };
        assert_eq!(name, "_max");
    }

    #[test]
    fn scan_and_reduce_pick_distinct_operators() {
        let mut arena = Arena::new();
        let mut lower = Lowerer::new(&mut arena);
        let sp = weft_ast::no_span();

        for (is_scan, expected) in [(false, "_reduce"), (true, "_scan")] {
            let op = lower.arena.name_use("sum", sp);
            let data = lower.arena.name_use("xs", sp);
            let call = if is_scan {
                lower.scan(op, data)
            } else {
                lower.reduce(op, data)
            };
            let f = fragment_fn(lower.arena, call);
            let body = lower.arena.fn_body(f);
            let stmts = lower.arena.block_body(body).to_vec();
            // def, move, def, type block, return
            assert_eq!(stmts.len(), 5);
            assert_eq!(
                lower.arena.block_tag(stmts[3]),
                BlockTag::TypeOnly,
                "element type inferred in a type-only block"
            );
            let NodeKind::Call { args, .. } = &lower.arena.node(stmts[4]).kind else {
                panic!("expected return");
            };
            let NodeKind::Call { callee, .. } = &lower.arena.node(args[0]).kind else {
                panic!("expected operator application");
            };
            assert_eq!(*callee, Callee::Named(expected.to_string()));
        }
    }
}
