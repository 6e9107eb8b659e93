use std::collections::HashMap;

use crate::node::{BlockTag, Callee, Lit, Node, NodeId, NodeKind, SymRef};
use crate::symbol::{ArgInfo, FnInfo, Symbol, SymbolId, SymbolKind, VarFlags};
use crate::{no_span, Span};

/// Arena holding every node and symbol of one translation unit.
///
/// Child lists own their indices; `parent` is a non-owning back-reference.
/// A node is owned by at most one parent slot (or one symbol slot, for
/// function bodies and where clauses) at any instant; the splice operations
/// transfer that ownership atomically.
pub struct Arena {
    nodes: Vec<Node>,
    symbols: Vec<Symbol>,
    true_sym: SymbolId,
    false_sym: SymbolId,
    void_sym: SymbolId,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Arena {
        let mut arena = Arena {
            nodes: Vec::new(),
            symbols: Vec::new(),
            true_sym: SymbolId(0),
            false_sym: SymbolId(0),
            void_sym: SymbolId(0),
        };
        arena.true_sym = arena.var("true", VarFlags::default(), no_span());
        arena.false_sym = arena.var("false", VarFlags::default(), no_span());
        arena.void_sym = arena.var("void", VarFlags::default(), no_span());
        arena
    }

    // ---- symbols ----

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn new_symbol(&mut self, name: impl Into<String>, kind: SymbolKind, span: Span) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.into(),
            kind,
            pragmas: Default::default(),
            span,
        });
        id
    }

    pub fn var(&mut self, name: impl Into<String>, flags: VarFlags, span: Span) -> SymbolId {
        self.new_symbol(name, SymbolKind::Var(flags), span)
    }

    pub fn arg(&mut self, name: impl Into<String>, info: ArgInfo, span: Span) -> SymbolId {
        self.new_symbol(name, SymbolKind::Arg(info), span)
    }

    pub fn func(&mut self, name: impl Into<String>, span: Span) -> SymbolId {
        self.new_symbol(name, SymbolKind::Fn(FnInfo::default()), span)
    }

    pub fn label_sym(&mut self, name: impl Into<String>, span: Span) -> SymbolId {
        self.new_symbol(name, SymbolKind::Label, span)
    }

    pub fn true_sym(&self) -> SymbolId {
        self.true_sym
    }

    pub fn false_sym(&self) -> SymbolId {
        self.false_sym
    }

    pub fn void_sym(&self) -> SymbolId {
        self.void_sym
    }

    pub fn fn_info(&self, f: SymbolId) -> &FnInfo {
        match &self.symbol(f).kind {
            SymbolKind::Fn(info) => info,
            other => panic!("symbol is not a function: {other:?}"),
        }
    }

    pub fn fn_info_mut(&mut self, f: SymbolId) -> &mut FnInfo {
        match &mut self.symbol_mut(f).kind {
            SymbolKind::Fn(info) => info,
            other => panic!("symbol is not a function: {other:?}"),
        }
    }

    // ---- node construction ----

    fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            span,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn span_of(&self, id: NodeId) -> Span {
        self.node(id).span
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId) {
        let slot = &mut self.nodes[child.0 as usize].parent;
        debug_assert!(slot.is_none(), "node {child:?} already has an owner");
        *slot = Some(parent);
    }

    pub fn block(&mut self, tag: BlockTag, span: Span) -> NodeId {
        self.alloc(
            NodeKind::Block {
                tag,
                body: Vec::new(),
                loop_info: None,
                pre_loop: None,
                post_loop: None,
            },
            span,
        )
    }

    pub fn block_with(&mut self, tag: BlockTag, body: Vec<NodeId>, span: Span) -> NodeId {
        let id = self.block(tag, span);
        for stmt in body {
            self.insert_at_tail(id, stmt);
        }
        id
    }

    pub fn call(&mut self, callee: Callee, args: Vec<NodeId>, span: Span) -> NodeId {
        if let Callee::Expr(base) = callee {
            let id = self.alloc(
                NodeKind::Call {
                    callee: Callee::Expr(base),
                    args: args.clone(),
                },
                span,
            );
            self.adopt(id, base);
            for a in args {
                self.adopt(id, a);
            }
            return id;
        }
        let id = self.alloc(
            NodeKind::Call {
                callee,
                args: args.clone(),
            },
            span,
        );
        for a in args {
            self.adopt(id, a);
        }
        id
    }

    pub fn call_prim(&mut self, op: crate::PrimOp, args: Vec<NodeId>, span: Span) -> NodeId {
        self.call(Callee::Prim(op), args, span)
    }

    pub fn call_named(&mut self, name: &str, args: Vec<NodeId>, span: Span) -> NodeId {
        self.call(Callee::Named(name.to_string()), args, span)
    }

    pub fn cond(
        &mut self,
        cond: NodeId,
        then_stmt: NodeId,
        else_stmt: Option<NodeId>,
        span: Span,
    ) -> NodeId {
        let id = self.alloc(
            NodeKind::Cond {
                cond,
                then_stmt,
                else_stmt,
            },
            span,
        );
        self.adopt(id, cond);
        self.adopt(id, then_stmt);
        if let Some(e) = else_stmt {
            self.adopt(id, e);
        }
        id
    }

    pub fn sym_use(&mut self, sym: SymbolId, span: Span) -> NodeId {
        self.alloc(NodeKind::SymUse(SymRef::Id(sym)), span)
    }

    pub fn name_use(&mut self, name: impl Into<String>, span: Span) -> NodeId {
        self.alloc(NodeKind::SymUse(SymRef::Unresolved(name.into())), span)
    }

    pub fn true_ref(&mut self, span: Span) -> NodeId {
        let sym = self.true_sym;
        self.sym_use(sym, span)
    }

    pub fn false_ref(&mut self, span: Span) -> NodeId {
        let sym = self.false_sym;
        self.sym_use(sym, span)
    }

    pub fn void_ref(&mut self, span: Span) -> NodeId {
        let sym = self.void_sym;
        self.sym_use(sym, span)
    }

    pub fn def(&mut self, sym: SymbolId, init: Option<NodeId>, ty: Option<NodeId>, span: Span) -> NodeId {
        let id = self.alloc(NodeKind::Def { sym, init, ty }, span);
        if let Some(i) = init {
            self.adopt(id, i);
        }
        if let Some(t) = ty {
            self.adopt(id, t);
        }
        id
    }

    pub fn label(&mut self, sym: SymbolId, span: Span) -> NodeId {
        self.alloc(NodeKind::Label(sym), span)
    }

    pub fn int_lit(&mut self, value: i64, span: Span) -> NodeId {
        self.alloc(NodeKind::Lit(Lit::Int(value)), span)
    }

    pub fn str_lit(&mut self, value: impl Into<String>, span: Span) -> NodeId {
        self.alloc(NodeKind::Lit(Lit::Str(value.into())), span)
    }

    // ---- block accessors ----

    pub fn block_body(&self, block: NodeId) -> &[NodeId] {
        match &self.node(block).kind {
            NodeKind::Block { body, .. } => body,
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn block_tag(&self, block: NodeId) -> BlockTag {
        match &self.node(block).kind {
            NodeKind::Block { tag, .. } => *tag,
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn set_block_tag(&mut self, block: NodeId, tag: BlockTag) {
        match &mut self.node_mut(block).kind {
            NodeKind::Block { tag: t, .. } => *t = tag,
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn set_loop_info(&mut self, block: NodeId, info: NodeId) {
        self.adopt(block, info);
        match &mut self.node_mut(block).kind {
            NodeKind::Block { loop_info, .. } => *loop_info = Some(info),
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn loop_info(&self, block: NodeId) -> Option<NodeId> {
        match &self.node(block).kind {
            NodeKind::Block { loop_info, .. } => *loop_info,
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn set_loop_labels(&mut self, block: NodeId, pre: SymbolId, post: SymbolId) {
        match &mut self.node_mut(block).kind {
            NodeKind::Block {
                pre_loop, post_loop, ..
            } => {
                *pre_loop = Some(pre);
                *post_loop = Some(post);
            }
            other => panic!("node is not a block: {other:?}"),
        }
    }

    pub fn loop_labels(&self, block: NodeId) -> (Option<SymbolId>, Option<SymbolId>) {
        match &self.node(block).kind {
            NodeKind::Block {
                pre_loop, post_loop, ..
            } => (*pre_loop, *post_loop),
            other => panic!("node is not a block: {other:?}"),
        }
    }

    // ---- splicing ----

    pub fn insert_at_head(&mut self, block: NodeId, stmt: NodeId) {
        self.adopt(block, stmt);
        match &mut self.node_mut(block).kind {
            NodeKind::Block { body, .. } => body.insert(0, stmt),
            other => panic!("insert_at_head on non-block: {other:?}"),
        }
    }

    pub fn insert_at_tail(&mut self, block: NodeId, stmt: NodeId) {
        self.adopt(block, stmt);
        match &mut self.node_mut(block).kind {
            NodeKind::Block { body, .. } => body.push(stmt),
            other => panic!("insert_at_tail on non-block: {other:?}"),
        }
    }

    fn position_in_parent(&self, anchor: NodeId) -> (NodeId, usize) {
        let parent = self
            .node(anchor)
            .parent
            .unwrap_or_else(|| panic!("node {anchor:?} has no parent"));
        match &self.node(parent).kind {
            NodeKind::Block { body, .. } => {
                let pos = body
                    .iter()
                    .position(|&n| n == anchor)
                    .unwrap_or_else(|| panic!("node {anchor:?} missing from its parent's body"));
                (parent, pos)
            }
            other => panic!("insert relative to a node not in a block: {other:?}"),
        }
    }

    pub fn insert_before(&mut self, anchor: NodeId, stmt: NodeId) {
        let (parent, pos) = self.position_in_parent(anchor);
        self.adopt(parent, stmt);
        match &mut self.node_mut(parent).kind {
            NodeKind::Block { body, .. } => body.insert(pos, stmt),
            _ => unreachable!(),
        }
    }

    pub fn insert_after(&mut self, anchor: NodeId, stmt: NodeId) {
        let (parent, pos) = self.position_in_parent(anchor);
        self.adopt(parent, stmt);
        match &mut self.node_mut(parent).kind {
            NodeKind::Block { body, .. } => body.insert(pos + 1, stmt),
            _ => unreachable!(),
        }
    }

    /// Detach `id` from its owner and return it, now unowned.
    pub fn remove(&mut self, id: NodeId) -> NodeId {
        let Some(parent) = self.node(id).parent else {
            return id;
        };
        match &mut self.nodes[parent.0 as usize].kind {
            NodeKind::Block { body, loop_info, .. } => {
                if let Some(pos) = body.iter().position(|&n| n == id) {
                    body.remove(pos);
                } else if *loop_info == Some(id) {
                    *loop_info = None;
                } else {
                    panic!("node {id:?} missing from its parent block");
                }
            }
            NodeKind::Call { args, .. } => {
                let pos = args
                    .iter()
                    .position(|&n| n == id)
                    .unwrap_or_else(|| panic!("node {id:?} missing from its parent call"));
                args.remove(pos);
            }
            NodeKind::Def { init, ty, .. } => {
                if *init == Some(id) {
                    *init = None;
                } else if *ty == Some(id) {
                    *ty = None;
                } else {
                    panic!("node {id:?} missing from its parent definition");
                }
            }
            NodeKind::Cond { else_stmt, .. } => {
                if *else_stmt == Some(id) {
                    *else_stmt = None;
                } else {
                    panic!("cannot detach a required conditional child");
                }
            }
            other => panic!("cannot detach from parent {other:?}"),
        }
        self.node_mut(id).parent = None;
        id
    }

    pub fn set_def_init(&mut self, def: NodeId, init: NodeId) {
        self.adopt(def, init);
        match &mut self.node_mut(def).kind {
            NodeKind::Def { init: slot, .. } => {
                debug_assert!(slot.is_none(), "definition already has an initializer");
                *slot = Some(init);
            }
            other => panic!("set_def_init on non-definition: {other:?}"),
        }
    }

    pub fn set_def_ty(&mut self, def: NodeId, ty: NodeId) {
        self.adopt(def, ty);
        match &mut self.node_mut(def).kind {
            NodeKind::Def { ty: slot, .. } => {
                debug_assert!(slot.is_none(), "definition already has a type expression");
                *slot = Some(ty);
            }
            other => panic!("set_def_ty on non-definition: {other:?}"),
        }
    }

    pub fn set_cond_else(&mut self, cond: NodeId, else_stmt: NodeId) {
        self.adopt(cond, else_stmt);
        match &mut self.node_mut(cond).kind {
            NodeKind::Cond { else_stmt: slot, .. } => {
                debug_assert!(slot.is_none(), "conditional already has an else branch");
                *slot = Some(else_stmt);
            }
            other => panic!("set_cond_else on non-conditional: {other:?}"),
        }
    }

    /// Take a conditional apart, detaching and returning its children. The
    /// husk is turned into an empty scopeless block so nothing dangles.
    pub fn dissolve_cond(&mut self, c: NodeId) -> (NodeId, NodeId, Option<NodeId>) {
        let NodeKind::Cond {
            cond,
            then_stmt,
            else_stmt,
        } = self.node(c).kind.clone()
        else {
            panic!("dissolve_cond on non-conditional");
        };
        self.node_mut(cond).parent = None;
        self.node_mut(then_stmt).parent = None;
        if let Some(e) = else_stmt {
            self.node_mut(e).parent = None;
        }
        self.node_mut(c).kind = NodeKind::Block {
            tag: BlockTag::Scopeless,
            body: Vec::new(),
            loop_info: None,
            pre_loop: None,
            post_loop: None,
        };
        (cond, then_stmt, else_stmt)
    }

    // ---- function bodies ----

    pub fn fn_body(&mut self, f: SymbolId) -> NodeId {
        if let Some(body) = self.fn_info(f).body {
            return body;
        }
        let span = self.symbol(f).span;
        let body = self.block(BlockTag::Normal, span);
        self.fn_info_mut(f).body = Some(body);
        body
    }

    pub fn fn_insert_at_head(&mut self, f: SymbolId, stmt: NodeId) {
        let body = self.fn_body(f);
        self.insert_at_head(body, stmt);
    }

    pub fn fn_insert_at_tail(&mut self, f: SymbolId, stmt: NodeId) {
        let body = self.fn_body(f);
        self.insert_at_tail(body, stmt);
    }

    pub fn fn_insert_formal_at_tail(&mut self, f: SymbolId, formal: SymbolId) {
        self.fn_info_mut(f).formals.push(formal);
    }

    // ---- deep copy ----

    /// Deep-clone a subtree into fresh nodes. Symbols defined inside the
    /// subtree (including synthesized functions and their bodies) are cloned
    /// and every reference to them within the copy is remapped; references
    /// to outside symbols are shared.
    pub fn copy(&mut self, id: NodeId) -> NodeId {
        let mut map = HashMap::new();
        self.collect_defined_symbols(id, &mut map);
        self.copy_node(id, &map)
    }

    fn collect_defined_symbols(&mut self, id: NodeId, map: &mut HashMap<SymbolId, SymbolId>) {
        match self.node(id).kind.clone() {
            NodeKind::Def { sym, init, ty } => {
                self.clone_symbol_into(sym, map);
                if let Some(i) = init {
                    self.collect_defined_symbols(i, map);
                }
                if let Some(t) = ty {
                    self.collect_defined_symbols(t, map);
                }
            }
            NodeKind::Label(sym) => {
                self.clone_symbol_into(sym, map);
            }
            NodeKind::Block {
                body, loop_info, ..
            } => {
                for stmt in body {
                    self.collect_defined_symbols(stmt, map);
                }
                if let Some(info) = loop_info {
                    self.collect_defined_symbols(info, map);
                }
            }
            NodeKind::Cond {
                cond,
                then_stmt,
                else_stmt,
            } => {
                self.collect_defined_symbols(cond, map);
                self.collect_defined_symbols(then_stmt, map);
                if let Some(e) = else_stmt {
                    self.collect_defined_symbols(e, map);
                }
            }
            NodeKind::Call { callee, args } => {
                if let Callee::Expr(base) = callee {
                    self.collect_defined_symbols(base, map);
                }
                for a in args {
                    self.collect_defined_symbols(a, map);
                }
            }
            NodeKind::SymUse(_) | NodeKind::Lit(_) => {}
        }
    }

    fn clone_symbol_into(&mut self, sym: SymbolId, map: &mut HashMap<SymbolId, SymbolId>) {
        if map.contains_key(&sym) {
            return;
        }
        let cloned = self.symbols[sym.0 as usize].clone();
        let fresh = SymbolId(self.symbols.len() as u32);
        self.symbols.push(cloned);
        map.insert(sym, fresh);
        // A cloned function brings its body and where clause along.
        if let SymbolKind::Fn(info) = self.symbols[fresh.0 as usize].kind.clone() {
            for formal in &info.formals {
                self.clone_symbol_into(*formal, map);
            }
            if let Some(body) = info.body {
                self.collect_defined_symbols(body, map);
            }
            if let Some(w) = info.where_clause {
                self.collect_defined_symbols(w, map);
            }
        }
    }

    fn map_sym(map: &HashMap<SymbolId, SymbolId>, sym: SymbolId) -> SymbolId {
        map.get(&sym).copied().unwrap_or(sym)
    }

    fn copy_node(&mut self, id: NodeId, map: &HashMap<SymbolId, SymbolId>) -> NodeId {
        let span = self.span_of(id);
        match self.node(id).kind.clone() {
            NodeKind::Block {
                tag,
                body,
                loop_info,
                pre_loop,
                post_loop,
            } => {
                let new = self.block(tag, span);
                for stmt in body {
                    let c = self.copy_node(stmt, map);
                    self.insert_at_tail(new, c);
                }
                if let Some(info) = loop_info {
                    let c = self.copy_node(info, map);
                    self.set_loop_info(new, c);
                }
                if let (Some(pre), Some(post)) = (pre_loop, post_loop) {
                    self.set_loop_labels(new, Self::map_sym(map, pre), Self::map_sym(map, post));
                }
                new
            }
            NodeKind::Cond {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let c = self.copy_node(cond, map);
                let t = self.copy_node(then_stmt, map);
                let e = else_stmt.map(|e| self.copy_node(e, map));
                self.cond(c, t, e, span)
            }
            NodeKind::Call { callee, args } => {
                let callee = match callee {
                    Callee::Expr(base) => Callee::Expr(self.copy_node(base, map)),
                    Callee::Sym(s) => Callee::Sym(Self::map_sym(map, s)),
                    other => other,
                };
                let args = args.iter().map(|&a| self.copy_node(a, map)).collect();
                self.call(callee, args, span)
            }
            NodeKind::SymUse(SymRef::Id(s)) => self.sym_use(Self::map_sym(map, s), span),
            NodeKind::SymUse(SymRef::Unresolved(name)) => self.name_use(name, span),
            NodeKind::Def { sym, init, ty } => {
                let sym = Self::map_sym(map, sym);
                // Copy the attached function body/where of a cloned function.
                if let SymbolKind::Fn(info) = self.symbols[sym.0 as usize].kind.clone() {
                    let body = info.body.map(|b| self.copy_node(b, map));
                    let where_clause = info.where_clause.map(|w| self.copy_node(w, map));
                    let formals = info
                        .formals
                        .iter()
                        .map(|&f| Self::map_sym(map, f))
                        .collect();
                    let fi = self.fn_info_mut(sym);
                    fi.body = body;
                    fi.where_clause = where_clause;
                    fi.formals = formals;
                }
                let init = init.map(|i| self.copy_node(i, map));
                let ty = ty.map(|t| self.copy_node(t, map));
                self.def(sym, init, ty, span)
            }
            NodeKind::Label(sym) => {
                let sym = Self::map_sym(map, sym);
                self.label(sym, span)
            }
            NodeKind::Lit(lit) => self.alloc(NodeKind::Lit(lit), span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{no_span, PrimOp};

    #[test]
    fn splice_transfers_ownership() {
        let mut arena = Arena::new();
        let block = arena.block(BlockTag::Normal, no_span());
        let a = arena.int_lit(1, no_span());
        let b = arena.int_lit(2, no_span());
        arena.insert_at_tail(block, a);
        arena.insert_before(a, b);
        assert_eq!(arena.block_body(block), &[b, a]);

        let detached = arena.remove(b);
        assert_eq!(arena.block_body(block), &[a]);
        assert!(arena.node(detached).parent.is_none());

        arena.insert_after(a, detached);
        assert_eq!(arena.block_body(block), &[a, b]);
    }

    #[test]
    fn copy_remaps_defined_symbols_only() {
        let mut arena = Arena::new();
        let outer = arena.var("outer", VarFlags::default(), no_span());
        let inner = arena.var("inner", VarFlags::temp(), no_span());

        let block = arena.block(BlockTag::Normal, no_span());
        let def = arena.def(inner, None, None, no_span());
        arena.insert_at_tail(block, def);
        let inner_use = arena.sym_use(inner, no_span());
        let outer_use = arena.sym_use(outer, no_span());
        let mv = arena.call_prim(PrimOp::Move, vec![inner_use, outer_use], no_span());
        arena.insert_at_tail(block, mv);

        let copied = arena.copy(block);
        let body = arena.block_body(copied).to_vec();
        let NodeKind::Def { sym: new_inner, .. } = arena.node(body[0]).kind.clone() else {
            panic!("expected definition");
        };
        assert_ne!(new_inner, inner, "defined symbol must be cloned");
        let NodeKind::Call { args, .. } = &arena.node(body[1]).kind else {
            panic!("expected call");
        };
        let NodeKind::SymUse(SymRef::Id(use_inner)) = arena.node(args[0]).kind.clone() else {
            panic!("expected symbol use");
        };
        let NodeKind::SymUse(SymRef::Id(use_outer)) = arena.node(args[1]).kind.clone() else {
            panic!("expected symbol use");
        };
        assert_eq!(use_inner, new_inner, "inner reference follows the clone");
        assert_eq!(use_outer, outer, "outer reference is shared");
    }
}
