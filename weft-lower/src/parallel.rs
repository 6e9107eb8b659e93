use weft_ast::{ArgInfo, BlockTag, Callee, Intent, NodeId, NodeKind, Pragma, PrimOp, Span};

use crate::error::LowerError;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// `begin stmt` — the statement body moves into a synthesized function
    /// tagged for asynchronous launch. The launch site bumps the shared
    /// end-count before spawning; the spawned body drops it on completion,
    /// so a join point can wait for the counter to return to zero.
    pub fn begin(&mut self, stmt: NodeId) -> NodeId {
        self.begin_with(stmt, true)
    }

    pub fn begin_with(&mut self, stmt: NodeId, allocate_on_heap: bool) -> NodeId {
        let span = self.arena.span_of(stmt);
        let block = self.stmt_block(span);
        let name = self.names.fresh("_begin_fn_");
        let f = self.arena.func(name, span);
        self.arena.symbol_mut(f).pragmas.insert(Pragma::Begin);
        if !allocate_on_heap {
            self.arena.symbol_mut(f).pragmas.insert(Pragma::NoHeapAlloc);
        }
        self.arena.fn_insert_at_tail(f, stmt);
        let down = self.arena.call_named("_downEndCount", vec![], span);
        self.arena.fn_insert_at_tail(f, down);

        let d = self.arena.def(f, None, None, span);
        self.arena.insert_at_tail(block, d);
        let up = self.arena.call_named("_upEndCount", vec![], span);
        self.arena.insert_at_tail(block, up);
        let launch = self.arena.call(Callee::Sym(f), vec![], span);
        let launch_block = self.arena.block_with(BlockTag::Begin, vec![launch], span);
        self.arena.insert_at_tail(block, launch_block);
        block
    }

    /// Scoped end-count swap: run `stmt` against a fresh end-count, wait
    /// for it to drain, then restore the saved one.
    pub fn end_block(&mut self, stmt: NodeId) -> NodeId {
        let span = self.arena.span_of(stmt);
        let block = self.stmt_block(span);
        let save = self.temp("_endCountSave", span);
        let d = self.arena.def(save, None, None, span);
        self.arena.insert_at_tail(block, d);
        let get = self.arena.call_prim(PrimOp::GetEndCount, vec![], span);
        let mv = self.move_into(save, get, span);
        self.arena.insert_at_tail(block, mv);
        let alloc = self.arena.call_named("_endCountAlloc", vec![], span);
        let set = self.arena.call_prim(PrimOp::SetEndCount, vec![alloc], span);
        self.arena.insert_at_tail(block, set);
        self.arena.insert_at_tail(block, stmt);
        let wait = self.arena.call_named("_waitEndCount", vec![], span);
        self.arena.insert_at_tail(block, wait);
        let s = self.arena.sym_use(save, span);
        let restore = self.arena.call_prim(PrimOp::SetEndCount, vec![s], span);
        self.arena.insert_at_tail(block, restore);
        block
    }

    /// `cobegin { ... }` — every branch becomes a begin-launch that pushes
    /// a synchronization token onto a shared stack before spawning and sets
    /// it on completion; the cobegin waits for every token before control
    /// passes, with no ordering guarantee among the branches.
    pub fn cobegin(&mut self, block: NodeId) -> Result<NodeId, LowerError> {
        let span = self.arena.span_of(block);
        if !matches!(self.arena.node(block).kind, NodeKind::Block { .. }) {
            return Err(LowerError::internal("cobegin requires a block", span));
        }
        let stmts: Vec<NodeId> = self.arena.block_body(block).to_vec();
        if stmts.len() < 2 {
            self.warn(
                "cobegin has no effect if it contains fewer than 2 statements",
                span,
            );
        }

        let ss = self.temp("_ss", span);
        for stmt in stmts {
            let branch = self.launch_with_token(stmt, ss);
            self.arena.insert_before(stmt, branch);
            self.arena.remove(stmt);
        }
        let stack = self.arena.name_use("_syncStack", span);
        let init = self.arena.call_prim(PrimOp::Init, vec![stack], span);
        let mv = self.move_into(ss, init, span);
        self.arena.insert_at_head(block, mv);
        let d = self.arena.def(ss, None, None, span);
        self.arena.insert_at_head(block, d);
        let s = self.arena.sym_use(ss, span);
        let wait = self.arena.call_named("_waitSyncStack", vec![s], span);
        self.arena.insert_at_tail(block, wait);
        Ok(block)
    }

    /// One cobegin/coforall branch: copy of the statement wrapped in a
    /// begin-launch, bracketed by the token push and the stack-head update.
    fn launch_with_token(&mut self, stmt: NodeId, ss: weft_ast::SymbolId) -> NodeId {
        let span = self.arena.span_of(stmt);
        let me = self.temp("_me", span);
        let begin_blk = self.arena.block(BlockTag::Plain, span);
        let copied = self.arena.copy(stmt);
        self.arena.insert_at_head(begin_blk, copied);
        let m = self.arena.sym_use(me, span);
        let field = self.dot(m, "v");
        let t = self.arena.true_ref(span);
        let done = self.arena.call_named("=", vec![field, t], span);
        self.arena.insert_at_tail(begin_blk, done);

        let body = self.begin_with(begin_blk, false);
        let s = self.arena.sym_use(ss, span);
        let push = self.arena.call_named("_pushSyncStack", vec![s], span);
        let mv = self.move_into(me, push, span);
        self.arena.insert_at_head(body, mv);
        let d = self.arena.def(me, None, None, span);
        self.arena.insert_at_head(body, d);
        let s = self.arena.sym_use(ss, span);
        let m = self.arena.sym_use(me, span);
        let pop = self.arena.call_named("=", vec![s, m], span);
        self.arena.insert_at_tail(body, pop);
        body
    }

    /// `coforall` — cobegin generalized over a dynamic iteration count:
    /// the token protocol nests inside an ordinary for-loop lowering.
    pub(crate) fn coforall_loop(
        &mut self,
        indices: NodeId,
        iterator: NodeId,
        body: NodeId,
        span: Span,
    ) -> Result<NodeId, LowerError> {
        let ss = self.temp("_ss", span);
        let me = self.temp("_me", span);

        let begin_blk = self.arena.block(BlockTag::Plain, span);
        self.arena.insert_at_head(begin_blk, body);
        let m = self.arena.sym_use(me, span);
        let field = self.dot(m, "v");
        let t = self.arena.true_ref(span);
        let done = self.arena.call_named("=", vec![field, t], span);
        self.arena.insert_at_tail(begin_blk, done);
        let launch = self.begin(begin_blk);

        let block = self.for_loop(BlockTag::For, indices, iterator, launch)?;
        let stack = self.arena.name_use("_syncStack", span);
        let init = self.arena.call_prim(PrimOp::Init, vec![stack], span);
        let mv = self.move_into(ss, init, span);
        self.arena.insert_at_head(block, mv);
        let d = self.arena.def(ss, None, None, span);
        self.arena.insert_at_head(block, d);

        let d = self.arena.def(me, None, None, span);
        self.arena.insert_before(launch, d);
        let s = self.arena.sym_use(ss, span);
        let push = self.arena.call_named("_pushSyncStack", vec![s], span);
        let mv = self.move_into(me, push, span);
        self.arena.insert_before(launch, mv);
        let s = self.arena.sym_use(ss, span);
        let m = self.arena.sym_use(me, span);
        let pop = self.arena.call_named("=", vec![s, m], span);
        self.arena.insert_after(launch, pop);

        let s = self.arena.sym_use(ss, span);
        let wait = self.arena.call_named("_waitSyncStack", vec![s], span);
        self.arena.insert_at_tail(block, wait);
        Ok(block)
    }

    /// `on expr { body }` — the body moves into a synthesized function
    /// tagged for remote execution, invoked with the locale of the target
    /// expression. Single-locale compilation degrades to a plain block.
    pub fn on_stmt(&mut self, expr: NodeId, stmt: NodeId) -> NodeId {
        let span = self.arena.span_of(expr);
        if self.local {
            let block = self.arena.block_with(BlockTag::Normal, vec![stmt], span);
            return self.stmt_block_of(block);
        }
        let block = self.stmt_block(span);
        let name = self.names.fresh("_on_fn_");
        let f = self.arena.func(name, span);
        self.arena.symbol_mut(f).pragmas.insert(Pragma::On);
        let arg = self.arena.arg(
            "_dummy_locale_arg",
            ArgInfo {
                intent: Intent::Blank,
                ..ArgInfo::default()
            },
            span,
        );
        self.arena.fn_insert_formal_at_tail(f, arg);
        self.arena.fn_insert_at_tail(f, stmt);

        let tmp = self.temp("_tmp", span);
        let d = self.arena.def(tmp, None, None, span);
        self.arena.insert_at_tail(block, d);
        let locale = self.arena.call_prim(PrimOp::GetLocale, vec![expr], span);
        let locale_ref = self.arena.call_prim(PrimOp::GetRef, vec![locale], span);
        let mv = self.move_into(tmp, locale_ref, span);
        self.arena.insert_at_tail(block, mv);
        let fd = self.arena.def(f, None, None, span);
        self.arena.insert_at_tail(block, fd);
        let t = self.arena.sym_use(tmp, span);
        let invoke = self.arena.call(Callee::Sym(f), vec![t], span);
        let on_block = self.arena.block_with(BlockTag::On, vec![invoke], span);
        self.arena.insert_at_tail(block, on_block);
        block
    }
}
