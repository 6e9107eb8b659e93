use weft_ast::{Arena, BlockTag, Callee, NodeId, NodeKind, Pragma, PrimOp, SymbolKind};
use weft_lower::Lowerer;

fn count_calls_named(arena: &Arena, root: NodeId, name: &str) -> usize {
    let mut out = 0;
    walk(arena, root, &mut |arena, node| {
        if let NodeKind::Call { callee, .. } = &arena.node(node).kind {
            if *callee == Callee::Named(name.to_string()) {
                out += 1;
            }
        }
    });
    out
}

fn walk(arena: &Arena, root: NodeId, visit: &mut impl FnMut(&Arena, NodeId)) {
    visit(arena, root);
    match &arena.node(root).kind {
        NodeKind::Block { body, loop_info, .. } => {
            for &s in body {
                walk(arena, s, visit);
            }
            if let Some(i) = loop_info {
                walk(arena, *i, visit);
            }
        }
        NodeKind::Cond {
            cond,
            then_stmt,
            else_stmt,
        } => {
            walk(arena, *cond, visit);
            walk(arena, *then_stmt, visit);
            if let Some(e) = else_stmt {
                walk(arena, *e, visit);
            }
        }
        NodeKind::Call { callee, args } => {
            if let Callee::Expr(b) = callee {
                walk(arena, *b, visit);
            }
            for &a in args {
                walk(arena, a, visit);
            }
        }
        NodeKind::Def { sym, init, ty } => {
            if let SymbolKind::Fn(info) = &arena.symbol(*sym).kind {
                if let Some(b) = info.body {
                    walk(arena, b, visit);
                }
                if let Some(w) = info.where_clause {
                    walk(arena, w, visit);
                }
            }
            if let Some(i) = init {
                walk(arena, *i, visit);
            }
            if let Some(t) = ty {
                walk(arena, *t, visit);
            }
        }
        _ => {}
    }
}

#[test]
fn cobegin_awaits_every_branch_before_control_passes() {
    let mut arena = Arena::new();
    let mut lower = Lowerer::new(&mut arena);
    let sp = weft_ast::no_span();
    let a = lower.arena.call_named("a", vec![], sp);
    let b = lower.arena.call_named("b", vec![], sp);
    let c = lower.arena.call_named("c", vec![], sp);
    let block = lower.arena.block_with(BlockTag::Plain, vec![a, b, c], sp);
    let lowered = lower.cobegin(block).expect("lower");

    // Three token pushes, three asynchronous launches, one wait, and the
    // wait is the final statement of the fragment.
    assert_eq!(count_calls_named(lower.arena, lowered, "_pushSyncStack"), 3);
    assert_eq!(count_calls_named(lower.arena, lowered, "_upEndCount"), 3);
    assert_eq!(count_calls_named(lower.arena, lowered, "_waitSyncStack"), 1);

    let body = lower.arena.block_body(lowered).to_vec();
    let last = *body.last().expect("fragment is non-empty");
    assert_eq!(count_calls_named(lower.arena, last, "_waitSyncStack"), 1);

    // Every launch function carries the asynchronous-launch pragma and
    // drops the end-count when its branch completes.
    let mut begin_fns = 0;
    walk(lower.arena, lowered, &mut |arena, node| {
        if let NodeKind::Def { sym, .. } = &arena.node(node).kind {
            if let SymbolKind::Fn(_) = &arena.symbol(*sym).kind {
                if arena.symbol(*sym).has_pragma(Pragma::Begin) {
                    begin_fns += 1;
                }
            }
        }
    });
    assert_eq!(begin_fns, 3);
}

#[test]
fn module_body_relocates_into_a_guarded_initializer() {
    let mut arena = Arena::new();
    let mut lower = Lowerer::new(&mut arena);
    let sp = weft_ast::no_span();

    // A module whose body mixes a declaration, a loop, and a conditional
    // expression use.
    let cond = lower.arena.name_use("flag", sp);
    let t = lower.arena.int_lit(1, sp);
    let e = lower.arena.int_lit(2, sp);
    let pick = lower.if_expr_call(cond, t, Some(e)).expect("lower");
    let v = lower.arena.var("x", weft_ast::VarFlags::default(), sp);
    let decl = lower.arena.def(v, Some(pick), None, sp);

    let loop_cond = lower.arena.name_use("go", sp);
    let loop_body = lower.arena.block(BlockTag::Plain, sp);
    let looped = lower.while_do(loop_cond, loop_body);

    let body = lower
        .arena
        .block_with(BlockTag::Normal, vec![decl, looped], sp);
    let module = lower.build_module("compute", body, sp).expect("lower");

    // The guard check is the first statement and returns early on re-entry,
    // so a second call of the initializer executes the relocated body zero
    // more times.
    let init = lower.module_init_fn(module);
    let init_body = lower.arena.fn_info(init).body.expect("body");
    let stmts = lower.arena.block_body(init_body).to_vec();
    let NodeKind::Cond { then_stmt, .. } = lower.arena.node(stmts[0]).kind.clone() else {
        panic!("expected the guard check first");
    };
    let mut returns = 0;
    walk(lower.arena, then_stmt, &mut |arena, node| {
        if let NodeKind::Call { callee, .. } = &arena.node(node).kind {
            if *callee == Callee::Prim(PrimOp::Return) {
                returns += 1;
            }
        }
    });
    assert_eq!(returns, 1, "guard re-entry returns immediately");

    // Both original statements made it across, in order, after the guard
    // check and flip.
    assert_eq!(stmts[2], decl);
    assert_eq!(stmts[3], looped);

    // The guard resets to true per locale via the process-wide reset
    // function, and is replicated per locale.
    let guard = lower.module_guard(module).expect("guarded");
    assert!(lower.arena.symbol(guard).has_pragma(Pragma::Private));
}

#[test]
fn loop_bodies_compose_with_parallel_launches() {
    let mut arena = Arena::new();
    let mut lower = Lowerer::new(&mut arena);
    let sp = weft_ast::no_span();

    // `while go { begin work(); }`
    let work = lower.arena.call_named("work", vec![], sp);
    let launch = lower.begin(work);
    let body = lower.arena.block_with(BlockTag::Plain, vec![launch], sp);
    let cond = lower.arena.name_use("go", sp);
    let looped = lower.while_do(cond, body);

    assert_eq!(count_calls_named(lower.arena, looped, "_upEndCount"), 1);
    assert_eq!(count_calls_named(lower.arena, looped, "_downEndCount"), 1);

    let parts = lower.arena.block_body(looped).to_vec();
    let wrap = parts[3];
    assert_eq!(lower.arena.block_tag(wrap), BlockTag::WhileDo);
    let info = lower.arena.loop_info(wrap).expect("loop descriptor");
    let NodeKind::Call { callee, .. } = &lower.arena.node(info).kind else {
        panic!("expected loop descriptor call");
    };
    assert_eq!(*callee, Callee::Prim(PrimOp::LoopWhileDo));
}

#[test]
fn end_count_swap_brackets_the_statement() {
    let mut arena = Arena::new();
    let mut lower = Lowerer::new(&mut arena);
    let sp = weft_ast::no_span();
    let stmt = lower.arena.call_named("main_work", vec![], sp);
    let block = lower.end_block(stmt);
    let body = lower.arena.block_body(block).to_vec();
    assert_eq!(body.len(), 6);
    // save, fresh count, statement, wait, restore
    assert_eq!(count_calls_named(lower.arena, block, "_endCountAlloc"), 1);
    assert_eq!(count_calls_named(lower.arena, block, "_waitEndCount"), 1);
    assert_eq!(body[3], stmt);
}
