// Collector tests: generations, promotion, the write barrier, thresholds.
use crate::ast::*;
use crate::gc::GcId;
use crate::*;

#[test]
fn minor_collection_sweeps_unreachable_young_objects() {
    let mut state = State::new();
    for _ in 0..1000 {
        state.gc_mut().new_table();
    }
    assert_eq!(state.gc().gen_count(Generation::Gen0), 1000);
    let gen1_before = state.gc().gen_count(Generation::Gen1);

    state.gc_mut().check_gc();

    assert_eq!(state.gc().gen_count(Generation::Gen0), 0);
    assert_eq!(state.gc().gen_count(Generation::Gen1), gen1_before);
    assert_eq!(state.gc().stats().minor_collections, 1);
}

#[test]
fn reachable_young_object_promotes_once() {
    let mut state = State::new();
    let table = state.gc_mut().new_table();
    state.push(Value::Table(table));

    state.gc_mut().collect_minor();
    assert_eq!(
        state.gc().generation_of(GcId::Table(table)),
        Some(Generation::Gen1)
    );

    // A second minor collection does not touch gen1 members.
    state.gc_mut().collect_minor();
    assert_eq!(
        state.gc().generation_of(GcId::Table(table)),
        Some(Generation::Gen1)
    );
    assert!(state.gc().is_live(GcId::Table(table)));
}

#[test]
fn barrier_keeps_young_referent_of_old_object_alive() {
    let mut state = State::new();
    let old = state.gc_mut().new_table_in(Generation::Gen2);
    let young = state.gc_mut().new_table();

    // Barriered store: old -> young.
    state
        .gc_mut()
        .table_set(old, Value::Number(1.0), Value::Table(young));
    assert!(state.gc().barrier_len() > 0);

    state.gc_mut().collect_minor();
    assert!(state.gc().is_live(GcId::Table(young)));
    assert_eq!(
        state.gc().generation_of(GcId::Table(young)),
        Some(Generation::Gen1)
    );

    // Drop the reference; neither object is root-reachable any more.
    state.gc_mut().table_set(old, Value::Number(1.0), Value::Nil);
    state.gc_mut().collect_major();
    assert!(!state.gc().is_live(GcId::Table(old)));
    assert!(!state.gc().is_live(GcId::Table(young)));
}

#[test]
fn missing_barrier_loses_young_referent() {
    let mut state = State::new();
    let old = state.gc_mut().new_table_in(Generation::Gen2);
    let young = state.gc_mut().new_table();
    state.push(Value::Table(old));

    // Raw store bypassing the barrier: the bug this discipline exists for.
    state
        .gc_mut()
        .pool_mut()
        .tables
        .get_mut(old.0)
        .unwrap()
        .data
        .set(Value::Number(1.0), Value::Table(young));
    assert_eq!(state.gc().barrier_len(), 0);

    state.gc_mut().collect_minor();
    // The minor collection never looked inside `old`, so `young` was swept
    // while still referenced.
    assert!(!state.gc().is_live(GcId::Table(young)));
    let stale = state.gc().table_get(old, &Value::Number(1.0));
    assert_eq!(stale, Value::Table(young));
}

#[test]
fn everything_reachable_from_roots_survives_both_collections() {
    let mut state = State::new();
    let root = state.gc_mut().new_table();
    let child = state.gc_mut().new_table();
    let name = state.gc_mut().new_string("payload");
    state
        .gc_mut()
        .table_set(root, Value::String(name), Value::Table(child));
    state.push(Value::Table(root));

    state.gc_mut().collect_minor();
    for id in [GcId::Table(root), GcId::Table(child), GcId::String(name)] {
        assert!(state.gc().is_live(id));
    }

    state.gc_mut().collect_major();
    for id in [GcId::Table(root), GcId::Table(child), GcId::String(name)] {
        assert!(state.gc().is_live(id));
    }

    // Unroot and the whole graph goes.
    state.pop();
    state.gc_mut().collect_major();
    for id in [GcId::Table(root), GcId::Table(child), GcId::String(name)] {
        assert!(!state.gc().is_live(id));
    }
}

#[test]
fn major_collection_promotes_gen1_survivors() {
    let mut state = State::new();
    let table = state.gc_mut().new_table();
    state.push(Value::Table(table));

    state.gc_mut().collect_minor();
    assert_eq!(
        state.gc().generation_of(GcId::Table(table)),
        Some(Generation::Gen1)
    );

    state.gc_mut().collect_major();
    assert_eq!(
        state.gc().generation_of(GcId::Table(table)),
        Some(Generation::Gen2)
    );
}

#[test]
fn thresholds_follow_survivor_counts() {
    let config = GcConfig {
        gen0_threshold: 8,
        gen1_threshold: 512,
        min_threshold: 4,
    };
    let mut state = State::with_config(config);
    let mut keep = Vec::new();
    for _ in 0..3 {
        let t = state.gc_mut().new_table();
        state.push(Value::Table(t));
        keep.push(t);
    }
    for _ in 0..20 {
        state.gc_mut().new_table();
    }

    state.gc_mut().collect_minor();
    // Three survivors: threshold re-tunes to 2 * 3.
    assert_eq!(state.gc().gen_threshold(Generation::Gen0), 6);

    // With no survivors the floor applies.
    for t in keep {
        assert!(state.gc().is_live(GcId::Table(t)));
    }
    state.set_stack_top(0);
    state.gc_mut().collect_major();
    assert_eq!(state.gc().gen_threshold(Generation::Gen0), 4);
}

#[test]
fn check_gc_triggers_minor_on_gen0_threshold() {
    let config = GcConfig {
        gen0_threshold: 4,
        gen1_threshold: 512,
        min_threshold: 4,
    };
    let mut state = State::with_config(config);
    for _ in 0..3 {
        state.gc_mut().new_table();
    }
    state.gc_mut().check_gc();
    assert_eq!(state.gc().stats().minor_collections, 0);

    state.gc_mut().new_table();
    state.gc_mut().check_gc();
    assert_eq!(state.gc().stats().minor_collections, 1);
    assert_eq!(state.gc().gen_count(Generation::Gen0), 0);
}

#[test]
fn check_gc_prefers_major_when_gen1_is_full() {
    let config = GcConfig {
        gen0_threshold: 2,
        gen1_threshold: 4,
        min_threshold: 2,
    };
    let mut state = State::with_config(config);
    // Promote four reachable tables into gen1.
    for _ in 0..4 {
        let t = state.gc_mut().new_table();
        state.push(Value::Table(t));
    }
    state.gc_mut().collect_minor();
    assert_eq!(state.gc().gen_count(Generation::Gen1), 4);

    state.gc_mut().check_gc();
    assert_eq!(state.gc().stats().major_collections, 1);
    // Survivors moved on to gen2.
    assert_eq!(state.gc().gen_count(Generation::Gen1), 0);
}

#[test]
fn interned_strings_share_one_object() {
    let mut state = State::new();
    let a = state.gc_mut().new_string("hello");
    let b = state.gc_mut().new_string("hello");
    let c = state.gc_mut().new_string("world");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(state.gc().string(a), Some("hello"));
}

#[test]
fn interner_entry_dies_with_its_string() {
    let mut state = State::new();
    let a = state.gc_mut().new_string("transient");
    state.gc_mut().collect_major();
    assert!(!state.gc().is_live(GcId::String(a)));

    // Interning again allocates a fresh object with the same content.
    let b = state.gc_mut().new_string("transient");
    assert!(state.gc().is_live(GcId::String(b)));
    assert_eq!(state.gc().string(b), Some("transient"));
}

#[test]
fn globals_survive_through_the_environment_table() {
    let mut state = State::new();
    let t = state.gc_mut().new_table();
    state.set_global("registry", Value::Table(t));

    state.gc_mut().collect_minor();
    state.gc_mut().collect_major();
    assert!(state.gc().is_live(GcId::Table(t)));
    assert_eq!(state.get_global("registry"), Value::Table(t));
}

#[test]
fn generated_chunk_survives_collections() {
    // Compile a chunk, then collect: the closure on the stack must keep
    // the prototype and its constants alive through minor and major runs.
    let mut state = State::new();
    let chunk = Chunk {
        module: "main".into(),
        block: Block {
            stmts: vec![Stmt::FuncCall(FuncCallStmt {
                call: Expr::NormalFuncCall(NormalFuncCallExpr {
                    caller: Box::new(Expr::Terminator(Token::id("print", 1))),
                    args: FuncCallArgs::ExpList(Some(ExpressionList {
                        exprs: vec![Expr::Terminator(Token::string("hi", 1))],
                        line: 1,
                    })),
                    line: 1,
                }),
                line: 1,
            })],
            ret: None,
            end_line: 2,
        },
        line: 1,
    };
    generate(&mut state, &chunk).unwrap();

    // The prototype was mutated while old, so it sits in the barrier queue
    // and its gen0 constants count as minor roots.
    assert!(state.gc().barrier_len() > 0);
    state.gc_mut().collect_minor();

    let closure = state.top().unwrap().as_closure_id().unwrap();
    let proto = state.gc().closure(closure).unwrap().prototype();
    let constants: Vec<StringId> = state
        .gc()
        .function(proto)
        .unwrap()
        .constants()
        .iter()
        .filter_map(|v| v.as_string_id())
        .collect();
    assert_eq!(constants.len(), 2);
    for id in &constants {
        assert!(state.gc().is_live(GcId::String(*id)));
    }

    state.gc_mut().collect_major();
    for id in &constants {
        assert!(state.gc().is_live(GcId::String(*id)));
    }

    // Dropping the closure releases the prototype graph on the next major.
    state.pop();
    state.gc_mut().collect_major();
    assert!(!state.gc().is_live(GcId::Closure(closure)));
    assert!(!state.gc().is_live(GcId::Function(proto)));
    for id in &constants {
        assert!(!state.gc().is_live(GcId::String(*id)));
    }
}
