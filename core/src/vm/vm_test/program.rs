use super::*;
use crate::{
    typ::MatchClass,
    vm::{ConstantPool, MatchCaseDef, MatchDef, Opcode, make_instruction},
};

/// `main` returns true, `greet` captures a greeting and returns false,
/// `route` matches an opaque path.
fn two_handlers() -> Harness {
    let mut h = Harness::new();
    h.ret(true);
    h.b.get_handler("greet");
    let entry = h.b.create_block("entry");
    h.b.set_insert_point(entry);
    let name = h.string("world");
    let hello = h.b.get_string("hello, ");
    let text = h.b.create_sadd(hello, name, "text");
    h.capture(text);
    h.ret(false);

    h.b.get_handler("route");
    let entry = h.b.create_block("entry");
    let api = h.b.create_block("api");
    let other = h.b.create_block("other");
    h.b.set_insert_point(entry);
    let path = h.string("/api/v1");
    let m = h.b.create_match_head(path);
    let label = h.b.get_string("/api");
    h.b.add_match_case(m, label, api);
    h.b.set_match_else(m, other);
    h.b.set_insert_point(api);
    h.capture_str("api");
    h.ret(true);
    h.b.set_insert_point(other);
    h.ret(false);
    h
}

#[test]
fn test_handlers_are_found_by_name() {
    let program = two_handlers().build();
    assert_eq!(program.handler_names().collect::<Vec<_>>(), ["main", "greet", "route"]);
    assert_eq!(program.find_handler("route"), Some(2));
    assert_eq!(run_captured(&program, "greet"), (false, vec!["hello, world".to_owned()]));
    assert_eq!(run_captured(&program, "route"), (true, vec!["api".to_owned()]));

    let err = program.run("missing", None, None).expect_err("no such handler");
    assert!(err.to_string().contains("missing"), "{err}");
}

#[test]
fn test_json_image_runs_like_the_compiled_program() {
    let compiled = two_handlers().build();
    let mut registry = test_registry();
    let json = compiled.to_json().expect("serializable");

    let mut reloaded = Program::from_json(&json).expect("valid image");
    assert!(!reloaded.is_linked());
    assert!(reloaded.link(&mut registry));
    let reloaded = Arc::new(reloaded);
    assert_eq!(reloaded.dump(), compiled.dump());
    for name in ["greet", "route"] {
        assert_eq!(run_captured(&reloaded, name), run_captured(&compiled, name));
    }
}

fn image(code: Vec<u64>, match_def: Option<MatchDef>) -> String {
    let mut pool = ConstantPool::default();
    let handler = pool.make_handler("main");
    pool.set_handler(handler, code, 1);
    pool.make_string("/");
    if let Some(def) = match_def {
        pool.make_match_def(def);
    }
    serde_json::to_string(&pool).expect("serializable")
}

#[test]
fn test_corrupt_images_are_rejected() {
    let exit = make_instruction(Opcode::EXIT, 1, 0, 0);
    assert!(Program::from_json(&image(vec![exit], None)).is_ok());

    let err = Program::from_json(&image(vec![0xff], None)).expect_err("bad opcode");
    assert!(err.to_string().contains("invalid opcode"), "{err}");

    let def = MatchDef {
        handler_id: 0,
        op: MatchClass::Same,
        else_pc: 0,
        cases: vec![MatchCaseDef { label: 0, pc: 9 }],
    };
    let err = Program::from_json(&image(vec![exit], Some(def))).expect_err("bad case target");
    assert!(err.to_string().contains("out of range"), "{err}");

    assert!(Program::from_json("{not json").is_err());
}

fn rejection(code: Vec<u64>) -> String {
    Program::from_json(&image(code, None))
        .expect_err("corrupt image must not load")
        .to_string()
}

#[test]
fn test_operands_are_checked_against_their_tables() {
    let exit = make_instruction(Opcode::EXIT, 1, 0, 0);
    let sload = |i| make_instruction(Opcode::SLOAD, i, 0, 0);
    assert!(Program::from_json(&image(vec![sload(0), make_instruction(Opcode::DISCARD, 1, 0, 0), exit], None)).is_ok());

    let err = rejection(vec![make_instruction(Opcode::JMP, 999, 0, 0)]);
    assert!(err.contains("jump target 999 at 0 out of range"), "{err}");
    let err = rejection(vec![sload(500), exit]);
    assert!(err.contains("string constant 500 at 0 out of range"), "{err}");
    let err = rejection(vec![make_instruction(Opcode::NLOAD, 0, 0, 0), exit]);
    assert!(err.contains("integer constant"), "{err}");
    let err = rejection(vec![make_instruction(Opcode::CALL, 0, 0, 1), exit]);
    assert!(err.contains("native function 0"), "{err}");
    let err = rejection(vec![make_instruction(Opcode::HANDLER, 3, 0, 0), exit]);
    assert!(err.contains("native handler 3"), "{err}");
    let err = rejection(vec![make_instruction(Opcode::SMATCHEQ, 0, 0, 0)]);
    assert!(err.contains("match table 0"), "{err}");
}

#[test]
fn test_control_flow_and_stack_depth_are_checked() {
    let exit = make_instruction(Opcode::EXIT, 1, 0, 0);
    let ret = make_instruction(Opcode::RET, 0, 0, 0);
    let one = make_instruction(Opcode::ILOAD, 1, 0, 0);

    let err = rejection(vec![make_instruction(Opcode::NOP, 0, 0, 0)]);
    assert!(err.contains("does not end with a terminator"), "{err}");
    assert!(rejection(vec![]).contains("does not end with a terminator"));

    let err = rejection(vec![ret]);
    assert!(err.contains("stack underflow at 0"), "{err}");
    let err = rejection(vec![one, make_instruction(Opcode::LOAD, 3, 0, 0), exit]);
    assert!(err.contains("LOAD slot 3"), "{err}");
    let err = rejection(vec![one, make_instruction(Opcode::STORE, 0, 0, 0), exit]);
    assert!(err.contains("STORE slot 0"), "{err}");

    // JZ 3 skips a push that the fall-through path makes.
    let jz = make_instruction(Opcode::JZ, 3, 0, 0);
    let err = rejection(vec![one, jz, one, exit]);
    assert!(err.contains("stack depth at 3"), "{err}");

    // Unreachable code is not walked.
    assert!(Program::from_json(&image(vec![exit, ret], None)).is_ok());
}

#[test]
fn test_cidr_with_impossible_prefix_is_rejected() {
    let mut pool = ConstantPool::default();
    let handler = pool.make_handler("main");
    pool.set_handler(handler, vec![make_instruction(Opcode::EXIT, 0, 0, 0)], 0);
    pool.make_cidr("10.0.0.0/8".parse().expect("valid cidr"));
    let json = serde_json::to_string(&pool).expect("serializable");
    assert!(Program::from_json(&json).is_ok());

    let corrupt = json.replace(r#""prefix":8"#, r#""prefix":200"#);
    assert_ne!(corrupt, json);
    let err = Program::from_json(&corrupt).expect_err("prefix out of range");
    assert!(format!("{err:#}").contains("prefix /200 out of range"), "{err:#}");
}

#[test]
fn test_dump_lists_pool_and_disassembly() {
    let program = two_handlers().build();
    let dump = program.dump();
    assert!(dump.starts_with("; Program\n"), "{dump}");
    assert!(dump.contains(".const string"), "{dump}");
    assert!(dump.contains(".extern function"), "{dump}");
    assert!(dump.contains("opaque(S)S"), "{dump}");
    assert!(dump.contains(".match 0 head"), "{dump}");
    assert!(dump.contains(".handler route"), "{dump}");
    assert!(dump.contains("SMATCHBEG"), "{dump}");
    assert!(dump.contains("SADD"), "{dump}");
}

#[test]
#[should_panic(expected = "VM stack overflow")]
fn test_stack_limit_is_enforced() {
    let mut h = Harness::new();
    h.config.vm.stack_limit = 1;
    let a = h.int(1);
    let b = h.int(2);
    let sum = h.b.create_add(a, b, "sum");
    h.capture(sum);
    let program = h.build();
    assert_eq!(program.vm_config().stack_limit, 1);
    run_captured(&program, "main");
}

#[test]
fn test_compile_without_optimizations_keeps_blocks() {
    let mut h = Harness::new();
    h.config.compiler.optimization_level = 0;
    let dead = h.b.create_block("dead");
    h.capture_str("live");
    h.ret(true);
    h.b.set_insert_point(dead);
    h.capture_str("dead");
    h.ret(false);
    let program = h.build();
    assert!(program.constants().strings().iter().any(|s| s == "dead"));
    assert_eq!(run_captured(&program, "main"), (true, vec!["live".to_owned()]));
}
