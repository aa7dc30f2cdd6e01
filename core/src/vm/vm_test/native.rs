use super::*;
use crate::vm::{CallbackKind, Module, Runtime};

#[test]
fn test_link_reports_each_missing_signature_once() {
    let mut h = Harness::new();
    let missing_int = h
        .b
        .get_builtin_function(Signature::new("missing", vec![FlowType::Number], FlowType::Void), false);
    let missing_str = h
        .b
        .get_builtin_function(Signature::new("missing", vec![FlowType::String], FlowType::Void), false);
    let gone = h.b.get_builtin_handler("gone()B".parse().expect("valid signature"));
    for n in [1, 2] {
        let v = h.b.get_int(n);
        h.b.create_call_function(missing_int, vec![v], "");
    }
    let s = h.b.get_string("x");
    h.b.create_call_function(missing_str, vec![s], "");
    h.b.create_invoke_handler(gone, vec![]);
    h.ret(false);

    let mut ir = h.b.into_program();
    let mut program = compile(&mut ir, &FlowConfig::default()).expect("compiles");
    assert!(!program.link(&mut test_registry()));
    assert!(!program.is_linked());
    let unresolved: Vec<String> = program.unresolved_symbols().iter().map(|s| s.to_string()).collect();
    assert_eq!(unresolved, ["gone()B", "missing(I)V", "missing(S)V"]);

    let program = Arc::new(program);
    let err = program.run("main", None, None).expect_err("unlinked programs do not run");
    assert!(err.to_string().contains("not linked"), "{err}");
}

#[test]
#[should_panic(expected = "not linked")]
fn test_runner_requires_linked_program() {
    let mut h = Harness::new();
    h.ret(true);
    let mut ir = h.b.into_program();
    let program = compile(&mut ir, &FlowConfig::default()).expect("compiles");
    let _runner = Arc::new(program).create_runner(0);
}

#[test]
fn test_signature_lookup_is_exact() {
    let registry = test_registry();
    assert!(registry.find(&"opaque(I)I".parse().expect("valid")).is_some());
    assert!(registry.find(&"opaque(I)S".parse().expect("valid")).is_none());
    assert!(registry.find(&"opaque(II)I".parse().expect("valid")).is_none());
    assert!(registry.find(&"capture(P)V".parse().expect("valid")).is_none());
}

#[test]
fn test_params_expose_arguments_and_result_slot() {
    let mut h = Harness::new();
    let describe = h
        .registry
        .register_function("describe", FlowType::String)
        .param::<String>("name")
        .param::<FlowNumber>("count")
        .param::<bool>("flag")
        .param::<IpAddr>("peer")
        .bind(|p| {
            let name: &str = p.get(1);
            let count: FlowNumber = p.get(2);
            let flag: bool = p.get(3);
            let peer: IpAddr = p.get(4);
            let text = format!("{}:{name}:{count}:{flag}:{peer}", p.count());
            p.set_result(text);
        });
    let callee = h.b.get_native_function(&describe);
    let name = h.string("web");
    let count = h.int(3);
    let flag = h.boolean(true);
    let peer = h.ip("10.0.0.9");
    let text = h.b.create_call_function(callee, vec![name, count, flag, peer], "text");
    h.capture(text);

    let (_, out) = h.run();
    assert_eq!(out, ["4:web:3:true:10.0.0.9"]);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_params_reject_result_slot_as_argument() {
    let mut h = Harness::new();
    let peek = h
        .registry
        .register_function("peek", FlowType::Void)
        .bind(|p| {
            let _: FlowNumber = p.get(0);
        });
    let callee = h.b.get_native_function(&peek);
    h.b.create_call_function(callee, vec![], "");
    h.run();
}

#[test]
fn test_userdata_reaches_callbacks() {
    let mut h = Harness::new();
    let tag = h
        .registry
        .register_function("tag", FlowType::Number)
        .bind(|p| {
            let tag = p.userdata2::<FlowNumber>().copied().unwrap_or(-1);
            p.set_result(tag);
        });
    let callee = h.b.get_native_function(&tag);
    let v = h.b.create_call_function(callee, vec![], "tag");
    h.capture(v);
    let program = h.build();

    let (buffer, userdata) = captures();
    let tag: Userdata = Arc::new(7 as FlowNumber);
    assert!(program.run("main", Some(userdata), Some(tag)).expect("runs"));
    assert_eq!(*buffer.lock().expect("capture lock"), ["7"]);

    let (buffer, userdata) = captures();
    assert!(program.run("main", Some(userdata), None).expect("runs"));
    assert_eq!(*buffer.lock().expect("capture lock"), ["-1"]);
}

/// main: accept(arg) as a native handler, then capture "after" and return false.
fn handler_program(arg: &str) -> (bool, Vec<String>) {
    let mut h = Harness::new();
    let accept = h
        .registry
        .register_handler("accept")
        .param::<String>("token")
        .bind(|p| {
            let token: String = p.get(1);
            p.set_result(token == "yes");
        });
    assert_eq!(accept.kind(), CallbackKind::Handler);
    let callee = h.b.get_native_handler(&accept);
    let token = h.string(arg);
    h.b.create_invoke_handler(callee, vec![token]);
    h.capture_str("after");
    h.ret(false);
    h.run()
}

#[test]
fn test_native_handler_can_finish_the_run() {
    assert_eq!(handler_program("yes"), (true, vec![]));
    assert_eq!(handler_program("no"), (false, vec!["after".to_owned()]));
}

#[test]
fn test_reregistering_replaces_callback() {
    let mut h = Harness::new();
    h.registry
        .register_function("answer", FlowType::Number)
        .bind(|p| p.set_result(1 as FlowNumber));
    let before = h.registry.len();
    let answer = h
        .registry
        .register_function("answer", FlowType::Number)
        .side_effect_free()
        .bind(|p| p.set_result(42 as FlowNumber));
    assert_eq!(h.registry.len(), before);
    assert!(answer.is_side_effect_free());

    let callee = h.b.get_native_function(&answer);
    let v = h.b.create_call_function(callee, vec![], "answer");
    h.capture(v);
    assert_eq!(h.run().1, ["42"]);
}

#[test]
fn test_callback_metadata() {
    let mut registry = Registry::new();
    let cb = registry
        .register_function("log", FlowType::Void)
        .param::<String>("message")
        .param_with_default::<FlowNumber>("level", 3)
        .never_returns()
        .bind(|_| {});
    assert_eq!(cb.signature().to_string(), "log(SI)V");
    assert_eq!(cb.param_names(), ["message", "level"]);
    assert_eq!(cb.default_value(0), None);
    assert_eq!(cb.default_value(1).and_then(|l| l.as_int()), Some(3));
    assert!(cb.never_returns());
    assert!(!cb.is_side_effect_free());
    assert_eq!(registry.builtins().len(), 1);
}

#[derive(Debug)]
struct GeoModule;

impl Module for GeoModule {
    fn name(&self) -> &str {
        "geo"
    }

    fn register(&self, registry: &mut Registry, path: &str) -> anyhow::Result<()> {
        anyhow::ensure!(path == "geo.db", "no database at {path}");
        registry
            .register_function("country", FlowType::String)
            .param::<IpAddr>("ip")
            .side_effect_free()
            .bind(|p| {
                let ip: IpAddr = p.get(1);
                p.set_result(if ip.is_loopback() { "local" } else { "remote" });
            });
        Ok(())
    }
}

fn geo_program(path: &str) -> (Program, Registry) {
    let mut h = Harness::new();
    h.b.program_mut().add_import("geo", path);
    let country = h
        .b
        .get_builtin_function(Signature::new("country", vec![FlowType::IPAddress], FlowType::String), true);
    let ip = h.ip("127.0.0.1");
    let name = h.b.create_call_function(country, vec![ip], "country");
    h.capture(name);
    h.ret(true);
    let mut ir = h.b.into_program();
    let program = compile(&mut ir, &FlowConfig::default()).expect("compiles");
    let mut registry = test_registry();
    registry.register_module(Arc::new(GeoModule));
    (program, registry)
}

#[test]
fn test_modules_are_imported_at_link_time() {
    let (mut program, mut registry) = geo_program("geo.db");
    assert_eq!(program.constants().modules(), [("geo".to_owned(), "geo.db".to_owned())]);
    assert!(program.link(&mut registry));
    let program = Arc::new(program);
    assert_eq!(run_captured(&program, "main"), (true, vec!["local".to_owned()]));

    let mut imported = Vec::new();
    assert!(registry.import("geo", "geo.db", &mut imported), "second import is a no-op");
    assert!(imported.is_empty());
}

#[test]
fn test_failed_import_fails_link() {
    let (mut program, mut registry) = geo_program("elsewhere.db");
    assert!(!program.link(&mut registry));
    assert_eq!(program.unresolved_symbols().len(), 1);

    let mut builtins = Vec::new();
    assert!(!registry.import("nope", "", &mut builtins));
}
