pub(super) use std::{
    net::IpAddr,
    sync::{Arc, Mutex},
};

pub(super) use crate::{
    compiler::compile,
    config::FlowConfig,
    ir::{BinaryOp, BlockId, IRBuilder, Value},
    signature::Signature,
    typ::{FlowNumber, FlowType},
    val::{Cidr, FlowRegex},
    vm::{Params, Program, Registry, ResumeToken, Runner, RunnerState, Userdata},
};

/// Buffer the `capture` natives append to; installed as first userdata.
pub(super) type Captures = Mutex<Vec<String>>;

fn record(p: &Params<'_>, value: String) {
    p.userdata::<Captures>()
        .expect("capture buffer installed")
        .lock()
        .expect("capture lock")
        .push(value);
}

/// `opaque(T)T` returns its argument and hides constants from the folder;
/// `capture(T)V` appends its argument, formatted, to the [`Captures`] buffer.
pub(super) fn test_registry() -> Registry {
    let mut r = Registry::new();
    r.register_function("opaque", FlowType::Number)
        .param::<FlowNumber>("value")
        .bind(|p| {
            let v: FlowNumber = p.get(1);
            p.set_result(v);
        });
    r.register_function("opaque", FlowType::String)
        .param::<String>("value")
        .bind(|p| {
            let v: String = p.get(1);
            p.set_result(v);
        });
    r.register_function("opaque", FlowType::Boolean)
        .param::<bool>("value")
        .bind(|p| {
            let v: bool = p.get(1);
            p.set_result(v);
        });
    r.register_function("opaque", FlowType::IPAddress)
        .param::<IpAddr>("value")
        .bind(|p| {
            let v: IpAddr = p.get(1);
            p.set_result(v);
        });
    r.register_function("capture", FlowType::Void)
        .param::<FlowNumber>("value")
        .bind(|p| {
            let v: FlowNumber = p.get(1);
            record(p, v.to_string());
        });
    r.register_function("capture", FlowType::Void)
        .param::<String>("value")
        .bind(|p| {
            let v: String = p.get(1);
            record(p, v);
        });
    r.register_function("capture", FlowType::Void)
        .param::<bool>("value")
        .bind(|p| {
            let v: bool = p.get(1);
            record(p, v.to_string());
        });
    r
}

/// Sends VM logs to the test output; filter with `RUST_LOG=xflow::vm=trace`.
pub(super) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds the handler `main`, starting in its entry block.
pub(super) struct Harness {
    pub(super) b: IRBuilder,
    pub(super) registry: Registry,
    pub(super) config: FlowConfig,
}

impl Harness {
    pub(super) fn new() -> Self {
        init_tracing();
        let mut b = IRBuilder::new();
        b.get_handler("main");
        let entry = b.create_block("entry");
        b.set_insert_point(entry);
        Self {
            b,
            registry: test_registry(),
            config: FlowConfig::default(),
        }
    }

    pub(super) fn opaque(&mut self, value: Value) -> Value {
        let ty = self.b.type_of(value);
        let callee = self
            .b
            .get_builtin_function(Signature::new("opaque", vec![ty], ty), false);
        self.b.create_call_function(callee, vec![value], "opaque")
    }

    pub(super) fn int(&mut self, n: FlowNumber) -> Value {
        let c = self.b.get_int(n);
        self.opaque(c)
    }

    pub(super) fn string(&mut self, s: &str) -> Value {
        let c = self.b.get_string(s);
        self.opaque(c)
    }

    pub(super) fn boolean(&mut self, v: bool) -> Value {
        let c = self.b.get_bool(v);
        self.opaque(c)
    }

    pub(super) fn ip(&mut self, text: &str) -> Value {
        let c = self.b.get_ip(text.parse().expect("valid ip"));
        self.opaque(c)
    }

    pub(super) fn cidr(&mut self, text: &str) -> Value {
        let net: Cidr = text.parse().expect("valid cidr");
        self.b.get_cidr(net)
    }

    pub(super) fn capture(&mut self, value: Value) {
        let ty = self.b.type_of(value);
        let callee = self
            .b
            .get_builtin_function(Signature::new("capture", vec![ty], FlowType::Void), false);
        self.b.create_call_function(callee, vec![value], "");
    }

    pub(super) fn capture_str(&mut self, text: &str) {
        let c = self.b.get_string(text);
        self.capture(c);
    }

    pub(super) fn ret(&mut self, handled: bool) {
        let v = self.b.get_bool(handled);
        self.b.create_ret(v);
    }

    /// Compiles and links; an unterminated insertion block returns `true`.
    pub(super) fn build(mut self) -> Arc<Program> {
        if let Some(block) = self.b.insert_point()
            && !self.b.handler().is_terminated(block)
        {
            self.ret(true);
        }
        let mut ir = self.b.into_program();
        let mut program = compile(&mut ir, &self.config).expect("program compiles");
        assert!(
            program.link(&mut self.registry),
            "unresolved: {:?}",
            program.unresolved_symbols()
        );
        Arc::new(program)
    }

    pub(super) fn run(self) -> (bool, Vec<String>) {
        let program = self.build();
        run_captured(&program, "main")
    }
}

pub(super) fn captures() -> (Arc<Captures>, Userdata) {
    let buffer = Arc::new(Captures::default());
    let userdata: Userdata = buffer.clone();
    (buffer, userdata)
}

pub(super) fn run_captured(program: &Arc<Program>, handler: &str) -> (bool, Vec<String>) {
    let (buffer, userdata) = captures();
    let handled = program.run(handler, Some(userdata), None).expect("handler exists");
    let out = buffer.lock().expect("capture lock").clone();
    (handled, out)
}

mod arithmetic;
mod control_flow;
mod native;
mod program;
mod suspend;
