use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tracing::{debug, trace, warn};

use crate::{
    typ::FlowType,
    val::{FlowRegex, number},
};

use super::{
    instruction::{Opcode, disassemble, opcode, operand_a, operand_b, operand_c},
    matcher::RegexContext,
    native::{Params, ResumeToken, Userdata},
    program::Program,
    value::{Arena, Stack, Value},
};

static NEXT_RUNNER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Inactive,
    Running,
    Suspended,
}

/// Executes one handler of a linked [`Program`] on a private operand stack.
///
/// `Inactive -> Running -> Inactive` on completion; a native callback may
/// suspend the run (`Running -> Suspended`), after which only
/// [`resume`](Self::resume) with the matching [`ResumeToken`] continues it.
pub struct Runner {
    id: u64,
    program: Arc<Program>,
    handler: usize,
    state: RunnerState,
    ip: usize,
    stack: Stack,
    pub(crate) arena: Arena,
    regex: RegexContext,
    pub(crate) userdata: [Option<Userdata>; 2],
    /// Outcome of a native handler that suspended the run.
    pending_handled: Option<bool>,
}

impl Runner {
    pub(crate) fn new(program: Arc<Program>, handler: usize, userdata: [Option<Userdata>; 2]) -> Self {
        let stack = Stack::new(program.vm_config().stack_limit, program.handler(handler).stack_size);
        Self {
            id: NEXT_RUNNER_ID.fetch_add(1, Ordering::Relaxed),
            program,
            handler,
            state: RunnerState::Inactive,
            ip: 0,
            stack,
            arena: Arena::default(),
            regex: RegexContext::default(),
            userdata,
            pending_handled: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn instruction_pointer(&self) -> usize {
        self.ip
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn handler_name(&self) -> &str {
        &self.program.handler(self.handler).name
    }

    /// Starts the handler from the beginning. Returns whether the request was
    /// handled; `false` is also returned when the run got suspended.
    ///
    /// # Panics
    ///
    /// If the runner is not `Inactive`.
    pub fn run(&mut self) -> bool {
        assert_eq!(self.state, RunnerState::Inactive, "run() requires an inactive runner");
        self.rewind();
        self.state = RunnerState::Running;
        self.execute()
    }

    /// Continues a suspended run right after the instruction that suspended it.
    ///
    /// # Panics
    ///
    /// If the runner is not suspended or `token` belongs to another runner.
    pub fn resume(&mut self, token: ResumeToken) -> bool {
        assert_eq!(token.runner_id, self.id, "resume token belongs to runner {}", token.runner_id);
        assert_eq!(self.state, RunnerState::Suspended, "resume() requires a suspended runner");
        debug!(runner = self.id, handler = self.handler_name(), ip = self.ip, "resuming");
        self.state = RunnerState::Running;
        if self.pending_handled.take() == Some(true) {
            return self.finish(true);
        }
        self.execute()
    }

    /// Resets the instruction pointer, operand stack and per-run storage so the
    /// same handler can execute again from scratch. The state is unchanged.
    pub fn rewind(&mut self) {
        self.ip = 0;
        self.stack.clear();
        self.arena.clear();
        self.regex.clear();
        self.pending_handled = None;
    }

    pub(crate) fn suspend(&mut self) -> ResumeToken {
        assert_eq!(self.state, RunnerState::Running, "suspend() requires a running runner");
        debug!(runner = self.id, handler = self.handler_name(), ip = self.ip, "suspending");
        self.state = RunnerState::Suspended;
        ResumeToken { runner_id: self.id }
    }

    pub(crate) fn string_of(&self, v: Value) -> &str {
        self.arena.string(self.program.constants(), v)
    }

    pub(crate) fn ip_of(&self, v: Value) -> std::net::IpAddr {
        self.arena.ip(self.program.constants(), v)
    }

    pub(crate) fn cidr_of(&self, v: Value) -> crate::val::Cidr {
        self.arena.cidr(self.program.constants(), v)
    }

    pub(crate) fn regexp_of(&self, v: Value) -> &FlowRegex {
        self.arena.regexp(self.program.constants(), v)
    }

    fn finish(&mut self, handled: bool) -> bool {
        trace!(runner = self.id, handled, arena = self.arena.len(), "finished");
        self.state = RunnerState::Inactive;
        handled
    }

    fn pop_number(&mut self) -> i64 {
        self.stack.pop(FlowType::Number).as_number()
    }

    fn pop_bool(&mut self) -> bool {
        self.stack.pop(FlowType::Boolean).as_bool()
    }

    fn push_number(&mut self, n: i64) {
        self.stack.push(Value::from_number(n), FlowType::Number);
    }

    fn push_bool(&mut self, b: bool) {
        self.stack.push(Value::from_bool(b), FlowType::Boolean);
    }

    fn push_string(&mut self, s: String) {
        let v = self.arena.alloc_string(s);
        self.stack.push(v, FlowType::String);
    }

    fn number_op(&mut self, f: impl FnOnce(i64, i64) -> i64) {
        let b = self.pop_number();
        let a = self.pop_number();
        self.push_number(f(a, b));
    }

    fn number_cmp(&mut self, f: impl FnOnce(i64, i64) -> bool) {
        let b = self.pop_number();
        let a = self.pop_number();
        self.push_bool(f(a, b));
    }

    fn bool_op(&mut self, f: impl FnOnce(bool, bool) -> bool) {
        let b = self.pop_bool();
        let a = self.pop_bool();
        self.push_bool(f(a, b));
    }

    fn string_cmp(&mut self, f: impl FnOnce(&str, &str) -> bool) {
        let b = self.stack.pop(FlowType::String);
        let a = self.stack.pop(FlowType::String);
        let result = f(self.string_of(a), self.string_of(b));
        self.push_bool(result);
    }

    fn execute(&mut self) -> bool {
        let program = Arc::clone(&self.program);
        let pool = program.constants();
        let code = &program.handler(self.handler).code;

        loop {
            let instr = *code
                .get(self.ip)
                .unwrap_or_else(|| panic!("instruction pointer {} ran past the end of the handler", self.ip));
            trace!(target: "xflow::vm", depth = self.stack.len(), "{}", disassemble(instr, self.ip));
            self.ip += 1;

            let a = operand_a(instr) as usize;
            match opcode(instr) {
                Opcode::NOP => {}
                Opcode::ALLOCA => self.stack.alloca(a),
                Opcode::DISCARD => self.stack.discard(a),
                Opcode::EXIT => return self.finish(a != 0),
                Opcode::RET => {
                    let handled = self.pop_bool();
                    return self.finish(handled);
                }
                Opcode::JMP => self.ip = a,
                Opcode::JN => {
                    if self.pop_bool() {
                        self.ip = a;
                    }
                }
                Opcode::JZ => {
                    if !self.pop_bool() {
                        self.ip = a;
                    }
                }
                Opcode::LOAD => self.stack.load(a),
                Opcode::STORE => self.stack.store(a),

                Opcode::ILOAD => self.push_number(a as i64),
                Opcode::NLOAD => self.push_number(pool.get_integer(a)),
                Opcode::NNEG => {
                    let n = self.pop_number();
                    self.push_number(number::neg(n));
                }
                Opcode::NNOT => {
                    let n = self.pop_number();
                    self.push_number(!n);
                }
                Opcode::NADD => self.number_op(number::add),
                Opcode::NSUB => self.number_op(number::sub),
                Opcode::NMUL => self.number_op(number::mul),
                Opcode::NDIV => self.number_op(number::div),
                Opcode::NREM => self.number_op(number::rem),
                Opcode::NSHL => self.number_op(number::shl),
                Opcode::NSHR => self.number_op(number::shr),
                Opcode::NPOW => self.number_op(number::pow),
                Opcode::NAND => self.number_op(|x, y| x & y),
                Opcode::NOR => self.number_op(|x, y| x | y),
                Opcode::NXOR => self.number_op(|x, y| x ^ y),
                Opcode::NCMPZ => {
                    let n = self.pop_number();
                    self.push_bool(n == 0);
                }
                Opcode::NCMPEQ => self.number_cmp(|x, y| x == y),
                Opcode::NCMPNE => self.number_cmp(|x, y| x != y),
                Opcode::NCMPLE => self.number_cmp(|x, y| x <= y),
                Opcode::NCMPGE => self.number_cmp(|x, y| x >= y),
                Opcode::NCMPLT => self.number_cmp(|x, y| x < y),
                Opcode::NCMPGT => self.number_cmp(|x, y| x > y),

                Opcode::BNOT => {
                    let b = self.pop_bool();
                    self.push_bool(!b);
                }
                Opcode::BAND => self.bool_op(|x, y| x && y),
                Opcode::BOR => self.bool_op(|x, y| x || y),
                Opcode::BXOR => self.bool_op(|x, y| x != y),

                Opcode::SLOAD => self.stack.push(Value::pool(a), FlowType::String),
                Opcode::SADD => {
                    let b = self.stack.pop(FlowType::String);
                    let a = self.stack.pop(FlowType::String);
                    let joined = [self.string_of(a), self.string_of(b)].concat();
                    self.push_string(joined);
                }
                Opcode::SSUBSTR => {
                    let count = usize::try_from(self.pop_number()).unwrap_or(0);
                    let offset = usize::try_from(self.pop_number()).unwrap_or(0);
                    let s = self.stack.pop(FlowType::String);
                    let sub: String = self.string_of(s).chars().skip(offset).take(count).collect();
                    self.push_string(sub);
                }
                Opcode::SCMPEQ => self.string_cmp(|x, y| x == y),
                Opcode::SCMPNE => self.string_cmp(|x, y| x != y),
                Opcode::SCMPLE => self.string_cmp(|x, y| x <= y),
                Opcode::SCMPGE => self.string_cmp(|x, y| x >= y),
                Opcode::SCMPLT => self.string_cmp(|x, y| x < y),
                Opcode::SCMPGT => self.string_cmp(|x, y| x > y),
                Opcode::SCMPBEG => self.string_cmp(|x, y| x.starts_with(y)),
                Opcode::SCMPEND => self.string_cmp(|x, y| x.ends_with(y)),
                Opcode::SCONTAINS => self.string_cmp(|haystack, needle| haystack.contains(needle)),
                Opcode::SLEN => {
                    let s = self.stack.pop(FlowType::String);
                    let len = self.string_of(s).chars().count() as i64;
                    self.push_number(len);
                }
                Opcode::SISEMPTY => {
                    let s = self.stack.pop(FlowType::String);
                    let empty = self.string_of(s).is_empty();
                    self.push_bool(empty);
                }
                Opcode::SMATCHEQ | Opcode::SMATCHBEG | Opcode::SMATCHEND | Opcode::SMATCHR => {
                    let subject = self.stack.pop(FlowType::String);
                    let subject = self.arena.string(pool, subject);
                    let pc = program.matcher(a).evaluate(subject, pool, &mut self.regex);
                    self.ip = pc as usize;
                }

                Opcode::PLOAD => self.stack.push(Value::pool(a), FlowType::IPAddress),
                Opcode::PCMPEQ | Opcode::PCMPNE => {
                    let b = self.stack.pop(FlowType::IPAddress);
                    let a = self.stack.pop(FlowType::IPAddress);
                    let equal = self.ip_of(a) == self.ip_of(b);
                    self.push_bool(equal == (opcode(instr) == Opcode::PCMPEQ));
                }
                Opcode::PINCIDR => {
                    let net = self.stack.pop(FlowType::Cidr);
                    let ip = self.stack.pop(FlowType::IPAddress);
                    let inside = self.cidr_of(net).contains(&self.ip_of(ip));
                    self.push_bool(inside);
                }
                Opcode::CLOAD => self.stack.push(Value::pool(a), FlowType::Cidr),
                Opcode::RLOAD => self.stack.push(Value::pool(a), FlowType::RegExp),
                Opcode::SREGMATCH => {
                    let s = self.stack.pop(FlowType::String);
                    let captures = pool.get_regexp(a).captures(self.arena.string(pool, s));
                    let matched = captures.is_some();
                    if let Some(captures) = captures {
                        self.regex.set(captures);
                    }
                    self.push_bool(matched);
                }
                Opcode::SREGGROUP => {
                    let group = self.pop_number();
                    let text = self.regex.group(group).to_owned();
                    self.push_string(text);
                }

                Opcode::N2S => {
                    let n = self.pop_number();
                    self.push_string(itoa::Buffer::new().format(n).to_owned());
                }
                Opcode::P2S => {
                    let ip = self.stack.pop(FlowType::IPAddress);
                    let text = self.ip_of(ip).to_string();
                    self.push_string(text);
                }
                Opcode::C2S => {
                    let net = self.stack.pop(FlowType::Cidr);
                    let text = self.cidr_of(net).to_string();
                    self.push_string(text);
                }
                Opcode::R2S => {
                    let re = self.stack.pop(FlowType::RegExp);
                    let text = self.regexp_of(re).pattern().to_owned();
                    self.push_string(text);
                }
                Opcode::S2N => {
                    let s = self.stack.pop(FlowType::String);
                    let n = number::parse(self.string_of(s));
                    self.push_number(n);
                }

                Opcode::CALL => {
                    let argc = operand_b(instr) as usize;
                    let callback = Arc::clone(program.native_function(a));
                    let args = self.stack.top(argc).to_vec();
                    self.stack.discard(argc);
                    let result = {
                        let mut params = Params::new(self, &args);
                        callback.invoke(&mut params);
                        params.result()
                    };
                    if operand_c(instr) != 0 {
                        self.stack.push(result, callback.signature().return_type());
                    }
                    if self.state == RunnerState::Suspended {
                        return false;
                    }
                }
                Opcode::HANDLER => {
                    let argc = operand_b(instr) as usize;
                    let callback = Arc::clone(program.native_handler(a));
                    let args = self.stack.top(argc).to_vec();
                    self.stack.discard(argc);
                    let handled = {
                        let mut params = Params::new(self, &args);
                        callback.invoke(&mut params);
                        params.result().as_bool()
                    };
                    if self.state == RunnerState::Suspended {
                        self.pending_handled = Some(handled);
                        return false;
                    }
                    if handled {
                        return self.finish(true);
                    }
                }
            }
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.state == RunnerState::Suspended {
            warn!(runner = self.id, handler = self.handler_name(), ip = self.ip, "dropping a suspended runner");
        }
    }
}
