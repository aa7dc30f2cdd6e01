use std::net::IpAddr;

use crate::{
    signature::Signature,
    typ::{FlowNumber, FlowType, MatchClass},
    val::{Cidr, FlowRegex, Literal, number},
    vm::NativeCallback,
};

use super::{
    BinaryOp, BlockId, BuiltinFunctionId, BuiltinHandlerId, HandlerId, IRBuiltinFunction, IRBuiltinHandler,
    IRHandler, IRProgram, Instr, InstrId, InstrKind, UnaryOp, Value,
};

/// Imperative construction API for [`IRProgram`]s.
///
/// The builder tracks a current handler and an insertion block; every
/// `create_*` factory appends at the insertion point and returns the produced
/// value. Factories whose operands are all constants fold to a constant
/// instead of emitting an instruction.
///
/// # Panics
///
/// Factories panic on programming errors of the caller: no insertion point,
/// operands of the wrong type, or inserting into a block that already ends in
/// a terminator.
#[derive(Debug, Default)]
pub struct IRBuilder {
    program: IRProgram,
    handler: Option<HandlerId>,
    insert_point: Option<BlockId>,
}

macro_rules! binary_factories {
    ($($fn_name:ident => $op:ident;)*) => {
        $(
            pub fn $fn_name(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
                self.create_binary(BinaryOp::$op, lhs, rhs, name)
            }
        )*
    };
}

impl IRBuilder {
    pub fn new() -> Self {
        Self::with_program(IRProgram::new())
    }

    pub fn with_program(program: IRProgram) -> Self {
        Self {
            program,
            handler: None,
            insert_point: None,
        }
    }

    pub fn program(&self) -> &IRProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut IRProgram {
        &mut self.program
    }

    pub fn into_program(self) -> IRProgram {
        self.program
    }

    // --- context -------------------------------------------------------

    pub fn set_handler(&mut self, handler: HandlerId) {
        self.handler = Some(handler);
        self.insert_point = None;
    }

    /// Makes the handler named `name` current, creating it if needed.
    pub fn get_handler(&mut self, name: &str) -> HandlerId {
        let id = match self.program.find_handler(name) {
            Some(id) => id,
            None => self.program.add_handler(IRHandler::new(name)),
        };
        self.set_handler(id);
        id
    }

    pub fn handler(&self) -> &IRHandler {
        self.program.handler(self.current_handler())
    }

    fn handler_mut(&mut self) -> &mut IRHandler {
        let id = self.current_handler();
        self.program.handler_mut(id)
    }

    fn current_handler(&self) -> HandlerId {
        self.handler.unwrap_or_else(|| panic!("IRBuilder has no current handler"))
    }

    /// Creates a detached block in the current handler. It becomes reachable
    /// only once some terminator targets it.
    pub fn create_block(&mut self, name: &str) -> BlockId {
        self.handler_mut().create_block(name)
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        assert!(
            self.handler().contains_block(block),
            "insert point {block} does not belong to handler {}",
            self.handler().name()
        );
        self.insert_point = Some(block);
    }

    pub fn insert_point(&self) -> Option<BlockId> {
        self.insert_point
    }

    /// Appends `instr` at the insertion point under a uniquified `name`.
    pub fn insert(&mut self, mut instr: Instr, name: &str) -> InstrId {
        let block = self
            .insert_point
            .unwrap_or_else(|| panic!("IRBuilder has no insert point for `{}`", instr.mnemonic()));
        let handler = self.handler_mut();
        if instr.ty != FlowType::Void || !name.is_empty() {
            instr.name = handler.unique_name(name);
        }
        handler.push_instr(block, instr)
    }

    fn insert_value(&mut self, instr: Instr, name: &str) -> Value {
        Value::Instr(self.insert(instr, name))
    }

    pub fn type_of(&self, value: Value) -> FlowType {
        self.program.type_of(self.handler(), value)
    }

    fn literal(&self, value: Value) -> Option<&Literal> {
        value.as_constant().map(|id| self.program.constant(id))
    }

    fn expect_type(&self, value: Value, expected: FlowType, what: &str) {
        let actual = self.type_of(value);
        assert_eq!(actual, expected, "{what}: operand {value} has type {actual}, expected {expected}");
    }

    // --- constants -----------------------------------------------------

    pub fn get(&mut self, literal: Literal) -> Value {
        Value::Constant(self.program.get_constant(literal))
    }

    pub fn get_int(&mut self, n: FlowNumber) -> Value {
        self.get(Literal::Int(n))
    }

    pub fn get_bool(&mut self, b: bool) -> Value {
        self.get(Literal::Boolean(b))
    }

    pub fn get_string(&mut self, s: &str) -> Value {
        self.get(Literal::String(s.to_owned()))
    }

    pub fn get_ip(&mut self, ip: IpAddr) -> Value {
        self.get(Literal::IP(ip))
    }

    pub fn get_cidr(&mut self, cidr: Cidr) -> Value {
        self.get(Literal::Cidr(cidr))
    }

    pub fn get_regexp(&mut self, re: FlowRegex) -> Value {
        self.get(Literal::RegExp(re))
    }

    // --- builtins ------------------------------------------------------

    pub fn get_builtin_function(&mut self, signature: Signature, side_effect_free: bool) -> BuiltinFunctionId {
        self.program.get_builtin_function(IRBuiltinFunction {
            signature,
            side_effect_free,
            never_returns: false,
        })
    }

    pub fn get_builtin_handler(&mut self, signature: Signature) -> BuiltinHandlerId {
        self.program.get_builtin_handler(IRBuiltinHandler { signature })
    }

    /// Declares a registered native function, carrying over its optimizer
    /// flags.
    pub fn get_native_function(&mut self, callback: &NativeCallback) -> BuiltinFunctionId {
        assert!(!callback.is_handler(), "{} is a native handler", callback.signature());
        self.program.get_builtin_function(IRBuiltinFunction {
            signature: callback.signature().clone(),
            side_effect_free: callback.is_side_effect_free(),
            never_returns: callback.never_returns(),
        })
    }

    pub fn get_native_handler(&mut self, callback: &NativeCallback) -> BuiltinHandlerId {
        assert!(callback.is_handler(), "{} is a native function", callback.signature());
        self.get_builtin_handler(callback.signature().clone())
    }

    // --- memory --------------------------------------------------------

    pub fn create_alloca(&mut self, ty: FlowType, name: &str) -> Value {
        assert!(ty != FlowType::Void, "cannot allocate a variable of type void");
        self.insert_value(Instr::new(InstrKind::Alloca, ty, vec![]), name)
    }

    fn variable_type(&self, variable: Value, what: &str) -> FlowType {
        let id = variable
            .as_instr()
            .filter(|id| self.handler().instr(*id).kind == InstrKind::Alloca)
            .unwrap_or_else(|| panic!("{what}: {variable} is not a variable"));
        self.handler().instr(id).ty
    }

    pub fn create_load(&mut self, variable: Value, name: &str) -> Value {
        let ty = self.variable_type(variable, "load");
        self.insert_value(Instr::new(InstrKind::Load, ty, vec![variable]), name)
    }

    pub fn create_store(&mut self, variable: Value, value: Value) -> InstrId {
        let ty = self.variable_type(variable, "store");
        self.expect_type(value, ty, "store");
        self.insert(Instr::new(InstrKind::Store, FlowType::Void, vec![variable, value]), "")
    }

    pub fn create_phi(&mut self, incoming: Vec<Value>, name: &str) -> Value {
        let ty = incoming
            .first()
            .map(|v| self.type_of(*v))
            .unwrap_or_else(|| panic!("phi requires at least one incoming value"));
        for value in &incoming {
            self.expect_type(*value, ty, "phi");
        }
        self.insert_value(Instr::new(InstrKind::Phi, ty, incoming), name)
    }

    // --- casts ---------------------------------------------------------

    /// Converts `value` to `ty`. Converting to the same type yields `value`
    /// itself.
    pub fn create_convert(&mut self, ty: FlowType, value: Value, name: &str) -> Value {
        if self.type_of(value) == ty {
            return value;
        }
        if let Some(folded) = self.literal(value).and_then(|lit| fold_cast(lit, ty)) {
            return self.get(folded);
        }
        self.insert_value(Instr::new(InstrKind::Cast, ty, vec![value]), name)
    }

    // --- unary / binary ------------------------------------------------

    pub fn create_unary(&mut self, op: UnaryOp, value: Value, name: &str) -> Value {
        self.expect_type(value, op.operand_type(), op.mnemonic());
        if let Some(folded) = self.literal(value).and_then(|lit| fold_unary(op, lit)) {
            return self.get(folded);
        }
        self.insert_value(Instr::new(InstrKind::Unary(op), op.result_type(), vec![value]), name)
    }

    pub fn create_neg(&mut self, value: Value, name: &str) -> Value {
        self.create_unary(UnaryOp::INeg, value, name)
    }

    pub fn create_not(&mut self, value: Value, name: &str) -> Value {
        self.create_unary(UnaryOp::INot, value, name)
    }

    pub fn create_bnot(&mut self, value: Value, name: &str) -> Value {
        self.create_unary(UnaryOp::BNot, value, name)
    }

    pub fn create_slen(&mut self, value: Value, name: &str) -> Value {
        self.create_unary(UnaryOp::SLen, value, name)
    }

    pub fn create_sis_empty(&mut self, value: Value, name: &str) -> Value {
        self.create_unary(UnaryOp::SIsEmpty, value, name)
    }

    pub fn create_binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value, name: &str) -> Value {
        self.expect_type(lhs, op.lhs_type(), op.mnemonic());
        self.expect_type(rhs, op.rhs_type(), op.mnemonic());
        if let (Some(a), Some(b)) = (self.literal(lhs), self.literal(rhs))
            && let Some(folded) = fold_binary(op, a, b)
        {
            return self.get(folded);
        }
        self.insert_value(Instr::new(InstrKind::Binary(op), op.result_type(), vec![lhs, rhs]), name)
    }

    binary_factories! {
        create_add => IAdd;
        create_sub => ISub;
        create_mul => IMul;
        create_div => IDiv;
        create_rem => IRem;
        create_pow => IPow;
        create_and => IAnd;
        create_or => IOr;
        create_xor => IXor;
        create_shl => IShl;
        create_shr => IShr;
        create_icmp_eq => ICmpEQ;
        create_icmp_ne => ICmpNE;
        create_icmp_le => ICmpLE;
        create_icmp_ge => ICmpGE;
        create_icmp_lt => ICmpLT;
        create_icmp_gt => ICmpGT;
        create_band => BAnd;
        create_bor => BOr;
        create_bxor => BXor;
        create_sadd => SAdd;
        create_scmp_eq => SCmpEQ;
        create_scmp_ne => SCmpNE;
        create_scmp_le => SCmpLE;
        create_scmp_ge => SCmpGE;
        create_scmp_lt => SCmpLT;
        create_scmp_gt => SCmpGT;
        create_scmp_re => SCmpRE;
        create_scmp_beg => SCmpBeg;
        create_scmp_end => SCmpEnd;
        create_sin => SIn;
        create_pcmp_eq => PCmpEQ;
        create_pcmp_ne => PCmpNE;
        create_pin_cidr => PInCidr;
    }

    pub fn create_substr(&mut self, string: Value, offset: Value, count: Value, name: &str) -> Value {
        self.expect_type(string, FlowType::String, "substr");
        self.expect_type(offset, FlowType::Number, "substr");
        self.expect_type(count, FlowType::Number, "substr");
        self.insert_value(
            Instr::new(InstrKind::SubStr, FlowType::String, vec![string, offset, count]),
            name,
        )
    }

    /// Capture group `group` of the most recent regular-expression match.
    pub fn create_regexp_group(&mut self, group: Value, name: &str) -> Value {
        self.expect_type(group, FlowType::Number, "regexpgroup");
        self.insert_value(Instr::new(InstrKind::RegExpGroup, FlowType::String, vec![group]), name)
    }

    // --- calls ---------------------------------------------------------

    fn check_args(&self, signature: &Signature, args: &[Value]) {
        assert_eq!(
            signature.params().len(),
            args.len(),
            "{signature}: expected {} arguments, got {}",
            signature.params().len(),
            args.len()
        );
        for (arg, ty) in args.iter().zip(signature.params()) {
            self.expect_type(*arg, *ty, signature.name());
        }
    }

    pub fn create_call_function(&mut self, callee: BuiltinFunctionId, args: Vec<Value>, name: &str) -> Value {
        let signature = self.program.builtin_function(callee).signature.clone();
        self.check_args(&signature, &args);
        self.insert_value(Instr::new(InstrKind::Call(callee), signature.return_type(), args), name)
    }

    pub fn create_invoke_handler(&mut self, callee: BuiltinHandlerId, args: Vec<Value>) -> InstrId {
        let signature = self.program.builtin_handler(callee).signature.clone();
        self.check_args(&signature, &args);
        self.insert(Instr::new(InstrKind::HandlerCall(callee), FlowType::Void, args), "")
    }

    // --- terminators ---------------------------------------------------

    /// Terminates the handler with `result` (whether the request was handled).
    pub fn create_ret(&mut self, result: Value) -> InstrId {
        self.expect_type(result, FlowType::Boolean, "ret");
        self.insert(Instr::new(InstrKind::Ret, FlowType::Void, vec![result]), "")
    }

    pub fn create_br(&mut self, target: BlockId) -> InstrId {
        self.insert(Instr::new(InstrKind::Br { target }, FlowType::Void, vec![]), "")
    }

    pub fn create_cond_br(&mut self, condition: Value, then_block: BlockId, else_block: BlockId) -> InstrId {
        self.expect_type(condition, FlowType::Boolean, "condbr");
        self.insert(
            Instr::new(InstrKind::CondBr { then_block, else_block }, FlowType::Void, vec![condition]),
            "",
        )
    }

    /// Creates an empty `match`; fill it with [`add_match_case`](Self::add_match_case)
    /// and [`set_match_else`](Self::set_match_else).
    pub fn create_match(&mut self, class: MatchClass, condition: Value) -> InstrId {
        self.expect_type(condition, FlowType::String, "match");
        let kind = InstrKind::Match {
            class,
            cases: Vec::new(),
            else_block: None,
        };
        self.insert(Instr::new(kind, FlowType::Void, vec![condition]), "")
    }

    pub fn create_match_same(&mut self, condition: Value) -> InstrId {
        self.create_match(MatchClass::Same, condition)
    }

    pub fn create_match_head(&mut self, condition: Value) -> InstrId {
        self.create_match(MatchClass::Head, condition)
    }

    pub fn create_match_tail(&mut self, condition: Value) -> InstrId {
        self.create_match(MatchClass::Tail, condition)
    }

    pub fn create_match_regexp(&mut self, condition: Value) -> InstrId {
        self.create_match(MatchClass::RegExp, condition)
    }

    pub fn add_match_case(&mut self, instr: InstrId, label: Value, target: BlockId) {
        let class = match &self.handler().instr(instr).kind {
            InstrKind::Match { class, .. } => *class,
            other => panic!("add_match_case on non-match instruction {other:?}"),
        };
        let expected = if class == MatchClass::RegExp {
            FlowType::RegExp
        } else {
            FlowType::String
        };
        self.expect_type(label, expected, "match case");
        let label = label
            .as_constant()
            .unwrap_or_else(|| panic!("match case labels must be constants, got {label}"));
        self.handler_mut().add_match_case(instr, label, target);
    }

    pub fn set_match_else(&mut self, instr: InstrId, target: BlockId) {
        self.handler_mut().set_match_else(instr, target);
    }
}

fn fold_unary(op: UnaryOp, value: &Literal) -> Option<Literal> {
    Some(match (op, value) {
        (UnaryOp::INeg, Literal::Int(n)) => Literal::Int(number::neg(*n)),
        (UnaryOp::INot, Literal::Int(n)) => Literal::Int(!*n),
        (UnaryOp::BNot, Literal::Boolean(b)) => Literal::Boolean(!*b),
        (UnaryOp::SLen, Literal::String(s)) => Literal::Int(s.chars().count() as FlowNumber),
        (UnaryOp::SIsEmpty, Literal::String(s)) => Literal::Boolean(s.is_empty()),
        _ => return None,
    })
}

fn fold_binary(op: BinaryOp, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    use BinaryOp::*;
    use Literal::{Boolean, Int};
    let folded = match (lhs, rhs) {
        (Int(a), Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                IAdd => Int(number::add(a, b)),
                ISub => Int(number::sub(a, b)),
                IMul => Int(number::mul(a, b)),
                IDiv => Int(number::div(a, b)),
                IRem => Int(number::rem(a, b)),
                IPow => Int(number::pow(a, b)),
                IAnd => Int(a & b),
                IOr => Int(a | b),
                IXor => Int(a ^ b),
                IShl => Int(number::shl(a, b)),
                IShr => Int(number::shr(a, b)),
                ICmpEQ => Boolean(a == b),
                ICmpNE => Boolean(a != b),
                ICmpLE => Boolean(a <= b),
                ICmpGE => Boolean(a >= b),
                ICmpLT => Boolean(a < b),
                ICmpGT => Boolean(a > b),
                _ => return None,
            }
        }
        (Boolean(a), Boolean(b)) => match op {
            BAnd => Boolean(*a && *b),
            BOr => Boolean(*a || *b),
            BXor => Boolean(a != b),
            _ => return None,
        },
        (Literal::String(a), Literal::String(b)) => match op {
            SAdd => Literal::String(format!("{a}{b}")),
            SCmpEQ => Boolean(a == b),
            SCmpNE => Boolean(a != b),
            SCmpLE => Boolean(a <= b),
            SCmpGE => Boolean(a >= b),
            SCmpLT => Boolean(a < b),
            SCmpGT => Boolean(a > b),
            SCmpBeg => Boolean(a.starts_with(b.as_str())),
            SCmpEnd => Boolean(a.ends_with(b.as_str())),
            SIn => Boolean(a.contains(b.as_str())),
            _ => return None,
        },
        (Literal::IP(a), Literal::IP(b)) => match op {
            PCmpEQ => Boolean(a == b),
            PCmpNE => Boolean(a != b),
            _ => return None,
        },
        (Literal::IP(ip), Literal::Cidr(net)) if op == PInCidr => Boolean(net.contains(ip)),
        // SCmpRE is never folded: the match also feeds the capture groups.
        _ => return None,
    };
    Some(folded)
}

fn fold_cast(value: &Literal, ty: FlowType) -> Option<Literal> {
    Some(match (value, ty) {
        (Literal::Int(n), FlowType::String) => Literal::String(itoa::Buffer::new().format(*n).to_owned()),
        (Literal::IP(ip), FlowType::String) => Literal::String(ip.to_string()),
        (Literal::Cidr(net), FlowType::String) => Literal::String(net.to_string()),
        (Literal::RegExp(re), FlowType::String) => Literal::String(re.pattern().to_owned()),
        (Literal::String(s), FlowType::Number) => Literal::Int(number::parse(s)),
        (Literal::Int(n), FlowType::Boolean) => Literal::Boolean(*n != 0),
        _ => return None,
    })
}
