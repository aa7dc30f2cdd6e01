use std::fmt;

use crate::{
    signature::Signature,
    typ::FlowType,
    util::fast_map::{FastHashMap, fast_hash_map_new},
    val::Literal,
};

use super::{BuiltinFunctionId, BuiltinHandlerId, ConstantId, HandlerId, IRHandler, Value};

/// Reference to a native function, resolved by signature at link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IRBuiltinFunction {
    pub signature: Signature,
    /// Unused calls may be deleted.
    pub side_effect_free: bool,
    pub never_returns: bool,
}

/// Reference to a native handler, resolved by signature at link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IRBuiltinHandler {
    pub signature: Signature,
}

/// All handlers of one compilation unit plus the literals and builtins they
/// reference. Literals are deduplicated by value.
#[derive(Debug, Clone, Default)]
pub struct IRProgram {
    handlers: Vec<IRHandler>,
    constants: Vec<Literal>,
    constant_index: FastHashMap<Literal, ConstantId>,
    functions: Vec<IRBuiltinFunction>,
    native_handlers: Vec<IRBuiltinHandler>,
    modules: Vec<(String, String)>,
}

impl IRProgram {
    pub fn new() -> Self {
        Self {
            constant_index: fast_hash_map_new(),
            ..Default::default()
        }
    }

    pub fn handlers(&self) -> &[IRHandler] {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut [IRHandler] {
        &mut self.handlers
    }

    pub fn handler(&self, id: HandlerId) -> &IRHandler {
        &self.handlers[id.index()]
    }

    pub fn handler_mut(&mut self, id: HandlerId) -> &mut IRHandler {
        &mut self.handlers[id.index()]
    }

    pub fn find_handler(&self, name: &str) -> Option<HandlerId> {
        self.handlers
            .iter()
            .position(|h| h.name() == name)
            .map(HandlerId::new)
    }

    pub fn add_handler(&mut self, handler: IRHandler) -> HandlerId {
        self.handlers.push(handler);
        HandlerId::new(self.handlers.len() - 1)
    }

    /// Returns the pooled id for `literal`, inserting it on first use.
    pub fn get_constant(&mut self, literal: Literal) -> ConstantId {
        if let Some(id) = self.constant_index.get(&literal) {
            return *id;
        }
        let id = ConstantId::new(self.constants.len());
        self.constants.push(literal.clone());
        self.constant_index.insert(literal, id);
        id
    }

    pub fn constant(&self, id: ConstantId) -> &Literal {
        &self.constants[id.index()]
    }

    pub fn constants(&self) -> &[Literal] {
        &self.constants
    }

    pub fn get_builtin_function(&mut self, builtin: IRBuiltinFunction) -> BuiltinFunctionId {
        if let Some(pos) = self.functions.iter().position(|f| f.signature == builtin.signature) {
            return BuiltinFunctionId::new(pos);
        }
        self.functions.push(builtin);
        BuiltinFunctionId::new(self.functions.len() - 1)
    }

    pub fn get_builtin_handler(&mut self, builtin: IRBuiltinHandler) -> BuiltinHandlerId {
        if let Some(pos) = self.native_handlers.iter().position(|h| h.signature == builtin.signature) {
            return BuiltinHandlerId::new(pos);
        }
        self.native_handlers.push(builtin);
        BuiltinHandlerId::new(self.native_handlers.len() - 1)
    }

    pub fn builtin_function(&self, id: BuiltinFunctionId) -> &IRBuiltinFunction {
        &self.functions[id.index()]
    }

    pub fn builtin_handler(&self, id: BuiltinHandlerId) -> &IRBuiltinHandler {
        &self.native_handlers[id.index()]
    }

    pub fn builtin_functions(&self) -> &[IRBuiltinFunction] {
        &self.functions
    }

    pub fn builtin_handlers(&self) -> &[IRBuiltinHandler] {
        &self.native_handlers
    }

    pub fn add_import(&mut self, name: impl Into<String>, path: impl Into<String>) {
        let name = name.into();
        if !self.modules.iter().any(|(n, _)| *n == name) {
            self.modules.push((name, path.into()));
        }
    }

    pub fn modules(&self) -> &[(String, String)] {
        &self.modules
    }

    /// Splits the program into its handlers and a read-only view of everything
    /// else, so passes can rewrite one handler while consulting the literals.
    pub fn split_mut(&mut self) -> (&mut [IRHandler], PassContext<'_>) {
        let context = PassContext {
            constants: &self.constants,
            functions: &self.functions,
        };
        (&mut self.handlers, context)
    }

    pub fn type_of(&self, handler: &IRHandler, value: Value) -> FlowType {
        match value {
            Value::Constant(id) => self.constant(id).ty(),
            Value::Instr(id) => handler.type_of_instr(id),
        }
    }
}

/// Program-wide data visible to a pass while it rewrites one handler.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    constants: &'a [Literal],
    functions: &'a [IRBuiltinFunction],
}

impl<'a> PassContext<'a> {
    pub fn constant(&self, id: ConstantId) -> &'a Literal {
        &self.constants[id.index()]
    }

    /// The value of a boolean constant, `None` for anything else.
    pub fn constant_bool(&self, value: Value) -> Option<bool> {
        value.as_constant().and_then(|id| self.constant(id).as_bool())
    }

    pub fn is_side_effect_free(&self, callee: BuiltinFunctionId) -> bool {
        self.functions[callee.index()].side_effect_free
    }
}

impl fmt::Display for IRProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; IRProgram")?;
        for (name, path) in &self.modules {
            writeln!(f, ".import {name} from {path:?}")?;
        }
        for (i, literal) in self.constants.iter().enumerate() {
            writeln!(f, ".const {} {} = {literal}", ConstantId::new(i), literal.ty())?;
        }
        for (i, func) in self.functions.iter().enumerate() {
            writeln!(f, ".extern {} = {}", BuiltinFunctionId::new(i), func.signature)?;
        }
        for (i, handler) in self.native_handlers.iter().enumerate() {
            writeln!(f, ".extern {} = {}", BuiltinHandlerId::new(i), handler.signature)?;
        }
        for handler in &self.handlers {
            writeln!(f)?;
            write!(f, "{handler}")?;
        }
        Ok(())
    }
}
