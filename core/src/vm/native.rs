//! Host callbacks and the view of the VM stack they are invoked with.

use std::{any::Any, fmt, net::IpAddr, sync::Arc};

use crate::{
    signature::Signature,
    typ::{FlowNumber, FlowType},
    val::{Cidr, FlowRegex, Literal},
};

use super::{runner::Runner, value::Value};

pub type NativeFn = Box<dyn Fn(&mut Params<'_>) + Send + Sync>;

/// Opaque per-run context handed through to every callback.
pub type Userdata = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Function,
    Handler,
}

/// A host function or handler callable from bytecode, identified by its
/// [`Signature`]. Parameter names and defaults are informational only.
pub struct NativeCallback {
    pub(crate) signature: Signature,
    pub(crate) kind: CallbackKind,
    pub(crate) param_names: Vec<String>,
    pub(crate) defaults: Vec<Option<Literal>>,
    pub(crate) side_effect_free: bool,
    pub(crate) never_returns: bool,
    pub(crate) function: NativeFn,
}

impl NativeCallback {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn is_handler(&self) -> bool {
        self.kind == CallbackKind::Handler
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn default_value(&self, param: usize) -> Option<&Literal> {
        self.defaults.get(param).and_then(Option::as_ref)
    }

    pub fn is_side_effect_free(&self) -> bool {
        self.side_effect_free
    }

    pub fn never_returns(&self) -> bool {
        self.never_returns
    }

    pub fn invoke(&self, params: &mut Params<'_>) {
        (self.function)(params)
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallback")
            .field("signature", &self.signature.to_string())
            .field("kind", &self.kind)
            .field("param_names", &self.param_names)
            .field("side_effect_free", &self.side_effect_free)
            .finish_non_exhaustive()
    }
}

/// Flow type a Rust parameter type is registered as.
pub trait ParamType {
    const FLOW_TYPE: FlowType;
}

macro_rules! param_types {
    ($($ty:ty => $flow:ident),* $(,)?) => {
        $(impl ParamType for $ty {
            const FLOW_TYPE: FlowType = FlowType::$flow;
        })*
    };
}

param_types! {
    FlowNumber => Number,
    bool => Boolean,
    String => String,
    IpAddr => IPAddress,
    Cidr => Cidr,
    FlowRegex => RegExp,
}

/// Reads one argument out of a stack word.
pub trait FromParam<'a>: Sized {
    fn from_param(params: &'a Params<'_>, value: Value) -> Self;
}

impl FromParam<'_> for FlowNumber {
    fn from_param(_: &Params<'_>, value: Value) -> Self {
        value.as_number()
    }
}

impl FromParam<'_> for bool {
    fn from_param(_: &Params<'_>, value: Value) -> Self {
        value.as_bool()
    }
}

impl<'a> FromParam<'a> for &'a str {
    fn from_param(params: &'a Params<'_>, value: Value) -> Self {
        params.runner.string_of(value)
    }
}

impl FromParam<'_> for String {
    fn from_param(params: &Params<'_>, value: Value) -> Self {
        params.runner.string_of(value).to_owned()
    }
}

impl FromParam<'_> for IpAddr {
    fn from_param(params: &Params<'_>, value: Value) -> Self {
        params.runner.ip_of(value)
    }
}

impl FromParam<'_> for Cidr {
    fn from_param(params: &Params<'_>, value: Value) -> Self {
        params.runner.cidr_of(value)
    }
}

impl<'a> FromParam<'a> for &'a FlowRegex {
    fn from_param(params: &'a Params<'_>, value: Value) -> Self {
        params.runner.regexp_of(value)
    }
}

/// Writes a callback result into a stack word.
pub trait IntoResult {
    fn into_value(self, runner: &mut Runner) -> Value;
}

impl IntoResult for FlowNumber {
    fn into_value(self, _: &mut Runner) -> Value {
        Value::from_number(self)
    }
}

impl IntoResult for bool {
    fn into_value(self, _: &mut Runner) -> Value {
        Value::from_bool(self)
    }
}

impl IntoResult for String {
    fn into_value(self, runner: &mut Runner) -> Value {
        runner.arena.alloc_string(self)
    }
}

impl IntoResult for &str {
    fn into_value(self, runner: &mut Runner) -> Value {
        runner.arena.alloc_string(self.to_owned())
    }
}

impl IntoResult for IpAddr {
    fn into_value(self, runner: &mut Runner) -> Value {
        runner.arena.alloc_ip(self)
    }
}

impl IntoResult for Cidr {
    fn into_value(self, runner: &mut Runner) -> Value {
        runner.arena.alloc_cidr(self)
    }
}

/// Token proving the holder may resume one specific suspended runner.
#[must_use = "a suspended runner can only continue with its resume token"]
#[derive(Debug, PartialEq, Eq)]
pub struct ResumeToken {
    pub(crate) runner_id: u64,
}

impl ResumeToken {
    pub fn runner_id(&self) -> u64 {
        self.runner_id
    }
}

/// Arguments of one native call. Slot 0 carries the result, arguments start
/// at index 1.
pub struct Params<'r> {
    pub(crate) runner: &'r mut Runner,
    pub(crate) argv: Vec<Value>,
}

impl<'r> Params<'r> {
    pub(crate) fn new(runner: &'r mut Runner, args: &[Value]) -> Self {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(Value::ZERO);
        argv.extend_from_slice(args);
        Self { runner, argv }
    }

    /// Number of arguments, not counting the result slot.
    pub fn count(&self) -> usize {
        self.argv.len() - 1
    }

    /// Argument `index` (1-based) read as `T`.
    ///
    /// # Panics
    ///
    /// If `index` is outside `1..=count()`.
    pub fn get<'a, T: FromParam<'a>>(&'a self, index: usize) -> T {
        assert!(
            (1..self.argv.len()).contains(&index),
            "native parameter {index} out of range 1..={}",
            self.count()
        );
        T::from_param(self, self.argv[index])
    }

    pub fn set_result(&mut self, value: impl IntoResult) {
        self.argv[0] = value.into_value(self.runner);
    }

    pub(crate) fn result(&self) -> Value {
        self.argv[0]
    }

    pub fn userdata<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.runner.userdata[0].as_deref().and_then(|u| u.downcast_ref())
    }

    pub fn userdata2<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.runner.userdata[1].as_deref().and_then(|u| u.downcast_ref())
    }

    pub fn runner_id(&self) -> u64 {
        self.runner.id()
    }

    pub fn handler_name(&self) -> &str {
        self.runner.handler_name()
    }

    /// Suspends the calling runner once this callback returns. The runner
    /// continues only through [`Runner::resume`] with the returned token.
    pub fn suspend(&mut self) -> ResumeToken {
        self.runner.suspend()
    }
}
