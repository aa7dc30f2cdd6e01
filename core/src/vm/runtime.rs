use std::{fmt::Debug, sync::Arc};

use anyhow::Result;
use tracing::{debug, error};

use crate::{
    signature::Signature,
    typ::FlowType,
    util::fast_map::{FastHashMap, FastHashSet},
    val::Literal,
};

use super::native::{CallbackKind, NativeCallback, ParamType, Params};

/// Host side of linking: resolves native signatures and imports modules.
pub trait Runtime {
    /// Imports module `name` (found at `path`), appending every callback it
    /// provides to `builtins`. Returns false if the module is unknown or fails
    /// to load.
    fn import(&mut self, name: &str, path: &str, builtins: &mut Vec<Arc<NativeCallback>>) -> bool;

    /// Exact signature lookup; there is no overload resolution.
    fn find(&self, signature: &Signature) -> Option<Arc<NativeCallback>>;
}

/// A named bundle of callbacks that programs can import.
pub trait Module: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Registers the module's callbacks. `path` is the import path the
    /// program asked for.
    fn register(&self, registry: &mut Registry, path: &str) -> Result<()>;
}

/// Signature-keyed table of native callbacks, populated at startup and
/// read-only while programs run.
#[derive(Debug, Default)]
pub struct Registry {
    callbacks: Vec<Arc<NativeCallback>>,
    index: FastHashMap<Signature, usize>,
    modules: FastHashMap<String, Arc<dyn Module>>,
    imported: FastHashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&mut self, name: &str, return_type: FlowType) -> CallbackBuilder<'_> {
        CallbackBuilder::new(self, name, CallbackKind::Function, return_type)
    }

    /// Handlers always return whether they handled the request.
    pub fn register_handler(&mut self, name: &str) -> CallbackBuilder<'_> {
        CallbackBuilder::new(self, name, CallbackKind::Handler, FlowType::Boolean)
    }

    pub fn register_module(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_owned(), module);
    }

    /// All callbacks in registration order.
    pub fn builtins(&self) -> &[Arc<NativeCallback>] {
        &self.callbacks
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn insert(&mut self, callback: NativeCallback) -> Arc<NativeCallback> {
        let callback = Arc::new(callback);
        match self.index.get(&callback.signature) {
            Some(&slot) => self.callbacks[slot] = Arc::clone(&callback),
            None => {
                self.index.insert(callback.signature.clone(), self.callbacks.len());
                self.callbacks.push(Arc::clone(&callback));
            }
        }
        callback
    }
}

impl Runtime for Registry {
    fn import(&mut self, name: &str, path: &str, builtins: &mut Vec<Arc<NativeCallback>>) -> bool {
        if self.imported.contains(name) {
            return true;
        }
        let Some(module) = self.modules.get(name).cloned() else {
            error!(module = name, path, "unknown module");
            return false;
        };
        let before = self.callbacks.len();
        if let Err(err) = module.register(self, path) {
            error!(module = name, path, error = %err, "failed to import module");
            return false;
        }
        builtins.extend(self.callbacks[before..].iter().cloned());
        debug!(module = name, path, callbacks = self.callbacks.len() - before, "imported module");
        self.imported.insert(name.to_owned());
        true
    }

    fn find(&self, signature: &Signature) -> Option<Arc<NativeCallback>> {
        self.index.get(signature).map(|&slot| Arc::clone(&self.callbacks[slot]))
    }
}

/// Accumulates a callback's signature; [`bind`](Self::bind) stores it.
#[must_use = "a callback is only registered once `bind` is called"]
pub struct CallbackBuilder<'r> {
    registry: &'r mut Registry,
    signature: Signature,
    kind: CallbackKind,
    param_names: Vec<String>,
    defaults: Vec<Option<Literal>>,
    side_effect_free: bool,
    never_returns: bool,
}

impl<'r> CallbackBuilder<'r> {
    fn new(registry: &'r mut Registry, name: &str, kind: CallbackKind, return_type: FlowType) -> Self {
        Self {
            registry,
            signature: Signature::new(name, Vec::new(), return_type),
            kind,
            param_names: Vec::new(),
            defaults: Vec::new(),
            side_effect_free: false,
            never_returns: false,
        }
    }

    pub fn param<T: ParamType>(mut self, name: &str) -> Self {
        self.signature.push_param(T::FLOW_TYPE);
        self.param_names.push(name.to_owned());
        self.defaults.push(None);
        self
    }

    pub fn param_with_default<T: ParamType + Into<Literal>>(mut self, name: &str, default: T) -> Self {
        self.signature.push_param(T::FLOW_TYPE);
        self.param_names.push(name.to_owned());
        self.defaults.push(Some(default.into()));
        self
    }

    /// Calls whose result is unused may be removed by the optimizer.
    pub fn side_effect_free(mut self) -> Self {
        self.side_effect_free = true;
        self
    }

    pub fn never_returns(mut self) -> Self {
        self.never_returns = true;
        self
    }

    pub fn bind<F>(self, function: F) -> Arc<NativeCallback>
    where
        F: Fn(&mut Params<'_>) + Send + Sync + 'static,
    {
        let callback = NativeCallback {
            signature: self.signature,
            kind: self.kind,
            param_names: self.param_names,
            defaults: self.defaults,
            side_effect_free: self.side_effect_free,
            never_returns: self.never_returns,
            function: Box::new(function),
        };
        self.registry.insert(callback)
    }
}
