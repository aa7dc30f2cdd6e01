//! Untyped VM stack words and the only place that reinterprets them.
//!
//! A word holds either a number/boolean directly or a handle to a reference
//! value. Handles with bit 63 set index the runner's [`Arena`]; all others
//! index the matching table of the program's constant pool. Which table a
//! handle refers to is known statically from the instruction that reads it.
//! Debug builds additionally record the type of every slot and assert it on
//! typed reads.

use std::net::IpAddr;

use crate::{
    typ::{FlowNumber, FlowType},
    val::{Cidr, FlowRegex},
};

use super::constant_pool::ConstantPool;

const ARENA_BIT: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Value = Value(0);

    #[inline]
    pub const fn from_number(n: FlowNumber) -> Self {
        Value(n as u64)
    }

    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        Value(b as u64)
    }

    #[inline]
    pub const fn as_number(self) -> FlowNumber {
        self.0 as FlowNumber
    }

    #[inline]
    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub(crate) const fn pool(index: usize) -> Self {
        Value(index as u64)
    }

    #[inline]
    const fn arena(index: usize) -> Self {
        Value(index as u64 | ARENA_BIT)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    fn handle(self) -> Handle {
        if self.0 & ARENA_BIT != 0 {
            Handle::Arena((self.0 & !ARENA_BIT) as usize)
        } else {
            Handle::Pool(self.0 as usize)
        }
    }
}

enum Handle {
    Pool(usize),
    Arena(usize),
}

/// Reference values created while a runner executes. Entries are never freed
/// individually; the whole arena is cleared when the runner restarts.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    strings: Vec<String>,
    ips: Vec<IpAddr>,
    cidrs: Vec<Cidr>,
}

impl Arena {
    pub fn clear(&mut self) {
        self.strings.clear();
        self.ips.clear();
        self.cidrs.clear();
    }

    pub fn len(&self) -> usize {
        self.strings.len() + self.ips.len() + self.cidrs.len()
    }

    pub fn alloc_string(&mut self, s: String) -> Value {
        self.strings.push(s);
        Value::arena(self.strings.len() - 1)
    }

    pub fn alloc_ip(&mut self, ip: IpAddr) -> Value {
        self.ips.push(ip);
        Value::arena(self.ips.len() - 1)
    }

    pub fn alloc_cidr(&mut self, cidr: Cidr) -> Value {
        self.cidrs.push(cidr);
        Value::arena(self.cidrs.len() - 1)
    }

    pub fn string<'a>(&'a self, pool: &'a ConstantPool, v: Value) -> &'a str {
        match v.handle() {
            Handle::Pool(i) => pool.get_string(i),
            Handle::Arena(i) => &self.strings[i],
        }
    }

    pub fn ip(&self, pool: &ConstantPool, v: Value) -> IpAddr {
        match v.handle() {
            Handle::Pool(i) => pool.get_ipaddr(i),
            Handle::Arena(i) => self.ips[i],
        }
    }

    pub fn cidr(&self, pool: &ConstantPool, v: Value) -> Cidr {
        match v.handle() {
            Handle::Pool(i) => pool.get_cidr(i),
            Handle::Arena(i) => self.cidrs[i],
        }
    }

    /// Regular expressions only ever come from the constant pool.
    pub fn regexp<'a>(&self, pool: &'a ConstantPool, v: Value) -> &'a FlowRegex {
        match v.handle() {
            Handle::Pool(i) => pool.get_regexp(i),
            Handle::Arena(_) => panic!("regular expressions are never arena-allocated"),
        }
    }
}

/// Operand stack with a hard depth limit.
///
/// Every violation of stack discipline (underflow, overflow, an index outside
/// the live window, a typed read of a slot holding another type) is a bug in
/// the generated code and aborts with a panic.
#[derive(Debug)]
pub(crate) struct Stack {
    words: Vec<Value>,
    #[cfg(debug_assertions)]
    tags: Vec<Option<FlowType>>,
    limit: usize,
}

#[cfg(debug_assertions)]
fn compatible(actual: Option<FlowType>, expected: FlowType) -> bool {
    match actual {
        None => true,
        Some(actual) => {
            actual == expected
                || matches!(
                    (actual, expected),
                    (FlowType::Number, FlowType::Boolean) | (FlowType::Boolean, FlowType::Number)
                )
        }
    }
}

impl Stack {
    /// `hint` is the depth the code is known to reach; it only sizes the
    /// initial allocation.
    pub fn new(limit: usize, hint: usize) -> Self {
        let capacity = hint.min(limit);
        Self {
            words: Vec::with_capacity(capacity),
            #[cfg(debug_assertions)]
            tags: Vec::with_capacity(capacity),
            limit,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn clear(&mut self) {
        self.words.clear();
        #[cfg(debug_assertions)]
        self.tags.clear();
    }

    #[inline]
    pub fn push(&mut self, v: Value, ty: FlowType) {
        self.push_tagged(v, Some(ty));
    }

    #[inline]
    fn push_tagged(&mut self, v: Value, _ty: Option<FlowType>) {
        assert!(self.words.len() < self.limit, "VM stack overflow (limit {})", self.limit);
        self.words.push(v);
        #[cfg(debug_assertions)]
        self.tags.push(_ty);
    }

    /// Pushes `n` zeroed, untyped slots.
    pub fn alloca(&mut self, n: usize) {
        for _ in 0..n {
            self.push_tagged(Value::ZERO, None);
        }
    }

    #[inline]
    pub fn pop(&mut self, _ty: FlowType) -> Value {
        let v = self.words.pop().unwrap_or_else(|| panic!("VM stack underflow"));
        #[cfg(debug_assertions)]
        {
            let tag = self.tags.pop().flatten();
            debug_assert!(compatible(tag, _ty), "popped {tag:?} as {_ty}");
        }
        v
    }

    pub fn discard(&mut self, n: usize) {
        assert!(n <= self.words.len(), "VM stack underflow discarding {n} of {}", self.words.len());
        let keep = self.words.len() - n;
        self.words.truncate(keep);
        #[cfg(debug_assertions)]
        self.tags.truncate(keep);
    }

    /// Top `n` words, deepest first.
    pub fn top(&self, n: usize) -> &[Value] {
        assert!(n <= self.words.len(), "VM stack underflow reading {n} of {}", self.words.len());
        &self.words[self.words.len() - n..]
    }

    /// Pushes a copy of absolute slot `index`, keeping its type.
    pub fn load(&mut self, index: usize) {
        assert!(index < self.words.len(), "VM stack index {index} out of range {}", self.words.len());
        let v = self.words[index];
        #[cfg(debug_assertions)]
        let tag = self.tags[index];
        #[cfg(not(debug_assertions))]
        let tag = None;
        self.push_tagged(v, tag);
    }

    /// Pops the top word into absolute slot `index`.
    pub fn store(&mut self, index: usize) {
        assert!(index + 1 < self.words.len(), "VM stack index {index} out of range {}", self.words.len());
        let v = self.words.pop().unwrap_or_else(|| panic!("VM stack underflow"));
        self.words[index] = v;
        #[cfg(debug_assertions)]
        {
            let tag = self.tags.pop().flatten();
            self.tags[index] = tag;
        }
    }
}
