use std::{borrow::Borrow, fmt, hash::Hash, net::IpAddr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    signature::Signature,
    typ::{FlowNumber, MatchClass},
    util::fast_map::{FastHashMap, fast_hash_map_new},
    val::{Cidr, FlowRegex},
};

use super::instruction::{Instruction, disassemble_code};

/// One `match` table. Labels index the string table, or the regex table for
/// [`MatchClass::RegExp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDef {
    pub handler_id: usize,
    pub op: MatchClass,
    pub else_pc: u64,
    pub cases: Vec<MatchCaseDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCaseDef {
    pub label: u64,
    pub pc: u64,
}

/// Compiled handler body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDef {
    pub name: String,
    /// Maximum operand-stack depth the code reaches.
    pub stack_size: usize,
    pub code: Vec<Instruction>,
}

/// Append-only table with a hash index from value to position. Serializes as
/// a plain sequence; the index is rebuilt on load.
#[derive(Debug, Clone)]
struct Interned<T> {
    values: Vec<T>,
    index: FastHashMap<T, usize>,
}

impl<T> Default for Interned<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            index: fast_hash_map_new(),
        }
    }
}

impl<T: Hash + Eq + Clone> Interned<T> {
    fn from_values(values: Vec<T>) -> Self {
        let mut index = fast_hash_map_new();
        for (i, v) in values.iter().enumerate() {
            index.entry(v.clone()).or_insert(i);
        }
        Self { values, index }
    }

    fn position<Q>(&self, value: &Q) -> Option<usize>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(value).copied()
    }

    fn insert(&mut self, value: T) -> usize {
        if let Some(i) = self.position(&value) {
            return i;
        }
        self.index.insert(value.clone(), self.values.len());
        self.values.push(value);
        self.values.len() - 1
    }
}

impl<T: Serialize> Serialize for Interned<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de> + Hash + Eq + Clone> Deserialize<'de> for Interned<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Interned::from_values)
    }
}

/// Literal tables, match tables, handler code and the positional lists of
/// native signatures a program references. Every `make_*` deduplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    numbers: Interned<FlowNumber>,
    strings: Interned<String>,
    ipaddrs: Interned<IpAddr>,
    cidrs: Interned<Cidr>,
    regexps: Interned<FlowRegex>,
    match_defs: Vec<MatchDef>,
    modules: Vec<(String, String)>,
    native_handlers: Interned<Signature>,
    native_functions: Interned<Signature>,
    handlers: Vec<HandlerDef>,
}

impl ConstantPool {
    pub fn make_integer(&mut self, n: FlowNumber) -> usize {
        self.numbers.insert(n)
    }

    pub fn make_string(&mut self, s: &str) -> usize {
        match self.strings.position(s) {
            Some(i) => i,
            None => self.strings.insert(s.to_owned()),
        }
    }

    pub fn make_ipaddr(&mut self, ip: IpAddr) -> usize {
        self.ipaddrs.insert(ip)
    }

    pub fn make_cidr(&mut self, cidr: Cidr) -> usize {
        self.cidrs.insert(cidr)
    }

    pub fn make_regexp(&mut self, re: FlowRegex) -> usize {
        self.regexps.insert(re)
    }

    /// Match tables are positional; a fresh slot is returned every time.
    pub fn make_match_def(&mut self, def: MatchDef) -> usize {
        self.match_defs.push(def);
        self.match_defs.len() - 1
    }

    pub fn match_def_mut(&mut self, index: usize) -> &mut MatchDef {
        &mut self.match_defs[index]
    }

    pub fn make_native_handler(&mut self, signature: &Signature) -> usize {
        match self.native_handlers.position(signature) {
            Some(i) => i,
            None => self.native_handlers.insert(signature.clone()),
        }
    }

    pub fn make_native_function(&mut self, signature: &Signature) -> usize {
        match self.native_functions.position(signature) {
            Some(i) => i,
            None => self.native_functions.insert(signature.clone()),
        }
    }

    /// Index of the handler called `name`, creating an empty one if needed.
    pub fn make_handler(&mut self, name: &str) -> usize {
        if let Some(i) = self.handlers.iter().position(|h| h.name == name) {
            return i;
        }
        self.handlers.push(HandlerDef {
            name: name.to_owned(),
            ..Default::default()
        });
        self.handlers.len() - 1
    }

    pub fn set_handler(&mut self, index: usize, code: Vec<Instruction>, stack_size: usize) {
        let handler = &mut self.handlers[index];
        handler.code = code;
        handler.stack_size = stack_size;
    }

    pub fn add_module(&mut self, name: &str, path: &str) {
        if !self.modules.iter().any(|(n, _)| n == name) {
            self.modules.push((name.to_owned(), path.to_owned()));
        }
    }

    pub fn get_integer(&self, index: usize) -> FlowNumber {
        self.numbers.values[index]
    }

    pub fn get_string(&self, index: usize) -> &str {
        &self.strings.values[index]
    }

    pub fn get_ipaddr(&self, index: usize) -> IpAddr {
        self.ipaddrs.values[index]
    }

    pub fn get_cidr(&self, index: usize) -> Cidr {
        self.cidrs.values[index]
    }

    pub fn get_regexp(&self, index: usize) -> &FlowRegex {
        &self.regexps.values[index]
    }

    pub fn numbers(&self) -> &[FlowNumber] {
        &self.numbers.values
    }

    pub fn ipaddrs(&self) -> &[IpAddr] {
        &self.ipaddrs.values
    }

    pub fn cidrs(&self) -> &[Cidr] {
        &self.cidrs.values
    }

    pub fn strings(&self) -> &[String] {
        &self.strings.values
    }

    pub fn regexps(&self) -> &[FlowRegex] {
        &self.regexps.values
    }

    pub fn match_defs(&self) -> &[MatchDef] {
        &self.match_defs
    }

    pub fn modules(&self) -> &[(String, String)] {
        &self.modules
    }

    pub fn native_handler_signatures(&self) -> &[Signature] {
        &self.native_handlers.values
    }

    pub fn native_function_signatures(&self) -> &[Signature] {
        &self.native_functions.values
    }

    pub fn handlers(&self) -> &[HandlerDef] {
        &self.handlers
    }

    pub fn handler(&self, index: usize) -> &HandlerDef {
        &self.handlers[index]
    }
}

impl fmt::Display for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, path) in &self.modules {
            writeln!(f, ".module {name} from {path:?}")?;
        }
        for (i, n) in self.numbers.values.iter().enumerate() {
            writeln!(f, ".const integer {i:>3} = {n}")?;
        }
        for (i, s) in self.strings.values.iter().enumerate() {
            writeln!(f, ".const string  {i:>3} = {s:?}")?;
        }
        for (i, ip) in self.ipaddrs.values.iter().enumerate() {
            writeln!(f, ".const ipaddr  {i:>3} = {ip}")?;
        }
        for (i, cidr) in self.cidrs.values.iter().enumerate() {
            writeln!(f, ".const cidr    {i:>3} = {cidr}")?;
        }
        for (i, re) in self.regexps.values.iter().enumerate() {
            writeln!(f, ".const regex   {i:>3} = {re}")?;
        }
        for (i, sig) in self.native_handlers.values.iter().enumerate() {
            writeln!(f, ".extern handler  {i:>3} = {sig}")?;
        }
        for (i, sig) in self.native_functions.values.iter().enumerate() {
            writeln!(f, ".extern function {i:>3} = {sig}")?;
        }
        for (i, def) in self.match_defs.iter().enumerate() {
            write!(f, ".match {i} {} ; handler #{}", def.op, def.handler_id)?;
            for case in &def.cases {
                write!(f, " [{} -> {}]", case.label, case.pc)?;
            }
            writeln!(f, " else {}", def.else_pc)?;
        }
        for (i, handler) in self.handlers.iter().enumerate() {
            writeln!(
                f,
                "\n.handler {:<20} ; #{i} ({} stack slots, {} instructions)",
                handler.name,
                handler.stack_size,
                handler.code.len()
            )?;
            f.write_str(&disassemble_code(&handler.code))?;
        }
        Ok(())
    }
}
