use std::fmt;

use serde::{Deserialize, Serialize};

/// Numbers in Flow are signed 64-bit integers.
pub type FlowNumber = i64;

/// Static type of every IR value, VM stack slot and native parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowType {
    Void,
    Boolean,
    Number,
    String,
    IPAddress,
    Cidr,
    RegExp,
    Handler,
}

impl FlowType {
    /// One-letter code used inside encoded signatures, e.g. `log(SI)V`.
    pub const fn signature_char(self) -> char {
        match self {
            FlowType::Void => 'V',
            FlowType::Boolean => 'B',
            FlowType::Number => 'I',
            FlowType::String => 'S',
            FlowType::IPAddress => 'P',
            FlowType::Cidr => 'C',
            FlowType::RegExp => 'R',
            FlowType::Handler => 'H',
        }
    }

    pub const fn from_signature_char(c: char) -> Option<FlowType> {
        Some(match c {
            'V' => FlowType::Void,
            'B' => FlowType::Boolean,
            'I' => FlowType::Number,
            'S' => FlowType::String,
            'P' => FlowType::IPAddress,
            'C' => FlowType::Cidr,
            'R' => FlowType::RegExp,
            'H' => FlowType::Handler,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            FlowType::Void => "void",
            FlowType::Boolean => "bool",
            FlowType::Number => "int",
            FlowType::String => "string",
            FlowType::IPAddress => "IPAddress",
            FlowType::Cidr => "Cidr",
            FlowType::RegExp => "RegExp",
            FlowType::Handler => "Handler",
        }
    }

    /// Values of these types live behind a handle (constant pool or runner arena).
    pub const fn is_reference(self) -> bool {
        matches!(self, FlowType::String | FlowType::IPAddress | FlowType::Cidr | FlowType::RegExp)
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a `match` terminator compares its condition against case labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchClass {
    Same,
    Head,
    Tail,
    RegExp,
}

impl MatchClass {
    pub const fn name(self) -> &'static str {
        match self {
            MatchClass::Same => "same",
            MatchClass::Head => "head",
            MatchClass::Tail => "tail",
            MatchClass::RegExp => "regexp",
        }
    }
}

impl fmt::Display for MatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
