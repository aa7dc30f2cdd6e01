//! Literal values shared by the IR constant table, native default parameters
//! and the VM constant pool.

mod cidr;
pub mod number;
mod regexp;

use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};

use crate::typ::{FlowNumber, FlowType};

pub use cidr::Cidr;
pub use regexp::FlowRegex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Int(FlowNumber),
    Boolean(bool),
    String(String),
    IP(IpAddr),
    Cidr(Cidr),
    RegExp(FlowRegex),
}

impl Literal {
    pub fn ty(&self) -> FlowType {
        match self {
            Literal::Int(_) => FlowType::Number,
            Literal::Boolean(_) => FlowType::Boolean,
            Literal::String(_) => FlowType::String,
            Literal::IP(_) => FlowType::IPAddress,
            Literal::Cidr(_) => FlowType::Cidr,
            Literal::RegExp(_) => FlowType::RegExp,
        }
    }

    pub fn as_int(&self) -> Option<FlowNumber> {
        match self {
            Literal::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! literal_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Literal {
                fn from(value: $ty) -> Self {
                    Literal::$variant(value)
                }
            }
        )*
    };
}

literal_from! {
    FlowNumber => Int,
    bool => Boolean,
    String => String,
    IpAddr => IP,
    Cidr => Cidr,
    FlowRegex => RegExp,
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_owned())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::IP(ip) => write!(f, "{ip}"),
            Literal::Cidr(cidr) => write!(f, "{cidr}"),
            Literal::RegExp(re) => write!(f, "{re}"),
        }
    }
}
