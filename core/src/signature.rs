use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::typ::FlowType;

/// Link-time identity of a native function or handler: name, ordered parameter
/// types and return type. Encoded as `name(PARAMS)R` with one letter per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    name: String,
    params: Vec<FlowType>,
    return_type: FlowType,
}

impl Signature {
    pub fn new(name: impl Into<String>, params: Vec<FlowType>, return_type: FlowType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[FlowType] {
        &self.params
    }

    pub fn return_type(&self) -> FlowType {
        self.return_type
    }

    pub fn push_param(&mut self, ty: FlowType) {
        self.params.push(ty);
    }

    pub fn set_return_type(&mut self, ty: FlowType) {
        self.return_type = ty;
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        f.write_str("(")?;
        for ty in &self.params {
            write!(f, "{}", ty.signature_char())?;
        }
        write!(f, "){}", self.return_type.signature_char())
    }
}

impl FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let open = s.find('(').ok_or_else(|| anyhow!("signature {s:?} lacks '('"))?;
        let close = s.rfind(')').ok_or_else(|| anyhow!("signature {s:?} lacks ')'"))?;
        if open == 0 || close < open {
            bail!("malformed signature {s:?}");
        }
        let params = s[open + 1..close]
            .chars()
            .map(|c| FlowType::from_signature_char(c).ok_or_else(|| anyhow!("unknown type code {c:?} in {s:?}")))
            .collect::<Result<Vec<_>>>()?;
        let mut ret = s[close + 1..].chars();
        let return_type = match (ret.next(), ret.next()) {
            (Some(c), None) => {
                FlowType::from_signature_char(c).ok_or_else(|| anyhow!("unknown return type {c:?} in {s:?}"))?
            }
            _ => bail!("signature {s:?} must end with exactly one return type code"),
        };
        Ok(Signature::new(&s[..open], params, return_type))
    }
}
