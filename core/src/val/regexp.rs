use std::{
    fmt,
    hash::{Hash, Hasher},
};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Compiled regular expression, compared and hashed by its source pattern.
///
/// Serializes as the bare pattern string and recompiles on load.
#[derive(Clone)]
pub struct FlowRegex {
    re: Regex,
}

impl FlowRegex {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("invalid regular expression /{pattern}/"))?;
        Ok(Self { re })
    }

    pub fn pattern(&self) -> &str {
        self.re.as_str()
    }

    /// Capture groups of the first match; group 0 is the whole match and
    /// groups that did not participate are empty strings.
    pub fn captures(&self, subject: &str) -> Option<Vec<String>> {
        let caps = self.re.captures(subject)?;
        Some(
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                .collect(),
        )
    }
}

impl PartialEq for FlowRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern() == other.pattern()
    }
}

impl Eq for FlowRegex {}

impl Hash for FlowRegex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern().hash(state);
    }
}

impl fmt::Debug for FlowRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowRegex(/{}/)", self.pattern())
    }
}

impl fmt::Display for FlowRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.pattern())
    }
}

impl Serialize for FlowRegex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.pattern())
    }
}

impl<'de> Deserialize<'de> for FlowRegex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        FlowRegex::new(&pattern).map_err(serde::de::Error::custom)
    }
}
