use crate::{
    typ::MatchClass,
    util::fast_map::{FastHashMap, fast_hash_map_with_capacity},
};

use super::constant_pool::{ConstantPool, MatchDef};

/// Captures of the most recent successful regular-expression match.
#[derive(Debug, Default)]
pub(crate) struct RegexContext {
    captures: Vec<String>,
}

impl RegexContext {
    pub fn clear(&mut self) {
        self.captures.clear();
    }

    pub fn set(&mut self, captures: Vec<String>) {
        self.captures = captures;
    }

    /// Group `n`, or the empty string if there is no such group.
    pub fn group(&self, n: i64) -> &str {
        usize::try_from(n)
            .ok()
            .and_then(|n| self.captures.get(n))
            .map_or("", String::as_str)
    }
}

/// Run-time form of a [`MatchDef`], built once per program.
#[derive(Debug)]
pub(crate) enum Matcher {
    Same {
        table: FastHashMap<String, u64>,
        else_pc: u64,
    },
    Head {
        cases: Vec<(String, u64)>,
        else_pc: u64,
    },
    Tail {
        cases: Vec<(String, u64)>,
        else_pc: u64,
    },
    RegExp {
        cases: Vec<(usize, u64)>,
        else_pc: u64,
    },
}

impl Matcher {
    pub fn new(def: &MatchDef, pool: &ConstantPool) -> Self {
        let else_pc = def.else_pc;
        let strings = || {
            def.cases
                .iter()
                .map(|c| (pool.get_string(c.label as usize).to_owned(), c.pc))
                .collect::<Vec<_>>()
        };
        match def.op {
            MatchClass::Same => {
                let mut table = fast_hash_map_with_capacity(def.cases.len());
                for (label, pc) in strings() {
                    // Duplicate labels: the first case registered wins.
                    table.entry(label).or_insert(pc);
                }
                Matcher::Same { table, else_pc }
            }
            MatchClass::Head => Matcher::Head {
                cases: strings(),
                else_pc,
            },
            MatchClass::Tail => Matcher::Tail {
                cases: strings(),
                else_pc,
            },
            MatchClass::RegExp => Matcher::RegExp {
                cases: def.cases.iter().map(|c| (c.label as usize, c.pc)).collect(),
                else_pc,
            },
        }
    }

    /// Program counter to continue at for `subject`.
    pub fn evaluate(&self, subject: &str, pool: &ConstantPool, context: &mut RegexContext) -> u64 {
        match self {
            Matcher::Same { table, else_pc } => table.get(subject).copied().unwrap_or(*else_pc),
            Matcher::Head { cases, else_pc } => cases
                .iter()
                .find(|(label, _)| subject.starts_with(label.as_str()))
                .map_or(*else_pc, |(_, pc)| *pc),
            Matcher::Tail { cases, else_pc } => cases
                .iter()
                .find(|(label, _)| subject.ends_with(label.as_str()))
                .map_or(*else_pc, |(_, pc)| *pc),
            Matcher::RegExp { cases, else_pc } => {
                for (re, pc) in cases {
                    if let Some(captures) = pool.get_regexp(*re).captures(subject) {
                        context.set(captures);
                        return *pc;
                    }
                }
                *else_pc
            }
        }
    }
}
