//! Path restriction policy: which path components are legal
//!
//! A policy is compiled once at startup from a comma-separated list of rule
//! set names (e.g. `"Windows required, UNIX required"`) and is immutable
//! afterwards. Components that break any active rule are rejected outright;
//! nothing is rewritten or truncated.

use crate::error::{BackboneError, Result};
use std::fmt;

/// Default rule sets for a managed repository
pub const DEFAULT_PATH_RULES: &str = "Windows required, UNIX required";

/// A named set of component restrictions
#[derive(Debug, PartialEq, Eq)]
pub struct RuleSet {
    /// Catalog name
    pub name: &'static str,

    /// Characters that may not appear anywhere in a component
    forbidden_chars: &'static [char],

    /// Whether U+0000..U+001F are forbidden
    forbid_control: bool,

    /// Device names, matched case-insensitively on the part before the first `.`
    reserved_names: &'static [&'static str],

    /// Whole component names that are forbidden
    forbidden_names: &'static [&'static str],

    forbidden_prefixes: &'static [&'static str],

    forbidden_suffixes: &'static [&'static str],
}

const WINDOWS_REQUIRED: RuleSet = RuleSet {
    name: "Windows required",
    forbidden_chars: &['"', '*', '/', ':', '<', '>', '?', '\\', '|'],
    forbid_control: true,
    reserved_names: &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ],
    forbidden_names: &[],
    forbidden_prefixes: &[],
    forbidden_suffixes: &[".", " "],
};

const WINDOWS_OPTIONAL: RuleSet = RuleSet {
    name: "Windows optional",
    forbidden_chars: &[],
    forbid_control: false,
    reserved_names: &[],
    forbidden_names: &[],
    forbidden_prefixes: &["$"],
    forbidden_suffixes: &[],
};

const UNIX_REQUIRED: RuleSet = RuleSet {
    name: "UNIX required",
    forbidden_chars: &['\0', '/'],
    forbid_control: false,
    reserved_names: &[],
    forbidden_names: &[".", ".."],
    forbidden_prefixes: &[],
    forbidden_suffixes: &[],
};

const UNIX_OPTIONAL: RuleSet = RuleSet {
    name: "UNIX optional",
    forbidden_chars: &[],
    forbid_control: false,
    reserved_names: &[],
    forbidden_names: &[],
    forbidden_prefixes: &["-", "."],
    forbidden_suffixes: &[],
};

/// Every rule set a policy may name
pub static CATALOG: [&RuleSet; 4] = [
    &WINDOWS_REQUIRED,
    &WINDOWS_OPTIONAL,
    &UNIX_REQUIRED,
    &UNIX_OPTIONAL,
];

/// Name that resolves to the required rules of the host platform
const LOCAL_REQUIRED: &str = "local required";

fn lookup(name: &str) -> Option<&'static RuleSet> {
    if name == LOCAL_REQUIRED {
        return Some(if cfg!(windows) {
            &WINDOWS_REQUIRED
        } else {
            &UNIX_REQUIRED
        });
    }
    CATALOG.iter().copied().find(|r| r.name == name)
}

/// Why a component was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    /// `.`/`..`, NUL or `/`; rejected whatever rules are active
    Traversal,
    Character { rule: &'static str, ch: char },
    ReservedName { rule: &'static str },
    Name { rule: &'static str },
    Prefix { rule: &'static str, prefix: &'static str },
    Suffix { rule: &'static str, suffix: &'static str },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "empty component"),
            Violation::Traversal => write!(f, "traversal component"),
            Violation::Character { rule, ch } => {
                write!(f, "character {:?} forbidden by '{}'", ch, rule)
            }
            Violation::ReservedName { rule } => write!(f, "reserved name under '{}'", rule),
            Violation::Name { rule } => write!(f, "name forbidden by '{}'", rule),
            Violation::Prefix { rule, prefix } => {
                write!(f, "prefix {:?} forbidden by '{}'", prefix, rule)
            }
            Violation::Suffix { rule, suffix } => {
                write!(f, "suffix {:?} forbidden by '{}'", suffix, rule)
            }
        }
    }
}

impl RuleSet {
    fn check(&self, component: &str) -> std::result::Result<(), Violation> {
        let rule = self.name;
        if let Some(ch) = component
            .chars()
            .find(|c| self.forbidden_chars.contains(c) || (self.forbid_control && *c < '\u{20}'))
        {
            return Err(Violation::Character { rule, ch });
        }
        if self.forbidden_names.contains(&component) {
            return Err(Violation::Name { rule });
        }
        let stem = component.split('.').next().unwrap_or(component);
        if self
            .reserved_names
            .iter()
            .any(|r| r.eq_ignore_ascii_case(stem))
        {
            return Err(Violation::ReservedName { rule });
        }
        if let Some(prefix) = self
            .forbidden_prefixes
            .iter()
            .copied()
            .find(|p| component.starts_with(*p))
        {
            return Err(Violation::Prefix { rule, prefix });
        }
        if let Some(suffix) = self
            .forbidden_suffixes
            .iter()
            .copied()
            .find(|s| component.ends_with(*s))
        {
            return Err(Violation::Suffix { rule, suffix });
        }
        Ok(())
    }
}

/// Compiled, immutable path restriction policy
#[derive(Debug, Clone)]
pub struct PathPolicy {
    rules: Vec<&'static RuleSet>,
}

impl PathPolicy {
    /// Compile a policy from a comma-separated list of rule set names
    ///
    /// Blank entries are ignored and duplicates collapse. An unknown name, or
    /// a list naming no rule set at all, fails.
    pub fn compile(rule_names: &str) -> Result<Self> {
        let mut rules: Vec<&'static RuleSet> = Vec::new();
        for term in rule_names.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let rule = lookup(term).ok_or_else(|| {
                BackboneError::UnknownRuleSet(format!("'{}' in \"{}\"", term, rule_names))
            })?;
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        if rules.is_empty() {
            return Err(BackboneError::Config(format!(
                "no path rule sets named in \"{}\"",
                rule_names
            )));
        }

        tracing::info!(
            rules = ?rules.iter().map(|r| r.name).collect::<Vec<_>>(),
            "Path restriction policy compiled"
        );
        Ok(Self { rules })
    }

    /// Names of the active rule sets
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Pass a legal component through, or reject it
    pub fn sanitize_component<'a>(&self, component: &'a str) -> std::result::Result<&'a str, Violation> {
        if component.is_empty() {
            return Err(Violation::Empty);
        }
        if component == "." || component == ".." || component.contains(|c: char| c == '\0' || c == '/') {
            return Err(Violation::Traversal);
        }
        for rule in &self.rules {
            rule.check(component)?;
        }
        Ok(component)
    }
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            rules: vec![&WINDOWS_REQUIRED, &UNIX_REQUIRED],
        }
    }
}
