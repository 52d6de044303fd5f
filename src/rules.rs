//! Filter rule table and per-path action resolution.
//!
//! Filters are `(glob pattern, action list)` pairs from the configuration.
//! The table is sorted once at load time so that resolution can walk it
//! front to back and let later matches override earlier ones:
//!
//! 1. The literal pattern `*` always sorts last.
//! 2. Patterns with a leading wildcard sort before patterns without one,
//!    so a literal prefix marks a more specific rule that is evaluated
//!    later and wins.
//! 3. Remaining ties break by lexicographic pattern order.
//!
//! Because later matches win for flags and compressor choice, the ordering
//! above makes `*` the final word for anything it sets - unless a matching
//! rule earlier in the table contains `skip-preprocessing`, which finishes
//! that rule and then stops resolution entirely.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use glob::Pattern;
use thiserror::Error;

use crate::config::Config;

/// Error while building the rule table from configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuleError {
    /// An action string that is not a flag, preprocessor, or compressor name.
    #[error("unknown action `{action}' for filter `{pattern}'")]
    UnknownAction { pattern: String, action: String },
    /// Invalid glob pattern
    #[error("invalid filter pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// Compression method recorded for the downstream image builder.
///
/// This tool never compresses anything itself; the choice travels in the
/// state file so the packer can apply it when building the final image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compressor {
    Gzip,
    Heatshrink,
    #[default]
    Uncompressed,
}

impl Compressor {
    /// Parse a compressor name as it appears in filters and the state file.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gzip" => Some(Compressor::Gzip),
            "heatshrink" => Some(Compressor::Heatshrink),
            "uncompressed" => Some(Compressor::Uncompressed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compressor::Gzip => "gzip",
            Compressor::Heatshrink => "heatshrink",
            Compressor::Uncompressed => "uncompressed",
        }
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Packaging flag consumed by the downstream image builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackagingFlag {
    /// Keep the object in RAM after first access
    Cache,
    /// Track the path but leave it out of the final image
    Discard,
    /// Marker that preprocessing was skipped for this path
    Skip,
}

impl PackagingFlag {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(PackagingFlag::Cache),
            "discard" => Some(PackagingFlag::Discard),
            "skip" => Some(PackagingFlag::Skip),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PackagingFlag::Cache => "cache",
            PackagingFlag::Discard => "discard",
            PackagingFlag::Skip => "skip",
        }
    }
}

/// Set of packaging flags resolved for one path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlagSet {
    pub cache: bool,
    pub discard: bool,
    pub skip: bool,
}

impl FlagSet {
    pub fn set(&mut self, flag: PackagingFlag, on: bool) {
        match flag {
            PackagingFlag::Cache => self.cache = on,
            PackagingFlag::Discard => self.discard = on,
            PackagingFlag::Skip => self.skip = on,
        }
    }

    pub fn contains(&self, flag: PackagingFlag) -> bool {
        match flag {
            PackagingFlag::Cache => self.cache,
            PackagingFlag::Discard => self.discard,
            PackagingFlag::Skip => self.skip,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.cache || self.discard || self.skip)
    }

    /// Names of the set flags, in canonical order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.cache {
            out.push("cache");
        }
        if self.discard {
            out.push("discard");
        }
        if self.skip {
            out.push("skip");
        }
        out
    }

    /// Parse a comma-joined flag list as stored in the state file.
    ///
    /// The empty string parses to the empty set.
    pub fn parse_list(s: &str) -> Result<Self, String> {
        let mut flags = FlagSet::default();
        if s.is_empty() {
            return Ok(flags);
        }
        for name in s.split(',') {
            match PackagingFlag::parse(name) {
                Some(flag) => flags.set(flag, true),
                None => return Err(name.to_string()),
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// One decoded effect within a filter rule.
///
/// Action strings are decoded once at configuration load time; resolution
/// matches exhaustively on this enum, so an unrecognized action can only
/// surface as a [`RuleError`] before any filesystem work happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    /// Enable a named preprocessor
    Enable(String),
    /// Disable a named preprocessor (`no-` prefixed in configuration)
    Disable(String),
    /// Set a packaging flag
    Set(PackagingFlag),
    /// Clear a packaging flag (`no-` prefixed in configuration)
    Clear(PackagingFlag),
    /// Empty the preprocessor list and stop consulting further rules
    SkipPreprocessing,
    /// Select a compressor
    Compress(Compressor),
}

impl ActionToken {
    /// Decode a raw action string against the declared preprocessor names.
    ///
    /// Built-in names (flags, compressors, `skip-preprocessing`) take
    /// precedence over preprocessor names.
    pub fn parse(raw: &str, preprocessors: &BTreeSet<String>) -> Option<Self> {
        if raw == "skip-preprocessing" {
            return Some(ActionToken::SkipPreprocessing);
        }
        if let Some(compressor) = Compressor::parse(raw) {
            return Some(ActionToken::Compress(compressor));
        }
        let (enable, name) = match raw.strip_prefix("no-") {
            Some(rest) => (false, rest),
            None => (true, raw),
        };
        if let Some(flag) = PackagingFlag::parse(name) {
            return Some(if enable {
                ActionToken::Set(flag)
            } else {
                ActionToken::Clear(flag)
            });
        }
        if preprocessors.contains(name) {
            return Some(if enable {
                ActionToken::Enable(name.to_string())
            } else {
                ActionToken::Disable(name.to_string())
            });
        }
        None
    }
}

/// A single filter rule: a compiled glob pattern and its decoded actions.
#[derive(Debug, Clone)]
pub struct Rule {
    raw: String,
    pattern: Pattern,
    actions: Vec<ActionToken>,
}

impl Rule {
    /// The pattern as written in configuration.
    pub fn pattern(&self) -> &str {
        &self.raw
    }

    pub fn actions(&self) -> &[ActionToken] {
        &self.actions
    }

    fn matches(&self, path: &str) -> bool {
        // Default glob options let `*` cross `/`, like fnmatch.
        self.pattern.matches(path)
    }
}

/// Fully resolved action set for one path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub flags: FlagSet,
    /// Ordered, distinct preprocessor names; insertion order is execution order.
    pub preprocessors: Vec<String>,
    pub compressor: Compressor,
    /// Every preprocessor enabled at any point during resolution, whether or
    /// not it survived to the final list. Drives tool provisioning.
    pub used: BTreeSet<String>,
}

/// The sorted, immutable table of filter rules.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Build the rule table from a loaded configuration.
    pub fn build(config: &Config) -> Result<Self, RuleError> {
        let names: BTreeSet<String> = config.preprocessors.keys().cloned().collect();
        Self::from_filters(&config.filters, &names)
    }

    /// Build the rule table from raw filter pairs.
    ///
    /// Decodes every action string, compiles every pattern, and sorts the
    /// table; any unknown action or bad pattern is fatal here, before any
    /// filesystem work.
    pub fn from_filters(
        filters: &[(String, Vec<String>)],
        preprocessors: &BTreeSet<String>,
    ) -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(filters.len());
        for (raw, actions) in filters {
            let pattern = Pattern::new(raw).map_err(|source| RuleError::BadPattern {
                pattern: raw.clone(),
                source,
            })?;
            let mut decoded = Vec::with_capacity(actions.len());
            for action in actions {
                match ActionToken::parse(action, preprocessors) {
                    Some(token) => decoded.push(token),
                    None => {
                        return Err(RuleError::UnknownAction {
                            pattern: raw.clone(),
                            action: action.clone(),
                        })
                    }
                }
            }
            rules.push(Rule {
                raw: raw.clone(),
                pattern,
                actions: decoded,
            });
        }
        rules.sort_by(|a, b| pattern_order(&a.raw, &b.raw));
        Ok(RuleTable { rules })
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Resolve the full action set for one normalized relative path.
    ///
    /// Pure function of the table and the path: walks matching rules in
    /// order, folding each rule's actions left to right. Later matches
    /// overwrite flags and the compressor; preprocessor enables append (or
    /// move) the name to the end of the list, disables remove it.
    /// `skip-preprocessing` empties the list, applies the rest of its own
    /// rule's flag and compressor tokens, then stops consulting rules.
    pub fn resolve(&self, path: &str) -> Resolution {
        let mut res = Resolution::default();
        for rule in &self.rules {
            if !rule.matches(path) {
                continue;
            }
            let mut halt = false;
            for action in &rule.actions {
                match action {
                    ActionToken::Set(flag) => res.flags.set(*flag, true),
                    ActionToken::Clear(flag) => res.flags.set(*flag, false),
                    ActionToken::Compress(compressor) => res.compressor = *compressor,
                    ActionToken::SkipPreprocessing => {
                        res.preprocessors.clear();
                        halt = true;
                    }
                    ActionToken::Enable(name) => {
                        if !halt {
                            res.preprocessors.retain(|p| p != name);
                            res.preprocessors.push(name.clone());
                            res.used.insert(name.clone());
                        }
                    }
                    ActionToken::Disable(name) => {
                        if !halt {
                            res.preprocessors.retain(|p| p != name);
                        }
                    }
                }
            }
            if halt {
                break;
            }
        }
        res
    }
}

/// Comparator giving the table its deterministic evaluation order.
fn pattern_order(a: &str, b: &str) -> Ordering {
    match (a == "*", b == "*") {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    match (a.starts_with('*'), b.starts_with('*')) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(b),
    }
}
