//! Static pre-execution filter.
//!
//! Lexical deny-list screening of raw snippet text. Matching is textual, not
//! syntactic: a pattern inside a string literal or comment still blocks.

use crate::config::types::{Result, SandboxError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Operation category a deny pattern guards against
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DenyCategory {
    #[serde(rename = "dynamic_import")]
    DynamicImport,
    #[serde(rename = "import_statement")]
    ImportStatement,
    #[serde(rename = "file_open")]
    FileOpen,
    #[serde(rename = "dynamic_eval")]
    DynamicEval,
    #[serde(rename = "system_namespace")]
    SystemNamespace,
    #[serde(rename = "process_spawn")]
    ProcessSpawn,
    #[serde(rename = "filesystem_tree")]
    FilesystemTree,
    #[serde(rename = "networking")]
    Networking,
    #[serde(rename = "object_loading")]
    ObjectLoading,
    #[serde(rename = "foreign_memory")]
    ForeignMemory,
    #[serde(rename = "path_manipulation")]
    PathManipulation,
    #[serde(rename = "reflection")]
    Reflection,
}

/// Baseline deny table, in evaluation order.
pub const STANDARD_DENY_PATTERNS: &[(DenyCategory, &str)] = &[
    (DenyCategory::DynamicImport, r"__import__"),
    (DenyCategory::ImportStatement, r"\bimport\b"),
    (DenyCategory::FileOpen, r"\bopen\s*\("),
    (DenyCategory::DynamicEval, r"\bexec\s*\("),
    (DenyCategory::DynamicEval, r"\beval\s*\("),
    (DenyCategory::SystemNamespace, r"\bos\."),
    (DenyCategory::SystemNamespace, r"\bsys\."),
    (DenyCategory::ProcessSpawn, r"\bsubprocess\b"),
    (DenyCategory::Networking, r"\bsocket\b"),
    (DenyCategory::Networking, r"\brequests\b"),
    (DenyCategory::FilesystemTree, r"\bshutil\b"),
    (DenyCategory::ObjectLoading, r"\bpickle\b"),
    (DenyCategory::ForeignMemory, r"\bctypes\b"),
    (DenyCategory::ObjectLoading, r"\bmarshal\b"),
    (DenyCategory::PathManipulation, r"\bpathlib\b"),
    (DenyCategory::DynamicEval, r"\bcompile\s*\("),
    (DenyCategory::Reflection, r"\bglobals\s*\("),
    (DenyCategory::Reflection, r"\bbuiltins\b"),
];

/// One compiled deny pattern
#[derive(Clone, Debug)]
pub struct DenyPattern {
    pub category: DenyCategory,
    source: String,
    regex: Regex,
}

impl DenyPattern {
    pub fn new(category: DenyCategory, source: &str) -> Result<Self> {
        let regex = Regex::new(source)
            .map_err(|e| SandboxError::Filter(format!("invalid deny pattern {source:?}: {e}")))?;
        Ok(Self {
            category,
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Immutable, ordered deny table
#[derive(Clone, Debug)]
pub struct DenyList {
    patterns: Vec<DenyPattern>,
}

impl DenyList {
    pub fn new(patterns: Vec<DenyPattern>) -> Self {
        Self { patterns }
    }

    pub fn from_table(table: &[(DenyCategory, &str)]) -> Result<Self> {
        let patterns = table
            .iter()
            .map(|(category, source)| DenyPattern::new(*category, source))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(patterns))
    }

    /// The baseline table.
    pub fn standard() -> Self {
        static STANDARD: once_cell::sync::Lazy<DenyList> = once_cell::sync::Lazy::new(|| {
            // The table is a compile-time constant; every entry is a valid regex.
            DenyList::from_table(STANDARD_DENY_PATTERNS)
                .unwrap_or_else(|_| DenyList::new(Vec::new()))
        });
        STANDARD.clone()
    }

    pub fn patterns(&self) -> &[DenyPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Result of screening one snippet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterVerdict {
    pub blocked: bool,
    pub matched_pattern: Option<String>,
    pub category: Option<DenyCategory>,
}

impl FilterVerdict {
    fn pass() -> Self {
        Self {
            blocked: false,
            matched_pattern: None,
            category: None,
        }
    }

    fn block(pattern: &DenyPattern) -> Self {
        Self {
            blocked: true,
            matched_pattern: Some(pattern.source().to_string()),
            category: Some(pattern.category),
        }
    }
}

/// Deny-list screener. Pure; spawns nothing.
#[derive(Clone, Debug)]
pub struct StaticFilter {
    deny_list: DenyList,
}

impl StaticFilter {
    pub fn new(deny_list: DenyList) -> Self {
        Self { deny_list }
    }

    pub fn standard() -> Self {
        Self::new(DenyList::standard())
    }

    pub fn deny_list(&self) -> &DenyList {
        &self.deny_list
    }

    /// First matching pattern wins.
    pub fn check(&self, snippet: &str) -> FilterVerdict {
        self.deny_list
            .patterns()
            .iter()
            .find(|pattern| pattern.is_match(snippet))
            .map(FilterVerdict::block)
            .unwrap_or_else(FilterVerdict::pass)
    }
}

impl Default for StaticFilter {
    fn default() -> Self {
        Self::standard()
    }
}
