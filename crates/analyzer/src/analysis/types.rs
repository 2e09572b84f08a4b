use chrono::{DateTime, Utc};
use graph::ResolvedTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of an extracted symbol definition
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Variable => "variable",
        }
    }
}

/// Kind of an extracted symbol reference
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Import,
    FunctionCall,
    ClassReference,
    AttributeAccess,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::Import => "import",
            ReferenceKind::FunctionCall => "function_call",
            ReferenceKind::ClassReference => "class_reference",
            ReferenceKind::AttributeAccess => "attribute_access",
        }
    }
}

/// One symbol defined in a file. Immutable once created; owned by the
/// `FileSymbolData` that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDefinition {
    /// Simple name of the symbol
    pub name: String,
    /// What the symbol is
    pub kind: SymbolKind,
    /// 1-based first source line of the definition
    pub line_start: u32,
    /// 1-based last source line of the definition (inclusive)
    pub line_end: u32,
    /// Rendered signature, e.g. `def foo(a, b) -> int`
    pub signature: Option<String>,
    /// Decorator names in source order, without the `@`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    /// First line of the docstring, when present
    pub docstring: Option<String>,
    /// Enclosing class name; present iff this definition is a method
    pub parent_class: Option<String>,
}

impl SymbolDefinition {
    pub fn new(name: impl Into<String>, kind: SymbolKind, line_start: u32, line_end: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            line_start,
            line_end,
            signature: None,
            decorators: Vec::new(),
            docstring: None,
            parent_class: None,
        }
    }
}

/// One reference found in a file, to be resolved in phase 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    /// What kind of use this is
    pub kind: ReferenceKind,
    /// Name exactly as written in the source (possibly dotted)
    pub name: String,
    /// 1-based source line of the reference
    pub line_number: u32,
    /// Qualified name of the enclosing function/method, when any
    pub caller: Option<String>,
    /// Target resolved at detection time (stdlib marker, relative-import
    /// path); `None` leaves resolution to the relationship builder
    pub resolved_module: Option<ResolvedTarget>,
    /// Disambiguated symbol name at the target, when known at detection
    pub resolved_symbol: Option<String>,
    /// True when the reference sits under a conditional import
    #[serde(default)]
    pub is_conditional: bool,
    /// String-valued metadata; values are never structured because they
    /// cross a serialization boundary
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SymbolReference {
    pub fn new(kind: ReferenceKind, name: impl Into<String>, line_number: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            line_number,
            caller: None,
            resolved_module: None,
            resolved_symbol: None,
            is_conditional: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Everything extracted from one file in one pass. Replaced wholesale on
/// re-extraction; never mutated in place by resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSymbolData {
    /// File the symbols were extracted from (keys the builder's map)
    pub filepath: String,
    /// Definitions in source order
    pub definitions: Vec<SymbolDefinition>,
    /// References in source order
    pub references: Vec<SymbolReference>,
    /// Wall-clock time of the extraction
    pub parse_time: DateTime<Utc>,
    /// False when the file could not be parsed; such records carry no
    /// symbols and are distinguishable from "file defines nothing"
    pub is_valid: bool,
}

impl FileSymbolData {
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            definitions: Vec::new(),
            references: Vec::new(),
            parse_time: Utc::now(),
            is_valid: true,
        }
    }

    /// Record for a file that failed to parse.
    pub fn invalid(filepath: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            ..Self::new(filepath)
        }
    }
}

/// Category of a dynamic source construct that defeats static resolution
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    DynamicDispatch,
    MonkeyPatching,
    ExecEval,
    Decorator,
    Metaclass,
}

impl PatternType {
    pub fn as_str(&self) -> &str {
        match self {
            PatternType::DynamicDispatch => "dynamic_dispatch",
            PatternType::MonkeyPatching => "monkey_patching",
            PatternType::ExecEval => "exec_eval",
            PatternType::Decorator => "decorator",
            PatternType::Metaclass => "metaclass",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Info,
    Warning,
}

/// A flagged dynamic pattern. Ephemeral: reported to the caller and the
/// log, never persisted in the graph or the symbol cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicPatternWarning {
    pub pattern_type: PatternType,
    pub filepath: String,
    pub line_number: u32,
    pub message: String,
    pub severity: WarningSeverity,
    pub is_test_module: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}
