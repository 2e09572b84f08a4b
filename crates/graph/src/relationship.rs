use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a cross-file relationship edge
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Import,
    FunctionCall,
    ClassInheritance,
}

const RELATIONSHIP_TYPES: [&str; 3] = ["IMPORT", "FUNCTION_CALL", "CLASS_INHERITANCE"];

impl RelationshipType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::Import => "IMPORT",
            RelationshipType::FunctionCall => "FUNCTION_CALL",
            RelationshipType::ClassInheritance => "CLASS_INHERITANCE",
        }
    }

    pub fn all_types() -> Vec<&'static str> {
        RELATIONSHIP_TYPES.to_vec()
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a relationship edge.
///
/// In memory this is a proper sum type; the bracketed marker strings
/// (`<stdlib:os>`, `<module:requests>`, `<unresolved:foo>`) only exist at
/// the serialization boundary, where downstream consumers expect them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedTarget {
    /// A real file path inside the analyzed project
    File(String),
    /// A standard-library module, not backed by a project file
    Stdlib(String),
    /// An external (non-stdlib, non-project) module
    Module(String),
    /// No matching definition was found anywhere
    Unresolved(String),
}

impl ResolvedTarget {
    /// Render to the wire format (a plain path or a bracketed marker).
    pub fn render(&self) -> String {
        match self {
            ResolvedTarget::File(path) => path.clone(),
            ResolvedTarget::Stdlib(name) => format!("<stdlib:{name}>"),
            ResolvedTarget::Module(name) => format!("<module:{name}>"),
            ResolvedTarget::Unresolved(name) => format!("<unresolved:{name}>"),
        }
    }

    /// Parse the wire format back into the sum type. Unknown bracketed
    /// markers degrade to `Unresolved` rather than erroring.
    pub fn parse(raw: &str) -> Self {
        if let Some(inner) = raw.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            return match inner.split_once(':') {
                Some(("stdlib", name)) => ResolvedTarget::Stdlib(name.to_string()),
                Some(("module", name)) => ResolvedTarget::Module(name.to_string()),
                Some(("unresolved", name)) => ResolvedTarget::Unresolved(name.to_string()),
                _ => ResolvedTarget::Unresolved(inner.to_string()),
            };
        }
        ResolvedTarget::File(raw.to_string())
    }

    /// The file path, when the target is a real project file.
    pub fn as_file(&self) -> Option<&str> {
        match self {
            ResolvedTarget::File(path) => Some(path),
            _ => None,
        }
    }

    /// The inner name regardless of variant.
    pub fn name(&self) -> &str {
        match self {
            ResolvedTarget::File(path) => path,
            ResolvedTarget::Stdlib(name)
            | ResolvedTarget::Module(name)
            | ResolvedTarget::Unresolved(name) => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ResolvedTarget::File(_))
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for ResolvedTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for ResolvedTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TargetVisitor;

        impl Visitor<'_> for TargetVisitor {
            type Value = ResolvedTarget;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a file path or bracketed target marker")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(ResolvedTarget::parse(value))
            }
        }

        deserializer.deserialize_str(TargetVisitor)
    }
}

/// A directed edge between two files/symbols.
///
/// Produced by the relationship builder (two-phase path) or by a detector's
/// `detect` path (legacy single-phase); never hand-constructed by the graph
/// store itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// File the reference was found in
    pub source_file: String,
    /// Resolved target (file path or marker)
    pub target: ResolvedTarget,
    /// Kind of edge
    pub relationship_type: RelationshipType,
    /// 1-based line of the reference in the source file
    pub line_number: u32,
    /// Enclosing function/method of the reference, when known
    pub source_symbol: Option<String>,
    /// Disambiguated symbol name at the target, when known
    pub target_symbol: Option<String>,
    /// Start line of the target definition, resolved by cross-file lookup
    pub target_line: Option<u32>,
    /// String-valued metadata; values are never structured because they
    /// cross a serialization boundary
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Relationship {
    pub fn new(
        source_file: impl Into<String>,
        target: ResolvedTarget,
        relationship_type: RelationshipType,
        line_number: u32,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            target,
            relationship_type,
            line_number,
            source_symbol: None,
            target_symbol: None,
            target_line: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_source_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.source_symbol = Some(symbol.into());
        self
    }

    pub fn with_target_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.target_symbol = Some(symbol.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_marker_round_trip() {
        let targets = [
            ResolvedTarget::File("src/app.py".to_string()),
            ResolvedTarget::Stdlib("os".to_string()),
            ResolvedTarget::Module("requests".to_string()),
            ResolvedTarget::Unresolved("frobnicate".to_string()),
        ];
        for target in targets {
            assert_eq!(ResolvedTarget::parse(&target.render()), target);
        }
    }

    #[test]
    fn test_unknown_marker_degrades_to_unresolved() {
        let parsed = ResolvedTarget::parse("<mystery:thing>");
        assert_eq!(parsed, ResolvedTarget::Unresolved("mystery:thing".to_string()));
    }

    #[test]
    fn test_target_serializes_as_marker_string() {
        let json = serde_json::to_string(&ResolvedTarget::Stdlib("json".to_string())).unwrap();
        assert_eq!(json, "\"<stdlib:json>\"");

        let back: ResolvedTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResolvedTarget::Stdlib("json".to_string()));
    }

    #[test]
    fn test_relationship_type_strings() {
        assert_eq!(RelationshipType::Import.as_str(), "IMPORT");
        assert_eq!(RelationshipType::FunctionCall.as_str(), "FUNCTION_CALL");
        assert_eq!(RelationshipType::ClassInheritance.as_str(), "CLASS_INHERITANCE");
        assert_eq!(RelationshipType::all_types().len(), 3);
    }

    #[test]
    fn test_relationship_json_round_trip() {
        let relationship = Relationship::new(
            "b.py",
            ResolvedTarget::File("a.py".to_string()),
            RelationshipType::Import,
            1,
        )
        .with_target_symbol("foo")
        .with_metadata("alias", "f");

        let json = serde_json::to_string(&relationship).unwrap();
        let back: Relationship = serde_json::from_str(&json).unwrap();
        assert_eq!(back, relationship);
    }
}
