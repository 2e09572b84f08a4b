use crate::analysis::types::{ReferenceKind, SymbolReference};
use crate::detectors::{
    Detector, DetectorContext, DetectorError, SymbolExtraction, final_component,
};
use crate::syntax::{node_text, start_line};
use graph::{Relationship, RelationshipType, ResolvedTarget};
use tree_sitter::Node;

/// Extracts superclass references from class definitions. Keyword
/// arguments in the base list (`metaclass=...`) belong to the metaclass
/// detector and are skipped here.
#[derive(Debug, Default)]
pub struct ClassInheritanceDetector;

impl ClassInheritanceDetector {
    pub fn new() -> Self {
        Self
    }

    fn references(node: Node<'_>, ctx: &DetectorContext<'_>) -> Vec<SymbolReference> {
        if node.kind() != "class_definition" {
            return Vec::new();
        }
        let Some(name_node) = node.child_by_field_name("name") else {
            return Vec::new();
        };
        let Some(superclasses) = node.child_by_field_name("superclasses") else {
            return Vec::new();
        };

        let class_name = node_text(name_node, ctx.source);
        let line = start_line(node);

        let mut references = Vec::new();
        let mut cursor = superclasses.walk();
        for base in superclasses.named_children(&mut cursor) {
            if !matches!(base.kind(), "identifier" | "attribute") {
                continue;
            }
            let base_name = node_text(base, ctx.source);
            let mut reference =
                SymbolReference::new(ReferenceKind::ClassReference, base_name, line);
            reference.caller = Some(class_name.to_string());
            reference.resolved_symbol = Some(final_component(base_name).to_string());
            reference
                .metadata
                .insert("class".to_string(), class_name.to_string());
            references.push(reference);
        }
        references
    }
}

impl Detector for ClassInheritanceDetector {
    fn name(&self) -> &'static str {
        "class-inheritance"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        Ok(Self::references(node, ctx)
            .into_iter()
            .map(|reference| {
                let symbol = final_component(&reference.name).to_string();
                let mut relationship = Relationship::new(
                    ctx.filepath,
                    ResolvedTarget::Unresolved(symbol.clone()),
                    RelationshipType::ClassInheritance,
                    reference.line_number,
                );
                relationship.source_symbol = reference.caller;
                relationship.target_symbol = Some(symbol);
                relationship.metadata = reference.metadata;
                relationship
            })
            .collect())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        Ok((Vec::new(), Self::references(node, ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{PythonParser, walk_tree};

    fn extract(source: &str) -> Vec<SymbolReference> {
        let parsed = PythonParser::new().unwrap().parse(source.to_string()).unwrap();
        let ctx = DetectorContext {
            filepath: "a.py",
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let mut detector = ClassInheritanceDetector::new();
        let mut references = Vec::new();
        walk_tree(parsed.tree.root_node(), 128, |node| {
            let (_, refs) = detector.extract_symbols(node, &ctx).unwrap();
            references.extend(refs);
        })
        .unwrap();
        references
    }

    #[test]
    fn test_single_base() {
        let references = extract("class Child(Base):\n    pass\n");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].kind, ReferenceKind::ClassReference);
        assert_eq!(references[0].name, "Base");
        assert_eq!(references[0].caller.as_deref(), Some("Child"));
    }

    #[test]
    fn test_multiple_and_dotted_bases() {
        let references = extract("class Handler(abc.ABC, Mixin):\n    pass\n");
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].name, "abc.ABC");
        assert_eq!(references[0].resolved_symbol, Some("ABC".to_string()));
        assert_eq!(references[1].name, "Mixin");
    }

    #[test]
    fn test_metaclass_keyword_is_not_a_base() {
        let references = extract("class Meta(Base, metaclass=Registry):\n    pass\n");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].name, "Base");
    }

    #[test]
    fn test_bare_class_has_no_references() {
        assert!(extract("class Plain:\n    pass\n").is_empty());
    }
}
