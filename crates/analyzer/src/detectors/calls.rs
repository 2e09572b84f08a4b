use crate::analysis::types::{ReferenceKind, SymbolReference};
use crate::detectors::{
    Detector, DetectorContext, DetectorError, SymbolExtraction, enclosing_callable,
    final_component,
};
use crate::syntax::{node_text, start_line};
use graph::{Relationship, RelationshipType, ResolvedTarget};
use tree_sitter::Node;

/// Extracts call references: plain calls as FunctionCall, attribute calls
/// (`obj.method()`) as AttributeAccess. Chained call expressions like
/// `getattr(obj, name)()` contribute only the inner call; the outer callee
/// has no static name worth indexing.
#[derive(Debug, Default)]
pub struct FunctionCallDetector;

impl FunctionCallDetector {
    pub fn new() -> Self {
        Self
    }

    fn reference(node: Node<'_>, ctx: &DetectorContext<'_>) -> Option<SymbolReference> {
        if node.kind() != "call" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        let kind = match function.kind() {
            "identifier" => ReferenceKind::FunctionCall,
            "attribute" => ReferenceKind::AttributeAccess,
            _ => return None,
        };

        let name = node_text(function, ctx.source);
        if name.is_empty() {
            return None;
        }

        let mut reference = SymbolReference::new(kind, name, start_line(node));
        reference.caller = enclosing_callable(node, ctx.source);
        reference.resolved_symbol = Some(final_component(name).to_string());
        Some(reference)
    }
}

impl Detector for FunctionCallDetector {
    fn name(&self) -> &'static str {
        "function-calls"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        Ok(Self::reference(node, ctx)
            .map(|reference| {
                let symbol = final_component(&reference.name).to_string();
                let mut relationship = Relationship::new(
                    ctx.filepath,
                    ResolvedTarget::Unresolved(symbol.clone()),
                    RelationshipType::FunctionCall,
                    reference.line_number,
                );
                relationship.source_symbol = reference.caller;
                relationship.target_symbol = Some(symbol);
                relationship
            })
            .into_iter()
            .collect())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        Ok((
            Vec::new(),
            Self::reference(node, ctx).into_iter().collect(),
        ))
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
        let mut detector = FunctionCallDetector::new();
        let mut references = Vec::new();
        walk_tree(parsed.tree.root_node(), 128, |node| {
            let (_, refs) = detector.extract_symbols(node, &ctx).unwrap();
            references.extend(refs);
        })
        .unwrap();
        references
    }

    #[test]
    fn test_plain_call() {
        let references = extract("foo()\n");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].kind, ReferenceKind::FunctionCall);
        assert_eq!(references[0].name, "foo");
        assert_eq!(references[0].line_number, 1);
        assert_eq!(references[0].caller, None);
    }

    #[test]
    fn test_method_call_is_attribute_access() {
        let references = extract("conn.execute(query)\n");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].kind, ReferenceKind::AttributeAccess);
        assert_eq!(references[0].name, "conn.execute");
        assert_eq!(references[0].resolved_symbol, Some("execute".to_string()));
    }

    #[test]
    fn test_caller_context_is_qualified() {
        let source = "\
class Service:
    def run(self):
        helper()
";
        let references = extract(source);
        assert_eq!(references[0].caller.as_deref(), Some("Service.run"));
    }

    #[test]
    fn test_chained_call_yields_inner_call_only() {
        let references = extract("getattr(obj, name)()\n");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].name, "getattr");
    }

    #[test]
    fn test_nested_calls_all_found() {
        let references = extract("outer(inner(x))\n");
        let names: Vec<&str> = references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }
}
