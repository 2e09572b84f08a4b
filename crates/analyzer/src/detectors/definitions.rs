use crate::analysis::types::{SymbolDefinition, SymbolKind, SymbolReference};
use crate::detectors::{Detector, DetectorContext, DetectorError, SymbolExtraction};
use crate::syntax::{end_line, node_text, start_line, walk_tree};
use graph::Relationship;
use rustc_hash::FxHashMap;
use tree_sitter::Node;

/// Depth bound for the per-file pre-pass; the analyzer rejects over-deep
/// trees before detectors run, so this never fires in practice.
const CLASS_MAP_MAX_DEPTH: usize = 1_024;

/// Extracts symbol definitions: functions, methods, classes, and top-level
/// variable assignments.
///
/// Keeps a per-filepath map from function-node id to enclosing class name
/// so method extraction avoids rescanning ancestors per definition. Node
/// ids are stable integers within one parse, and the map is rebuilt
/// whenever the filepath changes between calls.
#[derive(Debug, Default)]
pub struct FunctionDefinitionDetector {
    cached_filepath: Option<String>,
    method_classes: FxHashMap<usize, String>,
}

impl FunctionDefinitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_file_cache(&mut self, ctx: &DetectorContext<'_>) {
        if self.cached_filepath.as_deref() == Some(ctx.filepath) {
            return;
        }
        self.cached_filepath = Some(ctx.filepath.to_string());
        self.method_classes = build_method_class_map(ctx);
    }

    fn definitions(&mut self, node: Node<'_>, ctx: &DetectorContext<'_>) -> Vec<SymbolDefinition> {
        match node.kind() {
            "function_definition" => {
                self.ensure_file_cache(ctx);
                self.function_definition(node, ctx).into_iter().collect()
            }
            "class_definition" => self.class_definition(node, ctx).into_iter().collect(),
            "assignment" => module_level_assignments(node, ctx),
            _ => Vec::new(),
        }
    }

    fn function_definition(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<SymbolDefinition> {
        let name_node = node.child_by_field_name("name")?;
        let name = node_text(name_node, ctx.source);

        let mut definition =
            SymbolDefinition::new(name, SymbolKind::Function, start_line(node), end_line(node));

        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| node_text(p, ctx.source))
            .unwrap_or("()");
        definition.signature = Some(match node.child_by_field_name("return_type") {
            Some(return_type) => format!(
                "def {name}{parameters} -> {}",
                node_text(return_type, ctx.source)
            ),
            None => format!("def {name}{parameters}"),
        });

        definition.decorators = decorator_names(node, ctx);
        definition.docstring = docstring(node, ctx);
        definition.parent_class = self.method_classes.get(&node.id()).cloned();
        Some(definition)
    }

    fn class_definition(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<SymbolDefinition> {
        let name_node = node.child_by_field_name("name")?;
        let name = node_text(name_node, ctx.source);

        let mut definition =
            SymbolDefinition::new(name, SymbolKind::Class, start_line(node), end_line(node));
        definition.signature = Some(match node.child_by_field_name("superclasses") {
            Some(superclasses) => {
                format!("class {name}{}", node_text(superclasses, ctx.source))
            }
            None => format!("class {name}"),
        });
        definition.decorators = decorator_names(node, ctx);
        definition.docstring = docstring(node, ctx);
        Some(definition)
    }
}

/// One pre-pass over the whole tree collecting, for every class body, the
/// function definitions that sit directly in it (including decorated ones).
fn build_method_class_map(ctx: &DetectorContext<'_>) -> FxHashMap<usize, String> {
    let mut map = FxHashMap::default();
    let _ = walk_tree(ctx.tree.root_node(), CLASS_MAP_MAX_DEPTH, |node| {
        if node.kind() != "class_definition" {
            return;
        }
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let class_name = node_text(name_node, ctx.source);

        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            match child.kind() {
                "function_definition" => {
                    map.insert(child.id(), class_name.to_string());
                }
                "decorated_definition" => {
                    if let Some(definition) = child.child_by_field_name("definition")
                        && definition.kind() == "function_definition"
                    {
                        map.insert(definition.id(), class_name.to_string());
                    }
                }
                _ => {}
            }
        }
    });
    map
}

/// Decorator names for a definition wrapped in `decorated_definition`,
/// in source order and without the leading `@`.
fn decorator_names(node: Node<'_>, ctx: &DetectorContext<'_>) -> Vec<String> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    if parent.kind() != "decorated_definition" {
        return Vec::new();
    }

    let mut cursor = parent.walk();
    parent
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .filter_map(|decorator| {
            let expression = decorator.named_child(0)?;
            // `@app.route("/")` names `app.route`, not the whole call
            let name_node = if expression.kind() == "call" {
                expression.child_by_field_name("function")?
            } else {
                expression
            };
            Some(node_text(name_node, ctx.source).to_string())
        })
        .collect()
}

/// First line of the definition body's docstring, when present.
fn docstring(node: Node<'_>, ctx: &DetectorContext<'_>) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }

    let raw = node_text(string_node, ctx.source);
    let stripped = raw
        .trim_start_matches(['r', 'b', 'u', 'R', 'B', 'U', 'f', 'F'])
        .trim_matches(['"', '\'']);
    let line = stripped.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.to_string())
}

/// Top-level `name = value` assignments become Variable definitions.
/// Anything nested, unpacked, or attribute-targeted is skipped.
fn module_level_assignments(node: Node<'_>, ctx: &DetectorContext<'_>) -> Vec<SymbolDefinition> {
    let at_module_level = node
        .parent()
        .is_some_and(|p| p.kind() == "expression_statement")
        && node
            .parent()
            .and_then(|p| p.parent())
            .is_some_and(|grandparent| grandparent.kind() == "module");
    if !at_module_level {
        return Vec::new();
    }

    let Some(left) = node.child_by_field_name("left") else {
        return Vec::new();
    };
    if left.kind() != "identifier" {
        return Vec::new();
    }

    vec![SymbolDefinition::new(
        node_text(left, ctx.source),
        SymbolKind::Variable,
        start_line(node),
        end_line(node),
    )]
}

impl Detector for FunctionDefinitionDetector {
    fn name(&self) -> &'static str {
        "function-definitions"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn detect(
        &mut self,
        _node: Node<'_>,
        _ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        // Definitions carry no edges; the legacy path gets them indirectly
        // through the reference detectors
        Ok(Vec::new())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        Ok((self.definitions(node, ctx), Vec::<SymbolReference>::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::PythonParser;

    fn extract(source: &str) -> Vec<SymbolDefinition> {
        let parsed = PythonParser::new().unwrap().parse(source.to_string()).unwrap();
        let ctx = DetectorContext {
            filepath: "a.py",
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let mut detector = FunctionDefinitionDetector::new();
        let mut definitions = Vec::new();
        walk_tree(parsed.tree.root_node(), 128, |node| {
            let (defs, _) = detector.extract_symbols(node, &ctx).unwrap();
            definitions.extend(defs);
        })
        .unwrap();
        definitions
    }

    #[test]
    fn test_function_signature_and_lines() {
        let definitions = extract("def add(a, b) -> int:\n    return a + b\n");
        assert_eq!(definitions.len(), 1);
        let def = &definitions[0];
        assert_eq!(def.name, "add");
        assert_eq!(def.kind, SymbolKind::Function);
        assert_eq!(def.line_start, 1);
        assert_eq!(def.line_end, 2);
        assert_eq!(def.signature.as_deref(), Some("def add(a, b) -> int"));
        assert_eq!(def.parent_class, None);
    }

    #[test]
    fn test_method_gets_parent_class() {
        let source = "\
class Config:
    def reload(self):
        pass

def standalone():
    pass
";
        let definitions = extract(source);
        let reload = definitions.iter().find(|d| d.name == "reload").unwrap();
        assert_eq!(reload.parent_class.as_deref(), Some("Config"));

        let standalone = definitions.iter().find(|d| d.name == "standalone").unwrap();
        assert_eq!(standalone.parent_class, None);
    }

    #[test]
    fn test_decorated_method_gets_parent_class() {
        let source = "\
class Config:
    @property
    def path(self):
        return self._path
";
        let definitions = extract(source);
        let path = definitions.iter().find(|d| d.name == "path").unwrap();
        assert_eq!(path.parent_class.as_deref(), Some("Config"));
        assert_eq!(path.decorators, vec!["property"]);
    }

    #[test]
    fn test_class_definition_with_docstring() {
        let source = "\
class Widget(Base):
    \"\"\"A reusable widget.

    Long description.
    \"\"\"
    pass
";
        let definitions = extract(source);
        let widget = definitions.iter().find(|d| d.name == "Widget").unwrap();
        assert_eq!(widget.kind, SymbolKind::Class);
        assert_eq!(widget.signature.as_deref(), Some("class Widget(Base)"));
        assert_eq!(widget.docstring.as_deref(), Some("A reusable widget."));
    }

    #[test]
    fn test_module_level_variable() {
        let definitions = extract("VERSION = \"1.0\"\n\ndef f():\n    local = 1\n");
        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"VERSION"));
        // Function-local assignments are not definitions
        assert!(!names.contains(&"local"));
    }

    #[test]
    fn test_nested_function_is_not_a_method() {
        let source = "\
class Box:
    def outer(self):
        def inner():
            pass
";
        let definitions = extract(source);
        let inner = definitions.iter().find(|d| d.name == "inner").unwrap();
        assert_eq!(inner.parent_class, None);
        let outer = definitions.iter().find(|d| d.name == "outer").unwrap();
        assert_eq!(outer.parent_class.as_deref(), Some("Box"));
    }
}
