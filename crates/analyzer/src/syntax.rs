use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("incompatible tree-sitter grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),
    #[error("parser returned no tree")]
    NoTree,
}

/// Raised by the bounded traversal when the tree nests deeper than the
/// configured limit. Callers fail closed and mark the file unparseable.
#[derive(Debug, Error)]
#[error("syntax tree exceeds maximum depth of {max_depth}")]
pub struct DepthExceeded {
    pub max_depth: usize,
}

/// One parsed source file: the tree plus the text it was parsed from.
pub struct ParsedFile {
    pub tree: Tree,
    pub source: String,
}

impl ParsedFile {
    /// True when the parser hit a syntax error anywhere in the file.
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }
}

/// Python syntax-tree provider backed by tree-sitter.
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self, SyntaxError> {
        let mut parser = Parser::new();
        let language: Language = tree_sitter_python::LANGUAGE.into();
        parser.set_language(&language)?;
        Ok(Self { parser })
    }

    pub fn parse(&mut self, source: String) -> Result<ParsedFile, SyntaxError> {
        let tree = self
            .parser
            .parse(source.as_bytes(), None)
            .ok_or(SyntaxError::NoTree)?;
        Ok(ParsedFile { tree, source })
    }
}

/// Visit every node of the tree depth-first in source order using an
/// explicit work stack. Depth is checked per node so adversarial or
/// generated inputs cannot grow the call stack.
pub fn walk_tree<'t, F>(root: Node<'t>, max_depth: usize, mut visit: F) -> Result<(), DepthExceeded>
where
    F: FnMut(Node<'t>),
{
    let mut stack: Vec<(Node<'t>, usize)> = vec![(root, 0)];
    while let Some((node, depth)) = stack.pop() {
        if depth > max_depth {
            return Err(DepthExceeded { max_depth });
        }
        visit(node);

        // Children are pushed in reverse so they pop in source order
        for index in (0..node.child_count()).rev() {
            if let Some(child) = node.child(index) {
                stack.push((child, depth + 1));
            }
        }
    }
    Ok(())
}

/// Node text, empty when the byte range is not valid UTF-8 (the source is
/// always a `&str`, so this only trips on internal range bugs).
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based start line of a node.
pub fn start_line(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line of a node.
pub fn end_line(node: Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// Iterator over a node's ancestors, nearest first.
pub fn ancestors<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    std::iter::successors(node.parent(), |current| current.parent())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParsedFile {
        PythonParser::new()
            .expect("grammar should load")
            .parse(source.to_string())
            .expect("parse should produce a tree")
    }

    #[test]
    fn test_parse_valid_source() {
        let parsed = parse("def foo():\n    pass\n");
        assert!(!parsed.has_errors());
        assert_eq!(parsed.tree.root_node().kind(), "module");
    }

    #[test]
    fn test_parse_reports_syntax_errors() {
        let parsed = parse("def foo(:\n");
        assert!(parsed.has_errors());
    }

    #[test]
    fn test_walk_visits_in_source_order() {
        let parsed = parse("a = 1\nb = 2\n");
        let mut identifiers = Vec::new();
        walk_tree(parsed.tree.root_node(), 64, |node| {
            if node.kind() == "identifier" {
                identifiers.push(node_text(node, &parsed.source).to_string());
            }
        })
        .unwrap();
        assert_eq!(identifiers, vec!["a", "b"]);
    }

    #[test]
    fn test_walk_fails_closed_past_depth_bound() {
        // Deeply nested parenthesized expression
        let source = format!("x = {}1{}\n", "(".repeat(100), ")".repeat(100));
        let parsed = parse(&source);
        let result = walk_tree(parsed.tree.root_node(), 16, |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let parsed = parse("import os\n");
        let root = parsed.tree.root_node();
        let import = root.child(0).unwrap();
        assert_eq!(import.kind(), "import_statement");
        assert_eq!(start_line(import), 1);
    }
}
