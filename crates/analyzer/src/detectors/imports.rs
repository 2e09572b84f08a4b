use crate::analysis::types::{ReferenceKind, SymbolReference};
use crate::detectors::{
    Detector, DetectorContext, DetectorError, SymbolExtraction, enclosing_callable,
};
use crate::syntax::{node_text, start_line};
use graph::{Relationship, RelationshipType, ResolvedTarget};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

/// Top-level standard-library modules, sorted for binary search. Imports
/// rooted here resolve to a stdlib marker instead of a project file.
const STDLIB_MODULES: &[&str] = &[
    "__future__",
    "abc",
    "argparse",
    "array",
    "ast",
    "asyncio",
    "base64",
    "bisect",
    "builtins",
    "bz2",
    "collections",
    "concurrent",
    "configparser",
    "contextlib",
    "copy",
    "csv",
    "ctypes",
    "dataclasses",
    "datetime",
    "decimal",
    "difflib",
    "dis",
    "email",
    "enum",
    "errno",
    "fnmatch",
    "fractions",
    "functools",
    "gc",
    "getpass",
    "glob",
    "gzip",
    "hashlib",
    "heapq",
    "html",
    "http",
    "importlib",
    "inspect",
    "io",
    "itertools",
    "json",
    "linecache",
    "logging",
    "lzma",
    "math",
    "multiprocessing",
    "numbers",
    "operator",
    "os",
    "pathlib",
    "pickle",
    "platform",
    "pprint",
    "queue",
    "random",
    "re",
    "secrets",
    "select",
    "shlex",
    "shutil",
    "signal",
    "site",
    "socket",
    "sqlite3",
    "stat",
    "statistics",
    "string",
    "struct",
    "subprocess",
    "sys",
    "sysconfig",
    "tarfile",
    "tempfile",
    "textwrap",
    "threading",
    "time",
    "token",
    "tokenize",
    "traceback",
    "types",
    "typing",
    "unicodedata",
    "unittest",
    "urllib",
    "uuid",
    "warnings",
    "weakref",
    "xml",
    "zipfile",
    "zlib",
];

pub(crate) fn is_stdlib_module(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    STDLIB_MODULES.binary_search(&root).is_ok()
}

/// Candidate project file for a relative import, computed from the
/// importing file's path. `from .util import x` in `pkg/mod.py` yields
/// `pkg/util.py`; a bare `from . import x` yields the package
/// `__init__.py`. Packages resolve from their `__init__.py` directory, one
/// level up per extra leading dot.
pub(crate) fn relative_import_candidate(module_path: &str, current_file: &str) -> String {
    let level = module_path.chars().take_while(|&c| c == '.').count();
    let remainder = &module_path[level..];
    let current = Path::new(current_file);

    let mut dir: PathBuf = if current.file_name() == Some(OsStr::new("__init__.py")) {
        let mut dir = current.parent().unwrap_or(Path::new("")).to_path_buf();
        for _ in 1..level {
            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            }
        }
        dir
    } else {
        let mut dir = current.to_path_buf();
        for _ in 0..level {
            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            }
        }
        dir
    };

    if remainder.is_empty() {
        dir = dir.join("__init__.py");
    } else {
        let parts: Vec<&str> = remainder.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            dir = dir.join(part);
        }
        dir = dir.join(format!("{}.py", parts[parts.len() - 1]));
    }
    dir.to_string_lossy().replace('\\', "/")
}

fn is_import_node(node: Node<'_>) -> bool {
    matches!(node.kind(), "import_statement" | "import_from_statement")
}

fn has_wildcard(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .any(|child| child.kind() == "wildcard_import")
}

/// True when the statement sits directly in the body of an `if`/`elif`/
/// `else`; those imports belong to the conditional-import detector.
fn in_conditional_body(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    parent.kind() == "block"
        && parent.parent().is_some_and(|grandparent| {
            matches!(
                grandparent.kind(),
                "if_statement" | "elif_clause" | "else_clause"
            )
        })
}

/// Resolution applied at detection time for a `from M import S` reference.
fn resolve_from_import(
    module: &str,
    symbol: &str,
    ctx: &DetectorContext<'_>,
) -> (Option<ResolvedTarget>, Option<String>) {
    if module.starts_with('.') {
        let candidate = relative_import_candidate(module, ctx.filepath);
        (
            Some(ResolvedTarget::File(candidate)),
            Some(symbol.to_string()),
        )
    } else if is_stdlib_module(module) {
        (
            Some(ResolvedTarget::Stdlib(module.to_string())),
            Some(symbol.to_string()),
        )
    } else {
        // A project-level absolute import: phase 2 resolves the symbol
        // against the cross-file definition index
        (None, Some(symbol.to_string()))
    }
}

fn resolve_plain_import(module: &str) -> ResolvedTarget {
    if is_stdlib_module(module) {
        ResolvedTarget::Stdlib(module.to_string())
    } else {
        ResolvedTarget::Module(module.to_string())
    }
}

/// Shared extraction for `import X` / `from X import Y` statements.
/// Wildcard from-imports are excluded; the wildcard detector owns those.
fn import_references(
    node: Node<'_>,
    ctx: &DetectorContext<'_>,
    is_conditional: bool,
    condition: Option<&str>,
) -> Vec<SymbolReference> {
    let mut references = Vec::new();
    let line = start_line(node);
    let caller = enclosing_callable(node, ctx.source);

    let mut push = |mut reference: SymbolReference| {
        reference.caller = caller.clone();
        reference.is_conditional = is_conditional;
        if let Some(condition) = condition {
            reference
                .metadata
                .insert("condition".to_string(), condition.to_string());
        }
        references.push(reference);
    };

    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name_node in node.children_by_field_name("name", &mut cursor) {
                let (module_node, alias) = match name_node.kind() {
                    "aliased_import" => {
                        let Some(module) = name_node.child_by_field_name("name") else {
                            continue;
                        };
                        let alias = name_node
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, ctx.source).to_string());
                        (module, alias)
                    }
                    _ => (name_node, None),
                };
                let module = node_text(module_node, ctx.source);
                if module.is_empty() {
                    continue;
                }

                let mut reference = SymbolReference::new(ReferenceKind::Import, module, line);
                reference.resolved_module = Some(resolve_plain_import(module));
                reference
                    .metadata
                    .insert("module".to_string(), module.to_string());
                if let Some(alias) = alias {
                    reference.metadata.insert("alias".to_string(), alias);
                }
                push(reference);
            }
        }
        "import_from_statement" => {
            if let Some(module_node) = node.child_by_field_name("module_name") {
                let module = node_text(module_node, ctx.source).to_string();

                let mut cursor = node.walk();
                for name_node in node.children_by_field_name("name", &mut cursor) {
                    let (symbol_node, alias) = match name_node.kind() {
                        "aliased_import" => {
                            let Some(symbol) = name_node.child_by_field_name("name") else {
                                continue;
                            };
                            let alias = name_node
                                .child_by_field_name("alias")
                                .map(|a| node_text(a, ctx.source).to_string());
                            (symbol, alias)
                        }
                        _ => (name_node, None),
                    };
                    let symbol = node_text(symbol_node, ctx.source);
                    if symbol.is_empty() {
                        continue;
                    }

                    let mut reference = SymbolReference::new(
                        ReferenceKind::Import,
                        format!("{module}.{symbol}"),
                        line,
                    );
                    let (resolved_module, resolved_symbol) =
                        resolve_from_import(&module, symbol, ctx);
                    reference.resolved_module = resolved_module;
                    reference.resolved_symbol = resolved_symbol;
                    reference
                        .metadata
                        .insert("module".to_string(), module.clone());
                    if let Some(alias) = alias {
                        reference.metadata.insert("alias".to_string(), alias);
                    }
                    push(reference);
                }
            }
        }
        _ => {}
    }

    references
}

/// Shared conversion for the legacy single-phase path.
fn import_relationship(filepath: &str, reference: SymbolReference) -> Relationship {
    let module = reference
        .metadata
        .get("module")
        .cloned()
        .unwrap_or_else(|| reference.name.clone());
    let target = reference
        .resolved_module
        .clone()
        .unwrap_or(ResolvedTarget::Module(module));

    let mut relationship =
        Relationship::new(filepath, target, RelationshipType::Import, reference.line_number);
    relationship.source_symbol = reference.caller.clone();
    relationship.target_symbol = reference.resolved_symbol.clone();
    relationship.metadata = reference.metadata;
    if reference.is_conditional {
        relationship
            .metadata
            .insert("conditional".to_string(), "true".to_string());
    }
    relationship
}

/// Detects unconditional `import X` / `from X import Y` statements.
#[derive(Debug, Default)]
pub struct ImportDetector;

impl ImportDetector {
    pub fn new() -> Self {
        Self
    }

    fn matches(node: Node<'_>) -> bool {
        is_import_node(node) && !has_wildcard(node) && !in_conditional_body(node)
    }
}

impl Detector for ImportDetector {
    fn name(&self) -> &'static str {
        "imports"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        if !Self::matches(node) {
            return Ok(Vec::new());
        }
        Ok(import_references(node, ctx, false, None)
            .into_iter()
            .map(|reference| import_relationship(ctx.filepath, reference))
            .collect())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        if !Self::matches(node) {
            return Ok((Vec::new(), Vec::new()));
        }
        Ok((Vec::new(), import_references(node, ctx, false, None)))
    }
}

/// Detects imports in the immediate body of an `if` statement.
///
/// Scanning is deliberately not recursive: imports under a nested `if` are
/// attributed to the nested condition when that node is visited, never
/// conflated with the outer one.
#[derive(Debug, Default)]
pub struct ConditionalImportDetector;

impl ConditionalImportDetector {
    pub fn new() -> Self {
        Self
    }

    fn scan_block(
        block: Node<'_>,
        ctx: &DetectorContext<'_>,
        condition: &str,
        references: &mut Vec<SymbolReference>,
    ) {
        let mut cursor = block.walk();
        for child in block.named_children(&mut cursor) {
            if is_import_node(child) && !has_wildcard(child) {
                references.extend(import_references(child, ctx, true, Some(condition)));
            }
        }
    }

    fn references(node: Node<'_>, ctx: &DetectorContext<'_>) -> Vec<SymbolReference> {
        let mut references = Vec::new();

        let condition = node
            .child_by_field_name("condition")
            .map(|c| node_text(c, ctx.source).to_string())
            .unwrap_or_default();
        if let Some(consequence) = node.child_by_field_name("consequence") {
            Self::scan_block(consequence, ctx, &condition, &mut references);
        }

        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            match clause.kind() {
                "elif_clause" => {
                    let elif_condition = clause
                        .child_by_field_name("condition")
                        .map(|c| node_text(c, ctx.source).to_string())
                        .unwrap_or_default();
                    if let Some(body) = clause.child_by_field_name("consequence") {
                        Self::scan_block(body, ctx, &elif_condition, &mut references);
                    }
                }
                "else_clause" => {
                    if let Some(body) = clause.child_by_field_name("body") {
                        Self::scan_block(body, ctx, "else", &mut references);
                    }
                }
                _ => {}
            }
        }

        references
    }
}

impl Detector for ConditionalImportDetector {
    fn name(&self) -> &'static str {
        "conditional-imports"
    }

    fn priority(&self) -> i32 {
        95
    }

    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        if node.kind() != "if_statement" {
            return Ok(Vec::new());
        }
        Ok(Self::references(node, ctx)
            .into_iter()
            .map(|reference| import_relationship(ctx.filepath, reference))
            .collect())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        if node.kind() != "if_statement" {
            return Ok((Vec::new(), Vec::new()));
        }
        Ok((Vec::new(), Self::references(node, ctx)))
    }
}

/// Detects `from X import *` statements.
#[derive(Debug, Default)]
pub struct WildcardImportDetector {
    warn_on_wildcards: bool,
}

impl WildcardImportDetector {
    pub fn new(warn_on_wildcards: bool) -> Self {
        Self { warn_on_wildcards }
    }

    fn reference(node: Node<'_>, ctx: &DetectorContext<'_>) -> Option<SymbolReference> {
        let module_node = node.child_by_field_name("module_name")?;
        let module = node_text(module_node, ctx.source);
        if module.is_empty() {
            return None;
        }

        let mut reference = SymbolReference::new(ReferenceKind::Import, module, start_line(node));
        reference.caller = enclosing_callable(node, ctx.source);
        reference.is_conditional = in_conditional_body(node);
        reference.resolved_module = Some(if module.starts_with('.') {
            ResolvedTarget::File(relative_import_candidate(module, ctx.filepath))
        } else if is_stdlib_module(module) {
            ResolvedTarget::Stdlib(module.to_string())
        } else {
            ResolvedTarget::Module(module.to_string())
        });
        reference
            .metadata
            .insert("module".to_string(), module.to_string());
        reference
            .metadata
            .insert("wildcard".to_string(), "true".to_string());
        Some(reference)
    }

    fn matches(node: Node<'_>) -> bool {
        node.kind() == "import_from_statement" && has_wildcard(node)
    }

    fn maybe_warn(&self, ctx: &DetectorContext<'_>, reference: &SymbolReference) {
        if self.warn_on_wildcards {
            log::warn!(
                "wildcard import of '{}' at {}:{} hides which names enter scope",
                reference.name,
                ctx.filepath,
                reference.line_number
            );
        }
    }
}

impl Detector for WildcardImportDetector {
    fn name(&self) -> &'static str {
        "wildcard-imports"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        if !Self::matches(node) {
            return Ok(Vec::new());
        }
        Ok(Self::reference(node, ctx)
            .map(|reference| {
                self.maybe_warn(ctx, &reference);
                import_relationship(ctx.filepath, reference)
            })
            .into_iter()
            .collect())
    }

    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        if !Self::matches(node) {
            return Ok((Vec::new(), Vec::new()));
        }
        let references = Self::reference(node, ctx)
            .map(|reference| {
                self.maybe_warn(ctx, &reference);
                reference
            })
            .into_iter()
            .collect();
        Ok((Vec::new(), references))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::PythonParser;

    fn extract(source: &str, filepath: &str) -> Vec<SymbolReference> {
        let parsed = PythonParser::new().unwrap().parse(source.to_string()).unwrap();
        let ctx = DetectorContext {
            filepath,
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let mut detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(ImportDetector::new()),
            Box::new(ConditionalImportDetector::new()),
            Box::new(WildcardImportDetector::new(false)),
        ];

        let mut references = Vec::new();
        crate::syntax::walk_tree(parsed.tree.root_node(), 128, |node| {
            for detector in &mut detectors {
                let (_, refs) = detector.extract_symbols(node, &ctx).unwrap();
                references.extend(refs);
            }
        })
        .unwrap();
        references
    }

    #[test]
    fn test_stdlib_import_resolves_to_marker() {
        let references = extract("import os\n", "a.py");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].name, "os");
        assert_eq!(
            references[0].resolved_module,
            Some(ResolvedTarget::Stdlib("os".to_string()))
        );
    }

    #[test]
    fn test_aliased_import_records_alias() {
        let references = extract("import numpy as np\n", "a.py");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].metadata.get("alias"), Some(&"np".to_string()));
        assert_eq!(
            references[0].resolved_module,
            Some(ResolvedTarget::Module("numpy".to_string()))
        );
    }

    #[test]
    fn test_from_import_leaves_project_resolution_to_phase_two() {
        let references = extract("from mymodule import helper\n", "a.py");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].name, "mymodule.helper");
        assert_eq!(references[0].resolved_module, None);
        assert_eq!(references[0].resolved_symbol, Some("helper".to_string()));
    }

    #[test]
    fn test_relative_import_resolves_to_candidate_path() {
        let references = extract("from .util import helper\n", "pkg/mod.py");
        assert_eq!(
            references[0].resolved_module,
            Some(ResolvedTarget::File("pkg/util.py".to_string()))
        );
    }

    #[test]
    fn test_relative_candidate_from_init_py() {
        assert_eq!(
            relative_import_candidate(".module", "src/package/__init__.py"),
            "src/package/module.py"
        );
        assert_eq!(
            relative_import_candidate("..", "src/package/sub/helpers.py"),
            "src/package/__init__.py"
        );
    }

    #[test]
    fn test_conditional_import_scopes_to_immediate_body() {
        let source = "\
if sys.version_info >= (3, 8):
    import importlib.metadata
    if True:
        import json
";
        let references = extract(source, "a.py");
        // Outer condition owns importlib.metadata; the nested if owns json
        assert_eq!(references.len(), 2);
        let outer = references
            .iter()
            .find(|r| r.name == "importlib.metadata")
            .unwrap();
        assert!(outer.is_conditional);
        assert_eq!(
            outer.metadata.get("condition"),
            Some(&"sys.version_info >= (3, 8)".to_string())
        );

        let nested = references.iter().find(|r| r.name == "json").unwrap();
        assert_eq!(nested.metadata.get("condition"), Some(&"True".to_string()));
    }

    #[test]
    fn test_else_clause_imports_are_conditional() {
        let source = "\
if has_fast:
    import fastjson
else:
    import json
";
        let references = extract(source, "a.py");
        assert_eq!(references.len(), 2);
        let fallback = references.iter().find(|r| r.name == "json").unwrap();
        assert_eq!(fallback.metadata.get("condition"), Some(&"else".to_string()));
    }

    #[test]
    fn test_wildcard_import_metadata() {
        let references = extract("from os import *\n", "a.py");
        assert_eq!(references.len(), 1);
        assert_eq!(
            references[0].metadata.get("wildcard"),
            Some(&"true".to_string())
        );
        assert_eq!(
            references[0].resolved_module,
            Some(ResolvedTarget::Stdlib("os".to_string()))
        );
    }

    #[test]
    fn test_no_double_counting_across_the_family() {
        // One plain, one conditional, one wildcard: exactly three references
        let source = "\
import os
if debug:
    import json
from sys import *
";
        let references = extract(source, "a.py");
        assert_eq!(references.len(), 3);
    }

    #[test]
    fn test_multi_name_from_import() {
        let references = extract("from collections import OrderedDict, defaultdict\n", "a.py");
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].resolved_symbol, Some("OrderedDict".to_string()));
        assert_eq!(references[1].resolved_symbol, Some("defaultdict".to_string()));
    }
}
