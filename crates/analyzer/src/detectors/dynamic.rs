use crate::analysis::types::{DynamicPatternWarning, PatternType, WarningSeverity};
use crate::detectors::{
    Detector, DetectorContext, DetectorError, SymbolExtraction, attribute_chain_root,
    final_component,
};
use crate::syntax::{node_text, start_line};
use crate::test_detection::TestFileClassifier;
use graph::Relationship;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tree_sitter::Node;

/// Bound for the recursive expression describer. Crafted deeply nested
/// expressions get the sentinel instead of a stack overflow.
const MAX_DESCRIBE_DEPTH: usize = 20;
const DESCRIBE_SENTINEL: &str = "...";

/// Decorators that do not count as dynamic patterns.
const STANDARD_DECORATORS: &[&str] = &[
    "abstractmethod",
    "abstractproperty",
    "cached_property",
    "classmethod",
    "contextmanager",
    "dataclass",
    "fixture",
    "lru_cache",
    "overload",
    "override",
    "property",
    "staticmethod",
    "total_ordering",
    "wraps",
];

/// Metaclasses that alter nothing worth flagging.
const STANDARD_METACLASSES: &[&str] = &["ABCMeta", "EnumMeta", "EnumType", "type"];

/// One dynamic-pattern rule. The wrapper template owns test-module
/// classification and severity suppression; rules only match nodes.
pub trait PatternRule {
    fn name(&self) -> &'static str;

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning>;
}

/// Shared template for the dynamic-pattern detector family.
///
/// Classifies the current file as test-or-source once per filepath and
/// suppresses WARNING-severity output for test files. INFO-severity output
/// is always emitted regardless of test status, because those patterns
/// (metaclasses) alter runtime semantics in ways relevant even to test
/// authors.
pub struct DynamicPatternDetector<R> {
    rule: R,
    classifier: Arc<TestFileClassifier>,
    suppress_test_warnings: bool,
    cached_test_status: Option<(String, bool)>,
}

impl<R: PatternRule> DynamicPatternDetector<R> {
    fn with_rule(rule: R, classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self {
            rule,
            classifier,
            suppress_test_warnings,
            cached_test_status: None,
        }
    }

    fn is_test(&mut self, filepath: &str) -> bool {
        if let Some((cached_path, status)) = &self.cached_test_status
            && cached_path == filepath
        {
            return *status;
        }
        let status = self.classifier.is_test_module(Path::new(filepath), None);
        self.cached_test_status = Some((filepath.to_string(), status));
        status
    }
}

impl<R: PatternRule> Detector for DynamicPatternDetector<R> {
    fn name(&self) -> &'static str {
        self.rule.name()
    }

    fn priority(&self) -> i32 {
        25
    }

    fn detect(
        &mut self,
        _node: Node<'_>,
        _ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError> {
        // Dynamic patterns are reported, not resolved; they contribute no
        // edges in either analysis mode
        Ok(Vec::new())
    }

    fn extract_symbols(
        &mut self,
        _node: Node<'_>,
        _ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError> {
        Ok((Vec::new(), Vec::new()))
    }

    fn pattern_warnings(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Vec<DynamicPatternWarning> {
        let Some(mut warning) = self.rule.detect_pattern(node, ctx) else {
            return Vec::new();
        };
        let is_test = self.is_test(ctx.filepath);
        warning.is_test_module = is_test;
        if is_test
            && warning.severity == WarningSeverity::Warning
            && self.suppress_test_warnings
        {
            return Vec::new();
        }
        vec![warning]
    }
}

fn warning(
    pattern_type: PatternType,
    ctx: &DetectorContext<'_>,
    line_number: u32,
    message: String,
    severity: WarningSeverity,
    metadata: BTreeMap<String, String>,
) -> DynamicPatternWarning {
    DynamicPatternWarning {
        pattern_type,
        filepath: ctx.filepath.to_string(),
        line_number,
        message,
        severity,
        is_test_module: false,
        metadata,
    }
}

/// Short, depth-bounded rendering of an expression for warning messages.
fn describe_expression(node: Node<'_>, source: &str, depth: usize) -> String {
    if depth >= MAX_DESCRIBE_DEPTH {
        return DESCRIBE_SENTINEL.to_string();
    }
    match node.kind() {
        "identifier" => node_text(node, source).to_string(),
        "attribute" => {
            let object = node
                .child_by_field_name("object")
                .map(|o| describe_expression(o, source, depth + 1))
                .unwrap_or_else(|| DESCRIBE_SENTINEL.to_string());
            let attribute = node
                .child_by_field_name("attribute")
                .map(|a| node_text(a, source))
                .unwrap_or("");
            format!("{object}.{attribute}")
        }
        "call" => {
            let function = node
                .child_by_field_name("function")
                .map(|f| describe_expression(f, source, depth + 1))
                .unwrap_or_else(|| DESCRIBE_SENTINEL.to_string());
            format!("{function}(...)")
        }
        "subscript" => {
            let value = node
                .child_by_field_name("value")
                .map(|v| describe_expression(v, source, depth + 1))
                .unwrap_or_else(|| DESCRIBE_SENTINEL.to_string());
            format!("{value}[...]")
        }
        "binary_operator" => {
            let left = node
                .child_by_field_name("left")
                .map(|l| describe_expression(l, source, depth + 1))
                .unwrap_or_else(|| DESCRIBE_SENTINEL.to_string());
            let right = node
                .child_by_field_name("right")
                .map(|r| describe_expression(r, source, depth + 1))
                .unwrap_or_else(|| DESCRIBE_SENTINEL.to_string());
            let operator = node
                .child_by_field_name("operator")
                .map(|o| node_text(o, source))
                .unwrap_or("?");
            format!("{left} {operator} {right}")
        }
        _ => {
            let text = node_text(node, source);
            if text.len() > 40 {
                format!("{}{DESCRIBE_SENTINEL}", &text[..40])
            } else {
                text.to_string()
            }
        }
    }
}

/// `getattr`/`setattr` with a non-literal attribute name.
pub struct DynamicDispatchRule;

impl PatternRule for DynamicDispatchRule {
    fn name(&self) -> &'static str {
        "dynamic-dispatch"
    }

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning> {
        if node.kind() != "call" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        if function.kind() != "identifier" {
            return None;
        }
        let function_name = node_text(function, ctx.source);
        if function_name != "getattr" && function_name != "setattr" {
            return None;
        }

        let arguments = node.child_by_field_name("arguments")?;
        let mut cursor = arguments.walk();
        let name_argument = arguments.named_children(&mut cursor).nth(1)?;
        if name_argument.kind() == "string" {
            // Constant attribute name resolves statically; nothing dynamic
            return None;
        }

        let described = describe_expression(name_argument, ctx.source, 0);
        let mut metadata = BTreeMap::new();
        metadata.insert("function".to_string(), function_name.to_string());
        metadata.insert("argument".to_string(), described.clone());
        Some(warning(
            PatternType::DynamicDispatch,
            ctx,
            start_line(node),
            format!("{function_name}() with dynamic attribute name '{described}'"),
            WarningSeverity::Warning,
            metadata,
        ))
    }
}

/// Attribute assignment onto an object other than `self`/`cls`.
pub struct MonkeyPatchingRule;

impl PatternRule for MonkeyPatchingRule {
    fn name(&self) -> &'static str {
        "monkey-patching"
    }

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning> {
        if node.kind() != "assignment" {
            return None;
        }
        let left = node.child_by_field_name("left")?;
        if left.kind() != "attribute" {
            return None;
        }
        let root = attribute_chain_root(left, ctx.source)?;
        if root == "self" || root == "cls" {
            return None;
        }

        let target = node_text(left, ctx.source);
        let mut metadata = BTreeMap::new();
        metadata.insert("target".to_string(), target.to_string());
        metadata.insert("object".to_string(), root.to_string());
        Some(warning(
            PatternType::MonkeyPatching,
            ctx,
            start_line(node),
            format!("attribute assignment to '{target}' outside its definition"),
            WarningSeverity::Warning,
            metadata,
        ))
    }
}

/// Calls to `exec`/`eval`/`compile`.
pub struct ExecEvalRule;

impl PatternRule for ExecEvalRule {
    fn name(&self) -> &'static str {
        "exec-eval"
    }

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning> {
        if node.kind() != "call" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        if function.kind() != "identifier" {
            return None;
        }
        let function_name = node_text(function, ctx.source);
        if !matches!(function_name, "exec" | "eval" | "compile") {
            return None;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("function".to_string(), function_name.to_string());
        Some(warning(
            PatternType::ExecEval,
            ctx,
            start_line(node),
            format!("call to {function_name}() executes dynamically built code"),
            WarningSeverity::Warning,
            metadata,
        ))
    }
}

/// Decorators outside the standard whitelist.
pub struct DecoratorRule;

impl PatternRule for DecoratorRule {
    fn name(&self) -> &'static str {
        "decorators"
    }

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning> {
        if node.kind() != "decorator" {
            return None;
        }
        let expression = node.named_child(0)?;
        let base = if expression.kind() == "call" {
            expression.child_by_field_name("function")?
        } else {
            expression
        };
        if !matches!(base.kind(), "identifier" | "attribute") {
            return None;
        }

        let dotted = node_text(base, ctx.source);
        if STANDARD_DECORATORS.contains(&final_component(dotted)) {
            return None;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("decorator".to_string(), dotted.to_string());
        Some(warning(
            PatternType::Decorator,
            ctx,
            start_line(node),
            format!("decorator @{dotted} may rewrite the decorated object"),
            WarningSeverity::Warning,
            metadata,
        ))
    }
}

/// Non-standard metaclasses. Always INFO severity, never suppressed.
pub struct MetaclassRule;

impl PatternRule for MetaclassRule {
    fn name(&self) -> &'static str {
        "metaclasses"
    }

    fn detect_pattern(
        &self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Option<DynamicPatternWarning> {
        if node.kind() != "class_definition" {
            return None;
        }
        let superclasses = node.child_by_field_name("superclasses")?;

        let mut metaclass = None;
        let mut cursor = superclasses.walk();
        for argument in superclasses.named_children(&mut cursor) {
            if argument.kind() == "keyword_argument"
                && let Some(keyword) = argument.child_by_field_name("name")
                && node_text(keyword, ctx.source) == "metaclass"
            {
                metaclass = argument.child_by_field_name("value");
                break;
            }
        }
        let value = metaclass?;

        let value_text = node_text(value, ctx.source);
        // Dotted references resolve by walking the attribute chain
        let root = if value.kind() == "attribute" {
            attribute_chain_root(value, ctx.source).unwrap_or(value_text)
        } else {
            value_text
        };
        if STANDARD_METACLASSES.contains(&final_component(value_text)) {
            return None;
        }

        let class_name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, ctx.source))
            .unwrap_or("<anonymous>");
        let mut metadata = BTreeMap::new();
        metadata.insert("metaclass".to_string(), value_text.to_string());
        metadata.insert("root".to_string(), root.to_string());
        Some(warning(
            PatternType::Metaclass,
            ctx,
            start_line(node),
            format!("class '{class_name}' uses metaclass '{value_text}'"),
            WarningSeverity::Info,
            metadata,
        ))
    }
}

pub type DynamicDispatchDetector = DynamicPatternDetector<DynamicDispatchRule>;
pub type MonkeyPatchingDetector = DynamicPatternDetector<MonkeyPatchingRule>;
pub type ExecEvalDetector = DynamicPatternDetector<ExecEvalRule>;
pub type DecoratorDetector = DynamicPatternDetector<DecoratorRule>;
pub type MetaclassDetector = DynamicPatternDetector<MetaclassRule>;

impl DynamicDispatchDetector {
    pub fn new(classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self::with_rule(DynamicDispatchRule, classifier, suppress_test_warnings)
    }
}

impl MonkeyPatchingDetector {
    pub fn new(classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self::with_rule(MonkeyPatchingRule, classifier, suppress_test_warnings)
    }
}

impl ExecEvalDetector {
    pub fn new(classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self::with_rule(ExecEvalRule, classifier, suppress_test_warnings)
    }
}

impl DecoratorDetector {
    pub fn new(classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self::with_rule(DecoratorRule, classifier, suppress_test_warnings)
    }
}

impl MetaclassDetector {
    pub fn new(classifier: Arc<TestFileClassifier>, suppress_test_warnings: bool) -> Self {
        Self::with_rule(MetaclassRule, classifier, suppress_test_warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{PythonParser, walk_tree};

    fn scan(source: &str, filepath: &str) -> Vec<DynamicPatternWarning> {
        let classifier = Arc::new(TestFileClassifier::new(None));
        let parsed = PythonParser::new().unwrap().parse(source.to_string()).unwrap();
        let ctx = DetectorContext {
            filepath,
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let mut detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(DynamicDispatchDetector::new(Arc::clone(&classifier), true)),
            Box::new(MonkeyPatchingDetector::new(Arc::clone(&classifier), true)),
            Box::new(ExecEvalDetector::new(Arc::clone(&classifier), true)),
            Box::new(DecoratorDetector::new(Arc::clone(&classifier), true)),
            Box::new(MetaclassDetector::new(classifier, true)),
        ];

        let mut warnings = Vec::new();
        walk_tree(parsed.tree.root_node(), 128, |node| {
            for detector in &mut detectors {
                warnings.extend(detector.pattern_warnings(node, &ctx));
            }
        })
        .unwrap();
        warnings
    }

    #[test]
    fn test_dynamic_getattr_call_is_flagged() {
        let warnings = scan("getattr(obj, name)()\n", "src/app.py");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].pattern_type, PatternType::DynamicDispatch);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
        assert_eq!(warnings[0].line_number, 1);
    }

    #[test]
    fn test_constant_getattr_is_not_flagged() {
        let warnings = scan("getattr(obj, \"run\")()\n", "src/app.py");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_warning_suppressed_in_test_module() {
        let warnings = scan("getattr(obj, name)()\n", "tests/test_app.py");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_metaclass_info_survives_test_modules() {
        let source = "class Plugin(Base, metaclass=Registry):\n    pass\n";
        let warnings = scan(source, "tests/test_app.py");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].pattern_type, PatternType::Metaclass);
        assert_eq!(warnings[0].severity, WarningSeverity::Info);
        assert!(warnings[0].is_test_module);
    }

    #[test]
    fn test_standard_metaclass_whitelisted() {
        let warnings = scan(
            "import abc\nclass Base(metaclass=abc.ABCMeta):\n    pass\n",
            "src/app.py",
        );
        assert!(warnings.iter().all(|w| w.pattern_type != PatternType::Metaclass));
    }

    #[test]
    fn test_exec_and_eval_flagged() {
        let warnings = scan("exec(code)\neval(expr)\n", "src/app.py");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.pattern_type == PatternType::ExecEval));
    }

    #[test]
    fn test_monkey_patching_skips_self() {
        let source = "\
def patch():
    target.handler = replacement

class C:
    def __init__(self):
        self.value = 1
";
        let warnings = scan(source, "src/app.py");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].pattern_type, PatternType::MonkeyPatching);
        assert_eq!(warnings[0].metadata.get("object"), Some(&"target".to_string()));
    }

    #[test]
    fn test_standard_decorators_whitelisted() {
        let source = "\
@property
def x(self):
    return 1

@app.route(\"/\")
def index():
    return \"\"
";
        let warnings = scan(source, "src/app.py");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].pattern_type, PatternType::Decorator);
        assert_eq!(
            warnings[0].metadata.get("decorator"),
            Some(&"app.route".to_string())
        );
    }

    #[test]
    fn test_describe_expression_depth_bound() {
        // Attribute chain deeper than the describe bound ends in the sentinel
        let chain = format!("getattr(obj, {}x)\n", "a.".repeat(40));
        let warnings = scan(&chain, "src/app.py");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains(DESCRIBE_SENTINEL));
    }
}
