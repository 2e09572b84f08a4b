pub mod calls;
pub mod definitions;
pub mod dynamic;
pub mod imports;
pub mod inheritance;

use crate::analysis::types::{DynamicPatternWarning, SymbolDefinition, SymbolReference};
use crate::syntax::{ancestors, node_text};
use crate::test_detection::TestFileClassifier;
use graph::Relationship;
use std::sync::Arc;
use thiserror::Error;
use tree_sitter::{Node, Tree};

pub use calls::FunctionCallDetector;
pub use definitions::FunctionDefinitionDetector;
pub use dynamic::{
    DecoratorDetector, DynamicDispatchDetector, ExecEvalDetector, MetaclassDetector,
    MonkeyPatchingDetector,
};
pub use imports::{ConditionalImportDetector, ImportDetector, WildcardImportDetector};
pub use inheritance::ClassInheritanceDetector;

/// Everything a detector may look at for the current file: the node it was
/// handed, plus the whole-file tree and source for context lookups.
pub struct DetectorContext<'a> {
    pub filepath: &'a str,
    pub source: &'a str,
    pub tree: &'a Tree,
}

/// Definitions and references produced by one `extract_symbols` call.
/// A detector fills one side only; it never repurposes one list to carry
/// the other's data.
pub type SymbolExtraction = (Vec<SymbolDefinition>, Vec<SymbolReference>);

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("malformed node at {filepath}:{line}: {message}")]
    MalformedNode {
        filepath: String,
        line: u32,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("detector has an empty name")]
    EmptyName,
    #[error("detector '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// A single pattern matcher over syntax nodes.
///
/// Detectors are stateful only insofar as they may cache a per-file working
/// set keyed by the current filepath, invalidated whenever the filepath
/// argument changes between calls. They never accumulate cross-file state.
pub trait Detector {
    /// Stable name; ties in the priority ordering break on it.
    fn name(&self) -> &'static str;

    /// Higher priorities run first. Import family 90-100, structural
    /// detectors 50, dynamic-pattern detectors 25.
    fn priority(&self) -> i32;

    /// Whether the detector participates in the two-phase extraction path.
    fn supports_symbol_extraction(&self) -> bool {
        true
    }

    /// Legacy single-phase path: relationship edges for one node. Returns
    /// an empty vec for non-matching node kinds.
    fn detect(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<Vec<Relationship>, DetectorError>;

    /// Two-phase path: definitions and references for one node.
    fn extract_symbols(
        &mut self,
        node: Node<'_>,
        ctx: &DetectorContext<'_>,
    ) -> Result<SymbolExtraction, DetectorError>;

    /// Dynamic-pattern warnings for one node. Only the dynamic-pattern
    /// family overrides this.
    fn pattern_warnings(
        &mut self,
        _node: Node<'_>,
        _ctx: &DetectorContext<'_>,
    ) -> Vec<DynamicPatternWarning> {
        Vec::new()
    }
}

/// Holds all active detectors, ordered by descending priority with ties
/// broken by ascending name. The order is recomputed on every registration
/// and is stable across repeated calls.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full default detector set.
    pub fn with_default_detectors(config: &crate::config::AnalyzerConfig) -> Self {
        let classifier = Arc::new(TestFileClassifier::new(config.project_root.clone()));
        Self::with_default_detectors_and_classifier(config, classifier)
    }

    /// Default detectors sharing a caller-provided test classifier.
    pub fn with_default_detectors_and_classifier(
        config: &crate::config::AnalyzerConfig,
        classifier: Arc<TestFileClassifier>,
    ) -> Self {
        let suppress = config.suppress_test_warnings;
        let mut registry = Self::new();
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(ImportDetector::new()),
            Box::new(ConditionalImportDetector::new()),
            Box::new(WildcardImportDetector::new(config.warn_on_wildcards)),
            Box::new(FunctionDefinitionDetector::new()),
            Box::new(FunctionCallDetector::new()),
            Box::new(ClassInheritanceDetector::new()),
            Box::new(DynamicDispatchDetector::new(Arc::clone(&classifier), suppress)),
            Box::new(MonkeyPatchingDetector::new(Arc::clone(&classifier), suppress)),
            Box::new(ExecEvalDetector::new(Arc::clone(&classifier), suppress)),
            Box::new(DecoratorDetector::new(Arc::clone(&classifier), suppress)),
            Box::new(MetaclassDetector::new(classifier, suppress)),
        ];
        for detector in detectors {
            registry
                .register(detector)
                .expect("default detector names are unique");
        }
        registry
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) -> Result<(), RegistryError> {
        let name = detector.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.detectors.iter().any(|existing| existing.name() == name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.detectors.push(detector);
        self.detectors
            .sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.name().cmp(b.name())));
        Ok(())
    }

    /// Registered detectors in (-priority, name) order.
    pub fn detectors(&self) -> impl Iterator<Item = &dyn Detector> {
        self.detectors.iter().map(|detector| detector.as_ref())
    }

    pub(crate) fn detectors_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Detector>> {
        self.detectors.iter_mut()
    }

    pub fn count(&self) -> usize {
        self.detectors.len()
    }

    pub fn clear(&mut self) {
        self.detectors.clear();
    }
}

/// Qualified name of the function/method enclosing `node`, e.g.
/// `Config.reload` for a method or `main` for a module-level function.
pub(crate) fn enclosing_callable(node: Node<'_>, source: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for ancestor in ancestors(node) {
        if matches!(ancestor.kind(), "function_definition" | "class_definition")
            && let Some(name) = ancestor.child_by_field_name("name")
        {
            parts.push(node_text(name, source));
        }
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("."))
}

/// Final dotted component of a possibly-qualified name.
pub(crate) fn final_component(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Root identifier of an attribute chain (`a` in `a.b.c`); `None` when the
/// chain bottoms out in something other than an identifier.
pub(crate) fn attribute_chain_root<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    let mut current = node;
    while current.kind() == "attribute" {
        current = current.child_by_field_name("object")?;
    }
    (current.kind() == "identifier").then(|| node_text(current, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::SymbolReference;

    struct StubDetector {
        name: &'static str,
        priority: i32,
    }

    impl Detector for StubDetector {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn detect(
            &mut self,
            _node: Node<'_>,
            _ctx: &DetectorContext<'_>,
        ) -> Result<Vec<Relationship>, DetectorError> {
            Ok(Vec::new())
        }

        fn extract_symbols(
            &mut self,
            _node: Node<'_>,
            _ctx: &DetectorContext<'_>,
        ) -> Result<(Vec<SymbolDefinition>, Vec<SymbolReference>), DetectorError> {
            Ok((Vec::new(), Vec::new()))
        }
    }

    fn stub(name: &'static str, priority: i32) -> Box<dyn Detector> {
        Box::new(StubDetector { name, priority })
    }

    #[test]
    fn test_ordering_by_priority_then_name() {
        let mut registry = DetectorRegistry::new();
        registry.register(stub("zeta", 50)).unwrap();
        registry.register(stub("alpha", 50)).unwrap();
        registry.register(stub("low", 25)).unwrap();
        registry.register(stub("high", 100)).unwrap();

        let names: Vec<&str> = registry.detectors().map(|d| d.name()).collect();
        assert_eq!(names, vec!["high", "alpha", "zeta", "low"]);

        // Stable across repeated calls absent further registration
        let again: Vec<&str> = registry.detectors().map(|d| d.name()).collect();
        assert_eq!(names, again);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = DetectorRegistry::new();
        registry.register(stub("imports", 100)).unwrap();
        let error = registry.register(stub("imports", 90)).unwrap_err();
        assert!(matches!(error, RegistryError::AlreadyRegistered(name) if name == "imports"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut registry = DetectorRegistry::new();
        let error = registry.register(stub("", 10)).unwrap_err();
        assert!(matches!(error, RegistryError::EmptyName));
    }

    #[test]
    fn test_clear() {
        let mut registry = DetectorRegistry::new();
        registry.register(stub("one", 1)).unwrap();
        registry.clear();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_final_component() {
        assert_eq!(final_component("a.b.c"), "c");
        assert_eq!(final_component("plain"), "plain");
    }
}
