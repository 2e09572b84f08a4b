use crate::analysis::types::{FileSymbolData, ReferenceKind, SymbolDefinition, SymbolReference};
use graph::{Relationship, RelationshipGraph, RelationshipType, ResolvedTarget};
use rustc_hash::FxHashMap;

/// Phase-2 component: accumulates per-file symbol data and resolves every
/// stored reference into a relationship by cross-file name lookup.
///
/// Owns the per-file data map and the name -> (file, definition) index
/// exclusively. Mutation goes through `&mut self`, which is the
/// single-writer discipline; clone the built relationships out for
/// concurrent consumers.
#[derive(Debug, Default)]
pub struct RelationshipBuilder {
    /// Files in insertion order, for deterministic resolution output
    files: Vec<String>,
    file_data: FxHashMap<String, FileSymbolData>,
    /// Definition buckets by simple name; bucket order is insertion order,
    /// which makes first-match resolution deterministic
    definition_index: FxHashMap<String, Vec<(String, SymbolDefinition)>>,
}

impl RelationshipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one file's extraction and index its definitions. Data for an
    /// already-known file is replaced wholesale.
    pub fn add_file_data(&mut self, data: FileSymbolData) {
        if self.file_data.contains_key(&data.filepath) {
            self.remove_file_data(&data.filepath.clone());
        }

        for definition in &data.definitions {
            self.definition_index
                .entry(definition.name.clone())
                .or_default()
                .push((data.filepath.clone(), definition.clone()));
        }
        self.files.push(data.filepath.clone());
        self.file_data.insert(data.filepath.clone(), data);
    }

    /// Remove a file's data and strip its definitions from every affected
    /// bucket, pruning buckets that end up empty.
    pub fn remove_file_data(&mut self, filepath: &str) -> bool {
        if self.file_data.remove(filepath).is_none() {
            return false;
        }
        self.files.retain(|file| file != filepath);
        self.definition_index.retain(|_, bucket| {
            bucket.retain(|(file, _)| file != filepath);
            !bucket.is_empty()
        });
        true
    }

    /// Resolve every stored reference across all files, in file insertion
    /// order.
    pub fn build_relationships(&self) -> Vec<Relationship> {
        self.files
            .iter()
            .flat_map(|file| self.build_relationships_for_file(file))
            .collect()
    }

    /// Resolve one file's references. Unknown files yield nothing.
    pub fn build_relationships_for_file(&self, filepath: &str) -> Vec<Relationship> {
        let Some(data) = self.file_data.get(filepath) else {
            return Vec::new();
        };
        data.references
            .iter()
            .map(|reference| self.resolve_reference(filepath, reference))
            .collect()
    }

    /// Populate a relationship graph from the current state, replacing each
    /// file's previous edge set.
    pub fn populate_graph(&self, graph: &RelationshipGraph) {
        for file in &self.files {
            graph.replace_file_relationships(file, self.build_relationships_for_file(file));
        }
    }

    fn resolve_reference(&self, filepath: &str, reference: &SymbolReference) -> Relationship {
        let relationship_type = relationship_type_for(reference.kind);

        // A target resolved at detection time (stdlib marker, relative
        // import) is used verbatim; everything else goes through the index
        let (target, target_symbol) = match &reference.resolved_module {
            Some(resolved) => (resolved.clone(), reference.resolved_symbol.clone()),
            None => {
                let name = final_component(&reference.name);
                match self
                    .definition_index
                    .get(name)
                    .and_then(|bucket| bucket.first())
                {
                    // First indexed match wins; this is the documented
                    // disambiguation policy, not an accident
                    Some((file, definition)) => (
                        ResolvedTarget::File(file.clone()),
                        Some(definition.name.clone()),
                    ),
                    None => (ResolvedTarget::Unresolved(name.to_string()), None),
                }
            }
        };

        let target_line = self.resolve_target_line(&target, target_symbol.as_deref());

        let mut relationship =
            Relationship::new(filepath, target, relationship_type, reference.line_number);
        relationship.source_symbol = reference.caller.clone();
        relationship.target_symbol = target_symbol;
        relationship.target_line = target_line;
        relationship.metadata = reference.metadata.clone();
        if reference.is_conditional {
            relationship
                .metadata
                .insert("conditional".to_string(), "true".to_string());
        }
        relationship
    }

    /// Secondary lookup: the definition's start line, only when the target
    /// is a real file whose data is present.
    fn resolve_target_line(&self, target: &ResolvedTarget, symbol: Option<&str>) -> Option<u32> {
        let file = target.as_file()?;
        let symbol = symbol?;
        let data = self.file_data.get(file)?;
        data.definitions
            .iter()
            .find(|definition| definition.name == symbol)
            .map(|definition| definition.line_start)
    }

    /// First matching definition for a name; when `target_file` is given,
    /// restricted to that file.
    pub fn lookup_definition(
        &self,
        name: &str,
        target_file: Option<&str>,
    ) -> Option<(String, SymbolDefinition)> {
        let bucket = self.definition_index.get(name)?;
        match target_file {
            Some(target) => bucket
                .iter()
                .find(|(file, _)| file == target)
                .cloned(),
            None => bucket.first().cloned(),
        }
    }

    /// Every (file, definition) pair sharing a name, in insertion order.
    /// Presentation layers use this to surface ambiguous candidates.
    pub fn get_all_definitions_for_symbol(&self, name: &str) -> &[(String, SymbolDefinition)] {
        self.definition_index
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get_file_data(&self, filepath: &str) -> Option<&FileSymbolData> {
        self.file_data.get(filepath)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// Fixed reference-kind to relationship-kind table. Attribute accesses are
/// approximated as function calls.
fn relationship_type_for(kind: ReferenceKind) -> RelationshipType {
    match kind {
        ReferenceKind::Import => RelationshipType::Import,
        ReferenceKind::FunctionCall => RelationshipType::FunctionCall,
        ReferenceKind::ClassReference => RelationshipType::ClassInheritance,
        ReferenceKind::AttributeAccess => RelationshipType::FunctionCall,
    }
}

fn final_component(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
