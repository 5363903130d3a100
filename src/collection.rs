//! Loaded Collection (spec §3).
//!
//! Wraps a [`Document`] with the assigned collection id, a table/
//! template id→index, and a resolved imports map (alias → loaded
//! collection id). Built at load time; the id indices mirror
//! `astorion::engine::compiled_rules`'s shape of pre-building lookup
//! tables once instead of scanning the source document on every access.

use crate::Document;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct LoadedCollection {
    pub id: String,
    pub document: Document,
    pub tables_index: HashMap<String, usize>,
    pub templates_index: HashMap<String, usize>,
    /// alias -> target collection id, populated by `resolve_imports`.
    pub imports: HashMap<String, String>,
}

impl LoadedCollection {
    pub(crate) fn build(id: String, document: Document) -> Self {
        let tables_index = document.tables.iter().enumerate().map(|(i, t)| (t.id().to_string(), i)).collect();
        let templates_index =
            document.templates.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        LoadedCollection { id, document, tables_index, templates_index, imports: HashMap::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentMetadata, SimpleTable, Table, UniqueOverflowPolicy};

    #[test]
    fn indexes_tables_by_id() {
        let document = Document {
            metadata: DocumentMetadata {
                name: "n".to_string(),
                namespace: "n".to_string(),
                version: "1.0.0".to_string(),
                spec_version: "1".to_string(),
                max_recursion_depth: 64,
                max_explosions: 100,
                max_inheritance_depth: 16,
                unique_overflow: UniqueOverflowPolicy::Stop,
            },
            imports: Vec::new(),
            variables: HashMap::new(),
            shared: Vec::new(),
            conditionals: Vec::new(),
            tables: vec![Table::Simple(SimpleTable {
                id: "colors".to_string(),
                entries: Vec::new(),
                default_sets: Vec::new(),
                extends: None,
                shared: Vec::new(),
                hidden: false,
            })],
            templates: Vec::new(),
        };
        let loaded = LoadedCollection::build("c1".to_string(), document);
        assert_eq!(loaded.tables_index.get("colors"), Some(&0));
    }
}
