//! Inheritance resolver (spec §4.6).
//!
//! Normalizes a simple table's entry ids (synthesizing any that are
//! absent) and, when the table declares `extends`, recursively merges
//! parent entries underneath child entries by id. The merged result is
//! cached by `(collection id, table id)` since re-resolving on every
//! roll would repeat the same walk for a table that never changes
//! between loads.

use crate::errors::{EngineError, EngineResult};
use crate::reference;
use crate::collection::LoadedCollection;
use crate::{synthesize_entry_id, Entry, KeyedPattern, SimpleTable, Table};
use std::collections::HashMap;

pub(crate) type InheritanceCache = HashMap<(String, String), SimpleTable>;

fn normalize_ids(table: &SimpleTable) -> SimpleTable {
    let entries = table
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mut e = e.clone();
            if e.id.is_none() {
                e.id = Some(synthesize_entry_id(&table.id, i));
            }
            e
        })
        .collect();
    SimpleTable { entries, extends: None, ..table.clone() }
}

fn merge_default_sets(parent: &[KeyedPattern], child: &[KeyedPattern]) -> Vec<KeyedPattern> {
    let mut merged = parent.to_vec();
    for c in child {
        if let Some(existing) = merged.iter_mut().find(|p| p.key == c.key) {
            existing.pattern = c.pattern.clone();
        } else {
            merged.push(c.clone());
        }
    }
    merged
}

fn merge(parent: &SimpleTable, child: &SimpleTable) -> SimpleTable {
    let mut entries: Vec<Entry> = Vec::with_capacity(parent.entries.len() + child.entries.len());
    let mut index_by_id: HashMap<&str, usize> = HashMap::new();

    for e in &parent.entries {
        index_by_id.insert(e.id.as_deref().unwrap(), entries.len());
        entries.push(e.clone());
    }
    for e in &child.entries {
        let id = e.id.as_deref().unwrap();
        match index_by_id.get(id) {
            Some(&pos) => entries[pos] = e.clone(),
            None => {
                index_by_id.insert(id, entries.len());
                entries.push(e.clone());
            }
        }
    }

    SimpleTable {
        id: child.id.clone(),
        entries,
        default_sets: merge_default_sets(&parent.default_sets, &child.default_sets),
        extends: None,
        shared: child.shared.clone(),
        hidden: child.hidden,
    }
}

/// Resolve `table` (from `collection_id`) to its fully merged, id-
/// normalized form, consulting and populating `cache`.
pub(crate) fn resolve_simple_table(
    collections: &HashMap<String, LoadedCollection>,
    cache: &mut InheritanceCache,
    collection_id: &str,
    table: &SimpleTable,
    max_depth: u32,
) -> EngineResult<SimpleTable> {
    let key = (collection_id.to_string(), table.id.clone());
    if let Some(cached) = cache.get(&key) {
        return Ok(cached.clone());
    }
    let resolved = resolve_uncached(collections, cache, collection_id, table, 0, max_depth)?;
    cache.insert(key, resolved.clone());
    Ok(resolved)
}

fn resolve_uncached(
    collections: &HashMap<String, LoadedCollection>,
    cache: &mut InheritanceCache,
    collection_id: &str,
    table: &SimpleTable,
    depth: u32,
    max_depth: u32,
) -> EngineResult<SimpleTable> {
    let Some(parent_ref) = &table.extends else {
        return Ok(normalize_ids(table));
    };
    if depth >= max_depth {
        return Err(EngineError::InheritanceDepthExceeded { table: table.id.clone(), limit: max_depth });
    }

    let (parent_collection_id, parent_table) = reference::resolve_table(collections, collection_id, parent_ref)?;
    let Table::Simple(parent_simple) = parent_table else {
        return Err(EngineError::InheritanceParentNotSimple { table: table.id.clone(), parent: parent_ref.clone() });
    };

    let resolved_parent =
        resolve_uncached(collections, cache, &parent_collection_id, parent_simple, depth + 1, max_depth)?;
    Ok(merge(&resolved_parent, &normalize_ids(table)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentMetadata, Document, UniqueOverflowPolicy};

    fn simple(id: &str, entries: Vec<Entry>, extends: Option<&str>) -> SimpleTable {
        SimpleTable { id: id.to_string(), entries, default_sets: Vec::new(), extends: extends.map(String::from), shared: Vec::new(), hidden: false }
    }

    fn entry(id: &str, value: &str) -> Entry {
        Entry { id: Some(id.to_string()), value: value.to_string(), weight: Some(1.0), sets: Vec::new(), description: None, result_type: None, assets: None }
    }

    fn document_with(table: SimpleTable) -> Document {
        Document {
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
            tables: vec![Table::Simple(table)],
            templates: Vec::new(),
        }
    }

    #[test]
    fn child_entry_fully_replaces_same_id_parent_entry() {
        let parent = simple("parent", vec![entry("a", "ParentA"), entry("b", "ParentB")], None);
        let child = simple("child", vec![entry("a", "ChildA")], Some("parent"));

        let mut collections = HashMap::new();
        collections.insert("c1".to_string(), LoadedCollection::build("c1".to_string(), document_with(parent)));

        let mut cache = InheritanceCache::new();
        let merged = resolve_simple_table(&collections, &mut cache, "c1", &child, 16).unwrap();

        assert_eq!(merged.entries.len(), 2);
        assert_eq!(merged.entries[0].value, "ChildA");
        assert_eq!(merged.entries[1].value, "ParentB");
        assert!(merged.extends.is_none());
    }

    #[test]
    fn missing_ids_are_synthesized_from_table_id_and_ordinal() {
        let table = simple(
            "colors",
            vec![
                Entry { id: None, value: "Red".to_string(), weight: Some(1.0), sets: Vec::new(), description: None, result_type: None, assets: None },
            ],
            None,
        );
        let collections = HashMap::new();
        let mut cache = InheritanceCache::new();
        let resolved = resolve_simple_table(&collections, &mut cache, "c1", &table, 16).unwrap();
        assert_eq!(resolved.entries[0].id.as_deref(), Some("colors000"));
    }

    #[test]
    fn inheritance_depth_exceeded_aborts() {
        let a = simple("a", vec![entry("x", "X")], Some("b"));
        let b = simple("b", vec![entry("x", "X")], Some("a"));
        let mut doc = document_with(a);
        doc.tables.push(Table::Simple(b));

        let mut collections = HashMap::new();
        collections.insert("c1".to_string(), LoadedCollection::build("c1".to_string(), doc));

        let Table::Simple(a_table) = collections["c1"].document.find_table("a").unwrap().clone() else { panic!() };
        let mut cache = InheritanceCache::new();
        let result = resolve_simple_table(&collections, &mut cache, "c1", &a_table, 2);
        assert!(matches!(result, Err(EngineError::InheritanceDepthExceeded { .. })));
    }
}
