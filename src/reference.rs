//! Reference resolver (spec §4.7).
//!
//! Maps a possibly dotted reference (`id`, `alias.id`, `ns.id`,
//! `alias.nested.id`) to a concrete table or template plus the
//! collection id that contains it. Tables and templates resolve through
//! the same algorithm against their respective indices, so both public
//! entry points delegate to one generic walk.

use crate::collection::LoadedCollection;
use crate::errors::{EngineError, EngineResult};
use crate::{Table, Template};
use std::collections::HashMap;

pub(crate) fn resolve_table<'a>(
    collections: &'a HashMap<String, LoadedCollection>,
    current_id: &str,
    reference: &str,
) -> EngineResult<(String, &'a Table)> {
    resolve_dotted(collections, current_id, reference, |c| &c.tables_index, |c| &c.document.tables)
        .ok_or_else(|| EngineError::TableNotFound { collection: current_id.to_string(), table: reference.to_string() })
}

pub(crate) fn resolve_template<'a>(
    collections: &'a HashMap<String, LoadedCollection>,
    current_id: &str,
    reference: &str,
) -> EngineResult<(String, &'a Template)> {
    resolve_dotted(collections, current_id, reference, |c| &c.templates_index, |c| &c.document.templates)
        .ok_or_else(|| EngineError::TemplateNotFound { collection: current_id.to_string(), template: reference.to_string() })
}

/// Walk the dotted-reference algorithm (spec §4.7) against whichever of
/// `LoadedCollection`'s id→index maps `index_of` picks out — an O(1)
/// lookup by id into `items_of`'s backing `Vec`, built once at load time
/// (`collection.rs`) instead of scanning the document on every
/// reference.
fn resolve_dotted<'a, T>(
    collections: &'a HashMap<String, LoadedCollection>,
    current_id: &str,
    reference: &str,
    index_of: impl Fn(&'a LoadedCollection) -> &'a HashMap<String, usize> + Copy,
    items_of: impl Fn(&'a LoadedCollection) -> &'a Vec<T> + Copy,
) -> Option<(String, &'a T)> {
    let lookup = move |collection: &'a LoadedCollection, id: &str| -> Option<&'a T> {
        index_of(collection).get(id).map(|&i| &items_of(collection)[i])
    };

    let segments: Vec<&str> = reference.split('.').collect();

    if segments.len() == 1 {
        if let Some(current) = collections.get(current_id) {
            if let Some(found) = lookup(current, reference) {
                return Some((current_id.to_string(), found));
            }
        }
        for (id, collection) in collections {
            if let Some(found) = lookup(collection, reference) {
                return Some((id.clone(), found));
            }
        }
        return None;
    }

    let (prefix, id_part) = segments.split_at(segments.len() - 1);
    let id_part = id_part[0];
    let namespace = prefix.join(".");

    // 1. the first segment is an import alias of the current collection:
    // resolve into that collection, then resolve whatever's left of the
    // reference (a single id, or a further dotted chain) inside it.
    if let Some(current) = collections.get(current_id) {
        if let Some(target_id) = current.imports.get(prefix[0]) {
            let remaining =
                if prefix.len() == 1 { id_part.to_string() } else { format!("{}.{}", prefix[1..].join("."), id_part) };
            if let Some(found) = resolve_dotted(collections, target_id, &remaining, index_of, items_of) {
                return Some(found);
            }
        }
    }

    // 2. dotted namespace search across all loaded collections.
    for (id, collection) in collections {
        if collection.document.metadata.namespace == namespace {
            if let Some(found) = lookup(collection, id_part) {
                return Some((id.clone(), found));
            }
        }
    }

    // 3. fallback: an unresolved import (resolve_imports hasn't wired
    // `current.imports` yet) whose declared path matches a loaded
    // collection's namespace or id. Same recursion as step 1 once the
    // target collection is found.
    if let Some(current) = collections.get(current_id) {
        if let Some(import) = current.document.imports.iter().find(|imp| imp.alias == prefix[0]) {
            for (id, collection) in collections {
                if collection.document.metadata.namespace == import.reference || *id == import.reference {
                    let remaining = if prefix.len() == 1 {
                        id_part.to_string()
                    } else {
                        format!("{}.{}", prefix[1..].join("."), id_part)
                    };
                    if let Some(found) = resolve_dotted(collections, id, &remaining, index_of, items_of) {
                        return Some(found);
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Document, DocumentMetadata, Import, SimpleTable, UniqueOverflowPolicy};
    use std::collections::HashMap;

    fn doc(namespace: &str, table_id: &str, imports: Vec<Import>) -> Document {
        Document {
            metadata: DocumentMetadata {
                name: namespace.to_string(),
                namespace: namespace.to_string(),
                version: "1.0.0".to_string(),
                spec_version: "1".to_string(),
                max_recursion_depth: 64,
                max_explosions: 100,
                max_inheritance_depth: 16,
                unique_overflow: UniqueOverflowPolicy::Stop,
            },
            imports,
            variables: HashMap::new(),
            shared: Vec::new(),
            conditionals: Vec::new(),
            tables: vec![Table::Simple(SimpleTable {
                id: table_id.to_string(),
                entries: Vec::new(),
                default_sets: Vec::new(),
                extends: None,
                shared: Vec::new(),
                hidden: false,
            })],
            templates: Vec::new(),
        }
    }

    fn collections() -> HashMap<String, LoadedCollection> {
        let mut map = HashMap::new();
        let main_doc = doc("main.ns", "loot", vec![Import { alias: "bestiary".to_string(), reference: "bestiary-id".to_string() }]);
        let bestiary_doc = doc("bestiary.ns", "enemies", Vec::new());
        map.insert("main-id".to_string(), LoadedCollection::build("main-id".to_string(), main_doc));
        let mut bestiary = LoadedCollection::build("bestiary-id".to_string(), bestiary_doc);
        bestiary.imports.clear();
        map.insert("bestiary-id".to_string(), bestiary);
        map.get_mut("main-id").unwrap().imports.insert("bestiary".to_string(), "bestiary-id".to_string());
        map
    }

    #[test]
    fn undotted_reference_checks_current_collection_first() {
        let cols = collections();
        let (id, table) = resolve_table(&cols, "main-id", "loot").unwrap();
        assert_eq!(id, "main-id");
        assert_eq!(table.id(), "loot");
    }

    #[test]
    fn alias_reference_resolves_through_import() {
        let cols = collections();
        let (id, table) = resolve_table(&cols, "main-id", "bestiary.enemies").unwrap();
        assert_eq!(id, "bestiary-id");
        assert_eq!(table.id(), "enemies");
    }

    #[test]
    fn namespace_reference_resolves_without_alias() {
        let cols = collections();
        let (id, table) = resolve_table(&cols, "main-id", "bestiary.ns.enemies").unwrap();
        assert_eq!(id, "bestiary-id");
        assert_eq!(table.id(), "enemies");
    }

    #[test]
    fn missing_reference_is_not_found() {
        let cols = collections();
        assert!(resolve_table(&cols, "main-id", "nonexistent").is_err());
    }

    #[test]
    fn alias_chain_resolves_through_nested_import() {
        // main-id --alias "hero"--> hero-id --alias "gear"--> gear-id, each
        // wired only in `imports` (post-resolve_imports state), so
        // "hero.gear.sword" from main-id must recurse through two aliases.
        let mut map = HashMap::new();
        let main_doc = doc("main.ns", "loot", vec![Import { alias: "hero".to_string(), reference: "hero-id".to_string() }]);
        let hero_doc = doc("hero.ns", "armor", vec![Import { alias: "gear".to_string(), reference: "gear-id".to_string() }]);
        let gear_doc = doc("gear.ns", "sword", Vec::new());

        map.insert("main-id".to_string(), LoadedCollection::build("main-id".to_string(), main_doc));
        map.insert("hero-id".to_string(), LoadedCollection::build("hero-id".to_string(), hero_doc));
        map.insert("gear-id".to_string(), LoadedCollection::build("gear-id".to_string(), gear_doc));

        map.get_mut("main-id").unwrap().imports.insert("hero".to_string(), "hero-id".to_string());
        map.get_mut("hero-id").unwrap().imports.insert("gear".to_string(), "gear-id".to_string());

        let (id, table) = resolve_table(&map, "main-id", "hero.gear.sword").unwrap();
        assert_eq!(id, "gear-id");
        assert_eq!(table.id(), "sword");
    }
}
