//! Public engine API (spec §6).
//!
//! [`Engine`] owns every loaded [`LoadedCollection`], the cross-
//! collection inheritance cache, and the import-resolution map, and is
//! the single entry point a host embeds: load documents, roll against
//! them, and read back a [`RollResult`]. Mirrors `astorion::api`'s
//! shape — a thin struct plus a handful of free-standing option/result
//! types — except here the "parse" entry points are `roll` /
//! `roll_template` / `evaluate_raw_pattern`.

use crate::collection::LoadedCollection;
use crate::context::{GenerationContext, WarningFlags};
use crate::engine::evaluator::{Evaluator, TableRollOutcome};
use crate::engine::trace::TraceOutput;
use crate::errors::{EngineError, EngineResult};
use crate::inheritance::InheritanceCache;
use crate::validation::ValidationIssue;
use crate::{CaptureItem, Document, SetValue, Table, Template};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{HashMap, HashSet};

/// Options for `roll` / `rollTemplate` (spec §6 "Roll options").
#[derive(Debug, Clone, Default)]
pub struct RollOptions {
    pub enable_trace: bool,
    pub seed: Option<u64>,
}

/// Options for `evaluateRawPattern`: everything `RollOptions` has, plus
/// an ad hoc set of shared variables a live previewer wants visible to
/// `$name` lookups without having actually rolled anything.
#[derive(Debug, Clone, Default)]
pub struct RawPatternOptions {
    pub enable_trace: bool,
    pub seed: Option<u64>,
    pub shared: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub source_id: String,
    pub collection_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub entry_id: Option<String>,
}

/// Public flattening of a captured item's `sets` (spec §6 `captures`):
/// a nested set value surfaces as its own leaf value rather than the
/// recursive `SetValue` the evaluator uses internally.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub value: String,
    pub description: Option<String>,
    pub sets: HashMap<String, String>,
}

/// Public [`crate::context`] description record (spec §6
/// `descriptions`), stably sorted ascending by recursion depth before
/// being handed back (spec §5).
#[derive(Debug, Clone)]
pub struct DescriptionEntry {
    pub table_name: String,
    pub table_id: String,
    pub rolled_value: String,
    pub description: String,
    pub depth: u32,
}

/// One `{{...}}` expression's evaluated text and source span (spec §6
/// `expressionOutputs`), for a live previewer that highlights each
/// expression's individual contribution to the rendered pattern.
#[derive(Debug, Clone)]
pub struct ExpressionOutput {
    pub start: usize,
    pub end: usize,
    pub raw: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct RollResult {
    pub text: String,
    pub result_type: Option<String>,
    pub assets: Option<Vec<String>>,
    pub placeholders: HashMap<String, HashMap<String, String>>,
    pub metadata: ResultMetadata,
    pub warnings: WarningFlags,
    pub trace: Option<TraceOutput>,
    pub captures: HashMap<String, Vec<CaptureOutput>>,
    pub descriptions: Vec<DescriptionEntry>,
    pub expression_outputs: Vec<ExpressionOutput>,
}

/// Engine entry point (spec §6 "Engine API surface").
pub struct Engine {
    collections: HashMap<String, LoadedCollection>,
    inheritance_cache: InheritanceCache,
    /// Collections loaded as `isPreloaded`: trusted bundled content that
    /// skips `loadCollection`'s validation gate. See DESIGN.md — the
    /// spec names the flag but does not define its effect.
    preloaded: HashSet<String>,
    /// The explicit alias->id map last passed to `resolveImports`, if
    /// any, replayed by `updateDocument`'s "re-resolve imports" step.
    last_import_map: Option<HashMap<String, String>>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine { collections: HashMap::new(), inheritance_cache: InheritanceCache::new(), preloaded: HashSet::new(), last_import_map: None }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `validate(document)` (spec §6): a pure check, independent of
    /// whether `document` is or ever will be loaded.
    pub fn validate(document: &Document) -> Vec<ValidationIssue> {
        crate::validation::validate(document)
    }

    /// `loadCollection(document, id, isPreloaded)` (spec §6). Refuses a
    /// document that fails [`Engine::validate`] unless `is_preloaded` is
    /// set — bundled content is assumed already vetted by its builder.
    pub fn load_collection(&mut self, document: Document, id: impl Into<String>, is_preloaded: bool) -> EngineResult<()> {
        if !is_preloaded {
            let issues = crate::validation::validate(&document);
            if !issues.is_empty() {
                return Err(EngineError::ValidationFailed(issues));
            }
        }
        let id = id.into();
        self.collections.insert(id.clone(), LoadedCollection::build(id.clone(), document));
        self.inheritance_cache.retain(|(cid, _), _| cid != &id);
        if is_preloaded {
            self.preloaded.insert(id);
        } else {
            self.preloaded.remove(&id);
        }
        Ok(())
    }

    /// `updateDocument(id, document)` (spec §6): replace and re-index a
    /// loaded collection, then re-resolve imports across every loaded
    /// collection using whatever alias map `resolveImports` was last
    /// called with (or namespace/id equality alone, if never called).
    pub fn update_document(&mut self, id: &str, document: Document) -> EngineResult<()> {
        let issues = crate::validation::validate(&document);
        if !self.preloaded.contains(id) && !issues.is_empty() {
            return Err(EngineError::ValidationFailed(issues));
        }
        self.collections.insert(id.to_string(), LoadedCollection::build(id.to_string(), document));
        self.inheritance_cache.retain(|(cid, _), _| cid != id);
        let path_to_id = self.last_import_map.clone();
        self.resolve_imports(path_to_id.as_ref());
        Ok(())
    }

    /// `unloadCollection(id)` (spec §6).
    pub fn unload_collection(&mut self, id: &str) {
        self.collections.remove(id);
        self.preloaded.remove(id);
        self.inheritance_cache.retain(|(cid, _), _| cid != id);
    }

    /// `resolveImports(optional pathToIdMap)` (spec §6): for every
    /// loaded collection's declared imports, wire the alias to a target
    /// collection id by explicit path map, then namespace equality, then
    /// id equality, in that priority.
    pub fn resolve_imports(&mut self, path_to_id: Option<&HashMap<String, String>>) {
        self.last_import_map = path_to_id.cloned();

        let namespace_to_id: HashMap<String, String> =
            self.collections.iter().map(|(id, c)| (c.document.metadata.namespace.clone(), id.clone())).collect();
        let ids: HashSet<String> = self.collections.keys().cloned().collect();

        for collection in self.collections.values_mut() {
            for import in &collection.document.imports {
                let target = path_to_id
                    .and_then(|m| m.get(&import.reference).cloned())
                    .or_else(|| namespace_to_id.get(&import.reference).cloned())
                    .or_else(|| ids.contains(&import.reference).then(|| import.reference.clone()));
                if let Some(target_id) = target {
                    collection.imports.insert(import.alias.clone(), target_id);
                }
            }
        }
    }

    /// `clearInheritanceCache()` (spec §6).
    pub fn clear_inheritance_cache(&mut self) {
        self.inheritance_cache.clear();
    }

    /// `getTable(id, collectionId?)` (spec §6). With no `collection_id`,
    /// resolution starts from an arbitrary loaded collection — for a
    /// plain (undotted) id this still searches every loaded collection,
    /// same as [`crate::reference::resolve_table`]'s fallback.
    pub fn get_table(&self, id: &str, collection_id: Option<&str>) -> Option<&Table> {
        let current = collection_id.or_else(|| self.collections.keys().next().map(String::as_str))?;
        crate::reference::resolve_table(&self.collections, current, id).ok().map(|(_, t)| t)
    }

    /// `getTemplate(id, collectionId)` (spec §6).
    pub fn get_template(&self, id: &str, collection_id: &str) -> Option<&Template> {
        crate::reference::resolve_template(&self.collections, collection_id, id).ok().map(|(_, t)| t)
    }

    /// `listTables` (spec §6): visible (non-`hidden`) table ids declared
    /// directly in `collection_id`.
    pub fn list_tables(&self, collection_id: &str) -> Vec<&str> {
        let Some(collection) = self.collections.get(collection_id) else { return Vec::new() };
        collection
            .document
            .tables
            .iter()
            .filter(|t| !matches!(t, Table::Simple(s) if s.hidden))
            .map(|t| t.id())
            .collect()
    }

    /// `listTemplates` (spec §6): template names declared directly in
    /// `collection_id`.
    pub fn list_templates(&self, collection_id: &str) -> Vec<&str> {
        let Some(collection) = self.collections.get(collection_id) else { return Vec::new() };
        collection.document.templates.iter().map(|t| t.name.as_str()).collect()
    }

    /// `listImportedTables` (spec §6): `alias.id` references for every
    /// visible table reachable through `collection_id`'s resolved
    /// imports.
    pub fn list_imported_tables(&self, collection_id: &str) -> Vec<String> {
        let Some(collection) = self.collections.get(collection_id) else { return Vec::new() };
        let mut out = Vec::new();
        for (alias, target_id) in &collection.imports {
            let Some(target) = self.collections.get(target_id) else { continue };
            out.extend(
                target
                    .document
                    .tables
                    .iter()
                    .filter(|t| !matches!(t, Table::Simple(s) if s.hidden))
                    .map(|t| format!("{alias}.{}", t.id())),
            );
        }
        out
    }

    /// `listImportedTemplates` (spec §6).
    pub fn list_imported_templates(&self, collection_id: &str) -> Vec<String> {
        let Some(collection) = self.collections.get(collection_id) else { return Vec::new() };
        let mut out = Vec::new();
        for (alias, target_id) in &collection.imports {
            let Some(target) = self.collections.get(target_id) else { continue };
            out.extend(target.document.templates.iter().map(|t| format!("{alias}.{}", t.name)));
        }
        out
    }

    /// `roll(tableId, collectionId, options)` (spec §6).
    pub fn roll(&mut self, table_id: &str, collection_id: &str, options: &RollOptions) -> EngineResult<RollResult> {
        let mut ctx = self.new_context(collection_id, options.enable_trace)?;
        let mut rng = make_rng(options.seed);
        let mut evaluator = Evaluator { collections: &self.collections, inheritance_cache: &mut self.inheritance_cache, rng: &mut *rng };
        let outcome = evaluator.roll_table_entry(&mut ctx, table_id)?;
        Ok(build_result(collection_id, table_id, outcome, &ctx, Vec::new()))
    }

    /// `rollTemplate(templateId, collectionId, options)` (spec §6).
    pub fn roll_template(&mut self, template_id: &str, collection_id: &str, options: &RollOptions) -> EngineResult<RollResult> {
        let mut ctx = self.new_context(collection_id, options.enable_trace)?;
        let mut rng = make_rng(options.seed);
        let mut evaluator = Evaluator { collections: &self.collections, inheritance_cache: &mut self.inheritance_cache, rng: &mut *rng };
        let outcome = evaluator.roll_template_entry(&mut ctx, template_id)?;
        Ok(build_result(collection_id, template_id, outcome, &ctx, Vec::new()))
    }

    /// `evaluateRawPattern(pattern, collectionId, options{shared?})`
    /// (spec §6): evaluate an ad hoc pattern that isn't attached to any
    /// table or template entry, returning per-expression output slices
    /// alongside the assembled text for a live previewer.
    pub fn evaluate_raw_pattern(&mut self, pattern: &str, collection_id: &str, options: &RawPatternOptions) -> EngineResult<RollResult> {
        let mut ctx = self.new_context(collection_id, options.enable_trace)?;
        for (name, value) in &options.shared {
            ctx.set_shared_variable(name.clone(), value.clone(), "raw".to_string());
        }

        let mut rng = make_rng(options.seed);
        let mut evaluator = Evaluator { collections: &self.collections, inheritance_cache: &mut self.inheritance_cache, rng: &mut *rng };

        let spans = crate::template::token::extract_expressions(pattern);
        let mut text = String::with_capacity(pattern.len());
        let mut expression_outputs = Vec::with_capacity(spans.len());
        let mut cursor = 0;
        for span in &spans {
            text.push_str(&pattern[cursor..span.start]);
            let output = evaluator.evaluate_token(&mut ctx, &span.token)?;
            text.push_str(&output);
            expression_outputs.push(ExpressionOutput { start: span.start, end: span.end, raw: span.raw.clone(), output });
            cursor = span.end;
        }
        text.push_str(&pattern[cursor..]);

        let outcome = TableRollOutcome { text, result_type: None, assets: None, entry_id: None };
        Ok(build_result(collection_id, "<raw-pattern>", outcome, &ctx, expression_outputs))
    }

    fn new_context(&self, collection_id: &str, enable_trace: bool) -> EngineResult<GenerationContext> {
        let collection = self.collections.get(collection_id).ok_or_else(|| EngineError::CollectionNotFound(collection_id.to_string()))?;
        let static_variables = collection.document.variables.clone();
        let shared_names = collection.document.shared.iter().map(|kv| kv.key.strip_prefix('$').unwrap_or(&kv.key).to_string()).collect();
        Ok(GenerationContext::new(collection_id.to_string(), static_variables, shared_names, enable_trace))
    }
}

fn make_rng(seed: Option<u64>) -> Box<dyn RngCore> {
    match seed {
        Some(s) => Box::new(StdRng::seed_from_u64(s)),
        None => Box::new(rand::thread_rng()),
    }
}

fn build_result(
    collection_id: &str,
    source_id: &str,
    outcome: TableRollOutcome,
    ctx: &GenerationContext,
    expression_outputs: Vec<ExpressionOutput>,
) -> RollResult {
    let captures = ctx
        .captures
        .borrow()
        .iter()
        .map(|(name, cv)| (name.clone(), cv.items.iter().map(capture_item_to_output).collect()))
        .collect();

    let mut descriptions: Vec<DescriptionEntry> = ctx
        .descriptions
        .borrow()
        .iter()
        .map(|d| DescriptionEntry {
            table_name: d.table_name.clone(),
            table_id: d.table_id.clone(),
            rolled_value: d.rolled_value.clone(),
            description: d.description.clone(),
            depth: d.depth,
        })
        .collect();
    descriptions.sort_by_key(|d| d.depth);

    RollResult {
        text: outcome.text,
        result_type: outcome.result_type,
        assets: outcome.assets,
        placeholders: ctx.placeholders.clone(),
        metadata: ResultMetadata {
            source_id: source_id.to_string(),
            collection_id: collection_id.to_string(),
            timestamp: chrono::Utc::now(),
            entry_id: outcome.entry_id,
        },
        warnings: *ctx.warnings.borrow(),
        trace: ctx.trace.as_ref().map(crate::engine::trace::freeze),
        captures,
        descriptions,
        expression_outputs,
    }
}

fn capture_item_to_output(item: &CaptureItem) -> CaptureOutput {
    CaptureOutput {
        value: item.value.clone(),
        description: item.description.clone(),
        sets: item
            .sets
            .iter()
            .map(|(k, v)| (k.clone(), match v {
                SetValue::Text(s) => s.clone(),
                SetValue::Nested(nested) => nested.value.clone(),
            }))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentMetadata, Entry, SimpleTable, UniqueOverflowPolicy};

    fn doc(tables: Vec<Table>) -> Document {
        Document {
            metadata: DocumentMetadata {
                name: "Loot".to_string(),
                namespace: "loot.core".to_string(),
                version: "1.0.0".to_string(),
                spec_version: "1.0".to_string(),
                max_recursion_depth: 64,
                max_explosions: 100,
                max_inheritance_depth: 16,
                unique_overflow: UniqueOverflowPolicy::Stop,
            },
            imports: Vec::new(),
            variables: HashMap::new(),
            shared: Vec::new(),
            conditionals: Vec::new(),
            tables,
            templates: Vec::new(),
        }
    }

    fn entry(id: &str, value: &str) -> Entry {
        Entry { id: Some(id.to_string()), value: value.to_string(), weight: Some(1.0), sets: Vec::new(), description: None, result_type: None, assets: None }
    }

    fn simple(id: &str, entries: Vec<Entry>) -> Table {
        Table::Simple(SimpleTable { id: id.to_string(), entries, default_sets: Vec::new(), extends: None, shared: Vec::new(), hidden: false })
    }

    #[test]
    fn load_collection_rejects_invalid_document() {
        let mut engine = Engine::new();
        let mut bad = doc(Vec::new());
        bad.metadata.name = "".to_string();
        let err = engine.load_collection(bad, "main", false).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn preloaded_collection_skips_validation() {
        let mut engine = Engine::new();
        let mut bad = doc(Vec::new());
        bad.metadata.name = "".to_string();
        assert!(engine.load_collection(bad, "core", true).is_ok());
    }

    #[test]
    fn roll_produces_deterministic_text_for_a_fixed_seed() {
        let mut engine = Engine::new();
        engine.load_collection(doc(vec![simple("colors", vec![entry("colors000", "Red"), entry("colors001", "Blue")])]), "main", false).unwrap();

        let options = RollOptions { enable_trace: false, seed: Some(7) };
        let first = engine.roll("colors", "main", &options).unwrap();
        let second = engine.roll("colors", "main", &options).unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.metadata.collection_id, "main");
        assert_eq!(first.metadata.source_id, "colors");
    }

    #[test]
    fn roll_on_missing_table_is_a_structural_error() {
        let mut engine = Engine::new();
        engine.load_collection(doc(Vec::new()), "main", false).unwrap();
        let err = engine.roll("ghost", "main", &RollOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::TableNotFound { .. }));
    }

    #[test]
    fn evaluate_raw_pattern_reports_expression_spans() {
        let mut engine = Engine::new();
        engine.load_collection(doc(Vec::new()), "main", false).unwrap();
        let result = engine.evaluate_raw_pattern("A {{dice:1d1}} B", "main", &RawPatternOptions::default()).unwrap();
        assert_eq!(result.text, "A 1 B");
        assert_eq!(result.expression_outputs.len(), 1);
        assert_eq!(result.expression_outputs[0].output, "1");
    }

    #[test]
    fn resolve_imports_wires_alias_by_namespace_equality() {
        let mut engine = Engine::new();

        let mut main = doc(Vec::new());
        main.imports.push(crate::Import { alias: "bestiary".to_string(), reference: "bestiary.core".to_string() });
        engine.load_collection(main, "main", false).unwrap();

        let mut bestiary_doc = doc(vec![simple("enemies", vec![entry("enemies000", "Goblin")])]);
        bestiary_doc.metadata.namespace = "bestiary.core".to_string();
        engine.load_collection(bestiary_doc, "bestiary-id", false).unwrap();

        engine.resolve_imports(None);
        let imported = engine.list_imported_tables("main");
        assert_eq!(imported, vec!["bestiary.enemies".to_string()]);
    }

    #[test]
    fn list_tables_excludes_hidden() {
        let mut engine = Engine::new();
        let mut hidden = SimpleTable { id: "internal".to_string(), entries: Vec::new(), default_sets: Vec::new(), extends: None, shared: Vec::new(), hidden: true };
        hidden.entries.push(entry("internal000", "x"));
        engine.load_collection(doc(vec![simple("colors", vec![entry("colors000", "Red")]), Table::Simple(hidden)]), "main", false).unwrap();
        assert_eq!(engine.list_tables("main"), vec!["colors"]);
    }
}
