//! Engine orchestrator (spec §4.9) — roll/rollTable/rollTemplate.
//!
//! Owns the recursive evaluation loop: constructs nothing itself (the
//! context and the loaded-collection map are handed in by
//! [`crate::api::Engine`]) but drives every `rollTable` / `rollTemplate`
//! call, the inheritance/selection pipeline for simple and collection
//! tables, source selection for composite tables, and merged-set
//! evaluation. Token-level dispatch (`evaluatePattern` walking a
//! tokenized pattern) lives in `engine::dispatch`, as a second `impl`
//! block on the same [`Evaluator`] — one orchestrator, split the way
//! `astorion` splits `engine::resolve` (per-token resolution) from the
//! top-level `Parser::run` driving loop.

use crate::collection::LoadedCollection;
use crate::context::{GenerationContext, WarningKind};
use crate::errors::{EngineError, EngineResult};
use crate::inheritance::{self, InheritanceCache};
use crate::selectors::{self, Candidate, SelectOutcome};
use crate::{CaptureItem, CollectionTable, CompositeTable, Entry, KeyedPattern, SetValue, SharedVar, SimpleTable, Table, Template};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Result of rolling a table or template body, before document-level
/// conditionals are applied (spec §4.9 step 4 return shape).
#[derive(Debug, Clone, Default)]
pub(crate) struct TableRollOutcome {
    pub text: String,
    pub result_type: Option<String>,
    pub assets: Option<Vec<String>>,
    pub entry_id: Option<String>,
}

#[derive(Clone)]
pub(crate) enum ReferenceTarget<'a> {
    Table(String, &'a Table),
    Template(String, &'a Template),
    None,
}

pub(crate) struct Evaluator<'e> {
    pub(crate) collections: &'e HashMap<String, LoadedCollection>,
    pub(crate) inheritance_cache: &'e mut InheritanceCache,
    pub(crate) rng: &'e mut dyn RngCore,
}

impl<'e> Evaluator<'e> {
    pub(super) fn document_metadata(&self, collection_id: &str) -> EngineResult<&crate::DocumentMetadata> {
        self.collections
            .get(collection_id)
            .map(|c| &c.document.metadata)
            .ok_or_else(|| EngineError::CollectionNotFound(collection_id.to_string()))
    }

    fn document_shared_names(&self, collection_id: &str) -> HashSet<String> {
        self.collections
            .get(collection_id)
            .map(|c| c.document.shared.iter().map(|kv| normalize_key(&kv.key)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn resolve_table_or_template(&self, collection_id: &str, reference: &str) -> ReferenceTarget<'e> {
        if let Ok((coll_id, table)) = crate::reference::resolve_table(self.collections, collection_id, reference) {
            return ReferenceTarget::Table(coll_id, table);
        }
        if let Ok((coll_id, template)) = crate::reference::resolve_template(self.collections, collection_id, reference) {
            return ReferenceTarget::Template(coll_id, template);
        }
        ReferenceTarget::None
    }

    /// Build a nested context scoped to `target_collection_id` when it
    /// differs from the caller's (e.g. a composite source or a plain
    /// table reference resolved through an import).
    pub(crate) fn nested_for_collection(&self, ctx: &GenerationContext, target_collection_id: &str) -> GenerationContext {
        let mut child = ctx.nested();
        if target_collection_id != ctx.collection_id {
            child.collection_id = target_collection_id.to_string();
            if let Some(collection) = self.collections.get(target_collection_id) {
                child.static_variables = Rc::new(collection.document.variables.clone());
            }
        }
        child
    }

    pub(crate) fn isolated_for_template(&self, ctx: &GenerationContext, target_collection_id: &str) -> GenerationContext {
        let static_vars = self.collections.get(target_collection_id).map(|c| c.document.variables.clone()).unwrap_or_default();
        let shared_names = self.document_shared_names(target_collection_id);
        ctx.isolated_for_template(target_collection_id.to_string(), static_vars, shared_names)
    }

    /// `roll(tableId)` (spec §4.9 "Roll on a table"). Document-level
    /// conditionals (step 5) are applied exactly once here, at the outer
    /// entry point — never inside the recursive `rollTable`, so a
    /// composite's nested roll of its target table does not re-apply the
    /// target's own conditionals twice.
    pub(crate) fn roll_table_entry(&mut self, ctx: &mut GenerationContext, table_id: &str) -> EngineResult<TableRollOutcome> {
        let table = self
            .collections
            .get(&ctx.collection_id)
            .and_then(|c| c.document.find_table(table_id))
            .ok_or_else(|| EngineError::TableNotFound { collection: ctx.collection_id.clone(), table: table_id.to_string() })?;
        let mut outcome = self.roll_table(ctx, table)?;
        outcome.text = self.apply_document_conditionals(ctx, outcome.text)?;
        Ok(outcome)
    }

    pub(crate) fn roll_template_entry(&mut self, ctx: &mut GenerationContext, template_id: &str) -> EngineResult<TableRollOutcome> {
        let template = self
            .collections
            .get(&ctx.collection_id)
            .and_then(|c| c.document.find_template(template_id))
            .ok_or_else(|| EngineError::TemplateNotFound { collection: ctx.collection_id.clone(), template: template_id.to_string() })?;
        let mut outcome = self.roll_template(ctx, template)?;
        outcome.text = self.apply_document_conditionals(ctx, outcome.text)?;
        Ok(outcome)
    }

    fn apply_document_conditionals(&mut self, ctx: &mut GenerationContext, text: String) -> EngineResult<String> {
        let conditionals = match self.collections.get(&ctx.collection_id) {
            Some(c) if !c.document.conditionals.is_empty() => c.document.conditionals.clone(),
            _ => return Ok(text),
        };
        let mut adapter = crate::engine::dispatch::ConditionalAdapter { evaluator: self, ctx };
        Ok(crate::template::conditional::apply_conditionals(&conditionals, text, &mut adapter))
    }

    pub(crate) fn roll_table(&mut self, ctx: &mut GenerationContext, table: &Table) -> EngineResult<TableRollOutcome> {
        self.roll_table_with_exclude(ctx, table, &HashSet::new(), false)
    }

    pub(crate) fn roll_table_with_exclude(
        &mut self,
        ctx: &mut GenerationContext,
        table: &Table,
        exclude: &HashSet<String>,
        unique: bool,
    ) -> EngineResult<TableRollOutcome> {
        let max_depth = self.document_metadata(&ctx.collection_id)?.max_recursion_depth;
        ctx.enter_recursion(max_depth, table.id())?;
        let result = self.roll_table_inner(ctx, table, exclude, unique);
        ctx.exit_recursion();
        result
    }

    fn roll_table_inner(
        &mut self,
        ctx: &mut GenerationContext,
        table: &Table,
        exclude: &HashSet<String>,
        unique: bool,
    ) -> EngineResult<TableRollOutcome> {
        ctx.current_table_id = Some(table.id().to_string());
        let parent_trace = ctx.trace.clone();
        let trace_node = parent_trace.as_ref().map(|t| t.borrow_mut().child(format!("roll {}", table.id())));
        if let Some(node) = &trace_node {
            ctx.trace = Some(Rc::clone(node));
        }

        let shared = match table {
            Table::Simple(t) => t.shared.clone(),
            Table::Composite(_) | Table::Collection(_) => Vec::new(),
        };
        self.evaluate_shared_list(ctx, &shared, table.id())?;

        let outcome = match table {
            Table::Simple(t) => self.roll_simple_entry(ctx, t, exclude, unique),
            Table::Composite(t) => self.roll_composite(ctx, t),
            Table::Collection(t) => self.roll_collection_entry(ctx, t, exclude, unique),
        }?;

        if let Some(node) = &trace_node {
            node.borrow_mut().set_output(outcome.text.clone());
        }
        ctx.trace = parent_trace;
        Ok(outcome)
    }

    fn roll_simple_entry(
        &mut self,
        ctx: &mut GenerationContext,
        table: &SimpleTable,
        exclude: &HashSet<String>,
        unique: bool,
    ) -> EngineResult<TableRollOutcome> {
        let max_inherit = self.document_metadata(&ctx.collection_id)?.max_inheritance_depth;
        let resolved = inheritance::resolve_simple_table(self.collections, self.inheritance_cache, &ctx.collection_id, table, max_inherit)?;
        let overflow = self.document_metadata(&ctx.collection_id)?.unique_overflow;

        let pool: Vec<Candidate> =
            resolved.entries.iter().map(|e| Candidate { id: e.id.as_deref().unwrap(), entry: e, source_table: resolved.id.as_str() }).collect();

        let mut retried = false;
        loop {
            match selectors::select(&pool, exclude, unique, overflow, self.rng) {
                SelectOutcome::Picked(candidate) => {
                    return self.finalize_simple_pick(ctx, &resolved, candidate.id, candidate.entry);
                }
                SelectOutcome::ResetAndRetry => {
                    if retried {
                        ctx.warn(WarningKind::UniqueOverflowStopped { table: resolved.id.clone() });
                        return Ok(TableRollOutcome::default());
                    }
                    retried = true;
                    ctx.used_entries.borrow_mut().remove(&resolved.id);
                }
                SelectOutcome::Empty => {
                    ctx.warn(WarningKind::UniqueOverflowStopped { table: resolved.id.clone() });
                    return Ok(TableRollOutcome::default());
                }
            }
        }
    }

    fn finalize_simple_pick(
        &mut self,
        ctx: &mut GenerationContext,
        table: &SimpleTable,
        entry_id: &str,
        entry: &Entry,
    ) -> EngineResult<TableRollOutcome> {
        ctx.used_entries.borrow_mut().entry(table.id.clone()).or_default().insert(entry_id.to_string());
        ctx.current_entry_id = Some(entry_id.to_string());

        let sets = self.evaluate_entry_sets(ctx, &table.id, entry, &table.default_sets)?;
        merge_placeholders(ctx, &table.id, &sets);

        let text = self.evaluate_pattern(ctx, &entry.value)?;

        ctx.current_entry_description = None;
        if let Some(desc_pattern) = &entry.description {
            let description = self.evaluate_pattern(ctx, desc_pattern)?;
            ctx.current_entry_description = Some(description.clone());
            ctx.record_description(table.id.clone(), table.id.clone(), text.clone(), description);
        }

        Ok(TableRollOutcome { text, result_type: entry.result_type.clone(), assets: entry.assets.clone(), entry_id: Some(entry_id.to_string()) })
    }

    fn roll_composite(&mut self, ctx: &mut GenerationContext, table: &CompositeTable) -> EngineResult<TableRollOutcome> {
        let Some(source) = selectors::select_source(&table.sources, self.rng) else {
            return Ok(TableRollOutcome::default());
        };
        let (coll_id, target) = crate::reference::resolve_table(self.collections, &ctx.collection_id, &source.table_id)?;
        let mut child = self.nested_for_collection(ctx, &coll_id);
        let mut outcome = self.roll_table(&mut child, target)?;

        outcome.result_type = outcome
            .result_type
            .or_else(|| source.result_type.clone())
            .or_else(|| table.result_type.clone());
        Ok(outcome)
    }

    fn roll_collection_entry(
        &mut self,
        ctx: &mut GenerationContext,
        table: &CollectionTable,
        exclude: &HashSet<String>,
        unique: bool,
    ) -> EngineResult<TableRollOutcome> {
        let max_inherit = self.document_metadata(&ctx.collection_id)?.max_inheritance_depth;
        let mut resolved_tables = Vec::new();
        for table_id in &table.table_ids {
            let (coll_id, t) = crate::reference::resolve_table(self.collections, &ctx.collection_id, table_id)?;
            let Table::Simple(simple) = t else { continue };
            let resolved = inheritance::resolve_simple_table(self.collections, self.inheritance_cache, &coll_id, simple, max_inherit)?;
            resolved_tables.push(resolved);
        }

        let mut pool: Vec<Candidate> = Vec::new();
        for resolved in &resolved_tables {
            for e in &resolved.entries {
                pool.push(Candidate { id: e.id.as_deref().unwrap(), entry: e, source_table: resolved.id.as_str() });
            }
        }

        let overflow = self.document_metadata(&ctx.collection_id)?.unique_overflow;
        match selectors::select(&pool, exclude, unique, overflow, self.rng) {
            SelectOutcome::Picked(candidate) => {
                let source_table = resolved_tables.iter().find(|t| t.id == candidate.source_table).unwrap();
                self.finalize_simple_pick(ctx, source_table, candidate.id, candidate.entry)
            }
            SelectOutcome::ResetAndRetry | SelectOutcome::Empty => {
                ctx.warn(WarningKind::UniqueOverflowStopped { table: table.id.clone() });
                Ok(TableRollOutcome::default())
            }
        }
    }

    pub(crate) fn roll_template(&mut self, ctx: &mut GenerationContext, template: &Template) -> EngineResult<TableRollOutcome> {
        ctx.current_table_id = Some(template.name.clone());
        self.evaluate_shared_list(ctx, &template.shared, &template.name)?;
        let text = self.evaluate_pattern(ctx, &template.pattern)?;
        Ok(TableRollOutcome { text, result_type: template.result_type.clone(), assets: None, entry_id: None })
    }

    fn evaluate_shared_list(&mut self, ctx: &mut GenerationContext, shared: &[SharedVar], source_id: &str) -> EngineResult<()> {
        for kv in shared {
            let name = normalize_key(&kv.key);
            if ctx.document_shared_names.contains(&name) {
                return Err(EngineError::SharedVariableShadowed { name });
            }

            let owned_by_this_source =
                ctx.shared_variables.borrow().get(&name).map(|v| v.source_id == source_id).unwrap_or(false);
            if owned_by_this_source {
                ctx.shared_variables.borrow_mut().remove(&name);
                ctx.capture_shared.borrow_mut().remove(&name);
            }

            let already_set = ctx.shared_variables.borrow().contains_key(&name) || ctx.capture_shared.borrow().contains_key(&name);
            if already_set {
                continue;
            }

            self.evaluate_shared_entry(ctx, kv, &name, source_id)?;
        }
        Ok(())
    }

    fn evaluate_shared_entry(&mut self, ctx: &mut GenerationContext, kv: &SharedVar, name: &str, source_id: &str) -> EngineResult<()> {
        if !kv.key.starts_with('$') {
            let text = self.evaluate_pattern(ctx, &kv.pattern)?;
            ctx.set_shared_variable(name.to_string(), text, source_id.to_string());
            return Ok(());
        }

        let tokens = crate::template::token::tokenize(&kv.pattern);
        if let [crate::template::token::Token::Table { reference }] = tokens.as_slice() {
            if let ReferenceTarget::Table(coll_id, table) = self.resolve_table_or_template(&ctx.collection_id, reference) {
                let mut child = self.nested_for_collection(ctx, &coll_id);
                let outcome = self.roll_table(&mut child, table)?;
                let sets = child
                    .placeholders
                    .get(table.id())
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), SetValue::Text(v.clone()))).collect())
                    .unwrap_or_default();
                ctx.capture_shared.borrow_mut().insert(
                    name.to_string(),
                    CaptureItem { value: outcome.text, sets, description: child.current_entry_description.clone() },
                );
                return Ok(());
            }
        }

        let text = self.evaluate_pattern(ctx, &kv.pattern)?;
        ctx.capture_shared.borrow_mut().insert(name.to_string(), CaptureItem::leaf(text));
        Ok(())
    }

    /// Merged-sets evaluation (spec §4.10 "Merged sets evaluation"):
    /// default-sets first, entry sets override by key, each value
    /// evaluated with cycle detection and the single-table-reference
    /// fast path that keeps a nested-CaptureItem structure instead of
    /// flattening to a string.
    fn evaluate_entry_sets(
        &mut self,
        ctx: &mut GenerationContext,
        table_id: &str,
        entry: &Entry,
        default_sets: &[KeyedPattern],
    ) -> EngineResult<HashMap<String, SetValue>> {
        let mut merged: Vec<KeyedPattern> = default_sets.to_vec();
        for kv in &entry.sets {
            if let Some(existing) = merged.iter_mut().find(|p| p.key == kv.key) {
                existing.pattern = kv.pattern.clone();
            } else {
                merged.push(kv.clone());
            }
        }

        let mut out = HashMap::with_capacity(merged.len());
        for kv in &merged {
            let cycle_key = format!("{table_id}.{}", kv.key);
            let Some(_guard) = crate::engine::cycle::CycleGuard::enter(&ctx.set_evaluation_in_progress, cycle_key) else {
                out.insert(kv.key.clone(), SetValue::Text(kv.pattern.clone()));
                continue;
            };

            let value = if kv.pattern.contains("{{") {
                let spans = crate::template::token::extract_expressions(&kv.pattern);
                match spans.as_slice() {
                    [span] if span.raw.trim() == kv.pattern.trim() => match &span.token {
                        crate::template::token::Token::Table { reference } => {
                            self.roll_sub_capture(ctx, reference)?.unwrap_or_else(|| SetValue::Text(self.evaluate_pattern(ctx, &kv.pattern).unwrap_or_default()))
                        }
                        _ => SetValue::Text(self.evaluate_pattern(ctx, &kv.pattern)?),
                    },
                    _ => SetValue::Text(self.evaluate_pattern(ctx, &kv.pattern)?),
                }
            } else {
                SetValue::Text(kv.pattern.clone())
            };
            out.insert(kv.key.clone(), value);
        }
        Ok(out)
    }

    fn roll_sub_capture(&mut self, ctx: &mut GenerationContext, reference: &str) -> EngineResult<Option<SetValue>> {
        match self.resolve_table_or_template(&ctx.collection_id, reference) {
            ReferenceTarget::Table(coll_id, table) => {
                let mut child = self.nested_for_collection(ctx, &coll_id);
                let outcome = self.roll_table(&mut child, table)?;
                let sets = child
                    .placeholders
                    .get(table.id())
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), SetValue::Text(v.clone()))).collect())
                    .unwrap_or_default();
                Ok(Some(SetValue::Nested(CaptureItem { value: outcome.text, sets, description: child.current_entry_description })))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn resolve_count(&mut self, ctx: &mut GenerationContext, count: &crate::template::token::CountSpec) -> u32 {
        use crate::template::token::CountSpec;
        match count {
            CountSpec::Literal(n) => *n,
            CountSpec::Variable(name) => ctx.resolve_variable(name).and_then(|s| s.trim().parse().ok()).unwrap_or(0),
            CountSpec::Dice(expr) => {
                let max_explosions = self.document_metadata(&ctx.collection_id).map(|m| m.max_explosions).unwrap_or(100);
                crate::dice::roll_with_rng(expr, max_explosions, &mut *self.rng).map(|r| r.total.max(0) as u32).unwrap_or(0)
            }
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.strip_prefix('$').unwrap_or(key).to_string()
}

pub(crate) fn merge_placeholders(ctx: &mut GenerationContext, table_id: &str, sets: &HashMap<String, SetValue>) {
    let flat: HashMap<String, String> =
        sets.iter().map(|(k, v)| (k.clone(), match v { SetValue::Text(s) => s.clone(), SetValue::Nested(item) => item.value.clone() })).collect();
    ctx.placeholders.entry(table_id.to_string()).or_default().extend(flat);
}
