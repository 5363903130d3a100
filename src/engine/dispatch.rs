//! Per-token dispatch (spec §4.9 "Token dispatch", §4.10 property-chain
//! traversal).
//!
//! Second `impl<'e> Evaluator<'e>` block: `evaluate_pattern` tokenizes a
//! pattern and folds [`evaluate_token`](Evaluator::evaluate_token) over
//! the stream, the same "tokenize once, walk the stream" split
//! `astorion::engine::resolve` uses against `engine::parser`'s driving
//! loop. Structural failures (`EngineError`) propagate and abort the
//! whole roll; anything resolvable-but-missing (an unset variable, an
//! out-of-range capture index) is swallowed into an empty string plus a
//! [`WarningKind`] instead.

use super::evaluator::{Evaluator, ReferenceTarget};
use crate::context::{GenerationContext, WarningKind};
use crate::dice;
use crate::errors::EngineResult;
use crate::math_expr;
use crate::template::conditional::ConditionResolver;
use crate::template::token::{ChainSegment, CollectProperty, Token};
use crate::{CaptureItem, CaptureVariable, SetValue};
use std::collections::{HashMap, HashSet};

impl<'e> Evaluator<'e> {
    pub(crate) fn evaluate_pattern(&mut self, ctx: &mut GenerationContext, pattern: &str) -> EngineResult<String> {
        let tokens = crate::template::token::tokenize(pattern);
        let mut out = String::with_capacity(pattern.len());
        for token in &tokens {
            out.push_str(&self.evaluate_token(ctx, token)?);
        }
        Ok(out)
    }

    /// `pub(crate)` (not just private) so [`crate::api::Engine`] can
    /// evaluate a single extracted expression span directly, for
    /// `evaluateRawPattern`'s per-expression output slices.
    pub(crate) fn evaluate_token(&mut self, ctx: &mut GenerationContext, token: &Token) -> EngineResult<String> {
        match token {
            Token::Literal(s) => Ok(s.clone()),
            Token::Dice(expr) => Ok(self.evaluate_dice(ctx, expr)),
            Token::Math(expr) => Ok(self.evaluate_math(ctx, expr)),
            Token::Variable { alias, name } => Ok(self.evaluate_variable(ctx, alias.as_deref(), name)),
            Token::Placeholder { name, property } => Ok(self.evaluate_placeholder(ctx, name, property.as_deref())),
            Token::Table { reference } => self.evaluate_table_ref(ctx, reference),
            Token::MultiRoll { count, reference, unique, separator } => {
                self.evaluate_multi_roll(ctx, count, reference, *unique, separator.as_deref())
            }
            Token::CaptureMultiRoll { count, reference, unique, var, silent, separator } => {
                self.evaluate_capture_multi_roll(ctx, count, reference, *unique, var, *silent, separator.as_deref())
            }
            Token::CaptureAccess { var, index, chain, separator } => {
                Ok(self.resolve_capture_access(ctx, var, *index, chain, separator.as_deref()))
            }
            Token::Collect { var, property, unique, separator } => {
                Ok(self.resolve_collect(ctx, var, property, *unique, separator.as_deref()))
            }
            Token::Again { count, unique } => self.evaluate_again(ctx, count.as_ref(), *unique),
            Token::Instance { reference, name } => self.evaluate_instance(ctx, reference, name),
        }
    }

    fn evaluate_dice(&mut self, ctx: &GenerationContext, expr: &str) -> String {
        let max_explosions = self.document_metadata(&ctx.collection_id).map(|m| m.max_explosions).unwrap_or(100);
        match dice::roll_with_rng(expr, max_explosions, &mut *self.rng) {
            Some(result) => result.total.to_string(),
            None => "[dice error]".to_string(),
        }
    }

    fn evaluate_math(&self, ctx: &GenerationContext, expr: &str) -> String {
        let vars = ctx.all_variables_snapshot();
        match math_expr::evaluate(expr, &vars) {
            Some(n) => n.to_string(),
            None => {
                ctx.warn(WarningKind::MathParseFailure { expr: expr.to_string() });
                "[math error]".to_string()
            }
        }
    }

    /// `$name` is a plain variable lookup; `$alias.name` reads the
    /// `name` placeholder set by whatever rolled as `alias` (the same
    /// data `@alias.name` reads, just spelled with the variable sigil —
    /// `template::token::parse_dollar` only takes this branch when
    /// `name` isn't `count`/`description`/`@prop`, so it never collides
    /// with capture-access syntax).
    fn evaluate_variable(&self, ctx: &GenerationContext, alias: Option<&str>, name: &str) -> String {
        match alias {
            Some(a) => self.evaluate_placeholder(ctx, a, Some(name)),
            None => match ctx.resolve_variable(name) {
                Some(v) => v,
                None => {
                    ctx.warn(WarningKind::UnknownVariable { name: name.to_string() });
                    String::new()
                }
            },
        }
    }

    fn evaluate_placeholder(&self, ctx: &GenerationContext, name: &str, property: Option<&str>) -> String {
        let property = property.unwrap_or("value");
        match ctx.resolve_placeholder(name, property) {
            Some(v) => v,
            None => {
                ctx.warn(WarningKind::UnknownPlaceholderProperty { name: name.to_string(), property: property.to_string() });
                String::new()
            }
        }
    }

    fn evaluate_table_ref(&mut self, ctx: &mut GenerationContext, reference: &str) -> EngineResult<String> {
        match self.resolve_table_or_template(&ctx.collection_id, reference) {
            ReferenceTarget::Table(coll_id, table) => {
                let mut child = self.nested_for_collection(ctx, &coll_id);
                Ok(self.roll_table(&mut child, table)?.text)
            }
            ReferenceTarget::Template(coll_id, template) => {
                let mut child = self.isolated_for_template(ctx, &coll_id);
                Ok(self.roll_template(&mut child, template)?.text)
            }
            ReferenceTarget::None => {
                ctx.warn(WarningKind::UnresolvedTableReference { reference: reference.to_string() });
                Ok(String::new())
            }
        }
    }

    /// Roll `target` once inside a scope nested off `ctx`, returning the
    /// produced text, its merged sets (for capture), an optional
    /// description, and the picked entry id (for `unique` exclusion).
    /// Template targets carry no sets/description/entry id — they are
    /// not a pick from a weighted pool.
    fn roll_target_once(
        &mut self,
        ctx: &mut GenerationContext,
        target: ReferenceTarget<'e>,
        exclude: &HashSet<String>,
        unique: bool,
    ) -> EngineResult<(String, HashMap<String, SetValue>, Option<String>, Option<String>)> {
        match target {
            ReferenceTarget::Table(coll_id, table) => {
                let mut child = self.nested_for_collection(ctx, &coll_id);
                let before = child.descriptions.borrow().len();
                let outcome = self.roll_table_with_exclude(&mut child, table, exclude, unique)?;
                let sets = child
                    .placeholders
                    .get(table.id())
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), SetValue::Text(v.clone()))).collect())
                    .unwrap_or_default();
                let description = child.descriptions.borrow().get(before).map(|d| d.description.clone());
                Ok((outcome.text, sets, description, outcome.entry_id))
            }
            ReferenceTarget::Template(coll_id, template) => {
                let mut child = self.isolated_for_template(ctx, &coll_id);
                let outcome = self.roll_template(&mut child, template)?;
                Ok((outcome.text, HashMap::new(), None, None))
            }
            ReferenceTarget::None => Ok((String::new(), HashMap::new(), None, None)),
        }
    }

    fn evaluate_multi_roll(
        &mut self,
        ctx: &mut GenerationContext,
        count: &crate::template::token::CountSpec,
        reference: &str,
        unique: bool,
        separator: Option<&str>,
    ) -> EngineResult<String> {
        let n = self.resolve_count(ctx, count);
        let target = self.resolve_table_or_template(&ctx.collection_id, reference);
        if matches!(target, ReferenceTarget::None) {
            ctx.warn(WarningKind::UnresolvedTableReference { reference: reference.to_string() });
            return Ok(String::new());
        }

        let mut excluded = HashSet::new();
        let mut parts = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (text, _, _, entry_id) = self.roll_target_once(ctx, target.clone(), &excluded, unique)?;
            if unique {
                if let Some(id) = entry_id {
                    excluded.insert(id);
                }
            }
            parts.push(text);
        }
        Ok(parts.join(separator.unwrap_or(", ")))
    }

    fn evaluate_capture_multi_roll(
        &mut self,
        ctx: &mut GenerationContext,
        count: &crate::template::token::CountSpec,
        reference: &str,
        unique: bool,
        var: &str,
        silent: bool,
        separator: Option<&str>,
    ) -> EngineResult<String> {
        let n = self.resolve_count(ctx, count);
        let target = self.resolve_table_or_template(&ctx.collection_id, reference);
        if matches!(target, ReferenceTarget::None) {
            ctx.warn(WarningKind::UnresolvedTableReference { reference: reference.to_string() });
            ctx.captures.borrow_mut().insert(var.to_string(), CaptureVariable::default());
            return Ok(String::new());
        }

        let mut excluded = HashSet::new();
        let mut items = Vec::with_capacity(n as usize);
        let mut parts = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (text, sets, description, entry_id) = self.roll_target_once(ctx, target.clone(), &excluded, unique)?;
            if unique {
                if let Some(id) = &entry_id {
                    excluded.insert(id.clone());
                }
            }
            parts.push(text.clone());
            items.push(CaptureItem { value: text, sets, description });
        }
        ctx.captures.borrow_mut().insert(var.to_string(), CaptureVariable { items });

        if silent { Ok(String::new()) } else { Ok(parts.join(separator.unwrap_or(", "))) }
    }

    /// `$var[index].chain` / `$var.count` (spec §4.10). Lookup order:
    /// the named capture-variable list first, then a capture-aware
    /// shared entry treated as the single item `$var[0]` would resolve
    /// to. Missing names, out-of-range indices, and chain failures are
    /// warnings, not errors — the expression renders empty.
    fn resolve_capture_access(
        &self,
        ctx: &GenerationContext,
        var: &str,
        index: Option<i64>,
        chain: &[ChainSegment],
        separator: Option<&str>,
    ) -> String {
        if matches!(chain, [ChainSegment::Count]) {
            if let Some(cv) = ctx.captures.borrow().get(var) {
                return cv.count().to_string();
            }
            if ctx.capture_shared.borrow().contains_key(var) {
                return "1".to_string();
            }
            ctx.warn(WarningKind::CaptureNotFound { name: var.to_string() });
            return String::new();
        }

        if let Some(cv) = ctx.captures.borrow().get(var).cloned() {
            return match index {
                Some(i) => match cv.get(i) {
                    Some(item) => self.resolve_chain(ctx, var, item, chain).unwrap_or_default(),
                    None => {
                        ctx.warn(WarningKind::CaptureIndexOutOfBounds { name: var.to_string(), index: i });
                        String::new()
                    }
                },
                None => {
                    let parts: Vec<String> =
                        cv.items.iter().filter_map(|item| self.resolve_chain(ctx, var, item, chain)).collect();
                    parts.join(separator.unwrap_or(", "))
                }
            };
        }

        if let Some(item) = ctx.capture_shared.borrow().get(var).cloned() {
            return self.resolve_chain(ctx, var, &item, chain).unwrap_or_default();
        }

        ctx.warn(WarningKind::CaptureNotFound { name: var.to_string() });
        String::new()
    }

    /// Walk a property chain through a `CaptureItem`'s `sets`, descending
    /// into `SetValue::Nested` for multi-segment chains. A string value
    /// reached with chain segments still remaining warns
    /// `ChainThroughString` and yields nothing rather than silently
    /// stringifying — the chain author asked for a property that does
    /// not exist on a leaf value.
    fn resolve_chain(&self, ctx: &GenerationContext, var: &str, item: &CaptureItem, chain: &[ChainSegment]) -> Option<String> {
        match chain {
            [] => Some(item.value.clone()),
            [ChainSegment::Description] => item.description.clone(),
            [ChainSegment::Count] => Some("1".to_string()),
            [ChainSegment::Property(p)] => match item.sets.get(p) {
                Some(SetValue::Text(t)) => Some(t.clone()),
                Some(SetValue::Nested(nested)) => Some(nested.value.clone()),
                None => {
                    ctx.warn(WarningKind::CapturePropertyMissing { name: var.to_string(), property: p.clone() });
                    None
                }
            },
            [ChainSegment::Property(p), rest @ ..] => match item.sets.get(p) {
                Some(SetValue::Nested(nested)) => self.resolve_chain(ctx, var, nested, rest),
                Some(SetValue::Text(_)) => {
                    ctx.warn(WarningKind::ChainThroughString { name: var.to_string(), property: p.clone() });
                    None
                }
                None => {
                    ctx.warn(WarningKind::CapturePropertyMissing { name: var.to_string(), property: p.clone() });
                    None
                }
            },
            [_, ..] => None,
        }
    }

    /// `{{collect:$var.@prop|unique}}` — the chosen property across
    /// every item of a capture-variable list (or the single item of a
    /// capture-aware shared), empties filtered out, optionally deduped.
    fn resolve_collect(&self, ctx: &GenerationContext, var: &str, property: &CollectProperty, unique: bool, separator: Option<&str>) -> String {
        let chain: Vec<ChainSegment> = match property {
            CollectProperty::Value => Vec::new(),
            CollectProperty::Property(p) => vec![ChainSegment::Property(p.clone())],
        };

        let mut values: Vec<String> = if let Some(cv) = ctx.captures.borrow().get(var).cloned() {
            cv.items.iter().filter_map(|item| self.resolve_chain(ctx, var, item, &chain)).collect()
        } else if let Some(item) = ctx.capture_shared.borrow().get(var).cloned() {
            self.resolve_chain(ctx, var, &item, &chain).into_iter().collect()
        } else {
            ctx.warn(WarningKind::CaptureNotFound { name: var.to_string() });
            Vec::new()
        };

        values.retain(|v| !v.is_empty());
        if unique {
            let mut seen = HashSet::new();
            values.retain(|v| seen.insert(v.clone()));
        }
        values.join(separator.unwrap_or(", "))
    }

    /// `{{again}}` / `{{again*3}}` / `{{again*unique}}` — re-roll the
    /// table currently being rolled, excluding the entry that picked the
    /// enclosing pattern (spec §4.9). A no-op outside a simple/collection
    /// table roll (no current table, or the table id no longer resolves).
    fn evaluate_again(&mut self, ctx: &mut GenerationContext, count: Option<&crate::template::token::CountSpec>, unique: bool) -> EngineResult<String> {
        let Some(table_id) = ctx.current_table_id.clone() else { return Ok(String::new()) };
        let Some(table) = self.collections.get(&ctx.collection_id).and_then(|c| c.document.find_table(&table_id)) else {
            return Ok(String::new());
        };

        let n = match count {
            Some(c) => self.resolve_count(ctx, c),
            None => 1,
        };
        let mut exclude = HashSet::new();
        if let Some(id) = &ctx.current_entry_id {
            exclude.insert(id.clone());
        }

        let mut parts = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let outcome = self.roll_table_with_exclude(ctx, table, &exclude, unique)?;
            if unique {
                if let Some(id) = &outcome.entry_id {
                    exclude.insert(id.clone());
                }
            }
            parts.push(outcome.text);
        }
        Ok(parts.join(", "))
    }

    /// `{{reference#name}}` — roll `reference` once and memoize it under
    /// `name` for the rest of this roll (spec §4.9): later occurrences of
    /// the same `#name` return the cached text instead of rolling again.
    fn evaluate_instance(&mut self, ctx: &mut GenerationContext, reference: &str, name: &str) -> EngineResult<String> {
        if let Some(cached) = ctx.instances.borrow().get(name) {
            return Ok(cached.text.clone());
        }

        let (text, result_type, assets) = match self.resolve_table_or_template(&ctx.collection_id, reference) {
            ReferenceTarget::Table(coll_id, table) => {
                let mut child = self.nested_for_collection(ctx, &coll_id);
                let outcome = self.roll_table(&mut child, table)?;
                (outcome.text, outcome.result_type, outcome.assets)
            }
            ReferenceTarget::Template(coll_id, template) => {
                let mut child = self.isolated_for_template(ctx, &coll_id);
                let outcome = self.roll_template(&mut child, template)?;
                (outcome.text, outcome.result_type, outcome.assets)
            }
            ReferenceTarget::None => {
                ctx.warn(WarningKind::UnresolvedTableReference { reference: reference.to_string() });
                (String::new(), None, None)
            }
        };

        ctx.instances
            .borrow_mut()
            .insert(name.to_string(), crate::context::InstanceResult { text: text.clone(), result_type, assets });
        Ok(text)
    }
}

/// Bridges [`template::conditional::ConditionResolver`] to an
/// [`Evaluator`] + [`GenerationContext`] pair so document-level
/// conditionals can call back into pattern evaluation for their `value`
/// (spec §4.4, §4.9 step 5).
pub(crate) struct ConditionalAdapter<'a, 'e> {
    pub(crate) evaluator: &'a mut Evaluator<'e>,
    pub(crate) ctx: &'a mut GenerationContext,
}

impl ConditionResolver for ConditionalAdapter<'_, '_> {
    fn resolve_variable(&self, name: &str) -> Option<String> {
        self.ctx.resolve_variable(name)
    }

    fn resolve_placeholder(&self, name: &str, property: &str) -> Option<String> {
        self.ctx.resolve_placeholder(name, property)
    }

    fn set_variable(&mut self, name: &str, value: String) {
        let source = self.ctx.current_table_id.clone().unwrap_or_default();
        self.ctx.set_shared_variable(name.to_string(), value, source);
    }

    /// `evaluate_pattern` on the trait returns a plain `String`: a
    /// structural error raised while evaluating a conditional's `value`
    /// (an unresolved table reference deep in a `{{...}}` expression, for
    /// instance) has nowhere to go but `unwrap_or_default`, swallowing it
    /// as empty text instead of aborting the roll. See DESIGN.md.
    fn evaluate_pattern(&mut self, pattern: &str) -> String {
        self.evaluator.evaluate_pattern(self.ctx, pattern).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::LoadedCollection;
    use crate::inheritance::InheritanceCache;
    use crate::template::token::CountSpec;
    use crate::{Document, DocumentMetadata, Entry, SimpleTable, Table, UniqueOverflowPolicy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn doc(tables: Vec<Table>) -> Document {
        Document {
            metadata: DocumentMetadata {
                name: "t".to_string(),
                namespace: "t".to_string(),
                version: "1".to_string(),
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

    fn harness(document: Document) -> (HashMap<String, LoadedCollection>, InheritanceCache) {
        let mut collections = HashMap::new();
        collections.insert("main".to_string(), LoadedCollection::build("main".to_string(), document));
        (collections, InheritanceCache::default())
    }

    #[test]
    fn dice_token_renders_total() {
        let (collections, mut cache) = harness(doc(vec![simple("t", vec![entry("t000", "x")])]));
        let mut rng = StdRng::seed_from_u64(1);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        let out = evaluator.evaluate_pattern(&mut ctx, "{{1d1}}").unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn unresolved_table_reference_warns_and_renders_empty() {
        let (collections, mut cache) = harness(doc(vec![simple("t", vec![entry("t000", "x")])]));
        let mut rng = StdRng::seed_from_u64(1);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        let out = evaluator.evaluate_pattern(&mut ctx, "{{ghost}}").unwrap();
        assert_eq!(out, "");
        assert!(ctx.warnings.borrow().contains(crate::WarningFlags::UNRESOLVED_TABLE_REFERENCE));
    }

    #[test]
    fn capture_multi_roll_populates_named_capture_and_joins_text() {
        let (collections, mut cache) =
            harness(doc(vec![simple("enemies", vec![entry("enemies000", "Goblin"), entry("enemies001", "Orc")])]));
        let mut rng = StdRng::seed_from_u64(3);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        let out = evaluator.evaluate_pattern(&mut ctx, "{{2*enemies >> $foes}}").unwrap();
        assert_eq!(out.split(", ").count(), 2);
        assert_eq!(ctx.captures.borrow().get("foes").unwrap().count(), 2);
    }

    #[test]
    fn capture_access_count_reads_capture_variable_length() {
        let (collections, mut cache) =
            harness(doc(vec![simple("enemies", vec![entry("enemies000", "Goblin")])]));
        let mut rng = StdRng::seed_from_u64(5);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        evaluator.evaluate_pattern(&mut ctx, "{{1*enemies >> $foes}}").unwrap();
        let out = evaluator.evaluate_pattern(&mut ctx, "{{$foes.count}}").unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn again_excludes_current_entry_id() {
        let (collections, mut cache) = harness(doc(vec![simple("t", vec![entry("t000", "A"), entry("t001", "B")])]));
        let mut rng = StdRng::seed_from_u64(2);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        ctx.current_table_id = Some("t".to_string());
        ctx.current_entry_id = Some("t000".to_string());
        let out = evaluator.evaluate_pattern(&mut ctx, "{{again*unique}}").unwrap();
        assert_eq!(out, "B");
    }

    #[test]
    fn collect_filters_empty_and_dedupes_when_unique() {
        let (collections, mut cache) = harness(doc(Vec::new()));
        let mut rng = StdRng::seed_from_u64(1);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        ctx.captures.borrow_mut().insert(
            "foes".to_string(),
            CaptureVariable {
                items: vec![CaptureItem::leaf("Goblin"), CaptureItem::leaf(""), CaptureItem::leaf("Goblin")],
            },
        );
        let out = evaluator.resolve_collect(&ctx, "foes", &CollectProperty::Value, true, None);
        assert_eq!(out, "Goblin");
    }

    #[test]
    fn resolve_count_dice_variant_rolls_with_shared_rng() {
        let (collections, mut cache) = harness(doc(Vec::new()));
        let mut rng = StdRng::seed_from_u64(9);
        let mut evaluator = Evaluator { collections: &collections, inheritance_cache: &mut cache, rng: &mut rng };
        let mut ctx = GenerationContext::new("main".to_string(), HashMap::new(), HashSet::new(), false);
        let n = evaluator.resolve_count(&mut ctx, &CountSpec::Dice("1d1".to_string()));
        assert_eq!(n, 1);
    }
}
