//! Procedural content generation engine for random tables.
//!
//! A [`Document`] declares tables (weighted lists of entries),
//! templates (named patterns), and auxiliary constructs (conditionals,
//! shared variables, imports). [`Engine`] loads documents, resolves
//! references and inheritance between them, and evaluates a named entry
//! point to produce a text artifact plus structured side-channel data
//! (captures, collected descriptions, an optional execution trace).
//!
//! ## How the parts work together
//!
//! ```text
//! Document ── Engine::load_collection ──▶ LoadedCollection
//!                                            (collection.rs: id indexes, imports)
//!                                               │
//! Engine::roll(table_id) ─────────────────────┐ │
//!                                              ▼ ▼
//!                                   engine::evaluator::roll_table
//!                                        │     ▲
//!                    inheritance.rs ◀────┘     │
//!                    reference.rs  ◀───────────┤
//!                    selectors.rs  ◀───────────┤
//!               template::token.rs (tokenize)  │
//!               engine::dispatch (per-token)  ─┘
//!                        │
//!                        ▼
//!                 GenerationContext (context.rs)
//! ```
//!
//! `Document`, `Table`, `Entry`, and `Template` are the closed data
//! model the rest of the crate dispatches on — the direct counterpart
//! of a parser's `Token`/`TokenKind` sum type, except here the sum type
//! describes declarative content rather than matched syntax.

#[macro_use]
mod macros;

mod api;
mod collection;
mod context;
mod dice;
mod engine;
mod errors;
mod inheritance;
mod math_expr;
mod reference;
mod selectors;
mod template;
mod validation;

pub use api::{
    CaptureOutput, DescriptionEntry, Engine, ExpressionOutput, RawPatternOptions, ResultMetadata, RollOptions, RollResult,
};
pub use context::{WarningFlags, WarningKind};
pub use engine::trace::TraceOutput;
pub use errors::{EngineError, EngineResult};
pub use validation::ValidationIssue;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Document model ----------------------------------------------------------

/// Top-level declarative document: metadata, imports, variables, tables
/// and templates. Immutable once loaded (invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Document-level shared variable declarations, in declaration order
    /// (order matters: later entries may reference earlier ones, §4.8).
    #[serde(default)]
    pub shared: Vec<SharedVar>,
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub spec_version: String,
    #[serde(default = "default_recursion_depth")]
    pub max_recursion_depth: u32,
    #[serde(default = "default_explosion_limit")]
    pub max_explosions: u32,
    #[serde(default = "default_inheritance_depth")]
    pub max_inheritance_depth: u32,
    #[serde(default)]
    pub unique_overflow: UniqueOverflowPolicy,
}

fn default_recursion_depth() -> u32 {
    64
}
fn default_explosion_limit() -> u32 {
    100
}
fn default_inheritance_depth() -> u32 {
    16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniqueOverflowPolicy {
    #[default]
    Stop,
    Reset,
    Wrap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub alias: String,
    /// Collection id of the imported document (the persistence/import
    /// layers that turn a path or URL into a loaded collection are
    /// external collaborators per spec §1; by the time the engine sees
    /// an `Import`, it only needs the target collection's id).
    pub reference: String,
}

/// A named `key` → `pattern` pair, used for both document/table/template
/// level shared variables and for an entry's `sets`. Kept as an ordered
/// `Vec` (not a map) because declaration order is semantically load-
/// bearing (§4.8, §3 invariant 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedPattern {
    pub key: String,
    pub pattern: String,
}

pub type SharedVar = KeyedPattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conditional {
    pub when: String,
    pub action: ActionKind,
    pub value: String,
    /// Used by `replace` (the regex to substitute) and by `setVariable`
    /// (the variable name to assign).
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Append,
    Prepend,
    Replace,
    SetVariable,
}

/// One of the three table variants (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Table {
    Simple(SimpleTable),
    Composite(CompositeTable),
    Collection(CollectionTable),
}

impl Table {
    pub fn id(&self) -> &str {
        match self {
            Table::Simple(t) => &t.id,
            Table::Composite(t) => &t.id,
            Table::Collection(t) => &t.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleTable {
    pub id: String,
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub default_sets: Vec<KeyedPattern>,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub shared: Vec<SharedVar>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    pub value: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub sets: Vec<KeyedPattern>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub assets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeTable {
    pub id: String,
    pub sources: Vec<Source>,
    /// Fallback result-type when neither the rolled entry nor the
    /// chosen source table supplies one (§4.5 "result-type precedence").
    #[serde(default)]
    pub result_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub table_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub result_type: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionTable {
    pub id: String,
    pub table_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub shared: Vec<SharedVar>,
    #[serde(default)]
    pub result_type: Option<String>,
}

impl Document {
    pub fn from_json(text: &str) -> serde_json::Result<Document> {
        serde_json::from_str(text)
    }

    pub(crate) fn find_table(&self, id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id() == id)
    }

    pub(crate) fn find_template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }
}

/// Synthesize a stable entry id from a table id and its ordinal position
/// (§3 invariant 3, §4.6 step 3: `{{parentId}}{{ordinal:3}}`).
pub(crate) fn synthesize_entry_id(table_id: &str, ordinal: usize) -> String {
    format!("{table_id}{ordinal:03}")
}

// --- Captured values -----------------------------------------------------

/// `{ value, sets, description? }` where `sets` values are themselves
/// strings or nested `CaptureItem`s (§3, §9 Design Notes "Recursive
/// nested values"). This recursion is what lets `$hero.@weapon.@rarity`
/// chain through sub-rolls instead of flattening to a string the moment
/// a set value is produced.
#[derive(Debug, Clone)]
pub struct CaptureItem {
    pub value: String,
    pub sets: HashMap<String, SetValue>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SetValue {
    Text(String),
    Nested(CaptureItem),
}

impl CaptureItem {
    pub(crate) fn leaf(value: impl Into<String>) -> Self {
        CaptureItem { value: value.into(), sets: HashMap::new(), description: None }
    }
}

/// A named list of `CaptureItem`s produced by `N*t >> $var` (§3).
#[derive(Debug, Clone, Default)]
pub struct CaptureVariable {
    pub items: Vec<CaptureItem>,
}

impl CaptureVariable {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Resolve a (possibly negative) index; negative indices wrap from
    /// the end (`-1` is the last item). Returns `None` out of bounds.
    pub(crate) fn get(&self, index: i64) -> Option<&CaptureItem> {
        let len = self.items.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            None
        } else {
            self.items.get(idx as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_three_digit_ordinals() {
        assert_eq!(synthesize_entry_id("colors", 0), "colors000");
        assert_eq!(synthesize_entry_id("colors", 12), "colors012");
        assert_eq!(synthesize_entry_id("colors", 345), "colors345");
    }

    #[test]
    fn capture_variable_negative_index_wraps() {
        let cv = CaptureVariable {
            items: vec![CaptureItem::leaf("a"), CaptureItem::leaf("b"), CaptureItem::leaf("c")],
        };
        assert_eq!(cv.get(-1).unwrap().value, "c");
        assert_eq!(cv.get(-3).unwrap().value, "a");
        assert!(cv.get(-4).is_none());
        assert!(cv.get(3).is_none());
        assert_eq!(cv.get(0).unwrap().value, "a");
    }
}
