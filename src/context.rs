//! Generation context (spec §4.8, §3).
//!
//! A per-roll mutable state object threaded through the recursive
//! evaluator. Most fields are shared across nested calls by reference —
//! here, by `Rc<RefCell<_>>`, the same pattern used for shared mutable
//! traversal state in `marinoandrea-brane::brane_ast::traversals::resolve`
//! — while `placeholders` gets a fresh shallow snapshot per nested scope
//! (§4.8 "context cloning").

use crate::errors::EngineResult;
use crate::{CaptureItem, CaptureVariable};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

bitflags::bitflags! {
    /// Coarse aggregate of which evaluation-warning kinds occurred
    /// during a roll, attached to the result for hosts that don't need
    /// the full trace (spec §7 "evaluation warnings").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WarningFlags: u16 {
        const UNRESOLVED_TABLE_REFERENCE    = 1 << 0;
        const UNKNOWN_VARIABLE              = 1 << 1;
        const UNKNOWN_PLACEHOLDER_PROPERTY  = 1 << 2;
        const CAPTURE_NOT_FOUND             = 1 << 3;
        const CAPTURE_INDEX_OUT_OF_BOUNDS   = 1 << 4;
        const CAPTURE_PROPERTY_MISSING      = 1 << 5;
        const CHAIN_THROUGH_STRING          = 1 << 6;
        const UNIQUE_OVERFLOW_STOPPED       = 1 << 7;
        const MATH_PARSE_FAILURE            = 1 << 8;
        const REGEX_COMPILE_FAILURE         = 1 << 9;
    }
}

/// One occurrence of an evaluation warning, carrying enough detail for
/// a trace leaf or a diagnostic channel (spec §9 "silently swallowed
/// evaluation warnings... implementers should surface warnings").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    UnresolvedTableReference { reference: String },
    UnknownVariable { name: String },
    UnknownPlaceholderProperty { name: String, property: String },
    CaptureNotFound { name: String },
    CaptureIndexOutOfBounds { name: String, index: i64 },
    CapturePropertyMissing { name: String, property: String },
    ChainThroughString { name: String, property: String },
    UniqueOverflowStopped { table: String },
    MathParseFailure { expr: String },
    RegexCompileFailure { pattern: String },
}

impl WarningKind {
    pub fn flag(&self) -> WarningFlags {
        match self {
            WarningKind::UnresolvedTableReference { .. } => WarningFlags::UNRESOLVED_TABLE_REFERENCE,
            WarningKind::UnknownVariable { .. } => WarningFlags::UNKNOWN_VARIABLE,
            WarningKind::UnknownPlaceholderProperty { .. } => WarningFlags::UNKNOWN_PLACEHOLDER_PROPERTY,
            WarningKind::CaptureNotFound { .. } => WarningFlags::CAPTURE_NOT_FOUND,
            WarningKind::CaptureIndexOutOfBounds { .. } => WarningFlags::CAPTURE_INDEX_OUT_OF_BOUNDS,
            WarningKind::CapturePropertyMissing { .. } => WarningFlags::CAPTURE_PROPERTY_MISSING,
            WarningKind::ChainThroughString { .. } => WarningFlags::CHAIN_THROUGH_STRING,
            WarningKind::UniqueOverflowStopped { .. } => WarningFlags::UNIQUE_OVERFLOW_STOPPED,
            WarningKind::MathParseFailure { .. } => WarningFlags::MATH_PARSE_FAILURE,
            WarningKind::RegexCompileFailure { .. } => WarningFlags::REGEX_COMPILE_FAILURE,
        }
    }
}

/// A shared variable's resolved value, tagged with the id of the table
/// or template that last set it (so a later `rollTable` of that same
/// source can tell "I set this" apart from "a parent set this").
#[derive(Debug, Clone)]
pub(crate) struct SharedValue {
    pub text: String,
    pub source_id: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DescriptionRecord {
    pub table_name: String,
    pub table_id: String,
    pub rolled_value: String,
    pub description: String,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceResult {
    pub text: String,
    pub result_type: Option<String>,
    pub assets: Option<Vec<String>>,
}

type Placeholders = HashMap<String, HashMap<String, String>>;

pub(crate) struct GenerationContext {
    pub collection_id: String,
    pub static_variables: Rc<HashMap<String, String>>,
    pub shared_variables: Rc<RefCell<HashMap<String, SharedValue>>>,
    pub document_shared_names: Rc<HashSet<String>>,
    pub capture_shared: Rc<RefCell<HashMap<String, CaptureItem>>>,
    /// Table id -> property -> value. Each nested scope owns its own
    /// shallow copy; mutations inside a sub-roll don't leak back up.
    pub placeholders: Placeholders,
    pub used_entries: Rc<RefCell<HashMap<String, HashSet<String>>>>,
    pub instances: Rc<RefCell<HashMap<String, InstanceResult>>>,
    pub captures: Rc<RefCell<HashMap<String, CaptureVariable>>>,
    pub descriptions: Rc<RefCell<Vec<DescriptionRecord>>>,
    pub current_table_id: Option<String>,
    pub current_entry_id: Option<String>,
    pub current_entry_description: Option<String>,
    pub recursion_depth: Rc<RefCell<u32>>,
    pub set_evaluation_in_progress: Rc<RefCell<HashSet<String>>>,
    pub trace: Option<Rc<RefCell<crate::engine::trace::TraceNode>>>,
    pub warnings: Rc<RefCell<WarningFlags>>,
}

impl GenerationContext {
    pub(crate) fn new(
        collection_id: String,
        static_variables: HashMap<String, String>,
        document_shared_names: HashSet<String>,
        enable_trace: bool,
    ) -> Self {
        GenerationContext {
            collection_id,
            static_variables: Rc::new(static_variables),
            shared_variables: Rc::new(RefCell::new(HashMap::new())),
            document_shared_names: Rc::new(document_shared_names),
            capture_shared: Rc::new(RefCell::new(HashMap::new())),
            placeholders: HashMap::new(),
            used_entries: Rc::new(RefCell::new(HashMap::new())),
            instances: Rc::new(RefCell::new(HashMap::new())),
            captures: Rc::new(RefCell::new(HashMap::new())),
            descriptions: Rc::new(RefCell::new(Vec::new())),
            current_table_id: None,
            current_entry_id: None,
            current_entry_description: None,
            recursion_depth: Rc::new(RefCell::new(0)),
            set_evaluation_in_progress: Rc::new(RefCell::new(HashSet::new())),
            trace: if enable_trace { Some(Rc::new(RefCell::new(crate::engine::trace::TraceNode::new("root")))) } else { None },
            warnings: Rc::new(RefCell::new(WarningFlags::empty())),
        }
    }

    /// A nested scope for recursing into the same collection: shares
    /// every mutable collaborator by `Rc` clone, but takes its own
    /// shallow placeholder snapshot (spec §4.8).
    pub(crate) fn nested(&self) -> Self {
        GenerationContext {
            collection_id: self.collection_id.clone(),
            static_variables: Rc::clone(&self.static_variables),
            shared_variables: Rc::clone(&self.shared_variables),
            document_shared_names: Rc::clone(&self.document_shared_names),
            capture_shared: Rc::clone(&self.capture_shared),
            placeholders: self.placeholders.clone(),
            used_entries: Rc::clone(&self.used_entries),
            instances: Rc::clone(&self.instances),
            captures: Rc::clone(&self.captures),
            descriptions: Rc::clone(&self.descriptions),
            current_table_id: self.current_table_id.clone(),
            current_entry_id: self.current_entry_id.clone(),
            current_entry_description: self.current_entry_description.clone(),
            recursion_depth: Rc::clone(&self.recursion_depth),
            set_evaluation_in_progress: Rc::clone(&self.set_evaluation_in_progress),
            trace: self.trace.clone(),
            warnings: Rc::clone(&self.warnings),
        }
    }

    /// An isolated scope for a cross-collection template reference
    /// (spec §4.8): fresh placeholders and fresh shared-variable maps
    /// scoped to `target_collection_id`/`target_static_variables`, so
    /// the imported template cannot pollute or read the caller's state.
    /// Recursion depth, used-entries, instances, captures, descriptions,
    /// the trace, and accumulated warnings remain shared — they track
    /// the whole roll, not a single collection's slice of it.
    pub(crate) fn isolated_for_template(
        &self,
        target_collection_id: String,
        target_static_variables: HashMap<String, String>,
        target_document_shared_names: HashSet<String>,
    ) -> Self {
        GenerationContext {
            collection_id: target_collection_id,
            static_variables: Rc::new(target_static_variables),
            shared_variables: Rc::new(RefCell::new(HashMap::new())),
            document_shared_names: Rc::new(target_document_shared_names),
            capture_shared: Rc::new(RefCell::new(HashMap::new())),
            placeholders: HashMap::new(),
            used_entries: Rc::clone(&self.used_entries),
            instances: Rc::clone(&self.instances),
            captures: Rc::clone(&self.captures),
            descriptions: Rc::clone(&self.descriptions),
            current_table_id: None,
            current_entry_id: None,
            current_entry_description: None,
            recursion_depth: Rc::clone(&self.recursion_depth),
            set_evaluation_in_progress: Rc::clone(&self.set_evaluation_in_progress),
            trace: self.trace.clone(),
            warnings: Rc::clone(&self.warnings),
        }
    }

    pub(crate) fn warn(&self, kind: WarningKind) {
        *self.warnings.borrow_mut() |= kind.flag();
        if let Some(trace) = &self.trace {
            trace.borrow_mut().push_warning(&kind);
        }
    }

    pub(crate) fn enter_recursion(&self, limit: u32, table: &str) -> EngineResult<()> {
        let mut depth = self.recursion_depth.borrow_mut();
        if *depth >= limit {
            return Err(crate::errors::EngineError::RecursionLimitExceeded { table: table.to_string(), limit });
        }
        *depth += 1;
        Ok(())
    }

    pub(crate) fn exit_recursion(&self) {
        let mut depth = self.recursion_depth.borrow_mut();
        *depth = depth.saturating_sub(1);
    }

    pub(crate) fn depth(&self) -> u32 {
        *self.recursion_depth.borrow()
    }

    /// Resolve a bare `$name` (spec §4.9 "variable" dispatch): capture-
    /// aware shared first, then shared, then static, else `None`.
    pub(crate) fn resolve_variable(&self, name: &str) -> Option<String> {
        if let Some(item) = self.capture_shared.borrow().get(name) {
            return Some(item.value.clone());
        }
        if let Some(v) = self.shared_variables.borrow().get(name) {
            return Some(v.text.clone());
        }
        self.static_variables.get(name).cloned()
    }

    pub(crate) fn all_variables_snapshot(&self) -> HashMap<String, String> {
        let mut out = (*self.static_variables).clone();
        for (k, v) in self.shared_variables.borrow().iter() {
            out.insert(k.clone(), v.text.clone());
        }
        for (k, v) in self.capture_shared.borrow().iter() {
            out.insert(k.clone(), v.value.clone());
        }
        out
    }

    pub(crate) fn resolve_placeholder(&self, name: &str, property: &str) -> Option<String> {
        if name == "self" && property == "description" {
            return self.current_entry_description.clone();
        }
        let key = if name == "self" { self.current_table_id.as_deref()? } else { name };
        self.placeholders.get(key)?.get(property).cloned()
    }

    pub(crate) fn set_shared_variable(&self, name: String, text: String, source_id: String) {
        self.shared_variables.borrow_mut().insert(name, SharedValue { text, source_id });
    }

    pub(crate) fn record_description(&self, table_name: String, table_id: String, rolled_value: String, description: String) {
        self.descriptions.borrow_mut().push(DescriptionRecord {
            table_name,
            table_id,
            rolled_value,
            description,
            depth: self.depth(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scope_shares_shared_variables_but_clones_placeholders() {
        let mut ctx = GenerationContext::new("c1".to_string(), HashMap::new(), HashSet::new(), false);
        ctx.placeholders.insert("t1".to_string(), HashMap::from([("k".to_string(), "v".to_string())]));
        ctx.set_shared_variable("hero".to_string(), "Legolas".to_string(), "race".to_string());

        let nested = ctx.nested();
        assert_eq!(nested.resolve_variable("hero").as_deref(), Some("Legolas"));
        assert_eq!(nested.resolve_placeholder("t1", "k").as_deref(), Some("v"));

        nested.set_shared_variable("hero".to_string(), "Gimli".to_string(), "race".to_string());
        assert_eq!(ctx.resolve_variable("hero").as_deref(), Some("Gimli"));
    }

    #[test]
    fn isolated_template_scope_does_not_see_caller_placeholders() {
        let mut ctx = GenerationContext::new("c1".to_string(), HashMap::new(), HashSet::new(), false);
        ctx.placeholders.insert("t1".to_string(), HashMap::from([("k".to_string(), "v".to_string())]));
        let isolated = ctx.isolated_for_template("c2".to_string(), HashMap::new(), HashSet::new());
        assert!(isolated.resolve_placeholder("t1", "k").is_none());
    }

    #[test]
    fn recursion_depth_is_shared_across_nested_scopes() {
        let ctx = GenerationContext::new("c1".to_string(), HashMap::new(), HashSet::new(), false);
        ctx.enter_recursion(5, "t").unwrap();
        let nested = ctx.nested();
        assert_eq!(nested.depth(), 1);
        nested.enter_recursion(5, "t").unwrap();
        assert_eq!(ctx.depth(), 2);
    }
}
