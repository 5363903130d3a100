//! Document validator (spec §6 "Validation").
//!
//! A pure scan over a [`Document`] producing a flat list of issues —
//! the same "scan the input once, produce structured diagnostics"
//! shape as `astorion::engine::trigger`'s bucket/phrase scan, except
//! here the output feeds [`crate::errors::EngineError::ValidationFailed`]
//! instead of gating rule activation. An empty result means the
//! document is structurally sound; the core engine does not call this
//! itself before a roll (per spec §6, validation is an opinion an
//! external caller asks for), but [`crate::api::Engine::load_collection`]
//! runs it and refuses to load a document that fails.

use crate::Document;

/// Only spec version currently understood by this engine. Spec §6 says
/// "unsupported spec version" must be rejected but does not enumerate a
/// version list, so a single exact-match version is the conservative
/// reading until a second version ever needs support.
const SUPPORTED_SPEC_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyName,
    InvalidNamespace { namespace: String },
    UnsupportedSpecVersion { version: String },
    MissingTableId { index: usize },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::EmptyName => write!(f, "metadata.name must not be empty"),
            ValidationIssue::InvalidNamespace { namespace } => write!(f, "metadata.namespace '{namespace}' does not match the required pattern"),
            ValidationIssue::UnsupportedSpecVersion { version } => write!(f, "unsupported spec version '{version}'"),
            ValidationIssue::MissingTableId { index } => write!(f, "tables[{index}] has no id"),
        }
    }
}

/// Validate `document`, returning every issue found (empty = valid).
pub(crate) fn validate(document: &Document) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if document.metadata.name.trim().is_empty() {
        issues.push(ValidationIssue::EmptyName);
    }

    if !namespace_pattern().is_match(&document.metadata.namespace) {
        issues.push(ValidationIssue::InvalidNamespace { namespace: document.metadata.namespace.clone() });
    }

    if document.metadata.spec_version != SUPPORTED_SPEC_VERSION {
        issues.push(ValidationIssue::UnsupportedSpecVersion { version: document.metadata.spec_version.clone() });
    }

    for (i, table) in document.tables.iter().enumerate() {
        if table.id().trim().is_empty() {
            issues.push(ValidationIssue::MissingTableId { index: i });
        }
    }

    issues
}

fn namespace_pattern() -> &'static regex::Regex {
    regex!(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentMetadata, SimpleTable, Table, UniqueOverflowPolicy};
    use std::collections::HashMap;

    fn base_document() -> Document {
        Document {
            metadata: DocumentMetadata {
                name: "Loot Tables".to_string(),
                namespace: "loot.core".to_string(),
                version: "1.0.0".to_string(),
                spec_version: SUPPORTED_SPEC_VERSION.to_string(),
                max_recursion_depth: 64,
                max_explosions: 100,
                max_inheritance_depth: 16,
                unique_overflow: UniqueOverflowPolicy::Stop,
            },
            imports: Vec::new(),
            variables: HashMap::new(),
            shared: Vec::new(),
            conditionals: Vec::new(),
            tables: Vec::new(),
            templates: Vec::new(),
        }
    }

    #[test]
    fn well_formed_document_has_no_issues() {
        assert!(validate(&base_document()).is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut doc = base_document();
        doc.metadata.name = "  ".to_string();
        assert!(validate(&doc).contains(&ValidationIssue::EmptyName));
    }

    #[test]
    fn malformed_namespace_is_rejected() {
        let mut doc = base_document();
        doc.metadata.namespace = "1bad.ns".to_string();
        assert!(matches!(validate(&doc).as_slice(), [ValidationIssue::InvalidNamespace { .. }]));
    }

    #[test]
    fn unsupported_spec_version_is_rejected() {
        let mut doc = base_document();
        doc.metadata.spec_version = "2.0".to_string();
        assert_eq!(validate(&doc), vec![ValidationIssue::UnsupportedSpecVersion { version: "2.0".to_string() }]);
    }

    #[test]
    fn table_without_id_is_rejected() {
        let mut doc = base_document();
        doc.tables.push(Table::Simple(SimpleTable {
            id: String::new(),
            entries: Vec::new(),
            default_sets: Vec::new(),
            extends: None,
            shared: Vec::new(),
            hidden: false,
        }));
        assert_eq!(validate(&doc), vec![ValidationIssue::MissingTableId { index: 0 }]);
    }
}
