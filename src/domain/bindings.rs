use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::types::{BindType, SectionId, TypeId};

/// A rule mapping a section/type pair to an extra purge or ban directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub section_id: SectionId,
    pub type_id: TypeId,
    pub bind_type: BindType,
    pub query: String,
}

impl Binding {
    pub fn new(
        section_id: SectionId,
        type_id: TypeId,
        bind_type: BindType,
        query: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let query = query.into().trim().to_string();
        if query.is_empty() {
            return Err(DomainError::invalid("query", "binding query must not be empty"));
        }
        if query.contains(['\r', '\n']) {
            return Err(DomainError::invalid("query", "binding query must be a single line"));
        }
        Ok(Self {
            section_id,
            type_id,
            bind_type,
            query,
        })
    }
}

/// A binding awaiting insertion under a known section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinding {
    pub type_id: TypeId,
    pub bind_type: BindType,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BindingCount {
    pub section_id: SectionId,
    pub bindings: u64,
}
