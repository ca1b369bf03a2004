//! Repository traits describing persistence adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::bindings::{Binding, BindingCount, NewBinding};
use crate::domain::targets::{InvalidationTarget, normalize_uri};
use crate::domain::types::{BindType, ItemId, LocaleId, SectionId, TypeId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Filter for [`BindingsRepo::list_bindings`]. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct BindingFilter {
    pub type_id: Option<TypeId>,
    pub kinds: Option<Vec<BindType>>,
}

impl BindingFilter {
    pub fn for_type(type_id: TypeId) -> Self {
        Self {
            type_id: Some(type_id),
            kinds: None,
        }
    }

    pub fn with_kinds(mut self, kinds: &[BindType]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    pub fn matches(&self, binding: &Binding) -> bool {
        self.type_id.is_none_or(|type_id| binding.type_id == type_id)
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&binding.bind_type))
    }
}

#[async_trait]
pub trait BindingsRepo: Send + Sync {
    async fn list_bindings(
        &self,
        section_id: SectionId,
        filter: &BindingFilter,
    ) -> Result<Vec<Binding>, RepoError>;

    async fn clear_bindings(&self, section_id: SectionId) -> Result<u64, RepoError>;

    /// Clear every binding of `section_id`, then insert `bindings_by_type`.
    async fn replace_bindings(
        &self,
        section_id: SectionId,
        bindings_by_type: BTreeMap<TypeId, Vec<NewBinding>>,
    ) -> Result<Vec<Binding>, RepoError>;

    async fn binding_counts(&self) -> Result<Vec<BindingCount>, RepoError>;
}

/// A URI recorded against an item so it can be purged after the item moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedUri {
    pub uri: String,
    pub locale: Option<LocaleId>,
}

impl TrackedUri {
    pub fn into_target(self) -> InvalidationTarget {
        InvalidationTarget::tag(&self.uri, self.locale)
    }
}

#[async_trait]
pub trait UriTrackingRepo: Send + Sync {
    /// Upsert the URI record and link it to `item_id`.
    async fn record_uri(
        &self,
        item_id: ItemId,
        uri: &str,
        locale: Option<LocaleId>,
    ) -> Result<(), RepoError>;

    /// Every URI linked to `item_id`, oldest first. Nothing is deleted.
    async fn uris_for(&self, item_id: ItemId) -> Result<Vec<TrackedUri>, RepoError>;

    /// Delete the records of `uris` still linked to `item_id` once they have been
    /// handed to the job queue. URIs recorded since the read are left alone.
    async fn consume_uris(&self, item_id: ItemId, uris: &[String]) -> Result<u64, RepoError>;

    /// Delete the URI record; returns whether one existed.
    async fn forget_uri(&self, uri: &str) -> Result<bool, RepoError>;
}

/// Stable key of a tracked URI; equivalent spellings share one key.
pub fn uri_hash(uri: &str) -> String {
    use sha2::{Digest, Sha256};

    hex::encode(Sha256::digest(normalize_uri(uri).as_bytes()))
}
