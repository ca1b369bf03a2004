//! In-memory repository implementations used without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::repos::{
    BindingFilter, BindingsRepo, RepoError, TrackedUri, UriTrackingRepo, uri_hash,
};
use crate::domain::bindings::{Binding, BindingCount, NewBinding};
use crate::domain::targets::normalize_uri;
use crate::domain::types::{ItemId, LocaleId, SectionId, TypeId};

#[derive(Debug, Clone)]
struct UriRecord {
    uri: String,
    locale: Option<LocaleId>,
    items: Vec<ItemId>,
}

#[derive(Debug, Default)]
struct State {
    bindings: Vec<Binding>,
    /// Keyed by URI hash; insertion order kept by `order`.
    uris: BTreeMap<String, UriRecord>,
    order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepositories {
    state: Mutex<State>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BindingsRepo for InMemoryRepositories {
    async fn list_bindings(
        &self,
        section_id: SectionId,
        filter: &BindingFilter,
    ) -> Result<Vec<Binding>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .bindings
            .iter()
            .filter(|binding| binding.section_id == section_id && filter.matches(binding))
            .cloned()
            .collect())
    }

    async fn clear_bindings(&self, section_id: SectionId) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.bindings.len();
        state
            .bindings
            .retain(|binding| binding.section_id != section_id);
        Ok((before - state.bindings.len()) as u64)
    }

    async fn replace_bindings(
        &self,
        section_id: SectionId,
        bindings_by_type: BTreeMap<TypeId, Vec<NewBinding>>,
    ) -> Result<Vec<Binding>, RepoError> {
        let mut inserted = Vec::new();
        for (type_id, bindings) in bindings_by_type {
            for binding in bindings {
                let binding = Binding::new(section_id, type_id, binding.bind_type, binding.query)
                    .map_err(|err| RepoError::invalid_input(err.to_string()))?;
                inserted.push(binding);
            }
        }

        let mut state = self.state.lock().await;
        state
            .bindings
            .retain(|binding| binding.section_id != section_id);
        state.bindings.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn binding_counts(&self) -> Result<Vec<BindingCount>, RepoError> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<SectionId, u64> = BTreeMap::new();
        for binding in &state.bindings {
            *counts.entry(binding.section_id).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(section_id, bindings)| BindingCount {
                section_id,
                bindings,
            })
            .collect())
    }
}

#[async_trait]
impl UriTrackingRepo for InMemoryRepositories {
    async fn record_uri(
        &self,
        item_id: ItemId,
        uri: &str,
        locale: Option<LocaleId>,
    ) -> Result<(), RepoError> {
        if uri.trim().is_empty() {
            return Err(RepoError::invalid_input("uri must not be blank"));
        }

        let uri = normalize_uri(uri);
        let hash = uri_hash(&uri);
        let mut state = self.state.lock().await;
        if !state.uris.contains_key(&hash) {
            state.order.push(hash.clone());
        }
        let record = state.uris.entry(hash).or_insert_with(|| UriRecord {
            uri,
            locale: None,
            items: Vec::new(),
        });
        record.locale = locale;
        if !record.items.contains(&item_id) {
            record.items.push(item_id);
        }
        Ok(())
    }

    async fn uris_for(&self, item_id: ItemId) -> Result<Vec<TrackedUri>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|hash| state.uris.get(hash))
            .filter(|record| record.items.contains(&item_id))
            .map(|record| TrackedUri {
                uri: record.uri.clone(),
                locale: record.locale.clone(),
            })
            .collect())
    }

    async fn consume_uris(&self, item_id: ItemId, uris: &[String]) -> Result<u64, RepoError> {
        let hashes: Vec<String> = uris.iter().map(|uri| uri_hash(uri)).collect();
        let mut state = self.state.lock().await;
        let State {
            uris: records,
            order,
            ..
        } = &mut *state;

        let mut removed = 0;
        order.retain(|hash| {
            let consumed = hashes.contains(hash)
                && records
                    .get(hash)
                    .is_some_and(|record| record.items.contains(&item_id));
            if consumed {
                records.remove(hash);
                removed += 1;
            }
            !consumed
        });
        Ok(removed)
    }

    async fn forget_uri(&self, uri: &str) -> Result<bool, RepoError> {
        let hash = uri_hash(uri);
        let mut state = self.state.lock().await;
        let existed = state.uris.remove(&hash).is_some();
        state.order.retain(|candidate| candidate != &hash);
        Ok(existed)
    }
}
