//! Self-describing snapshots of changed content items.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::types::{ItemId, LocaleId, SectionId, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Entry {
        section_id: Option<SectionId>,
        type_id: Option<TypeId>,
    },
    Category,
    /// A nested component owned by another item.
    Block,
    Other,
}

impl ContentKind {
    pub fn is_block(self) -> bool {
        matches!(self, ContentKind::Block)
    }

    /// Section and type of a typed entry, when both are known.
    pub fn entry_binding_key(self) -> Option<(SectionId, TypeId)> {
        match self {
            ContentKind::Entry {
                section_id: Some(section),
                type_id: Some(type_id),
            } => Some((section, type_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Entry,
    Category,
    Block,
}

/// An item one relation hop away from the changed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedItem {
    pub kind: RelationKind,
    pub id: ItemId,
    pub uri: Option<String>,
    /// For blocks: the URI of the owning item.
    pub owner_uri: Option<String>,
}

impl RelatedItem {
    /// URI to invalidate for this relation. Blocks resolve to their owner.
    pub fn invalidation_uri(&self) -> Option<&str> {
        let uri = match self.kind {
            RelationKind::Block => self.owner_uri.as_deref(),
            RelationKind::Entry | RelationKind::Category => self.uri.as_deref(),
        };
        uri.filter(|uri| !uri.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub id: ItemId,
    pub kind: ContentKind,
    pub uri: Option<String>,
    pub site: Option<LocaleId>,
    pub uris_by_site: BTreeMap<LocaleId, String>,
    pub owner_uri: Option<String>,
    pub related_by_site: BTreeMap<LocaleId, Vec<RelatedItem>>,
}

impl ContentSnapshot {
    pub fn new(id: ItemId, kind: ContentKind) -> Self {
        Self {
            id,
            kind,
            uri: None,
            site: None,
            uris_by_site: BTreeMap::new(),
            owner_uri: None,
            related_by_site: BTreeMap::new(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_site(mut self, site: LocaleId) -> Self {
        self.site = Some(site);
        self
    }

    pub fn with_site_uri(mut self, site: LocaleId, uri: impl Into<String>) -> Self {
        self.uris_by_site.insert(site, uri.into());
        self
    }

    pub fn with_owner_uri(mut self, uri: impl Into<String>) -> Self {
        self.owner_uri = Some(uri.into());
        self
    }

    pub fn with_related(mut self, site: LocaleId, related: RelatedItem) -> Self {
        self.related_by_site.entry(site).or_default().push(related);
        self
    }

    /// True when the item has a URI of its own in any site.
    pub fn has_uri(&self) -> bool {
        self.uri.as_deref().is_some_and(|uri| !uri.is_empty())
            || self.uris_by_site.values().any(|uri| !uri.is_empty())
    }
}

/// Read access to the content graph of the host application.
///
/// The snapshot itself is the default graph; a live lookup can replace it.
#[async_trait]
pub trait ContentGraph: Send + Sync {
    /// URI of `item` in `site`.
    async fn uri_for_site(&self, item: &ContentSnapshot, site: &LocaleId) -> Option<String>;

    /// URI of the item owning `item`, for nested blocks.
    async fn owner_uri(&self, item: &ContentSnapshot, site: &LocaleId) -> Option<String>;

    /// Items of `kind` directly related to `item` in `site`.
    async fn related(
        &self,
        item: &ContentSnapshot,
        site: &LocaleId,
        kind: RelationKind,
    ) -> Vec<RelatedItem>;
}

/// Graph answering every question from the snapshot payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotGraph;

#[async_trait]
impl ContentGraph for SnapshotGraph {
    async fn uri_for_site(&self, item: &ContentSnapshot, site: &LocaleId) -> Option<String> {
        item.uris_by_site
            .get(site)
            .or(item.uri.as_ref())
            .filter(|uri| !uri.is_empty())
            .cloned()
    }

    async fn owner_uri(&self, item: &ContentSnapshot, _site: &LocaleId) -> Option<String> {
        item.owner_uri.clone().filter(|uri| !uri.is_empty())
    }

    async fn related(
        &self,
        item: &ContentSnapshot,
        site: &LocaleId,
        kind: RelationKind,
    ) -> Vec<RelatedItem> {
        item.related_by_site
            .get(site)
            .map(|items| {
                items
                    .iter()
                    .filter(|related| related.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
