//! Resolution of changed content items into invalidation targets.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::application::bindings::BindingEvaluator;
use crate::application::repos::{RepoError, UriTrackingRepo};
use crate::domain::content::{ContentGraph, ContentSnapshot, RelationKind};
use crate::domain::targets::{BanDescriptor, InvalidationTarget, normalize_uri};
use crate::domain::types::{ItemId, LocaleId};

const NO_LOCALE_KEY: &str = "<none>";

const RELATION_ORDER: [RelationKind; 3] = [
    RelationKind::Entry,
    RelationKind::Category,
    RelationKind::Block,
];

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub sites: Vec<LocaleId>,
    /// Resolve element URIs only in the notifying item's site instead of every site.
    pub respect_item_locale: bool,
    /// Normalized URI -> extra URIs purged alongside it.
    pub purge_uri_map: BTreeMap<String, Vec<String>>,
}

/// Targets produced for one change notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub purge: Vec<InvalidationTarget>,
    pub bans: Vec<BanDescriptor>,
    /// Tracked URIs read per item, released by [`UriResolver::consume_tracked`].
    pub tracked: BTreeMap<ItemId, Vec<String>>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.purge.is_empty() && self.bans.is_empty()
    }
}

#[derive(Clone)]
pub struct UriResolver {
    settings: ResolverSettings,
    bindings: BindingEvaluator,
    tracking: Arc<dyn UriTrackingRepo>,
}

impl UriResolver {
    pub fn new(
        settings: ResolverSettings,
        bindings: BindingEvaluator,
        tracking: Arc<dyn UriTrackingRepo>,
    ) -> Self {
        Self {
            settings,
            bindings,
            tracking,
        }
    }

    /// Resolve one item. Tracked URIs are read but stay stored until consumed.
    pub async fn resolve(
        &self,
        item: &ContentSnapshot,
        graph: &dyn ContentGraph,
        locale: Option<&LocaleId>,
        include_related: bool,
    ) -> Result<Resolution, RepoError> {
        self.resolve_all(std::slice::from_ref(item), graph, locale, include_related)
            .await
    }

    /// Resolve a batch of items into one deduplicated purge list plus every ban.
    /// Items without an explicit `locale` use their own site.
    pub async fn resolve_all(
        &self,
        items: &[ContentSnapshot],
        graph: &dyn ContentGraph,
        locale: Option<&LocaleId>,
        include_related: bool,
    ) -> Result<Resolution, RepoError> {
        let mut purge = Vec::new();
        let mut bans = Vec::new();
        let mut tracked_by_item = BTreeMap::new();

        for item in items {
            let item_locale = locale.or(item.site.as_ref());
            purge.extend(
                self.element_targets(item, graph, item_locale, include_related)
                    .await,
            );

            let tracked = self.tracking.uris_for(item.id).await?;
            if !tracked.is_empty() {
                tracked_by_item.insert(
                    item.id,
                    tracked.iter().map(|tracked| tracked.uri.clone()).collect(),
                );
            }
            purge.extend(tracked.into_iter().map(|tracked| tracked.into_target()));

            if let Some((section_id, type_id)) = item.kind.entry_binding_key() {
                purge.extend(self.bindings.purge_targets(section_id, type_id).await?);
                bans.extend(self.bindings.ban_descriptors(section_id, type_id).await?);
            }
        }

        purge.extend(self.mapped_targets(&purge));
        let purge = dedup_targets(purge);

        debug!(
            items = items.len(),
            purge = purge.len(),
            bans = bans.len(),
            "resolved invalidation targets"
        );

        Ok(Resolution {
            purge,
            bans,
            tracked: tracked_by_item,
        })
    }

    /// Delete tracked URIs read by a resolution. Call once its targets are queued.
    pub async fn consume_tracked(
        &self,
        tracked: &BTreeMap<ItemId, Vec<String>>,
    ) -> Result<u64, RepoError> {
        let mut consumed = 0;
        for (item_id, uris) in tracked {
            consumed += self.tracking.consume_uris(*item_id, uris).await?;
        }
        Ok(consumed)
    }

    fn sites_for<'a>(&'a self, locale: Option<&'a LocaleId>) -> Vec<&'a LocaleId> {
        match locale {
            Some(locale) if self.settings.respect_item_locale => vec![locale],
            _ => self.settings.sites.iter().collect(),
        }
    }

    async fn element_targets(
        &self,
        item: &ContentSnapshot,
        graph: &dyn ContentGraph,
        locale: Option<&LocaleId>,
        include_related: bool,
    ) -> Vec<InvalidationTarget> {
        let mut targets = Vec::new();

        for site in self.sites_for(locale) {
            if item.has_uri()
                && let Some(uri) = graph.uri_for_site(item, site).await
            {
                targets.push(InvalidationTarget::element(&uri, Some(site.clone())));
            }

            if item.kind.is_block()
                && let Some(owner) = graph.owner_uri(item, site).await
            {
                targets.push(InvalidationTarget::element(&owner, Some(site.clone())));
            }

            if include_related {
                for kind in RELATION_ORDER {
                    for related in graph.related(item, site, kind).await {
                        if let Some(uri) = related.invalidation_uri() {
                            targets.push(InvalidationTarget::element(uri, Some(site.clone())));
                        }
                    }
                }
            }
        }

        targets
    }

    fn mapped_targets(&self, targets: &[InvalidationTarget]) -> Vec<InvalidationTarget> {
        if self.settings.purge_uri_map.is_empty() {
            return Vec::new();
        }

        targets
            .iter()
            .filter_map(|target| {
                self.settings
                    .purge_uri_map
                    .get(&target.uri)
                    .map(|extra| (target, extra))
            })
            .flat_map(|(target, extra)| {
                extra
                    .iter()
                    .map(move |uri| InvalidationTarget::element(uri, target.locale.clone()))
            })
            .collect()
    }
}

/// Collapse targets sharing `(locale, uri)`; a missing locale groups as its own key.
pub fn dedup_targets(targets: Vec<InvalidationTarget>) -> Vec<InvalidationTarget> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    targets
        .into_iter()
        .filter(|target| {
            let locale = target
                .locale
                .as_ref()
                .map_or(NO_LOCALE_KEY, LocaleId::as_str)
                .to_string();
            seen.insert((locale, target.uri.clone()))
        })
        .collect()
}

/// Normalize the keys and values of a configured purge map.
pub fn normalize_uri_map(map: BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    map.into_iter()
        .map(|(key, values)| {
            (
                normalize_uri(&key),
                values.iter().map(|value| normalize_uri(value)).collect(),
            )
        })
        .collect()
}
