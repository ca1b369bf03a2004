//! Expansion of abstract targets into concrete per-host URLs.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::domain::hosts::HostRegistry;
use crate::domain::targets::{HOME_ALIAS, InvalidationTarget};
use crate::domain::types::{HostId, LocaleId};

/// One URL to purge on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandedTarget {
    pub host_id: HostId,
    pub host_name: String,
    /// Locale of the originating target; `None` when it matched every locale.
    pub locale: Option<LocaleId>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct HostFanout {
    registry: Arc<HostRegistry>,
    add_trailing_slashes: bool,
}

impl HostFanout {
    pub fn new(registry: Arc<HostRegistry>, add_trailing_slashes: bool) -> Self {
        Self {
            registry,
            add_trailing_slashes,
        }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Expand one target across every matching host and locale.
    pub fn expand(&self, target: &InvalidationTarget) -> Vec<ExpandedTarget> {
        self.expand_all(std::slice::from_ref(target))
    }

    /// Expand a batch of targets; URLs composed more than once are kept once.
    pub fn expand_all(&self, targets: &[InvalidationTarget]) -> Vec<ExpandedTarget> {
        if self.registry.is_empty() {
            warn!(
                targets = targets.len(),
                "no cache hosts configured; nothing to purge"
            );
            return Vec::new();
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut expanded = Vec::new();

        for target in targets {
            let path = fanout_path(&target.uri);
            for host in self.registry.matching(target.host.as_ref()) {
                for (locale, base_url) in &host.urls_by_locale {
                    if target
                        .locale
                        .as_ref()
                        .is_some_and(|wanted| wanted != locale)
                    {
                        continue;
                    }

                    let url = compose_url(base_url, path, self.add_trailing_slashes);
                    if seen.insert(url.clone()) {
                        expanded.push(ExpandedTarget {
                            host_id: host.id.clone(),
                            host_name: host.host_name.clone(),
                            locale: target.locale.clone(),
                            url,
                        });
                    }
                }
            }
        }

        expanded
    }
}

fn fanout_path(uri: &str) -> &str {
    if uri == HOME_ALIAS {
        ""
    } else {
        uri.trim_end_matches('/')
    }
}

fn compose_url(base_url: &str, path: &str, trailing_slash: bool) -> String {
    let mut url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    if trailing_slash && !path.is_empty() {
        url.push('/');
    }
    url
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::hosts::{HostDefinition, HostUrls, SiteLayout};

    fn registry(definitions: Vec<HostDefinition>) -> Arc<HostRegistry> {
        let layout = SiteLayout {
            sites: vec![LocaleId::new("en"), LocaleId::new("fr")],
            default_site_url: "https://default.example".to_string(),
        };
        Arc::new(HostRegistry::new(definitions, &layout))
    }

    fn www() -> HostDefinition {
        HostDefinition {
            id: HostId::new("www"),
            host_name: "www.example.com".to_string(),
            urls: HostUrls::PerLocale(BTreeMap::from([
                (LocaleId::new("en"), "https://example.com".to_string()),
                (LocaleId::new("fr"), "https://example.fr/".to_string()),
            ])),
            admin_ip: None,
            admin_port: None,
            admin_secret: None,
        }
    }

    fn urls(expanded: &[ExpandedTarget]) -> Vec<&str> {
        expanded.iter().map(|target| target.url.as_str()).collect()
    }

    #[test]
    fn null_locale_expands_to_every_locale_of_the_host() {
        let fanout = HostFanout::new(registry(vec![www()]), false);
        let expanded = fanout.expand(&InvalidationTarget::element("/blog/post-1", None));

        assert_eq!(
            urls(&expanded),
            vec![
                "https://example.com/blog/post-1",
                "https://example.fr/blog/post-1"
            ]
        );
        assert!(expanded.iter().all(|target| target.host_name == "www.example.com"));
    }

    #[test]
    fn locale_and_host_filters_apply() {
        let mut other = www();
        other.id = HostId::new("other");
        let fanout = HostFanout::new(registry(vec![www(), other]), false);

        let target = InvalidationTarget::element("/a", Some(LocaleId::new("fr")))
            .for_host(Some(HostId::new("www")));
        let expanded = fanout.expand(&target);

        assert_eq!(urls(&expanded), vec!["https://example.fr/a"]);
        assert_eq!(expanded[0].locale, Some(LocaleId::new("fr")));
    }

    #[test]
    fn trailing_slash_is_added_except_for_root() {
        let fanout = HostFanout::new(registry(vec![www()]), true);
        let en = Some(LocaleId::new("en"));

        let page = fanout.expand(&InvalidationTarget::element("/blog", en.clone()));
        assert_eq!(urls(&page), vec!["https://example.com/blog/"]);

        let root = fanout.expand(&InvalidationTarget::element("/", en));
        assert_eq!(urls(&root), vec!["https://example.com/"]);
    }

    #[test]
    fn identical_urls_collapse_across_targets() {
        let mut shared = www();
        shared.urls = HostUrls::Shared("https://example.com".to_string());
        let fanout = HostFanout::new(registry(vec![shared]), false);

        let targets = vec![
            InvalidationTarget::element("/a", Some(LocaleId::new("en"))),
            InvalidationTarget::element("/a", Some(LocaleId::new("fr"))),
        ];
        let expanded = fanout.expand_all(&targets);

        assert_eq!(urls(&expanded), vec!["https://example.com/a"]);
        assert_eq!(expanded[0].locale, Some(LocaleId::new("en")));
    }

    #[test]
    fn empty_registry_produces_nothing() {
        let fanout = HostFanout::new(registry(Vec::new()), false);
        assert!(fanout.expand(&InvalidationTarget::element("/a", None)).is_empty());
    }
}
