//! Abstract invalidation targets and ban requests.

use serde::{Deserialize, Serialize};

use super::types::{HostId, LocaleId, TargetKind};

/// Alias accepted for the site root.
pub const HOME_ALIAS: &str = "__home__";

/// Normalize a URI to an absolute path: a single leading `/` and no trailing `/`
/// unless the URI names the root. An empty URI (or the home alias) maps to `/`.
pub fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim();
    if trimmed == HOME_ALIAS {
        return "/".to_string();
    }

    let inner = trimmed.trim_matches('/');
    let mut normalized = String::with_capacity(inner.len() + 1);
    normalized.push('/');
    normalized.push_str(inner);
    normalized
}

/// An abstract target awaiting host fanout.
///
/// `locale == None` and `host == None` both mean "match any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidationTarget {
    pub uri: String,
    pub locale: Option<LocaleId>,
    pub host: Option<HostId>,
    pub kind: TargetKind,
}

impl InvalidationTarget {
    pub fn new(
        uri: &str,
        locale: Option<LocaleId>,
        kind: TargetKind,
        host: Option<HostId>,
    ) -> Self {
        Self {
            uri: normalize_uri(uri),
            locale,
            host,
            kind,
        }
    }

    pub fn element(uri: &str, locale: Option<LocaleId>) -> Self {
        Self::new(uri, locale, TargetKind::Element, None)
    }

    pub fn tag(uri: &str, locale: Option<LocaleId>) -> Self {
        Self::new(uri, locale, TargetKind::Tag, None)
    }

    pub fn binding(uri: &str) -> Self {
        Self::new(uri, None, TargetKind::Binding, None)
    }

    pub fn for_host(mut self, host: Option<HostId>) -> Self {
        self.host = host;
        self
    }
}

/// A ban directive produced by BAN/FULLBAN bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanDescriptor {
    pub query: String,
    pub full: bool,
}

/// A ban to dispatch to one host or to every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRequest {
    pub query: String,
    /// `false` means `query` is a URL pattern that still needs the host/URL prefix.
    pub is_full_query: bool,
    pub host: Option<HostId>,
}

impl BanRequest {
    pub fn new(query: impl Into<String>, is_full_query: bool, host: Option<HostId>) -> Self {
        Self {
            query: query.into(),
            is_full_query,
            host,
        }
    }
}

impl From<BanDescriptor> for BanRequest {
    fn from(descriptor: BanDescriptor) -> Self {
        Self::new(descriptor.query, descriptor.full, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_leading_and_trailing_slashes() {
        assert_eq!(normalize_uri("blog/post-1"), "/blog/post-1");
        assert_eq!(normalize_uri("//blog/post-1//"), "/blog/post-1");
        assert_eq!(normalize_uri("/blog/post-1/"), "/blog/post-1");
    }

    #[test]
    fn empty_and_home_alias_map_to_root() {
        assert_eq!(normalize_uri(""), "/");
        assert_eq!(normalize_uri("/"), "/");
        assert_eq!(normalize_uri(HOME_ALIAS), "/");
    }

    #[test]
    fn trailing_slash_is_insignificant() {
        for uri in ["a", "/a/b", "feed", "/news/2024/item", "x?y=1"] {
            assert_eq!(normalize_uri(uri), normalize_uri(&format!("{uri}/")));
        }
    }

    #[test]
    fn constructors_normalize_uri() {
        let target = InvalidationTarget::binding("feed/");
        assert_eq!(target.uri, "/feed");
        assert_eq!(target.kind, TargetKind::Binding);
        assert!(target.locale.is_none());
        assert!(target.host.is_none());
    }
}
