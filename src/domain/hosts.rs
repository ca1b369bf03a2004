//! Normalized view of the configured cache-server endpoints.

use std::collections::BTreeMap;

use super::types::{HostId, LocaleId};

/// Base URLs as configured, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostUrls {
    /// Nothing configured; the default site URL is used.
    Unset,
    /// One URL shared by every site.
    Shared(String),
    /// One URL per locale.
    PerLocale(BTreeMap<LocaleId, String>),
}

/// A host entry exactly as the operator described it.
#[derive(Debug, Clone)]
pub struct HostDefinition {
    pub id: HostId,
    pub host_name: String,
    pub urls: HostUrls,
    pub admin_ip: Option<String>,
    pub admin_port: Option<u16>,
    pub admin_secret: Option<String>,
}

/// Credentials for a host's admin control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEndpoint {
    pub ip: String,
    pub port: u16,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub id: HostId,
    pub host_name: String,
    pub urls_by_locale: BTreeMap<LocaleId, String>,
    pub admin: Option<AdminEndpoint>,
}

impl Host {
    /// True iff admin IP, port and secret are all present and non-empty.
    pub fn can_do_admin_bans(&self) -> bool {
        self.admin.is_some()
    }

    pub fn url_for(&self, locale: &LocaleId) -> Option<&str> {
        self.urls_by_locale.get(locale).map(String::as_str)
    }
}

/// Installation-wide facts needed to normalize hosts.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    pub sites: Vec<LocaleId>,
    pub default_site_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<Host>,
}

impl HostRegistry {
    pub fn new(definitions: Vec<HostDefinition>, layout: &SiteLayout) -> Self {
        let mut hosts: Vec<Host> = definitions
            .into_iter()
            .map(|definition| normalize_host(definition, layout))
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    pub fn get(&self, id: &HostId) -> Option<&Host> {
        self.hosts.iter().find(|host| &host.id == id)
    }

    /// Hosts matching `filter`, or every host when `filter` is `None`.
    pub fn matching<'a>(&'a self, filter: Option<&'a HostId>) -> impl Iterator<Item = &'a Host> {
        self.hosts
            .iter()
            .filter(move |host| filter.is_none_or(|id| &host.id == id))
    }

    pub fn admin_hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(|host| host.can_do_admin_bans())
    }
}

fn normalize_host(definition: HostDefinition, layout: &SiteLayout) -> Host {
    let HostDefinition {
        id,
        host_name,
        urls,
        admin_ip,
        admin_port,
        admin_secret,
    } = definition;

    let urls_by_locale = match urls {
        HostUrls::PerLocale(map) if !map.is_empty() => map,
        HostUrls::Shared(url) if !url.trim().is_empty() => layout
            .sites
            .iter()
            .map(|site| (site.clone(), url.clone()))
            .collect(),
        _ => default_urls(layout),
    };

    let admin = match (non_empty(admin_ip), admin_port, non_empty(admin_secret)) {
        (Some(ip), Some(port), Some(secret)) if port != 0 => {
            Some(AdminEndpoint { ip, port, secret })
        }
        _ => None,
    };

    Host {
        id,
        host_name,
        urls_by_locale,
        admin,
    }
}

fn default_urls(layout: &SiteLayout) -> BTreeMap<LocaleId, String> {
    let site = layout
        .sites
        .first()
        .cloned()
        .unwrap_or_else(|| LocaleId::new("default"));
    BTreeMap::from([(site, layout.default_site_url.clone())])
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
