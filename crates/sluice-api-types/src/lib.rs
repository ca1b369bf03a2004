//! Wire types for the sluice HTTP API.
//!
//! These types are shared between the server and API clients. They carry no
//! behaviour; the server converts them into its domain types at the edge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one PURGE or BAN dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResultBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// Response for manual purge and ban requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub query: String,
    pub responses: Vec<DispatchResultBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub query: String,
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRequestBody {
    pub query: String,
    /// Treat `query` as a complete ban expression. Defaults to `true`.
    #[serde(default)]
    pub full: Option<bool>,
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanListQuery {
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEntryBody {
    pub time: String,
    pub refs: u64,
    pub completed: bool,
    pub spec: String,
}

/// Ban list of one admin-capable host, or the reason it could not be read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBanListBody {
    pub id: String,
    #[serde(rename = "hostName")]
    pub host_name: String,
    #[serde(rename = "banList", skip_serializing_if = "Option::is_none")]
    pub ban_list: Option<Vec<BanEntryBody>>,
    #[serde(rename = "adminError", skip_serializing_if = "Option::is_none")]
    pub admin_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangedItemKind {
    Entry {
        #[serde(default)]
        section_id: Option<i64>,
        #[serde(default)]
        type_id: Option<i64>,
    },
    Category,
    Block,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKindBody {
    Entry,
    Category,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedItemBody {
    pub kind: RelationKindBody,
    pub id: i64,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub owner_uri: Option<String>,
}

/// Self-describing snapshot of a changed content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedItem {
    pub id: i64,
    #[serde(flatten)]
    pub kind: ChangedItemKind,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub uris_by_site: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_uri: Option<String>,
    #[serde(default)]
    pub related_by_site: BTreeMap<String, Vec<RelatedItemBody>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub items: Vec<ChangedItem>,
    #[serde(default)]
    pub include_related: Option<bool>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetBody {
    pub uri: String,
    pub locale: Option<String>,
    pub host: Option<String>,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanDescriptorBody {
    pub query: String,
    pub full: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResponse {
    pub jobs: Vec<String>,
    pub purge: Vec<TargetBody>,
    pub bans: Vec<BanDescriptorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingBody {
    #[serde(rename = "bindType")]
    pub bind_type: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionBindingBody {
    pub section_id: i64,
    pub type_id: i64,
    #[serde(rename = "bindType")]
    pub bind_type: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingListQuery {
    #[serde(default)]
    pub type_id: Option<i64>,
    #[serde(default)]
    pub bind_type: Option<String>,
}

/// Bindings for one section keyed by entry type id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceBindingsRequest {
    pub bindings: BTreeMap<i64, Vec<BindingBody>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingCountBody {
    pub section_id: i64,
    pub bindings: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordUriRequest {
    pub uri: String,
    pub item_id: i64,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetUriRequest {
    pub uri: String,
}

/// Synchronous test purge. Without `uris`, `count` cache-busting URIs are generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticPurgeRequest {
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticPurgeResponse {
    pub uris: Vec<String>,
    pub responses: Vec<DispatchResultBody>,
}

/// Evaluate the bindings of one section/type, optionally dispatching the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBindingsRequest {
    pub section_id: i64,
    pub type_id: i64,
    #[serde(default)]
    pub dispatch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBindingsResponse {
    pub purge: Vec<TargetBody>,
    pub bans: Vec<BanDescriptorBody>,
    pub responses: Vec<DispatchResultBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub hosts: usize,
    pub database: bool,
}
