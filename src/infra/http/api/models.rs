//! Conversions between wire types and the engine's domain types.

use std::collections::BTreeMap;

use sluice_api_types::{
    BanDescriptorBody, BanEntryBody, BindingBody, BindingCountBody, ChangedItem, ChangedItemKind,
    DispatchResultBody, HostBanListBody, RelatedItemBody, RelationKindBody, SectionBindingBody,
    TargetBody,
};

use crate::application::dispatch::{DispatchResult, HostBanList};
use crate::domain::bindings::{Binding, BindingCount, NewBinding};
use crate::domain::content::{ContentKind, ContentSnapshot, RelatedItem, RelationKind};
use crate::domain::targets::{BanRequest, InvalidationTarget};
use crate::domain::types::{BindType, LocaleId, TypeId};

use super::error::ApiError;

pub fn dispatch_body(result: DispatchResult) -> DispatchResultBody {
    DispatchResultBody {
        code: result.code,
        message: result.message,
        data: result.data,
    }
}

pub fn ban_list_body(list: HostBanList) -> HostBanListBody {
    let (ban_list, admin_error) = match list.entries {
        Ok(entries) => (
            Some(
                entries
                    .into_iter()
                    .map(|entry| BanEntryBody {
                        time: entry.time,
                        refs: entry.refs,
                        completed: entry.completed,
                        spec: entry.spec,
                    })
                    .collect(),
            ),
            None,
        ),
        Err(message) => (None, Some(message)),
    };

    HostBanListBody {
        id: list.host_id.to_string(),
        host_name: list.host_name,
        ban_list,
        admin_error,
    }
}

pub fn target_body(target: InvalidationTarget) -> TargetBody {
    TargetBody {
        uri: target.uri,
        locale: target.locale.map(|locale| locale.to_string()),
        host: target.host.map(|host| host.to_string()),
        kind: target.kind.as_str().to_string(),
    }
}

pub fn ban_descriptor_body(request: BanRequest) -> BanDescriptorBody {
    BanDescriptorBody {
        query: request.query,
        full: request.is_full_query,
    }
}

pub fn section_binding_body(binding: Binding) -> SectionBindingBody {
    SectionBindingBody {
        section_id: binding.section_id,
        type_id: binding.type_id,
        bind_type: binding.bind_type.as_str().to_string(),
        query: binding.query,
    }
}

pub fn binding_count_body(count: BindingCount) -> BindingCountBody {
    BindingCountBody {
        section_id: count.section_id,
        bindings: count.bindings,
    }
}

pub fn parse_bind_type(raw: &str) -> Result<BindType, ApiError> {
    BindType::try_from(raw)
        .map_err(|err| ApiError::bad_request("invalid bind type", Some(err.to_string())))
}

pub fn new_bindings(
    bindings: BTreeMap<TypeId, Vec<BindingBody>>,
) -> Result<BTreeMap<TypeId, Vec<NewBinding>>, ApiError> {
    bindings
        .into_iter()
        .map(|(type_id, entries)| {
            let entries = entries
                .into_iter()
                .map(|entry| {
                    Ok(NewBinding {
                        type_id,
                        bind_type: parse_bind_type(&entry.bind_type)?,
                        query: entry.query,
                    })
                })
                .collect::<Result<Vec<_>, ApiError>>()?;
            Ok((type_id, entries))
        })
        .collect()
}

pub fn snapshot_from_item(item: ChangedItem) -> ContentSnapshot {
    let kind = match item.kind {
        ChangedItemKind::Entry {
            section_id,
            type_id,
        } => ContentKind::Entry {
            section_id,
            type_id,
        },
        ChangedItemKind::Category => ContentKind::Category,
        ChangedItemKind::Block => ContentKind::Block,
        ChangedItemKind::Other => ContentKind::Other,
    };

    let mut snapshot = ContentSnapshot::new(item.id, kind);
    snapshot.uri = item.uri;
    snapshot.site = LocaleId::parse_optional(item.site.as_deref());
    snapshot.owner_uri = item.owner_uri;
    snapshot.uris_by_site = item
        .uris_by_site
        .into_iter()
        .map(|(site, uri)| (LocaleId::new(site), uri))
        .collect();
    snapshot.related_by_site = item
        .related_by_site
        .into_iter()
        .map(|(site, related)| {
            (
                LocaleId::new(site),
                related.into_iter().map(related_item).collect(),
            )
        })
        .collect();
    snapshot
}

fn related_item(body: RelatedItemBody) -> RelatedItem {
    let kind = match body.kind {
        RelationKindBody::Entry => RelationKind::Entry,
        RelationKindBody::Category => RelationKind::Category,
        RelationKindBody::Block => RelationKind::Block,
    };
    RelatedItem {
        kind,
        id: body.id,
        uri: body.uri,
        owner_uri: body.owner_uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_maps_sites_and_relations() {
        let item: ChangedItem = serde_json::from_value(serde_json::json!({
            "id": 3,
            "kind": "block",
            "owner_uri": "blog/post-1",
            "site": "0",
            "related_by_site": {
                "en": [{"kind": "category", "id": 9, "uri": "topics/rust"}]
            }
        }))
        .expect("valid item");

        let snapshot = snapshot_from_item(item);

        assert!(snapshot.kind.is_block());
        assert_eq!(snapshot.site, None);
        assert_eq!(snapshot.owner_uri.as_deref(), Some("blog/post-1"));
        let related = &snapshot.related_by_site[&LocaleId::new("en")];
        assert_eq!(related[0].kind, RelationKind::Category);
        assert_eq!(related[0].invalidation_uri(), Some("topics/rust"));
    }

    #[test]
    fn unknown_bind_type_is_rejected() {
        let mut bindings = BTreeMap::new();
        bindings.insert(
            2,
            vec![BindingBody {
                bind_type: "EVICT".to_string(),
                query: "/feed".to_string(),
            }],
        );
        assert!(new_bindings(bindings).is_err());
    }

    #[test]
    fn ban_list_error_is_reported_instead_of_entries() {
        let body = ban_list_body(HostBanList {
            host_id: crate::domain::types::HostId::new("varnish1"),
            host_name: "cache1".to_string(),
            entries: Err("connection refused".to_string()),
        });
        assert_eq!(body.admin_error.as_deref(), Some("connection refused"));
        assert!(body.ban_list.is_none());
    }
}
