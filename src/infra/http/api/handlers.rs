use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use sluice_api_types::{
    BanListQuery, BanRequestBody, BindingListQuery, ChangeRequest, ChangeResponse,
    DiagnosticBindingsRequest, DiagnosticBindingsResponse, DiagnosticPurgeRequest,
    DiagnosticPurgeResponse, DispatchResponse, ForgetUriRequest, PurgeRequest, RecordUriRequest,
    ReplaceBindingsRequest,
};

use crate::application::repos::BindingFilter;
use crate::application::service::{DEFAULT_TEST_URIS, MAX_TEST_URIS};
use crate::domain::targets::BanRequest;
use crate::domain::content::{ContentSnapshot, SnapshotGraph};
use crate::domain::types::{HostId, LocaleId, SectionId};

use super::error::{ApiError, service_to_api};
use super::models::*;
use super::state::ApiState;

/// -------- Manual dispatch --------
pub async fn purge(
    State(state): State<ApiState>,
    Json(payload): Json<PurgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query = required_query(payload.query)?;
    let host = host_filter(payload.host);

    let responses = state.service.purge_uri(&query, host).await;

    Ok(Json(DispatchResponse {
        query,
        responses: responses.into_iter().map(dispatch_body).collect(),
    }))
}

pub async fn ban(
    State(state): State<ApiState>,
    Json(payload): Json<BanRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let query = required_query(payload.query)?;
    if query.contains(['\r', '\n']) {
        return Err(ApiError::bad_request(
            "query must be a single line",
            Some("line breaks would split the admin command".to_string()),
        ));
    }
    let host = host_filter(payload.host);

    let responses = state
        .service
        .ban_query(&query, payload.full.unwrap_or(true), host)
        .await
        .map_err(service_to_api)?;

    Ok(Json(DispatchResponse {
        query,
        responses: responses.into_iter().map(dispatch_body).collect(),
    }))
}

pub async fn list_bans(
    State(state): State<ApiState>,
    Query(query): Query<BanListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let host = host_filter(query.host);
    let lists = state.service.ban_lists(host.as_ref()).await;

    Ok(Json(
        lists.into_iter().map(ban_list_body).collect::<Vec<_>>(),
    ))
}

/// -------- Change notifications --------
pub async fn notify_change(
    State(state): State<ApiState>,
    Json(payload): Json<ChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.items.is_empty() {
        return Err(ApiError::bad_request("no items supplied", None));
    }

    let items: Vec<ContentSnapshot> = payload.items.into_iter().map(snapshot_from_item).collect();
    let queued = state
        .service
        .on_change(&items, &SnapshotGraph, payload.include_related, payload.debug)
        .await
        .map_err(service_to_api)?;

    let status = if queued.jobs.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(ChangeResponse {
            jobs: queued.jobs,
            purge: queued.plan.purge.into_iter().map(target_body).collect(),
            bans: queued
                .plan
                .bans
                .into_iter()
                .map(ban_descriptor_body)
                .collect(),
        }),
    ))
}

/// -------- Bindings --------
pub async fn binding_counts(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state
        .service
        .binding_counts()
        .await
        .map_err(service_to_api)?;

    Ok(Json(
        counts
            .into_iter()
            .map(binding_count_body)
            .collect::<Vec<_>>(),
    ))
}

pub async fn list_section_bindings(
    State(state): State<ApiState>,
    Path(section_id): Path<SectionId>,
    Query(query): Query<BindingListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut filter = BindingFilter {
        type_id: query.type_id,
        kinds: None,
    };
    if let Some(raw) = query.bind_type.as_deref() {
        filter = filter.with_kinds(&[parse_bind_type(raw)?]);
    }

    let bindings = state
        .service
        .list_bindings(section_id, &filter)
        .await
        .map_err(service_to_api)?;

    Ok(Json(
        bindings
            .into_iter()
            .map(section_binding_body)
            .collect::<Vec<_>>(),
    ))
}

pub async fn replace_section_bindings(
    State(state): State<ApiState>,
    Path(section_id): Path<SectionId>,
    Json(payload): Json<ReplaceBindingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let bindings = new_bindings(payload.bindings)?;

    let stored = state
        .service
        .replace_bindings(section_id, bindings)
        .await
        .map_err(service_to_api)?;

    Ok(Json(
        stored
            .into_iter()
            .map(section_binding_body)
            .collect::<Vec<_>>(),
    ))
}

/// -------- Tracked URIs --------
pub async fn record_uri(
    State(state): State<ApiState>,
    Json(payload): Json<RecordUriRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let locale = LocaleId::parse_optional(payload.locale.as_deref());

    state
        .service
        .record_uri(payload.item_id, &payload.uri, locale)
        .await
        .map_err(service_to_api)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn forget_uri(
    State(state): State<ApiState>,
    Json(payload): Json<ForgetUriRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .service
        .forget_uri(&payload.uri)
        .await
        .map_err(service_to_api)?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("uri is not tracked"))
    }
}

/// -------- Diagnostics --------
pub async fn test_purge(
    State(state): State<ApiState>,
    Json(payload): Json<DiagnosticPurgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = payload.count.unwrap_or(DEFAULT_TEST_URIS);
    if count > MAX_TEST_URIS {
        return Err(ApiError::bad_request(
            "too many test uris",
            Some(format!("at most {MAX_TEST_URIS} may be generated")),
        ));
    }
    let uris: Vec<String> = payload
        .uris
        .into_iter()
        .map(|uri| uri.trim().to_string())
        .filter(|uri| !uri.is_empty())
        .collect();
    let host = host_filter(payload.host);

    let run = state.service.test_purge(uris, count, host).await;

    Ok(Json(DiagnosticPurgeResponse {
        uris: run.uris,
        responses: run.responses.into_iter().map(dispatch_body).collect(),
    }))
}

pub async fn test_bindings(
    State(state): State<ApiState>,
    Json(payload): Json<DiagnosticBindingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let check = state
        .service
        .test_bindings(payload.section_id, payload.type_id, payload.dispatch)
        .await
        .map_err(service_to_api)?;

    Ok(Json(DiagnosticBindingsResponse {
        purge: check.purge.into_iter().map(target_body).collect(),
        bans: check
            .bans
            .into_iter()
            .map(|ban| ban_descriptor_body(BanRequest::from(ban)))
            .collect(),
        responses: check.responses.into_iter().map(dispatch_body).collect(),
    }))
}

fn required_query(query: String) -> Result<String, ApiError> {
    let query = query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::bad_request("query must not be empty", None));
    }
    Ok(query)
}

fn host_filter(host: Option<String>) -> Option<HostId> {
    host.map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .map(HostId::new)
}
