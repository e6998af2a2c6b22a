//! Request handlers
//!
//! Query parameters are validated by hand so failures come back as a field
//! list rather than a generic deserialization error.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::error;

use super::dto::{
    ErrorResponse, FieldError, HealthResponse, PaginatedResponse, ProxyResponse, ValidationErrors,
};
use super::AppState;
use crate::proxy::{Anonymity, Protocol};
use crate::store::{FilterOptions, StoreError};

const DEFAULT_LIMIT: i64 = 25;
const MAX_LIMIT: i64 = 100;

/// Raw query parameters; everything is a string until validated.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    cursor: Option<String>,
    limit: Option<String>,
    protocol: Option<String>,
    anonymity: Option<String>,
    max_latency_ms: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn get_proxies(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let (cursor, limit, mut errors) = parse_pagination(&params);
    let (filter, filter_errors) = parse_filters(&params);
    errors.extend(filter_errors);
    if !errors.is_empty() {
        return validation_error(errors);
    }

    match state.store.get_alive(cursor, limit, &filter).await {
        Ok(page) => {
            let data: Vec<ProxyResponse> = page.proxies.iter().map(ProxyResponse::from).collect();
            let next_cursor = (page.next_cursor > 0.0).then(|| encode_cursor(page.next_cursor));
            Json(PaginatedResponse {
                data,
                next_cursor,
                limit,
                total_count: page.total,
            })
            .into_response()
        }
        Err(err) => internal_error(err),
    }
}

pub async fn get_random_proxy(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let (filter, errors) = parse_filters(&params);
    if !errors.is_empty() {
        return validation_error(errors);
    }

    match state.store.random(&filter).await {
        Ok(proxy) => Json(ProxyResponse::from(&proxy)).into_response(),
        Err(StoreError::NoProxiesAvailable) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no proxies available".to_string(),
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

fn parse_pagination(params: &ListParams) -> (f64, i64, Vec<FieldError>) {
    let mut errors = Vec::new();
    let mut cursor = 0.0;
    let mut limit = DEFAULT_LIMIT;

    if let Some(raw) = params.cursor.as_deref().filter(|raw| !raw.is_empty()) {
        match decode_cursor(raw) {
            Some(value) if value >= 0.0 => cursor = value,
            Some(_) => errors.push(FieldError::new("cursor", "invalid cursor")),
            None => errors.push(FieldError::new("cursor", "invalid cursor format")),
        }
    }

    if let Some(raw) = params.limit.as_deref().filter(|raw| !raw.is_empty()) {
        match raw.parse::<i64>() {
            Ok(value) if value > 0 => limit = value.min(MAX_LIMIT),
            Ok(_) => errors.push(FieldError::new("limit", "must be positive")),
            Err(_) => errors.push(FieldError::new("limit", "must be a valid integer")),
        }
    }

    (cursor, limit, errors)
}

fn parse_filters(params: &ListParams) -> (FilterOptions, Vec<FieldError>) {
    let mut errors = Vec::new();
    let mut filter = FilterOptions::default();

    if let Some(raw) = params.protocol.as_deref().filter(|raw| !raw.is_empty()) {
        match raw.parse::<Protocol>() {
            Ok(protocol) => filter.protocol = Some(protocol),
            Err(_) => errors.push(FieldError::new(
                "protocol",
                "must be one of: http, https, socks4, socks5",
            )),
        }
    }

    if let Some(raw) = params.anonymity.as_deref().filter(|raw| !raw.is_empty()) {
        // `unknown` is a storage state, not a queryable tier.
        match raw.parse::<Anonymity>() {
            Ok(anonymity) if anonymity != Anonymity::Unknown => filter.anonymity = Some(anonymity),
            _ => errors.push(FieldError::new(
                "anonymity",
                "must be one of: transparent, anonymous, elite",
            )),
        }
    }

    if let Some(raw) = params.max_latency_ms.as_deref().filter(|raw| !raw.is_empty()) {
        match raw.parse::<i64>() {
            Ok(value) if value > 0 => filter.max_latency = Some(Duration::from_millis(value as u64)),
            Ok(_) => errors.push(FieldError::new("max_latency_ms", "must be positive")),
            Err(_) => errors.push(FieldError::new("max_latency_ms", "must be a valid integer")),
        }
    }

    (filter, errors)
}

/// Cursors are base64url over the ASCII decimal score, opaque to callers.
pub fn encode_cursor(score: f64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{score}"))
}

pub fn decode_cursor(raw: &str) -> Option<f64> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    text.trim().parse().ok()
}

fn validation_error(errors: Vec<FieldError>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ValidationErrors { errors })).into_response()
}

fn internal_error(err: StoreError) -> Response {
    error!(error = %err, "store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
        }),
    )
        .into_response()
}
