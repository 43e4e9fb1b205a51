use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::application::error::ErrorReport;
use crate::application::trending::TrendingParams;
use crate::domain::mentions::{Mention, MentionInput};
use crate::domain::trending::TrendingItem;

use super::HttpState;
use super::error::ApiError;
use super::viewer::Viewer;

/// Query string of `/trending_tokens`. Everything arrives as text so a bad
/// `limit` can be answered with a JSON error instead of a bare rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct TrendingQueryString {
    time_window: Option<String>,
    limit: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

impl TrendingQueryString {
    fn into_params(self) -> Result<TrendingParams, ApiError> {
        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                ApiError::bad_request(
                    "Invalid limit",
                    Some(format!("`limit` must be an integer, got `{raw}`")),
                )
            })?),
        };
        Ok(TrendingParams {
            time_window: self.time_window,
            limit,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TrendingResponse {
    trending_tokens: Vec<TrendingItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct TickerNetworkResponse {
    ticker: String,
    network: Option<String>,
}

pub(super) async fn trending_tokens(
    State(state): State<HttpState>,
    viewer: Viewer,
    Query(raw): Query<TrendingQueryString>,
) -> Result<Json<TrendingResponse>, ApiError> {
    let params = raw.into_params()?;
    let query = state.policy.resolve(&params, viewer.0);
    let trending_tokens = state.trending.rank(query).await;
    Ok(Json(TrendingResponse { trending_tokens }))
}

pub(super) async fn record_mention(
    State(state): State<HttpState>,
    payload: Result<Json<MentionInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Mention>), ApiError> {
    let Json(input) = payload.map_err(|rejection| {
        ApiError::bad_request("Invalid mention payload", Some(rejection.body_text()))
    })?;
    let mention = state.mentions.record(input).await?;
    Ok((StatusCode::CREATED, Json(mention)))
}

pub(super) async fn ticker_network(
    State(state): State<HttpState>,
    Path(ticker): Path<String>,
) -> Result<Json<TickerNetworkResponse>, ApiError> {
    let network = state.mentions.resolve_network(&ticker).await?;
    Ok(Json(TickerNetworkResponse { ticker, network }))
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    match state.mentions.ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

pub(super) async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
