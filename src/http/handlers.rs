use alloy_primitives::Address;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use tracing::{debug, error};

use super::ApiState;
use crate::error::QueryError;
use crate::query::{
    DEFAULT_LIMIT, TransferRecord, parse_address, parse_addresses, parse_pagination,
};
use crate::repository::{Pagination, TransfersFilter};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tokens", get(list_tokens))
        .route("/tokens/:token", get(list_token_transfers))
        .route("/from/:address", get(list_from_transfers))
        .route("/to/:address", get(list_to_transfers))
        .route("/health", get(health))
        .with_state(state)
}

/// Response envelope shared by every route.
#[derive(Debug, Serialize)]
pub struct ApiResult<T> {
    pub status: &'static str,
    pub result: T,
}

impl<T> ApiResult<T> {
    fn success(result: T) -> Json<Self> {
        Json(ApiResult {
            status: "SUCCESS",
            result,
        })
    }
}

type ApiResponse<T> = Result<Json<ApiResult<T>>, ApiErrorResponse>;

/// Raw query string pairs. Keys may repeat.
struct Params(Vec<(String, String)>);

impl Params {
    fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Last value wins when a scalar parameter is repeated.
    fn single<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.values(key).last()
    }

    fn pagination(&self) -> Result<Pagination, QueryError> {
        parse_pagination(self.single("limit"), self.single("offset"), DEFAULT_LIMIT)
    }

    fn addresses(&self, key: &'static str) -> Result<Vec<Address>, QueryError> {
        parse_addresses(key, self.values(key))
    }
}

async fn list_tokens(
    State(state): State<ApiState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResponse<Vec<String>> {
    let params = Params(params);
    let tokens = state.query.list_tokens(params.pagination()?).await?;
    Ok(ApiResult::success(
        tokens.iter().map(|t| format!("{t:?}")).collect(),
    ))
}

async fn list_token_transfers(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResponse<Vec<TransferRecord>> {
    let params = Params(params);
    let filter = TransfersFilter {
        tokens: vec![parse_address("token", &token)?],
        from: params.addresses("from")?,
        to: params.addresses("to")?,
        pagination: params.pagination()?,
    };
    transfers(&state, filter).await
}

async fn list_from_transfers(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResponse<Vec<TransferRecord>> {
    let params = Params(params);
    let filter = TransfersFilter {
        from: vec![parse_address("address", &address)?],
        to: params.addresses("to")?,
        tokens: params.addresses("tokens")?,
        pagination: params.pagination()?,
    };
    transfers(&state, filter).await
}

async fn list_to_transfers(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResponse<Vec<TransferRecord>> {
    let params = Params(params);
    let filter = TransfersFilter {
        to: vec![parse_address("address", &address)?],
        from: params.addresses("from")?,
        tokens: params.addresses("tokens")?,
        pagination: params.pagination()?,
    };
    transfers(&state, filter).await
}

async fn transfers(state: &ApiState, filter: TransfersFilter) -> ApiResponse<Vec<TransferRecord>> {
    debug!("Transfer query: {:?}", filter);
    let transfers = state.query.get_transfers(filter).await?;
    Ok(ApiResult::success(
        transfers.iter().map(TransferRecord::from).collect(),
    ))
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let ingestion = *state.ingestion.borrow();
    ApiResult::success(serde_json::json!({ "ingestion": ingestion.to_string() }))
}

/// API error response wrapper
pub(crate) struct ApiErrorResponse {
    status: StatusCode,
    body: Json<ApiResult<String>>,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            body: Json(ApiResult {
                status: "ERROR",
                result: message,
            }),
        }
    }
}

impl From<QueryError> for ApiErrorResponse {
    fn from(err: QueryError) -> Self {
        if err.is_request_error() {
            Self::new(StatusCode::BAD_REQUEST, err.to_string())
        } else {
            error!("Query failed: {}", err);
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}
