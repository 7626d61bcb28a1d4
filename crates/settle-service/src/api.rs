//! HTTP API mapping the exposed operations 1:1 onto endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;

use settle_batch::BatchError;
use settle_core::{CoreError, Engine};
use settle_router::{RouteOptions, RouterError};
use settle_types::configs::BatchConfigPatch;
use settle_types::{PendingOrder, Provider};

#[derive(Clone)]
struct AppState {
	engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/orders", post(enqueue))
		.route("/orders/route", post(route_request))
		.route("/batches/{id}/confirm", post(confirm_batch))
		.route("/batches/metrics", get(batch_metrics))
		.route("/batches/config", put(configure_batching))
		.route("/providers", post(register_provider))
		.route("/providers/{id}", delete(deregister_provider))
		.route("/providers/status", get(provider_status))
		.route("/providers/migrate", post(migrate_traffic))
		.route("/providers/scale", post(scale_for_load))
		.with_state(AppState { engine })
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

/// API error carrying the status code it maps to.
struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn bad_request(message: impl Into<String>) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			message: message.into(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = Json(serde_json::json!({ "error": self.message }));
		(self.status, body).into_response()
	}
}

impl From<BatchError> for ApiError {
	fn from(e: BatchError) -> Self {
		let status = match &e {
			BatchError::Queue(_) | BatchError::Config(_) => StatusCode::BAD_REQUEST,
			BatchError::UnknownBatch(_) => StatusCode::NOT_FOUND,
			BatchError::Transition(_) => StatusCode::CONFLICT,
		};
		Self {
			status,
			message: e.to_string(),
		}
	}
}

impl From<RouterError> for ApiError {
	fn from(e: RouterError) -> Self {
		let status = match &e {
			RouterError::NoProviders | RouterError::Exhausted { .. } => StatusCode::BAD_GATEWAY,
			RouterError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
			RouterError::UnknownProvider(_) => StatusCode::NOT_FOUND,
			RouterError::Migration(_) => StatusCode::BAD_REQUEST,
		};
		Self {
			status,
			message: e.to_string(),
		}
	}
}

impl From<CoreError> for ApiError {
	fn from(e: CoreError) -> Self {
		match e {
			CoreError::Batch(inner) => inner.into(),
			CoreError::Router(inner) => inner.into(),
			CoreError::Config(message) => ApiError::bad_request(message),
			CoreError::Storage(inner) => Self {
				status: StatusCode::INTERNAL_SERVER_ERROR,
				message: inner.to_string(),
			},
		}
	}
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize, Validate)]
struct EnqueueRequest {
	#[validate(length(min = 1))]
	restaurant_id: String,
	total_value: Decimal,
}

async fn enqueue(
	State(state): State<AppState>,
	Json(request): Json<EnqueueRequest>,
) -> Result<Response, ApiError> {
	request
		.validate()
		.map_err(|e| ApiError::bad_request(e.to_string()))?;

	let order = PendingOrder::new(request.restaurant_id, request.total_value);
	let outcome = state.engine.accumulator().enqueue(order).await?;
	Ok((StatusCode::ACCEPTED, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize, Validate)]
struct RouteRequest {
	#[validate(length(min = 1))]
	path: String,
	#[serde(default)]
	payload: serde_json::Value,
	timeout_ms: Option<u64>,
}

async fn route_request(
	State(state): State<AppState>,
	Json(request): Json<RouteRequest>,
) -> Result<Response, ApiError> {
	request
		.validate()
		.map_err(|e| ApiError::bad_request(e.to_string()))?;
	if !request.path.starts_with('/') {
		return Err(ApiError::bad_request("path must start with '/'"));
	}

	let opts = RouteOptions {
		deadline: request.timeout_ms.map(Duration::from_millis),
	};
	let response = state
		.engine
		.router()
		.route(&request.path, &request.payload, opts)
		.await?;
	Ok(Json(response).into_response())
}

async fn confirm_batch(
	State(state): State<AppState>,
	Path(batch_id): Path<String>,
) -> Result<Response, ApiError> {
	state.engine.confirm_batch(&batch_id).await?;
	let batch = state.engine.accumulator().batch(&batch_id);
	Ok(Json(batch).into_response())
}

async fn batch_metrics(State(state): State<AppState>) -> Response {
	Json(state.engine.accumulator().metrics()).into_response()
}

async fn configure_batching(
	State(state): State<AppState>,
	Json(patch): Json<BatchConfigPatch>,
) -> Result<Response, ApiError> {
	let updated = state.engine.accumulator().configure(patch).await?;
	Ok(Json(updated).into_response())
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterProviderRequest {
	#[validate(length(min = 1))]
	id: String,
	#[validate(url)]
	endpoint: String,
	#[validate(length(min = 1))]
	region: String,
}

async fn register_provider(
	State(state): State<AppState>,
	Json(request): Json<RegisterProviderRequest>,
) -> Result<Response, ApiError> {
	request
		.validate()
		.map_err(|e| ApiError::bad_request(e.to_string()))?;

	let provider = Provider::new(request.id, request.endpoint, request.region);
	state.engine.router().register_provider(provider.clone());
	Ok((StatusCode::CREATED, Json(provider)).into_response())
}

async fn deregister_provider(
	State(state): State<AppState>,
	Path(provider_id): Path<String>,
) -> Result<Response, ApiError> {
	state.engine.router().deregister_provider(&provider_id)?;
	Ok(StatusCode::NO_CONTENT.into_response())
}

async fn provider_status(State(state): State<AppState>) -> Response {
	Json(state.engine.router().status()).into_response()
}

#[derive(Debug, Deserialize, Validate)]
struct MigrateRequest {
	#[validate(length(min = 1))]
	from: String,
	#[validate(length(min = 1))]
	to: String,
}

async fn migrate_traffic(
	State(state): State<AppState>,
	Json(request): Json<MigrateRequest>,
) -> Result<Response, ApiError> {
	request
		.validate()
		.map_err(|e| ApiError::bad_request(e.to_string()))?;

	let completed = state
		.engine
		.router()
		.migrate_traffic(&request.from, &request.to)
		.await?;
	Ok(Json(serde_json::json!({ "completed": completed })).into_response())
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
	current_load: f64,
}

async fn scale_for_load(
	State(state): State<AppState>,
	Json(request): Json<ScaleRequest>,
) -> Result<Response, ApiError> {
	if !(0.0..=1.0).contains(&request.current_load) {
		return Err(ApiError::bad_request("current_load must be within [0, 1]"));
	}
	let added = state.engine.router().scale_for_load(request.current_load);
	Ok(Json(serde_json::json!({ "added": added })).into_response())
}
