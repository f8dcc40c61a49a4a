//! API service routes

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{delete, get, post},
};
use engine::model::{CheckinArtifacts, CheckoutArtifacts, EmployeeId, SessionId};
use engine::{Period, TrackingStore};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    live_cache::CachedFix,
    models::{
        CheckoutRequest, CheckoutResponse, CleanupResponse, CloseIdleResponse,
        EmployeeInfoResponse, LiveLocationResponse, LocationUpdateRequest, PolylinePointResponse,
        SessionResponse, StartSessionRequest, StartSessionResponse, SummaryResponse,
        TargetResponse, TargetsQuery, to_km,
    },
    state::AppState,
};

/// Create the router for the API service
pub fn create_router<S: TrackingStore>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let admin_routes = Router::new()
        .route("/admin/summary/:period", get(period_summary::<S>))
        .route("/admin/summary/employee/:employee_id", get(employee_summary::<S>))
        .route("/admin/employee/:employee_id/sessions", get(employee_sessions::<S>))
        .route("/admin/session/:session_id", get(session_details::<S>))
        .route("/admin/session/:session_id/polyline", get(polyline::<S>))
        .route("/admin/session/:session_id/geofences", get(session_geofences::<S>))
        .route("/admin/live-location/:session_id", get(live_location::<S>))
        .route("/admin/cleanup/gps", delete(cleanup_gps::<S>))
        .route("/admin/sessions/close-idle", post(close_idle_sessions::<S>));

    Router::new()
        .route("/health", get(health_check))
        .route("/session/start", post(start_session::<S>))
        .route("/session/checkout", post(checkout::<S>))
        .route("/tracking/update-location", post(update_location::<S>))
        .route("/tracking/live-location/:session_id", get(live_location::<S>))
        .route("/tracking/polyline/:session_id", get(polyline::<S>))
        .route("/employee/:identifier/targets", get(employee_targets::<S>))
        .route("/employee/:identifier/info", get(employee_info::<S>))
        .route("/summary/:employee_id", get(employee_summary::<S>))
        .merge(admin_routes)
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "tracking-api"
    }))
}

/// Check an employee in and open a tracking session
pub async fn start_session<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Json(payload): Json<StartSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let employee = match (payload.employee_id, payload.employee_code.as_deref()) {
        (Some(id), _) => state.tracker.employee(EmployeeId(id)).await?,
        (None, Some(code)) => state.tracker.resolve_employee(code).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "employee_id or employee_code is required".to_string(),
            ));
        }
    };

    let checkin = CheckinArtifacts {
        selfie_ref: payload.selfie_ref,
        odometer_ref: payload.odometer_ref,
        odometer_reading: payload.odometer_reading,
    };
    let session = state
        .tracker
        .check_in(employee.id, payload.lat, payload.lng, checkin)
        .await?;

    if let Some(cache) = &state.live_cache {
        let fix = CachedFix {
            lat: session.start_position.lat,
            lng: session.start_position.lng,
            timestamp: session.started_at,
        };
        cache.put(session.id, fix).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            message: format!("Session started for {}", employee.name),
            session_id: session.id,
            employee_id: session.employee_id,
            started_at: session.started_at,
        }),
    ))
}

/// Ingest one position sample
pub async fn update_location<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Json(payload): Json<LocationUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .tracker
        .update_location(payload.session_id, payload.lat, payload.lng, payload.timestamp)
        .await?;

    if let (Some(cache), Some(recorded_at)) = (&state.live_cache, outcome.recorded_at) {
        let fix = CachedFix {
            lat: payload.lat,
            lng: payload.lng,
            timestamp: recorded_at,
        };
        cache.put(payload.session_id, fix).await;
    }

    Ok(Json(outcome))
}

/// Close a session with the checkout artifacts
pub async fn checkout<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Json(payload): Json<CheckoutRequest>,
) -> ApiResult<impl IntoResponse> {
    let end = match (payload.lat, payload.lng) {
        (Some(lat), Some(lng)) => Some((lat, lng)),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "lat and lng must be given together".to_string(),
            ));
        }
    };

    let checkout = CheckoutArtifacts {
        odometer_ref: payload.odometer_ref,
        odometer_reading: payload.odometer_reading,
    };
    let session = state
        .tracker
        .check_out(payload.session_id, end, checkout)
        .await?;

    if let Some(cache) = &state.live_cache {
        let fix = CachedFix {
            lat: session.last_position.lat,
            lng: session.last_position.lng,
            timestamp: session.last_seen_at,
        };
        cache.put_final(session.id, fix).await;
    }

    Ok(Json(CheckoutResponse {
        message: "Checked out".to_string(),
        session_id: session.id,
        ended_at: session.ended_at,
        distance_m: session.distance_m,
        distance_km: to_km(session.distance_m),
    }))
}

/// Latest fix of a session, served from the cache when possible
pub async fn live_location<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    if let Some(cache) = &state.live_cache {
        if let Some(fix) = cache.get(session_id).await {
            return Ok(Json(LiveLocationResponse::Fix {
                lat: fix.lat,
                lng: fix.lng,
                timestamp: fix.timestamp,
            }));
        }
    }

    let response = match state.tracker.live_location(session_id).await? {
        Some(live) => LiveLocationResponse::Fix {
            lat: live.lat,
            lng: live.lng,
            timestamp: live.timestamp,
        },
        None => LiveLocationResponse::no_data(),
    };
    Ok(Json(response))
}

/// Recorded path of a session
pub async fn polyline<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let points: Vec<PolylinePointResponse> = state
        .tracker
        .polyline_points(session_id)
        .await?
        .into_iter()
        .map(PolylinePointResponse::from)
        .collect();

    Ok(Json(points))
}

/// Geofence targets of an employee, for today unless `date` is given
pub async fn employee_targets<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(identifier): Path<String>,
    Query(query): Query<TargetsQuery>,
) -> ApiResult<impl IntoResponse> {
    let employee = state.tracker.resolve_employee(&identifier).await?;
    let targets: Vec<TargetResponse> = state
        .tracker
        .targets(employee.id, query.date)
        .await?
        .into_iter()
        .map(TargetResponse::from)
        .collect();

    Ok(Json(targets))
}

pub async fn employee_info<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(identifier): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let employee = state.tracker.resolve_employee(&identifier).await?;
    Ok(Json(EmployeeInfoResponse::from(employee)))
}

/// Every day an employee tracked, newest first
pub async fn employee_summary<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(employee_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let summaries: Vec<SummaryResponse> = state
        .tracker
        .employee_summaries(EmployeeId(employee_id))
        .await?
        .into_iter()
        .map(SummaryResponse::from)
        .collect();

    Ok(Json(summaries))
}

/// Summaries of all employees for `today`, `yesterday` or `weekly`
pub async fn period_summary<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(period): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let period: Period = period.parse()?;
    let summaries: Vec<SummaryResponse> = state
        .tracker
        .period_summaries(period)
        .await?
        .into_iter()
        .map(SummaryResponse::from)
        .collect();

    Ok(Json(summaries))
}

pub async fn employee_sessions<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(employee_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let sessions: Vec<SessionResponse> = state
        .tracker
        .sessions_for_employee(EmployeeId(employee_id))
        .await?
        .into_iter()
        .map(SessionResponse::from)
        .collect();

    Ok(Json(sessions))
}

pub async fn session_details<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let session = state.tracker.session(session_id).await?;
    Ok(Json(SessionResponse::from(session)))
}

/// Geofences entered during a session
pub async fn session_geofences<S: TrackingStore>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    let entries = state.tracker.session_entries(session_id).await?;
    Ok(Json(entries))
}

/// Delete GPS points older than the retention window
pub async fn cleanup_gps<S: TrackingStore>(
    State(state): State<AppState<S>>,
) -> ApiResult<impl IntoResponse> {
    let rows_deleted = state.tracker.purge_gps(state.gps_retention).await?;
    info!("GPS cleanup removed {} points", rows_deleted);

    Ok(Json(CleanupResponse {
        message: "Old GPS logs cleaned".to_string(),
        rows_deleted,
    }))
}

/// Close every session idle for longer than the configured timeout
pub async fn close_idle_sessions<S: TrackingStore>(
    State(state): State<AppState<S>>,
) -> ApiResult<impl IntoResponse> {
    let closed = state.tracker.close_idle(state.idle_timeout).await?;
    Ok(Json(CloseIdleResponse { closed }))
}
