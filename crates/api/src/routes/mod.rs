use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kopdar_domain::{
    appointments::{
        ActivityType, Appointment, AppointmentTimelineEvent, CancelAppointment,
        CheckInAppointment, CompleteAppointment, CounterOfferAppointment, CounterOfferChange,
        MarkNoShow, PreconditionReport, ProposeAppointment, RespondOutcome, RespondToAppointment,
        ValidatePreconditions,
    },
    error::DomainError,
    identity::ActorIdentity,
    locations::{CreateLocation, CustomLocation, Location, LocationInput, PlaceType},
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::middleware::AuthContext;
use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState, validation};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/appointments",
            post(propose_appointment).get(list_appointments),
        )
        .route("/v1/appointments/preflight", post(preflight))
        .route("/v1/appointments/:appointment_id", get(get_appointment))
        .route(
            "/v1/appointments/:appointment_id/timeline",
            get(get_timeline),
        )
        .route(
            "/v1/appointments/:appointment_id/respond",
            post(respond_to_appointment),
        )
        .route(
            "/v1/appointments/:appointment_id/counter-offer",
            post(counter_offer_appointment),
        )
        .route(
            "/v1/appointments/:appointment_id/check-in",
            post(check_in_appointment),
        )
        .route(
            "/v1/appointments/:appointment_id/complete",
            post(complete_appointment),
        )
        .route(
            "/v1/appointments/:appointment_id/cancel",
            post(cancel_appointment),
        )
        .route(
            "/v1/appointments/:appointment_id/no-show",
            post(mark_no_show),
        )
        .route("/v1/locations", post(create_location))
        .route("/v1/locations/recent", get(list_recent_locations))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => ApiError::Internal.into_response(),
    }
}

/// Meeting place as the client supplies it: a saved preset by id, or a
/// one-off custom place spelled out inline.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LocationPayload {
    Preset {
        location_id: String,
    },
    Custom {
        name: String,
        address: String,
        latitude: f64,
        longitude: f64,
        city: Option<String>,
        district: Option<String>,
    },
}

impl From<LocationPayload> for LocationInput {
    fn from(payload: LocationPayload) -> Self {
        match payload {
            LocationPayload::Preset { location_id } => LocationInput::Preset { location_id },
            LocationPayload::Custom {
                name,
                address,
                latitude,
                longitude,
                city,
                district,
            } => LocationInput::Custom(CustomLocation {
                name,
                address,
                latitude,
                longitude,
                city,
                district,
            }),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct ProposeAppointmentRequest {
    #[validate(length(min = 1, max = 128))]
    match_id: String,
    #[validate(length(min = 1, max = 128))]
    inviter_pet_id: String,
    #[validate(length(min = 1, max = 128))]
    invitee_pet_id: String,
    scheduled_at_ms: i64,
    activity_type: ActivityType,
    location: LocationPayload,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn propose_appointment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<ProposeAppointmentRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let input = ProposeAppointment {
        match_id: payload.match_id,
        inviter_pet_id: payload.inviter_pet_id,
        invitee_pet_id: payload.invitee_pet_id,
        scheduled_at_ms: payload.scheduled_at_ms,
        activity_type: payload.activity_type,
        location: payload.location.into(),
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state.appointment_service().propose(actor, &role, input).await;
    observability::register_transition("propose", result.is_ok());
    let appointment = result.map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(appointment)).into_response())
}

#[derive(Debug, Deserialize)]
struct ListAppointmentsQuery {
    match_id: Option<String>,
    user_id: Option<String>,
}

async fn list_appointments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListAppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let service = state.appointment_service();

    let appointments = match (query.match_id, query.user_id) {
        (Some(match_id), None) => service
            .list_by_match(&actor, &role, &match_id)
            .await
            .map_err(map_domain_error)?,
        (None, Some(user_id)) => service
            .list_by_user(&actor, &role, &user_id)
            .await
            .map_err(map_domain_error)?,
        (None, None) => service
            .list_by_user(&actor, &role, &actor.user_id)
            .await
            .map_err(map_domain_error)?,
        (Some(_), Some(_)) => {
            return Err(ApiError::Validation(
                "provide only one of match_id or user_id".into(),
            ));
        }
    };
    Ok(Json(appointments))
}

async fn get_appointment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let appointment = state
        .appointment_service()
        .get(&actor, &role, &appointment_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(appointment))
}

async fn get_timeline(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Vec<AppointmentTimelineEvent>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let events = state
        .appointment_service()
        .timeline(&actor, &role, &appointment_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize, Validate)]
struct PreflightRequest {
    #[validate(length(min = 1, max = 128))]
    match_id: String,
    #[validate(length(min = 1, max = 128))]
    inviter_pet_id: String,
    #[validate(length(min = 1, max = 128))]
    invitee_pet_id: String,
}

async fn preflight(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<PreflightRequest>,
) -> Result<Json<PreconditionReport>, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let report = state
        .appointment_service()
        .validate_preconditions(
            &actor,
            &role,
            ValidatePreconditions {
                match_id: payload.match_id,
                inviter_pet_id: payload.inviter_pet_id,
                invitee_pet_id: payload.invitee_pet_id,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize, Validate)]
struct RespondRequest {
    accept: bool,
    #[validate(length(min = 1, max = 500))]
    decline_reason: Option<String>,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn respond_to_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<RespondOutcome>, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let input = RespondToAppointment {
        accept: payload.accept,
        decline_reason: payload.decline_reason,
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .respond(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("respond", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Deserialize)]
struct CounterOfferRequest {
    scheduled_at_ms: Option<i64>,
    location: Option<LocationPayload>,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn counter_offer_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CounterOfferRequest>,
) -> Result<Json<Appointment>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let change = match (payload.scheduled_at_ms, payload.location) {
        (Some(scheduled_at_ms), None) => CounterOfferChange::DateTime { scheduled_at_ms },
        (None, Some(location)) => CounterOfferChange::Location(location.into()),
        (Some(scheduled_at_ms), Some(location)) => CounterOfferChange::Both {
            scheduled_at_ms,
            location: location.into(),
        },
        (None, None) => {
            return Err(ApiError::Validation(
                "a counter-offer must change the date/time, the location, or both".into(),
            ));
        }
    };
    let input = CounterOfferAppointment {
        change,
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .counter_offer(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("counter_offer", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Deserialize)]
struct CheckInRequest {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn check_in_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CheckInRequest>,
) -> Result<Json<Appointment>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let input = CheckInAppointment {
        latitude: payload.latitude,
        longitude: payload.longitude,
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .check_in(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("check_in", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Default, Deserialize)]
struct CompleteRequest {
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn complete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    payload: Option<Json<CompleteRequest>>,
) -> Result<Json<Appointment>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;
    let Json(payload) = payload.unwrap_or_default();

    let input = CompleteAppointment {
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .complete(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("complete", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Deserialize, Validate)]
struct CancelRequest {
    #[validate(length(min = 1, max = 500))]
    reason: String,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Appointment>, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let input = CancelAppointment {
        reason: payload.reason,
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .cancel(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("cancel", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Default, Deserialize)]
struct NoShowRequest {
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn mark_no_show(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    payload: Option<Json<NoShowRequest>>,
) -> Result<Json<Appointment>, ApiError> {
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;
    let Json(payload) = payload.unwrap_or_default();

    let input = MarkNoShow {
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let result = state
        .appointment_service()
        .mark_no_show(actor, &role, &appointment_id, input)
        .await;
    observability::register_transition("mark_no_show", result.is_ok());
    Ok(Json(result.map_err(map_domain_error)?))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateLocationRequest {
    #[validate(length(min = 1, max = 160))]
    name: String,
    #[validate(length(min = 1, max = 256))]
    address: String,
    latitude: f64,
    longitude: f64,
    #[validate(length(min = 1, max = 128))]
    city: String,
    #[validate(length(min = 1, max = 128))]
    district: String,
    place_type: PlaceType,
    #[serde(default)]
    request_ts_ms: Option<i64>,
}

async fn create_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateLocationRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let role = auth.role.clone();
    let request_id = request_id_from_headers(&headers)?;
    let correlation_id = correlation_id_from_headers(&headers)?;

    let input = CreateLocation {
        name: payload.name,
        address: payload.address,
        latitude: payload.latitude,
        longitude: payload.longitude,
        city: payload.city,
        district: payload.district,
        place_type: payload.place_type,
        request_id,
        correlation_id,
        request_ts_ms: payload.request_ts_ms,
    };
    let location = state
        .location_service()
        .create_location(actor, &role, input)
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(location)).into_response())
}

#[derive(Debug, Deserialize)]
struct RecentLocationsQuery {
    limit: Option<usize>,
}

async fn list_recent_locations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<RecentLocationsQuery>,
) -> Result<Json<Vec<Location>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let locations = state
        .location_service()
        .list_recent(&actor.user_id, query.limit)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(locations))
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    let username = auth.username.as_deref().unwrap_or(user_id);
    Ok(ActorIdentity::new(user_id, username))
}

fn request_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(std::string::ToString::to_string)
        .ok_or_else(|| ApiError::Validation("missing request id".into()))
}

fn correlation_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(app_middleware::CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(std::string::ToString::to_string)
        .ok_or_else(|| ApiError::Validation("missing correlation id".into()))
}

fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::NotFound => ApiError::NotFound,
        DomainError::Forbidden(message) => ApiError::Forbidden(message),
        DomainError::InvalidTransition { from, action } => ApiError::InvalidTransition(format!(
            "{action} is not allowed while the appointment is {from}"
        )),
        DomainError::CounterOfferLimit { max } => ApiError::CounterOfferLimit { max },
        DomainError::CheckInTooEarly { minutes_until_open } => ApiError::OutsideCheckInWindow {
            message: format!("check-in opens in {minutes_until_open} minutes"),
            details: json!({
                "position": "too_early",
                "minutes_until_open": minutes_until_open,
            }),
        },
        DomainError::CheckInTooLate {
            minutes_since_close,
        } => ApiError::OutsideCheckInWindow {
            message: format!("check-in window closed {minutes_since_close} minutes ago"),
            details: json!({
                "position": "too_late",
                "minutes_since_close": minutes_since_close,
            }),
        },
        DomainError::TooFarFromVenue {
            distance_meters,
            radius_meters,
        } => ApiError::TooFarToCheckIn {
            message: format!(
                "{distance_meters:.0}m from the meeting point; check-in allowed within {radius_meters:.0}m"
            ),
            details: json!({
                "distance_meters": distance_meters,
                "radius_meters": radius_meters,
            }),
        },
        DomainError::Conflict => ApiError::Conflict,
        DomainError::Internal(message) => {
            tracing::error!(error = %message, "domain operation failed");
            ApiError::Internal
        }
    }
}
