use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use yoyaku::domain::{
    core::{
        weekday_from_index, ActivityLogEntry, AvailabilityWindow, Booking, CustomerInfo, Service,
        ServiceSpec, UserId,
    },
    scheduling::{
        Actor, BookingStats, ProviderDashboard, SchedulingEngine, SchedulingError, Slot,
        StatusChange,
    },
};

use crate::error::ApiError;

const USER_HEADER: &str = "x-user-id";

type Engine = State<Arc<SchedulingEngine>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(engine: Arc<SchedulingEngine>) -> Router {
    Router::new()
        .route("/services", post(create_service))
        .route("/services/:id", get(get_service).put(update_service))
        .route("/services/:id/active", put(set_service_active))
        .route("/services/:id/availability", put(set_availability))
        .route("/services/:id/availability/:day", get(get_windows))
        .route("/services/:id/slots", get(list_available_slots))
        .route("/services/:id/bookings", post(create_booking))
        .route("/services/:id/bookings/token/:token", get(find_booking_by_token))
        .route("/services/:id/complete-elapsed", post(complete_elapsed))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/status", post(update_booking_status))
        .route("/bookings/:id/reschedule", post(reschedule_booking))
        .route("/bookings/:id/activity", get(activity_for_booking))
        .route("/providers/:id/services", get(list_services))
        .route("/providers/:id/dashboard", get(dashboard))
        .route("/providers/:id/analytics", get(analytics))
        .route("/providers/:id/activity", get(activity_for_provider))
        .with_state(engine)
}

/// リクエストしたユーザー
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|id| CurrentUser(UserId::from(id)))
            .ok_or(ApiError::Unauthenticated)
    }
}

impl CurrentUser {
    fn ensure(&self, user_id: UserId) -> Result<(), ApiError> {
        match self.0 == user_id {
            true => Ok(()),
            false => Err(SchedulingError::Unauthorized.into()),
        }
    }
}

/// 自分のサービスであることを確認する
async fn own_service(
    engine: &SchedulingEngine,
    user: &CurrentUser,
    id: u64,
) -> Result<Service, ApiError> {
    let service = engine.get_service(id.into()).await?;
    user.ensure(service.provider_id())?;
    Ok(service)
}

#[derive(Deserialize)]
pub struct ActiveRequest {
    active: bool,
}

#[derive(Deserialize)]
pub struct WindowRequest {
    /// 0 = 月曜日
    day_of_week: u32,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(Deserialize)]
pub struct SlotQuery {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Deserialize)]
pub struct BookingRequest {
    start: DateTime<Utc>,
    customer_name: String,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    change: StatusChange,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    start: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

async fn create_service(
    State(engine): Engine,
    user: CurrentUser,
    Json(spec): Json<ServiceSpec>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    let service = engine.create_service(user.0, spec).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn get_service(State(engine): Engine, Path(id): Path<u64>) -> ApiResult<Service> {
    Ok(Json(engine.get_service(id.into()).await?))
}

async fn update_service(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(spec): Json<ServiceSpec>,
) -> ApiResult<Service> {
    own_service(&engine, &user, id).await?;
    Ok(Json(engine.update_service(id.into(), spec).await?))
}

async fn set_service_active(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(request): Json<ActiveRequest>,
) -> ApiResult<Service> {
    own_service(&engine, &user, id).await?;
    Ok(Json(engine.set_service_active(id.into(), request.active).await?))
}

async fn set_availability(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(windows): Json<Vec<WindowRequest>>,
) -> ApiResult<Service> {
    own_service(&engine, &user, id).await?;
    let windows = windows
        .into_iter()
        .map(|w| AvailabilityWindow::from_day_index(w.day_of_week, w.start_time, w.end_time))
        .collect::<Result<Vec<_>, _>>()
        .map_err(SchedulingError::from)?;
    Ok(Json(engine.set_availability(id.into(), windows).await?))
}

async fn get_windows(
    State(engine): Engine,
    Path((id, day)): Path<(u64, u32)>,
) -> ApiResult<Vec<AvailabilityWindow>> {
    let weekday = weekday_from_index(day)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid day of week: {}", day)))?;
    Ok(Json(engine.get_windows(id.into(), weekday).await?))
}

async fn list_available_slots(
    State(engine): Engine,
    Path(id): Path<u64>,
    Query(query): Query<SlotQuery>,
) -> ApiResult<Vec<Slot>> {
    Ok(Json(
        engine
            .list_available_slots(id.into(), query.from, query.to)
            .await?,
    ))
}

async fn create_booking(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let info = CustomerInfo::new(
        request.customer_name,
        request.customer_email,
        request.customer_phone,
    );
    let booking = engine
        .create_booking(id.into(), user.0, request.start, info, request.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn find_booking_by_token(
    State(engine): Engine,
    Path((id, token)): Path<(u64, String)>,
) -> ApiResult<Booking> {
    engine
        .find_booking_by_token(id.into(), &token)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No booking with token {}", token)))
}

async fn complete_elapsed(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> ApiResult<Vec<Booking>> {
    own_service(&engine, &user, id).await?;
    Ok(Json(engine.complete_elapsed(id.into()).await?))
}

async fn get_booking(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> ApiResult<Booking> {
    let booking = engine.get_booking(id.into()).await?;
    if booking.provider_id() != user.0 && booking.customer_id() != user.0 {
        return Err(SchedulingError::Unauthorized.into());
    }
    Ok(Json(booking))
}

async fn update_booking_status(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Booking> {
    Ok(Json(
        engine
            .update_booking_status(id.into(), request.change, Actor::from(user.0), request.notes)
            .await?,
    ))
}

async fn reschedule_booking(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Json(request): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let booking = engine
        .reschedule_booking(id.into(), request.start, Actor::from(user.0))
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn activity_for_booking(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> ApiResult<Vec<ActivityLogEntry>> {
    let booking = engine.get_booking(id.into()).await?;
    user.ensure(booking.provider_id())?;
    Ok(Json(engine.activity_for_booking(id.into()).await?))
}

async fn list_services(State(engine): Engine, Path(id): Path<u64>) -> ApiResult<Vec<Service>> {
    Ok(Json(engine.list_services(id.into()).await?))
}

async fn dashboard(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> ApiResult<ProviderDashboard> {
    user.ensure(id.into())?;
    Ok(Json(engine.get_provider_dashboard(id.into()).await?))
}

async fn analytics(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<BookingStats> {
    user.ensure(id.into())?;
    Ok(Json(
        engine
            .get_analytics(id.into(), query.start_date, query.end_date)
            .await?,
    ))
}

async fn activity_for_provider(
    State(engine): Engine,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> ApiResult<Vec<ActivityLogEntry>> {
    user.ensure(id.into())?;
    Ok(Json(engine.activity_for_provider(id.into()).await?))
}
