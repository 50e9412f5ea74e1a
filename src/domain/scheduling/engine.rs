use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use tracing::debug;

use crate::{
    domain::{
        core::{
            ActivityAction, ActivityLogEntry, ActivityLogRepository, AvailabilityWindow, Booking,
            BookingId, BookingRepository, CustomerInfo, Service, ServiceId, ServiceRepository,
            ServiceSpec, UserId,
        },
        Entity, IdGenerator,
    },
    Scheduling,
};

use super::{
    ActivityLog, Actor, AnalyticsAggregator, AvailabilityScheduler, BookingLedger, BookingStats,
    Clock, DeferredPaymentProcessor, NotificationDispatcher, NotificationEvent, PaymentProcessor,
    ProviderDashboard, SchedulingError, Slot, SlotGenerator, StatusChange, SystemClock,
    TracingNotificationDispatcher,
};

/// エンジンが使うリポジトリ
#[derive(Clone)]
pub struct Repositories {
    pub services: Arc<dyn ServiceRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub activity: Arc<dyn ActivityLogRepository>,
}

/// 外部の協力者
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub payments: Arc<dyn PaymentProcessor>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotificationDispatcher),
            payments: Arc::new(DeferredPaymentProcessor),
        }
    }
}

/// 予約スケジューリングエンジン
///
/// 各コンポーネントを束ね、操作ごとに操作履歴の記録と通知を行う。
pub struct SchedulingEngine {
    scheduler: AvailabilityScheduler,
    slots: SlotGenerator,
    ledger: BookingLedger,
    activity: ActivityLog,
    analytics: AnalyticsAggregator,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl SchedulingEngine {
    pub fn new(
        repositories: Repositories,
        collaborators: Collaborators,
        settings: &Scheduling,
    ) -> Self {
        let Repositories {
            services,
            bookings,
            activity,
        } = repositories;
        let Collaborators {
            clock,
            notifier,
            payments,
        } = collaborators;
        let ids = Arc::new(IdGenerator::new(settings.machine_id, settings.node_id));
        Self {
            scheduler: AvailabilityScheduler::new(services.clone(), ids.clone()),
            slots: SlotGenerator::new(
                services.clone(),
                bookings.clone(),
                clock.clone(),
                settings.max_slot_range_days,
            ),
            ledger: BookingLedger::new(
                services.clone(),
                bookings.clone(),
                payments,
                clock.clone(),
                ids,
            ),
            activity: ActivityLog::new(activity),
            analytics: AnalyticsAggregator::new(
                services,
                bookings,
                clock.clone(),
                settings.dashboard_upcoming_limit,
            ),
            notifier,
            clock,
        }
    }

    pub async fn create_service(
        &self,
        provider_id: UserId,
        spec: ServiceSpec,
    ) -> Result<Service, SchedulingError> {
        let service = self.scheduler.create_service(provider_id, spec).await?;
        self.record_service(&service, ActivityAction::ServiceCreated, service.name())
            .await;
        Ok(service)
    }

    pub async fn update_service(
        &self,
        service_id: ServiceId,
        spec: ServiceSpec,
    ) -> Result<Service, SchedulingError> {
        let service = self.scheduler.update_service(service_id, spec).await?;
        self.record_service(&service, ActivityAction::ServiceUpdated, service.name())
            .await;
        Ok(service)
    }

    pub async fn set_service_active(
        &self,
        service_id: ServiceId,
        active: bool,
    ) -> Result<Service, SchedulingError> {
        let service = self
            .scheduler
            .set_service_active(service_id, active)
            .await?;
        let action = match active {
            true => ActivityAction::ServiceActivated,
            false => ActivityAction::ServiceDeactivated,
        };
        self.record_service(&service, action, service.name()).await;
        Ok(service)
    }

    pub async fn set_availability(
        &self,
        service_id: ServiceId,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<Service, SchedulingError> {
        let service = self.scheduler.set_availability(service_id, windows).await?;
        let details = format!("{} windows", service.availability().len());
        self.record_service(&service, ActivityAction::AvailabilityUpdated, details)
            .await;
        Ok(service)
    }

    pub async fn get_windows(
        &self,
        service_id: ServiceId,
        weekday: Weekday,
    ) -> Result<Vec<AvailabilityWindow>, SchedulingError> {
        self.scheduler.get_windows(service_id, weekday).await
    }

    pub async fn get_service(&self, service_id: ServiceId) -> Result<Service, SchedulingError> {
        self.scheduler.get_service(service_id).await
    }

    pub async fn list_services(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<Service>, SchedulingError> {
        self.scheduler.list_services(provider_id).await
    }

    pub async fn list_available_slots(
        &self,
        service_id: ServiceId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, SchedulingError> {
        self.slots.list_available_slots(service_id, from, to).await
    }

    /// 開始時刻を指定して予約する
    pub async fn create_booking(
        &self,
        service_id: ServiceId,
        customer_id: UserId,
        start: DateTime<Utc>,
        customer_info: CustomerInfo,
        notes: Option<String>,
    ) -> Result<Booking, SchedulingError> {
        let booking = self
            .ledger
            .reserve(service_id, customer_id, start, customer_info, notes)
            .await?;
        self.record_booking(
            &booking,
            Some(customer_id),
            ActivityAction::BookingCreated,
            format!("{:?} at {}", booking.status(), booking.start()),
        )
        .await;
        self.notifier
            .send(NotificationEvent::BookingCreated, &booking)
            .await;
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, SchedulingError> {
        self.ledger.find(booking_id).await
    }

    pub async fn find_booking_by_token(
        &self,
        service_id: ServiceId,
        token: &str,
    ) -> Result<Option<Booking>, SchedulingError> {
        self.ledger.find_by_token(service_id, token).await
    }

    /// 予約ステータスを変更する (メモは操作履歴に残る)
    pub async fn update_booking_status(
        &self,
        booking_id: BookingId,
        change: StatusChange,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<Booking, SchedulingError> {
        let booking = self.ledger.transition(booking_id, change, actor).await?;
        let (action, event, mut details) = match change {
            StatusChange::Confirm => (
                ActivityAction::BookingConfirmed,
                NotificationEvent::BookingConfirmed,
                "confirmed".to_owned(),
            ),
            StatusChange::Cancel { forced } => (
                ActivityAction::BookingCancelled,
                NotificationEvent::BookingCancelled,
                match forced {
                    true => "cancelled (forced)".to_owned(),
                    false => "cancelled".to_owned(),
                },
            ),
            StatusChange::Complete => (
                ActivityAction::BookingCompleted,
                NotificationEvent::BookingCompleted,
                "completed".to_owned(),
            ),
        };
        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            details = format!("{}: {}", details, notes);
        }
        self.record_booking(&booking, actor.user_id(), action, details)
            .await;
        self.notifier.send(event, &booking).await;
        Ok(booking)
    }

    /// 予約の日時を変更し、新しい予約を返す
    pub async fn reschedule_booking(
        &self,
        booking_id: BookingId,
        start: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Booking, SchedulingError> {
        let rescheduled = self.ledger.reschedule(booking_id, start, actor).await?;
        let (previous, replacement) = (rescheduled.previous, rescheduled.replacement);
        self.record_booking(
            &previous,
            actor.user_id(),
            ActivityAction::BookingRescheduled,
            format!("rescheduled to booking {}", replacement.id()),
        )
        .await;
        self.record_booking(
            &replacement,
            actor.user_id(),
            ActivityAction::BookingCreated,
            format!("rescheduled from booking {}", previous.id()),
        )
        .await;
        self.notifier
            .send(NotificationEvent::BookingRescheduled, &replacement)
            .await;
        Ok(replacement)
    }

    /// 終了した確定済み予約をまとめて完了にする
    pub async fn complete_elapsed(
        &self,
        service_id: ServiceId,
    ) -> Result<Vec<Booking>, SchedulingError> {
        let completed = self.ledger.complete_elapsed(service_id).await?;
        for booking in &completed {
            self.record_booking(
                booking,
                None,
                ActivityAction::BookingCompleted,
                "completed after end time",
            )
            .await;
            self.notifier
                .send(NotificationEvent::BookingCompleted, booking)
                .await;
        }
        Ok(completed)
    }

    pub async fn get_provider_dashboard(
        &self,
        provider_id: UserId,
    ) -> Result<ProviderDashboard, SchedulingError> {
        self.analytics.dashboard(provider_id).await
    }

    pub async fn get_analytics(
        &self,
        provider_id: UserId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BookingStats, SchedulingError> {
        self.analytics
            .compute_stats(provider_id, start_date, end_date)
            .await
    }

    pub async fn activity_for_provider(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<ActivityLogEntry>, SchedulingError> {
        self.activity.for_provider(provider_id).await
    }

    pub async fn activity_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<ActivityLogEntry>, SchedulingError> {
        let booking = self.ledger.find(booking_id).await?;
        self.activity
            .for_booking(booking.provider_id(), booking_id)
            .await
    }

    async fn record_service(
        &self,
        service: &Service,
        action: ActivityAction,
        details: impl Into<String>,
    ) {
        let entry = ActivityLogEntry::for_service(service, action, details, self.clock.now());
        self.activity.record(entry).await;
    }

    async fn record_booking(
        &self,
        booking: &Booking,
        actor_user_id: Option<UserId>,
        action: ActivityAction,
        details: impl Into<String>,
    ) {
        let entry = ActivityLogEntry::for_booking(
            booking,
            actor_user_id,
            action,
            details,
            self.clock.now(),
        );
        debug!(booking_id = %booking.id(), %action, "activity recorded");
        self.activity.record(entry).await;
    }
}
