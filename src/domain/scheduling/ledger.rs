use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::domain::{
    core::{
        Booking, BookingCalendar, BookingId, BookingRepository, BookingStatus, CustomerInfo,
        Service, ServiceId, ServiceRepository, UserId,
    },
    Entity, IdGenerator,
};

use super::{
    Actor, BookingLifecycle, Clock, PaymentProcessor, PolicyViolation, SchedulingError,
    StatusChange,
};

/// 日時変更の結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rescheduled {
    /// 変更済みになった元の予約
    pub previous: Booking,
    pub replacement: Booking,
}

/// 予約の作成とステータス変更
///
/// 同じサービスへの書き込みはサービスごとのロックで直列化する。
/// 別プロセスからの書き込みはリポジトリのリビジョン検査で検出される。
pub struct BookingLedger {
    services: Arc<dyn ServiceRepository>,
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    ids: Arc<IdGenerator>,
    lifecycle: BookingLifecycle,
    locks: CalendarLocks,
}

impl BookingLedger {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            services,
            bookings,
            payments,
            clock,
            ids,
            lifecycle: BookingLifecycle,
            locks: CalendarLocks::default(),
        }
    }

    /// 枠を予約する
    ///
    /// 承認不要のサービスでは確定となり、その場で決済する。
    /// 台帳を保存できなかった場合は決済を取り消す。
    pub async fn reserve(
        &self,
        service_id: ServiceId,
        customer_id: UserId,
        start: DateTime<Utc>,
        customer_info: CustomerInfo,
        notes: Option<String>,
    ) -> Result<Booking, SchedulingError> {
        customer_info.validate()?;
        let service = self.service(service_id).await?;
        let id = self.ids.generate::<BookingId>().await;

        let _guard = self.locks.acquire(service_id).await;
        let now = self.clock.now();
        Self::validate_request(&service, start, now)?;
        let mut calendar = self.bookings.find_calendar(service_id).await?;
        let booking =
            Booking::reserve(id, &service, customer_id, customer_info, start, notes, now)?;
        calendar
            .reserve(booking.clone())
            .map_err(|e| SchedulingError::from_calendar(e, id))?;
        let charged =
            booking.status() == BookingStatus::Confirmed && self.charge(&booking).await?;
        self.commit_charged(&mut calendar, &booking, charged).await?;
        info!(
            booking_id = %id,
            %service_id,
            %customer_id,
            status = ?booking.status(),
            "booking reserved"
        );
        Ok(booking)
    }

    pub async fn confirm(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> Result<Booking, SchedulingError> {
        self.transition(booking_id, StatusChange::Confirm, actor).await
    }

    pub async fn cancel(
        &self,
        booking_id: BookingId,
        actor: Actor,
        forced: bool,
    ) -> Result<Booking, SchedulingError> {
        self.transition(booking_id, StatusChange::Cancel { forced }, actor)
            .await
    }

    pub async fn mark_completed(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> Result<Booking, SchedulingError> {
        self.transition(booking_id, StatusChange::Complete, actor)
            .await
    }

    /// 予約ステータスを変更し、変更後の予約を返す
    pub async fn transition(
        &self,
        booking_id: BookingId,
        change: StatusChange,
        actor: Actor,
    ) -> Result<Booking, SchedulingError> {
        let service_id = self.find(booking_id).await?.service_id();
        let service = self.service(service_id).await?;

        let _guard = self.locks.acquire(service_id).await;
        let mut calendar = self.bookings.find_calendar(service_id).await?;
        let booking = Self::booking_in(&calendar, booking_id)?;
        let role = self.lifecycle.role_of(&booking, actor)?;
        let now = self.clock.now();
        self.lifecycle
            .check(&booking, service.policy(), change, role, now)?;
        match change {
            StatusChange::Confirm => calendar.confirm(booking_id, now),
            StatusChange::Cancel { .. } => calendar.cancel(booking_id, now),
            StatusChange::Complete => calendar.complete(booking_id, now),
        }
        .map_err(|e| SchedulingError::from_calendar(e, booking_id))?;
        let charged = change == StatusChange::Confirm && self.charge(&booking).await?;
        self.commit_charged(&mut calendar, &booking, charged).await?;
        info!(%booking_id, ?change, ?role, "booking status changed");
        Self::booking_in(&calendar, booking_id)
    }

    /// 予約を別の開始時刻へ移す
    ///
    /// 元の予約は変更済みとなり、サービスの現在の内容で新しい予約が作られる。
    /// 新しい枠が取れなければ元の予約は変化しない。
    pub async fn reschedule(
        &self,
        booking_id: BookingId,
        start: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Rescheduled, SchedulingError> {
        let service_id = self.find(booking_id).await?.service_id();
        let service = self.service(service_id).await?;
        let id = self.ids.generate::<BookingId>().await;

        let _guard = self.locks.acquire(service_id).await;
        let mut calendar = self.bookings.find_calendar(service_id).await?;
        let previous = Self::booking_in(&calendar, booking_id)?;
        let role = self.lifecycle.role_of(&previous, actor)?;
        let now = self.clock.now();
        self.lifecycle
            .check_reschedule(&previous, service.policy(), role, now)?;
        Self::validate_request(&service, start, now)?;
        let replacement = previous.replacement(id, &service, start, now)?;
        calendar
            .reschedule(booking_id, replacement.clone(), now)
            .map_err(|e| SchedulingError::from_calendar(e, booking_id))?;
        self.commit(&mut calendar).await?;
        info!(
            %booking_id,
            replacement_id = %id,
            ?role,
            "booking rescheduled"
        );
        Ok(Rescheduled {
            previous: Self::booking_in(&calendar, booking_id)?,
            replacement,
        })
    }

    /// 終了時刻を過ぎた確定済みの予約をすべて完了にする
    pub async fn complete_elapsed(
        &self,
        service_id: ServiceId,
    ) -> Result<Vec<Booking>, SchedulingError> {
        self.service(service_id).await?;

        let _guard = self.locks.acquire(service_id).await;
        let mut calendar = self.bookings.find_calendar(service_id).await?;
        let now = self.clock.now();
        let elapsed = calendar
            .bookings()
            .iter()
            .filter(|b| b.status() == BookingStatus::Confirmed && b.end() <= now)
            .map(|b| b.id())
            .collect::<Vec<_>>();
        if elapsed.is_empty() {
            return Ok(Vec::new());
        }
        for booking_id in &elapsed {
            calendar
                .complete(*booking_id, now)
                .map_err(|e| SchedulingError::from_calendar(e, *booking_id))?;
        }
        self.commit(&mut calendar).await?;
        info!(%service_id, "{} elapsed bookings completed", elapsed.len());
        elapsed
            .into_iter()
            .map(|id| Self::booking_in(&calendar, id))
            .collect()
    }

    pub async fn find(&self, booking_id: BookingId) -> Result<Booking, SchedulingError> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found::<Booking>(booking_id))
    }

    pub async fn find_by_token(
        &self,
        service_id: ServiceId,
        token: &str,
    ) -> Result<Option<Booking>, SchedulingError> {
        let calendar = self.bookings.find_calendar(service_id).await?;
        Ok(calendar.find_by_token(token).cloned())
    }

    /// サービス状態と予約ポリシーの検査
    fn validate_request(
        service: &Service,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let policy = service.policy();
        if !service.is_active() {
            return Err(PolicyViolation::ServiceInactive.into());
        }
        if start < policy.earliest_start(now) {
            return Err(PolicyViolation::InsufficientNotice {
                hours: policy.min_advance_booking_hours,
            }
            .into());
        }
        if start > policy.latest_start(now) {
            return Err(PolicyViolation::TooFarAhead {
                days: policy.max_advance_booking_days,
            }
            .into());
        }
        if !service.accepts_start(start) {
            return Err(PolicyViolation::OutsideAvailability.into());
        }
        Ok(())
    }

    async fn service(&self, service_id: ServiceId) -> Result<Service, SchedulingError> {
        self.services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found::<Service>(service_id))
    }

    /// 有料の予約を決済する (決済した場合は `true`)
    async fn charge(&self, booking: &Booking) -> Result<bool, SchedulingError> {
        if booking.price().is_free() {
            return Ok(false);
        }
        match self.payments.charge(booking.id(), &booking.price()).await {
            Ok(()) => {
                debug!(booking_id = %booking.id(), "charged {}", booking.price());
                Ok(true)
            }
            Err(e) => {
                warn!(booking_id = %booking.id(), "payment failed: {}", e);
                Err(PolicyViolation::PaymentFailed(e).into())
            }
        }
    }

    async fn commit(&self, calendar: &mut BookingCalendar) -> Result<(), SchedulingError> {
        if let Err(e) = self.bookings.save(calendar).await {
            error!(service_id = %calendar.id(), "failed to save booking calendar: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn commit_charged(
        &self,
        calendar: &mut BookingCalendar,
        booking: &Booking,
        charged: bool,
    ) -> Result<(), SchedulingError> {
        let result = self.commit(calendar).await;
        if result.is_err() && charged {
            match self.payments.refund(booking.id(), &booking.price()).await {
                Ok(()) => warn!(booking_id = %booking.id(), "refunded {}", booking.price()),
                Err(e) => error!(booking_id = %booking.id(), "refund failed: {}", e),
            }
        }
        result
    }

    fn booking_in(
        calendar: &BookingCalendar,
        booking_id: BookingId,
    ) -> Result<Booking, SchedulingError> {
        calendar
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| SchedulingError::not_found::<Booking>(booking_id))
    }
}

/// サービスごとの書き込みロック
#[derive(Default)]
struct CalendarLocks(Mutex<HashMap<ServiceId, Arc<Mutex<()>>>>);

impl CalendarLocks {
    async fn acquire(&self, service_id: ServiceId) -> OwnedMutexGuard<()> {
        let lock = self.0.lock().await.entry(service_id).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, Weekday};

    use super::*;
    use crate::{
        domain::{
            core::{Currency, Money},
            scheduling::testing::*,
            Aggregation, DataAccessError,
        },
        infrastructure::memory::{InMemoryBookingRepository, InMemoryServiceRepository},
    };

    struct Harness {
        ledger: BookingLedger,
        bookings: Arc<InMemoryBookingRepository>,
        clock: Arc<ManualClock>,
        service: Service,
    }

    async fn harness(requires_approval: bool) -> Harness {
        let services = Arc::new(InMemoryServiceRepository::default());
        let bookings = Arc::new(InMemoryBookingRepository::default());
        let clock = Arc::new(ManualClock::new(jan(1, 8)));
        let mut service = Service::create(
            ServiceId::from(1),
            provider(),
            consultation(requires_approval),
        )
        .unwrap();
        service
            .replace_availability(vec![window(chrono::Weekday::Mon, 9, 12)])
            .unwrap();
        services.save(&mut service).await.unwrap();
        let ledger = BookingLedger::new(
            services,
            bookings.clone(),
            Arc::new(RecordingPayments::default()),
            clock.clone(),
            Arc::new(IdGenerator::new(1, 1)),
        );
        Harness {
            ledger,
            bookings,
            clock,
            service,
        }
    }

    async fn reserve(harness: &Harness, start: DateTime<Utc>) -> Result<Booking, SchedulingError> {
        harness
            .ledger
            .reserve(harness.service.id(), customer(), start, customer_info(), None)
            .await
    }

    #[tokio::test]
    async fn test_confirm_cancel_complete() {
        let harness = harness(true).await;
        let first = reserve(&harness, jan(8, 9)).await.unwrap();
        let second = reserve(&harness, jan(8, 10)).await.unwrap();
        assert_eq!(first.status(), BookingStatus::Pending);
        assert_eq!(first.price(), Money::new(15000, Currency::USD));

        let confirmed = harness
            .ledger
            .confirm(first.id(), Actor::User(provider()))
            .await
            .unwrap();
        assert_eq!(confirmed.status(), BookingStatus::Confirmed);
        assert_eq!(confirmed.updated_at(), jan(1, 8));

        let cancelled = harness
            .ledger
            .cancel(second.id(), Actor::User(customer()), false)
            .await
            .unwrap();
        assert_eq!(cancelled.status(), BookingStatus::Cancelled);

        harness.clock.set(jan(8, 10));
        let completed = harness
            .ledger
            .mark_completed(first.id(), Actor::System)
            .await
            .unwrap();
        assert_eq!(completed.status(), BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_booking() {
        let harness = harness(false).await;
        assert!(matches!(
            harness
                .ledger
                .cancel(BookingId::from(42), Actor::System, false)
                .await,
            Err(SchedulingError::NotFound {
                entity: "booking",
                id: 42
            })
        ));
    }

    #[tokio::test]
    async fn test_stale_calendar_is_conflict() {
        let harness = harness(false).await;
        // 別プロセスが同じ台帳に書き込んだ状態を再現する
        let mut stale = harness
            .bookings
            .find_calendar(harness.service.id())
            .await
            .unwrap();
        reserve(&harness, jan(8, 9)).await.unwrap();
        let booking = Booking::reserve(
            BookingId::from(7),
            &harness.service,
            customer(),
            customer_info(),
            jan(8, 11),
            None,
            jan(1, 8),
        )
        .unwrap();
        stale.reserve(booking).unwrap();
        let result = harness.bookings.save(&mut stale).await;
        assert!(matches!(
            result.map_err(SchedulingError::from),
            Err(SchedulingError::Conflict)
        ));
        assert!(stale.peek().is_some());
        assert!(harness
            .bookings
            .find_by_id(BookingId::from(7))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reserve_at_min_advance_boundary() {
        let harness = harness(false).await;
        harness.clock.set(jan(8, 9) - Duration::hours(2));
        let booking = reserve(&harness, jan(8, 9)).await.unwrap();
        harness
            .ledger
            .cancel(booking.id(), Actor::User(provider()), true)
            .await
            .unwrap();
        harness.clock.advance(Duration::minutes(1));
        assert!(matches!(
            reserve(&harness, jan(8, 9)).await,
            Err(SchedulingError::PolicyViolation(
                PolicyViolation::InsufficientNotice { .. }
            ))
        ));
    }

    /// 読み込みはできるが保存は必ず競合する台帳
    #[derive(Default)]
    struct ConflictingBookings(InMemoryBookingRepository);

    #[async_trait]
    impl BookingRepository for ConflictingBookings {
        async fn find_calendar(
            &self,
            service_id: ServiceId,
        ) -> Result<BookingCalendar, DataAccessError> {
            self.0.find_calendar(service_id).await
        }

        async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
            self.0.find_by_id(id).await
        }

        async fn save(&self, calendar: &mut BookingCalendar) -> Result<bool, DataAccessError> {
            Err(DataAccessError::VersionConflict(format!(
                "booking_calendar-{}",
                calendar.id()
            )))
        }
    }

    #[tokio::test]
    async fn test_failed_save_refunds_charge() {
        let services = Arc::new(InMemoryServiceRepository::default());
        let bookings = Arc::new(ConflictingBookings::default());
        let payments = Arc::new(RecordingPayments::default());
        let mut instant =
            Service::create(ServiceId::from(1), provider(), consultation(false)).unwrap();
        let mut approval =
            Service::create(ServiceId::from(2), provider(), consultation(true)).unwrap();
        for service in [&mut instant, &mut approval] {
            service
                .replace_availability(vec![window(Weekday::Mon, 9, 12)])
                .unwrap();
            services.save(service).await.unwrap();
        }
        let ledger = BookingLedger::new(
            services,
            bookings.clone(),
            payments.clone(),
            Arc::new(ManualClock::new(jan(1, 8))),
            Arc::new(IdGenerator::new(1, 1)),
        );

        // 即時確定の予約
        let result = ledger
            .reserve(instant.id(), customer(), jan(8, 9), customer_info(), None)
            .await;
        assert!(matches!(result, Err(SchedulingError::Conflict)));
        assert_eq!(payments.charges().len(), 1);
        assert_eq!(payments.refunds(), payments.charges());
        assert!(bookings
            .0
            .find_calendar(instant.id())
            .await
            .unwrap()
            .bookings()
            .is_empty());

        // 承認待ちの予約を確定する
        let pending = Booking::reserve(
            BookingId::from(7),
            &approval,
            customer(),
            customer_info(),
            jan(8, 10),
            None,
            jan(1, 8),
        )
        .unwrap();
        let mut calendar = bookings.0.find_calendar(approval.id()).await.unwrap();
        calendar.reserve(pending).unwrap();
        bookings.0.save(&mut calendar).await.unwrap();
        let result = ledger
            .confirm(BookingId::from(7), Actor::User(provider()))
            .await;
        assert!(matches!(result, Err(SchedulingError::Conflict)));
        assert_eq!(payments.charges().len(), 2);
        assert_eq!(payments.refunds(), payments.charges());
        assert_eq!(
            bookings
                .0
                .find_by_id(BookingId::from(7))
                .await
                .unwrap()
                .map(|b| b.status()),
            Some(BookingStatus::Pending)
        );
    }
}
