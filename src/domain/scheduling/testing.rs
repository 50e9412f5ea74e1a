use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};

use crate::{
    domain::{
        core::{
            AvailabilityWindow, Booking, BookingId, BookingPolicy, Currency, CustomerInfo, Money,
            ServiceSpec, UserId,
        },
        Entity,
    },
    infrastructure::memory::{
        InMemoryActivityLogRepository, InMemoryBookingRepository, InMemoryServiceRepository,
    },
    Scheduling,
};

use super::{
    Clock, Collaborators, NotificationDispatcher, NotificationEvent, PaymentError,
    PaymentProcessor, Repositories, SchedulingEngine,
};

pub const PROVIDER: u64 = 100;
pub const CUSTOMER: u64 = 200;

/// 手動で進める時計
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance(&self, duration: Duration) {
        *self.0.lock().unwrap() += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// 送信された通知を記録する
#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<(NotificationEvent, BookingId)>>);

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(NotificationEvent, BookingId)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send(&self, event: NotificationEvent, booking: &Booking) {
        self.0.lock().unwrap().push((event, booking.id()));
    }
}

/// 決済を記録する (`decline` で拒否に切り替え)
#[derive(Default)]
pub struct RecordingPayments {
    charges: Mutex<Vec<(BookingId, Money)>>,
    refunds: Mutex<Vec<(BookingId, Money)>>,
    decline: AtomicBool,
}

impl RecordingPayments {
    pub fn charges(&self) -> Vec<(BookingId, Money)> {
        self.charges.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<(BookingId, Money)> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProcessor for RecordingPayments {
    async fn charge(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(PaymentError::Declined {
                reason: "card declined".to_owned(),
            });
        }
        self.charges.lock().unwrap().push((booking_id, *amount));
        Ok(())
    }

    async fn refund(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError> {
        self.refunds.lock().unwrap().push((booking_id, *amount));
        Ok(())
    }
}

pub struct Fixture {
    pub engine: Arc<SchedulingEngine>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: Arc<RecordingPayments>,
}

/// 2024-01-01 (月) 08:00 UTC 時点のエンジン
pub fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let payments = Arc::new(RecordingPayments::default());
    let engine = SchedulingEngine::new(
        Repositories {
            services: Arc::new(InMemoryServiceRepository::default()),
            bookings: Arc::new(InMemoryBookingRepository::default()),
            activity: Arc::new(InMemoryActivityLogRepository::default()),
        },
        Collaborators {
            clock: clock.clone(),
            notifier: notifier.clone(),
            payments: payments.clone(),
        },
        &Scheduling {
            machine_id: 1,
            node_id: 1,
            dashboard_upcoming_limit: 10,
            max_slot_range_days: 62,
        },
    );
    Fixture {
        engine: Arc::new(engine),
        clock,
        notifier,
        payments,
    }
}

/// 60 分 $150 の相談、24 時間前までキャンセル可
pub fn consultation(requires_approval: bool) -> ServiceSpec {
    ServiceSpec {
        name: "Consultation".to_owned(),
        duration_minutes: 60,
        price: Money::new(15000, Currency::USD),
        policy: BookingPolicy {
            max_advance_booking_days: 60,
            min_advance_booking_hours: 2,
            cancellation_policy_hours: 24,
            requires_approval,
        },
    }
}

pub fn window(weekday: Weekday, start: u32, end: u32) -> AvailabilityWindow {
    AvailabilityWindow::new(
        weekday,
        NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
    )
    .unwrap()
}

pub fn customer_info() -> CustomerInfo {
    CustomerInfo::new(
        "Hanako".to_owned(),
        Some("hanako@example.com".to_owned()),
        None,
    )
}

pub fn provider() -> UserId {
    UserId::from(PROVIDER)
}

pub fn customer() -> UserId {
    UserId::from(CUSTOMER)
}

/// 2024 年 1 月の日時
pub fn jan(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}
