use std::{collections::BTreeMap, sync::Arc};

use chrono::{NaiveDate, Utc, DateTime};
use serde::Serialize;

use crate::domain::{
    core::{
        Booking, BookingRepository, BookingStatus, Currency, Money, ServiceId, ServiceRepository,
        UserId,
    },
    Entity,
};

use super::{Clock, SchedulingError};

/// 通貨ごとの売上
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Revenue(BTreeMap<Currency, i64>);

impl Revenue {
    pub fn add(&mut self, money: Money) {
        *self.0.entry(money.currency()).or_default() += money.amount();
    }

    pub fn get(&self, currency: Currency) -> Money {
        Money::new(self.0.get(&currency).copied().unwrap_or_default(), currency)
    }

    pub fn iter(&self) -> impl Iterator<Item = Money> + '_ {
        self.0.iter().map(|(c, a)| Money::new(*a, *c))
    }
}

/// 件数と売上の集計
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub bookings: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub revenue: Revenue,
}

impl Tally {
    /// 変更済みの予約は置き換え先で数えるため対象外
    fn count(&mut self, booking: &Booking) {
        match booking.status() {
            BookingStatus::Rescheduled => return,
            BookingStatus::Pending => self.pending += 1,
            BookingStatus::Confirmed => self.confirmed += 1,
            BookingStatus::Completed => self.completed += 1,
            BookingStatus::Cancelled => self.cancelled += 1,
        }
        self.bookings += 1;
        if matches!(
            booking.status(),
            BookingStatus::Confirmed | BookingStatus::Completed
        ) {
            self.revenue.add(booking.price());
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceBreakdown {
    pub service_id: ServiceId,
    pub name: String,
    pub tally: Tally,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub tally: Tally,
}

/// プロバイダーの予約統計
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BookingStats {
    pub total_bookings: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub total_revenue: Revenue,
    pub completion_rate: f64,
    pub cancellation_rate: f64,
    pub per_service: Vec<ServiceBreakdown>,
    pub daily: Vec<DailyBreakdown>,
}

/// ダッシュボード表示用
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderDashboard {
    /// 本日開始の予約 (キャンセル・変更済みを除く)
    pub today: Vec<Booking>,
    /// これから始まる有効な予約 (開始時刻順)
    pub upcoming: Vec<Booking>,
    pub pending_count: usize,
}

/// 予約台帳の集計 (読み取り専用)
pub struct AnalyticsAggregator {
    services: Arc<dyn ServiceRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    upcoming_limit: usize,
}

impl AnalyticsAggregator {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        upcoming_limit: usize,
    ) -> Self {
        Self {
            services,
            bookings,
            clock,
            upcoming_limit,
        }
    }

    /// 開始日が `start_date` から `end_date` (両端含む) の予約を集計する
    pub async fn compute_stats(
        &self,
        provider_id: UserId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BookingStats, SchedulingError> {
        if start_date > end_date {
            return Err(SchedulingError::validation("start date is after end date"));
        }
        let mut services = Vec::new();
        for service in self.services.find_by_provider(provider_id).await? {
            let calendar = self.bookings.find_calendar(service.id()).await?;
            services.push((service.id(), service.name().to_owned(), calendar.bookings().to_vec()));
        }
        Ok(aggregate(&services, start_date, end_date))
    }

    pub async fn dashboard(
        &self,
        provider_id: UserId,
    ) -> Result<ProviderDashboard, SchedulingError> {
        let mut bookings = Vec::new();
        for service in self.services.find_by_provider(provider_id).await? {
            let calendar = self.bookings.find_calendar(service.id()).await?;
            bookings.extend(calendar.bookings().iter().cloned());
        }
        Ok(dashboard(bookings, self.clock.now(), self.upcoming_limit))
    }
}

fn aggregate(
    services: &[(ServiceId, String, Vec<Booking>)],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> BookingStats {
    let mut total = Tally::default();
    let mut daily = BTreeMap::<NaiveDate, Tally>::new();
    let mut per_service = Vec::new();
    for (service_id, name, bookings) in services {
        let mut tally = Tally::default();
        for booking in bookings {
            let date = booking.start().date_naive();
            if date < start_date || end_date < date {
                continue;
            }
            tally.count(booking);
            total.count(booking);
            daily.entry(date).or_default().count(booking);
        }
        per_service.push(ServiceBreakdown {
            service_id: *service_id,
            name: name.clone(),
            tally,
        });
    }
    let rate = |n: usize| match total.bookings {
        0 => 0.0,
        all => n as f64 / all as f64,
    };
    BookingStats {
        total_bookings: total.bookings,
        pending: total.pending,
        confirmed: total.confirmed,
        completed: total.completed,
        cancelled: total.cancelled,
        completion_rate: rate(total.completed),
        cancellation_rate: rate(total.cancelled),
        total_revenue: total.revenue,
        per_service,
        daily: daily
            .into_iter()
            .filter(|(_, tally)| tally.bookings > 0)
            .map(|(date, tally)| DailyBreakdown { date, tally })
            .collect(),
    }
}

fn dashboard(
    mut bookings: Vec<Booking>,
    now: DateTime<Utc>,
    upcoming_limit: usize,
) -> ProviderDashboard {
    bookings.sort_by_key(|b| b.start());
    let today = bookings
        .iter()
        .filter(|b| b.start().date_naive() == now.date_naive())
        .filter(|b| b.status().is_active() || b.status() == BookingStatus::Completed)
        .cloned()
        .collect();
    let upcoming = bookings
        .iter()
        .filter(|b| b.status().is_active() && b.start() > now)
        .take(upcoming_limit)
        .cloned()
        .collect();
    let pending_count = bookings
        .iter()
        .filter(|b| b.status() == BookingStatus::Pending)
        .count();
    ProviderDashboard {
        today,
        upcoming,
        pending_count,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::core::{
        BookingCalendar, BookingId, BookingPolicy, CustomerInfo, Service, ServiceSpec,
    };

    fn service(id: u64, price: Money, requires_approval: bool) -> Service {
        Service::create(
            ServiceId::from(id),
            UserId::from(100),
            ServiceSpec {
                name: format!("Service {}", id),
                duration_minutes: 60,
                price,
                policy: BookingPolicy {
                    max_advance_booking_days: 60,
                    min_advance_booking_hours: 0,
                    cancellation_policy_hours: 0,
                    requires_approval,
                },
            },
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn reserve(calendar: &mut BookingCalendar, service: &Service, id: u64, start: DateTime<Utc>) {
        let booking = Booking::reserve(
            BookingId::from(id),
            service,
            UserId::from(200),
            CustomerInfo::new("Hanako".to_owned(), Some("hanako@example.com".to_owned()), None),
            start,
            None,
            now() - Duration::days(7),
        )
        .unwrap();
        calendar.reserve(booking).unwrap();
    }

    fn fixture() -> Vec<(ServiceId, String, Vec<Booking>)> {
        let usd = service(1, Money::new(15000, Currency::USD), false);
        let jpy = service(2, Money::new(5000, Currency::JPY), true);

        let mut first = BookingCalendar::new(usd.id());
        reserve(&mut first, &usd, 1, at(8, 10));
        reserve(&mut first, &usd, 2, at(8, 11));
        reserve(&mut first, &usd, 3, at(9, 10));
        reserve(&mut first, &usd, 4, at(20, 10));
        first.complete(BookingId::from(1), now()).unwrap();
        first.cancel(BookingId::from(2), now()).unwrap();
        let replacement = first
            .booking(&BookingId::from(3))
            .unwrap()
            .replacement(BookingId::from(5), &usd, at(10, 9), now())
            .unwrap();
        first.reschedule(BookingId::from(3), replacement, now()).unwrap();

        let mut second = BookingCalendar::new(jpy.id());
        reserve(&mut second, &jpy, 6, at(9, 13));
        reserve(&mut second, &jpy, 7, at(10, 13));
        second.confirm(BookingId::from(7), now()).unwrap();

        vec![
            (usd.id(), usd.name().to_owned(), first.bookings().to_vec()),
            (jpy.id(), jpy.name().to_owned(), second.bookings().to_vec()),
        ]
    }

    #[test]
    fn test_aggregate() {
        let date = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let stats = aggregate(&fixture(), date(8), date(14));

        // 1 completed, 2 cancelled, 5 confirmed (3 は変更済み), 6 pending, 7 confirmed
        assert_eq!(stats.total_bookings, 5);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.total_revenue.get(Currency::USD), Money::new(30000, Currency::USD));
        assert_eq!(stats.total_revenue.get(Currency::JPY), Money::new(5000, Currency::JPY));
        assert_eq!(stats.total_revenue.get(Currency::EUR), Money::zero(Currency::EUR));
        assert!((stats.completion_rate - 0.2).abs() < f64::EPSILON);
        assert!((stats.cancellation_rate - 0.2).abs() < f64::EPSILON);

        assert_eq!(stats.per_service.len(), 2);
        assert_eq!(stats.per_service[0].tally.bookings, 3);
        assert_eq!(stats.per_service[1].tally.bookings, 2);
        assert_eq!(
            stats.daily.iter().map(|d| (d.date, d.tally.bookings)).collect::<Vec<_>>(),
            vec![(date(8), 2), (date(9), 1), (date(10), 2)]
        );
    }

    #[test]
    fn test_aggregate_empty_range() {
        let date = |d| NaiveDate::from_ymd_opt(2024, 2, d).unwrap();
        let stats = aggregate(&fixture(), date(1), date(2));
        assert_eq!(stats.total_bookings, 0);
        assert_eq!(stats.completion_rate, 0.0);
        assert!(stats.daily.is_empty());
        assert_eq!(stats.total_revenue.iter().count(), 0);
    }

    #[test]
    fn test_dashboard() {
        let bookings = fixture().into_iter().flat_map(|(_, _, b)| b).collect();
        let dashboard = dashboard(bookings, now(), 2);
        // 本日 (1/8) の完了済み 1 件、キャンセルは除外
        assert_eq!(
            dashboard.today.iter().map(|b| b.id()).collect::<Vec<_>>(),
            vec![BookingId::from(1)]
        );
        // 1/9 13:00 (pending), 1/10 09:00 (5), 1/10 13:00 (7), 1/20 (4)
        assert_eq!(
            dashboard.upcoming.iter().map(|b| b.id()).collect::<Vec<_>>(),
            vec![BookingId::from(6), BookingId::from(5)]
        );
        assert_eq!(dashboard.pending_count, 1);
    }
}
