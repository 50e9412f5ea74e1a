use std::{ops::Range, sync::Arc};

use bio::data_structures::interval_tree::IntervalTree;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::core::{Booking, BookingRepository, Money, Service, ServiceId, ServiceRepository};

use super::{Clock, SchedulingError};

/// 予約可能な枠
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub price: Money,
}

impl Slot {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes as i64)
    }
}

/// 予約可能枠の算出
pub struct SlotGenerator {
    services: Arc<dyn ServiceRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    max_range_days: i64,
}

impl SlotGenerator {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        max_range_days: i64,
    ) -> Self {
        Self {
            services,
            bookings,
            clock,
            max_range_days,
        }
    }

    /// `from` から `to` まで (両端含む) の予約可能枠を開始時刻順に返す
    pub async fn list_available_slots(
        &self,
        service_id: ServiceId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, SchedulingError> {
        if from > to {
            return Err(SchedulingError::validation("start date is after end date"));
        }
        if (to - from).num_days() >= self.max_range_days {
            return Err(SchedulingError::validation(format!(
                "date range cannot exceed {} days",
                self.max_range_days
            )));
        }
        let service = self
            .services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found::<Service>(service_id))?;
        let calendar = self.bookings.find_calendar(service_id).await?;
        let slots = available_slots(
            &service,
            calendar.active_bookings(),
            self.clock.now(),
            from,
            to,
        );
        debug!(%service_id, %from, %to, "{} slots available", slots.len());
        Ok(slots)
    }
}

/// サービスの受付時間帯を所要時間ごとに区切り、有効な予約と重ならず
/// 予約ポリシーの範囲内にある枠だけを残す
pub fn available_slots<'a, I>(
    service: &Service,
    bookings: I,
    now: DateTime<Utc>,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<Slot>
where
    I: IntoIterator<Item = &'a Booking>,
{
    if !service.is_active() {
        return Vec::new();
    }
    let earliest = service.policy().earliest_start(now);
    let latest = service.policy().latest_start(now);
    let first_day = from.max(earliest.date_naive());
    let last_day = to.min(latest.date_naive());
    let occupied = IntervalTree::from_iter(
        bookings
            .into_iter()
            .filter(|b| b.status().is_active())
            .map(|b| (b.time(), b)),
    );
    let is_free = |time: &Range<DateTime<Utc>>| {
        !occupied
            .find(time.clone())
            .any(|entry| entry.data().overlaps(time))
    };

    let step = service.duration();
    let mut slots = Vec::new();
    let mut day = first_day;
    while day <= last_day {
        for window in service.windows_on(day.weekday()) {
            let window_end = Utc.from_utc_datetime(&day.and_time(window.end()));
            let mut start = Utc.from_utc_datetime(&day.and_time(window.start()));
            while start + step <= window_end {
                let time = start..start + step;
                if earliest <= start && start <= latest && is_free(&time) {
                    slots.push(Slot {
                        start,
                        duration_minutes: service.duration_minutes(),
                        price: service.price(),
                    });
                }
                start = time.end;
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    slots.sort_by_key(|s| s.start);
    slots
}
