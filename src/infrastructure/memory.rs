use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    core::{
        ActivityLogEntry, ActivityLogRepository, Booking, BookingCalendar, BookingEvent,
        BookingId, BookingRepository, Service, ServiceId, ServiceRepository, UserId,
    },
    Aggregation, DataAccessError, Entity,
};

/// プロセス内のサービスリポジトリ
#[derive(Default)]
pub struct InMemoryServiceRepository {
    services: RwLock<HashMap<ServiceId, Service>>,
}

#[async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError> {
        Ok(self.services.read().await.get(&id).cloned())
    }

    async fn find_by_provider(&self, provider_id: UserId) -> Result<Vec<Service>, DataAccessError> {
        let mut services = self
            .services
            .read()
            .await
            .values()
            .filter(|s| s.provider_id() == provider_id)
            .cloned()
            .collect::<Vec<_>>();
        services.sort_by_key(|s| s.id());
        Ok(services)
    }

    /// 保存済みのサービスに未保存のイベントを適用する
    async fn save(&self, entity: &mut Service) -> Result<bool, DataAccessError> {
        let events = entity.pop_all();
        if events.is_empty() {
            return Ok(false);
        }
        let mut services = self.services.write().await;
        let stored = services.entry(entity.id()).or_default();
        for event in events {
            stored.apply(event);
        }
        stored.clear();
        Ok(true)
    }
}

#[derive(Default)]
struct Bookings {
    calendars: HashMap<ServiceId, BookingCalendar>,
    index: HashMap<BookingId, ServiceId>,
}

/// プロセス内の予約リポジトリ
///
/// 台帳ごとに保存回数をリビジョンとして持ち、古い台帳の保存を拒否する。
#[derive(Default)]
pub struct InMemoryBookingRepository {
    inner: RwLock<Bookings>,
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_calendar(
        &self,
        service_id: ServiceId,
    ) -> Result<BookingCalendar, DataAccessError> {
        Ok(self
            .inner
            .read()
            .await
            .calendars
            .get(&service_id)
            .cloned()
            .unwrap_or_else(|| BookingCalendar::new(service_id)))
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .get(&id)
            .and_then(|service_id| inner.calendars.get(service_id))
            .and_then(|calendar| calendar.booking(&id))
            .cloned())
    }

    async fn save(&self, calendar: &mut BookingCalendar) -> Result<bool, DataAccessError> {
        if calendar.peek().is_none() {
            return Ok(false);
        }
        let mut inner = self.inner.write().await;
        let current = inner
            .calendars
            .get(&calendar.id())
            .and_then(BookingCalendar::revision);
        if calendar.revision() != current {
            return Err(DataAccessError::VersionConflict(format!(
                "{}-{}",
                BookingCalendar::ENTITY_NAME,
                calendar.id()
            )));
        }
        for event in calendar.pop_all() {
            match event {
                BookingEvent::BookingReserved { id, booking } => {
                    inner.index.insert(booking.id(), id);
                }
                BookingEvent::BookingRescheduled {
                    id, replacement, ..
                } => {
                    inner.index.insert(replacement.id(), id);
                }
                _ => {}
            }
        }
        calendar.set_revision(Some(current.map_or(0, |r| r + 1)));
        inner.calendars.insert(calendar.id(), calendar.clone());
        Ok(true)
    }
}

/// プロセス内の操作履歴リポジトリ
#[derive(Default)]
pub struct InMemoryActivityLogRepository {
    entries: RwLock<Vec<ActivityLogEntry>>,
}

#[async_trait]
impl ActivityLogRepository for InMemoryActivityLogRepository {
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), DataAccessError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn find_by_provider(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<ActivityLogEntry>, DataAccessError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.provider_id == provider_id)
            .cloned()
            .collect())
    }
}
