use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::domain::{DataAccessError, Entity};

use super::{Booking, BookingId, Service, ServiceId, UserId};

/// 操作履歴リポジトリ (追記のみ)
#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    /// 履歴を追記する
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), DataAccessError>;
    /// プロバイダーの履歴を古い順に取得する
    async fn find_by_provider(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<ActivityLogEntry>, DataAccessError>;
}

/// 操作の種類
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ActivityAction {
    ServiceCreated,
    ServiceUpdated,
    ServiceActivated,
    ServiceDeactivated,
    AvailabilityUpdated,
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingCompleted,
    BookingRescheduled,
}

/// 操作履歴
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub provider_id: UserId,
    pub booking_id: Option<BookingId>,
    pub service_id: Option<ServiceId>,
    /// システムによる操作では `None`
    pub actor_user_id: Option<UserId>,
    pub action: ActivityAction,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityLogEntry {
    /// サービスに対する操作 (操作者はプロバイダー)
    pub fn for_service(
        service: &Service,
        action: ActivityAction,
        details: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_id: service.provider_id(),
            booking_id: None,
            service_id: Some(service.id()),
            actor_user_id: Some(service.provider_id()),
            action,
            details: details.into(),
            timestamp,
        }
    }

    /// 予約に対する操作
    pub fn for_booking(
        booking: &Booking,
        actor_user_id: Option<UserId>,
        action: ActivityAction,
        details: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_id: booking.provider_id(),
            booking_id: Some(booking.id()),
            service_id: Some(booking.service_id()),
            actor_user_id,
            action,
            details: details.into(),
            timestamp,
        }
    }
}
