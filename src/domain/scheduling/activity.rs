use std::sync::Arc;

use tracing::error;

use crate::domain::core::{ActivityLogEntry, ActivityLogRepository, BookingId, UserId};

use super::SchedulingError;

/// 操作履歴の記録と参照
pub struct ActivityLog {
    repository: Arc<dyn ActivityLogRepository>,
}

impl ActivityLog {
    pub fn new(repository: Arc<dyn ActivityLogRepository>) -> Self {
        Self { repository }
    }

    /// 履歴を追記する
    ///
    /// 呼び出し元の操作は確定済みのため、失敗はログに残すだけにする。
    pub async fn record(&self, entry: ActivityLogEntry) {
        let action = entry.action;
        let provider_id = entry.provider_id;
        if let Err(e) = self.repository.append(entry).await {
            error!(%provider_id, %action, "failed to append activity log: {}", e);
        }
    }

    /// プロバイダーの履歴 (古い順)
    pub async fn for_provider(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<ActivityLogEntry>, SchedulingError> {
        Ok(self.repository.find_by_provider(provider_id).await?)
    }

    /// 予約の履歴 (古い順)
    pub async fn for_booking(
        &self,
        provider_id: UserId,
        booking_id: BookingId,
    ) -> Result<Vec<ActivityLogEntry>, SchedulingError> {
        let entries = self.for_provider(provider_id).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.booking_id == Some(booking_id))
            .collect())
    }
}
