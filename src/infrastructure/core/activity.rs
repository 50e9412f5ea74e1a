use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, ExpectedRevision};

use crate::domain::core::{ActivityLogEntry, ActivityLogRepository, UserId};
use crate::domain::DataAccessError;
use crate::infrastructure::{from_json_event, index_stream_name, json_event, read_events};

const ACTIVITY_STREAM: &str = "activity";
const ACTIVITY_RECORDED: &str = "ActivityRecorded";

/// 操作履歴をプロバイダーごとのストリームに追記する
#[derive(Clone)]
pub struct EventStoreActivityLogRepository {
    client: Client,
}

impl EventStoreActivityLogRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActivityLogRepository for EventStoreActivityLogRepository {
    async fn append(&self, entry: ActivityLogEntry) -> Result<(), DataAccessError> {
        let stream_name = index_stream_name(ACTIVITY_STREAM, entry.provider_id);
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(ExpectedRevision::Any),
                json_event(ACTIVITY_RECORDED, &entry)?,
            )
            .await?;
        Ok(())
    }

    async fn find_by_provider(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<ActivityLogEntry>, DataAccessError> {
        let stream_name = index_stream_name(ACTIVITY_STREAM, provider_id);
        read_events(&self.client, &stream_name)
            .await?
            .iter()
            .map(|e| from_json_event(e).map_err(DataAccessError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use eventstore::{Client, Position, RecordedEvent, ResolvedEvent};

    use crate::domain::{
        core::{ActivityAction, ActivityLogEntry, ActivityLogRepository, UserId},
        IdGenerator,
    };
    use crate::infrastructure::from_json_event;

    use super::{EventStoreActivityLogRepository, ACTIVITY_RECORDED};

    fn entry(provider_id: UserId, details: &str) -> ActivityLogEntry {
        ActivityLogEntry {
            provider_id,
            booking_id: Some(10.into()),
            service_id: Some(20.into()),
            actor_user_id: None,
            action: ActivityAction::BookingCompleted,
            details: details.to_owned(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running EventStoreDB"]
    async fn test_repository() {
        let settings = "esdb://localhost:2113?tls=false".parse().unwrap();
        let client = Client::new(settings).unwrap();
        let repo = EventStoreActivityLogRepository::new(client);
        let provider_id = IdGenerator::new(1, 1).generate::<UserId>().await;

        assert_eq!(repo.find_by_provider(provider_id).await.unwrap(), vec![]);
        repo.append(entry(provider_id, "1")).await.unwrap();
        repo.append(entry(provider_id, "2")).await.unwrap();
        assert_eq!(
            repo.find_by_provider(provider_id).await.unwrap(),
            vec![entry(provider_id, "1"), entry(provider_id, "2")]
        );
    }

    #[test]
    fn test_entry_from_recorded_event() {
        let data = serde_json::json!({
            "provider_id": 100,
            "booking_id": 10,
            "service_id": 20,
            "actor_user_id": null,
            "action": "BookingCompleted",
            "details": "completed",
            "timestamp": "2024-01-08T10:00:00Z",
        });
        let event = ResolvedEvent {
            event: Some(RecordedEvent {
                stream_id: "activity-100".to_owned(),
                id: Default::default(),
                revision: Default::default(),
                event_type: ACTIVITY_RECORDED.to_owned(),
                data: serde_json::to_vec(&data).unwrap().into(),
                metadata: Default::default(),
                custom_metadata: Default::default(),
                is_json: Default::default(),
                position: Position {
                    commit: Default::default(),
                    prepare: Default::default(),
                },
                created: Default::default(),
            }),
            link: None,
            commit_position: None,
        };
        assert_eq!(
            from_json_event::<ActivityLogEntry>(&event).ok(),
            Some(entry(100.into(), "completed"))
        );
    }
}
