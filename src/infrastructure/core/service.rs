use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};
use serde::{Deserialize, Serialize};

use crate::domain::core::{Service, ServiceEvent, ServiceId, ServiceRepository, UserId};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, read_events, try_from_resolved_event};
use crate::infrastructure::{from_json_event, index_stream_name, json_event, stream_name};
use crate::infrastructure::EventConvertError;

const PROVIDER_INDEX: &str = "provider_services";

/// プロバイダーの索引ストリームに書くイベント
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ServiceFiled {
    service_id: ServiceId,
}

#[derive(Clone)]
pub struct EventStoreServiceRepository {
    client: Client,
}

impl EventStoreServiceRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceRepository for EventStoreServiceRepository {
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError> {
        let events = read_events(&self.client, &stream_name::<Service>(id)).await?;
        let mut entity = Service::default();
        for e in &events {
            entity.apply(ServiceEvent::try_from(e)?);
        }
        if events.is_empty() {
            Ok(None)
        } else {
            entity.clear();
            Ok(Some(entity))
        }
    }

    async fn find_by_provider(&self, provider_id: UserId) -> Result<Vec<Service>, DataAccessError> {
        let index = index_stream_name(PROVIDER_INDEX, provider_id);
        let mut services = Vec::new();
        for e in read_events(&self.client, &index).await? {
            let filed: ServiceFiled = from_json_event(&e)?;
            if let Some(service) = self.find_by_id(filed.service_id).await? {
                services.push(service);
            }
        }
        Ok(services)
    }

    async fn save(&self, entity: &mut Service) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Service>(entity.id());
        let (rev, created) = match entity.peek() {
            Some(ServiceEvent::ServiceCreated { .. }) => (ExpectedRevision::NoStream, true),
            Some(_) => (ExpectedRevision::StreamExists, false),
            None => return Ok(false),
        };
        let events = entity
            .pop_all()
            .into_iter()
            .map(EventData::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        if created {
            let index = index_stream_name(PROVIDER_INDEX, entity.provider_id());
            let filed = ServiceFiled {
                service_id: entity.id(),
            };
            self.client
                .append_to_stream(
                    &index,
                    &AppendToStreamOptions::default().expected_revision(ExpectedRevision::Any),
                    json_event("ServiceFiled", &filed)?,
                )
                .await?;
        }
        Ok(true)
    }
}

impl TryFrom<ServiceEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: ServiceEvent) -> Result<Self, Self::Error> {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for ServiceEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
