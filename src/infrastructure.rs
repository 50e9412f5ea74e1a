pub mod core;
pub mod memory;

use derive_more::{Display, Error};
use eventstore::{Client, EventData, ResolvedEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::domain::{DataAccessError, Entity, Event, Id};

use std::{fmt::Display, str::FromStr};

impl From<eventstore::Error> for DataAccessError {
    fn from(value: eventstore::Error) -> Self {
        match value {
            eventstore::Error::WrongExpectedVersion { .. } => {
                Self::VersionConflict(value.to_string())
            }
            eventstore::Error::ConnectionClosed
            | eventstore::Error::Grpc { .. }
            | eventstore::Error::GrpcConnectionError(_)
            | eventstore::Error::DeadlineExceeded
            | eventstore::Error::InitializationError(_) => Self::ConnectionError(Box::new(value)),
            eventstore::Error::ServerError(_)
            | eventstore::Error::NotLeaderException(_)
            | eventstore::Error::AccessDenied
            | eventstore::Error::UnsupportedFeature
            | eventstore::Error::InternalParsingError(_)
            | eventstore::Error::InternalClientError => Self::QueryError(Box::new(value)),
            eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted => {
                Self::ReadError(Box::new(value))
            }
            eventstore::Error::ResourceAlreadyExists => Self::WriteError(Box::new(value)),
            _ => Self::ClientSideError(Box::new(value)),
        }
    }
}

impl From<EventConvertError> for DataAccessError {
    fn from(value: EventConvertError) -> Self {
        DataAccessError::ClientSideError(Box::new(value))
    }
}

#[derive(Debug, Display, Error)]
#[display(fmt = "Failed to convert event")]
pub struct EventConvertError;

impl From<serde_json::Error> for EventConvertError {
    fn from(_value: serde_json::Error) -> Self {
        EventConvertError
    }
}

fn entity_id<I, T>(stream_id: &str) -> Option<I>
where
    I: Id<Inner = T>,
    T: FromStr,
{
    stream_id
        .split('-')
        .filter_map(|s| s.parse::<T>().ok())
        .map(I::from)
        .last()
}

fn stream_name<E: Entity>(id: E::Id) -> String {
    E::ENTITY_NAME.to_owned() + "-" + &id.to_string()
}

/// エンティティ以外の索引・履歴ストリーム名
fn index_stream_name(prefix: &str, id: impl Display) -> String {
    format!("{}-{}", prefix, id)
}

/// イベントのバリアント名をイベント種別とし、ストリーム名で分かるIDは除く
fn event_payload<E: Event>(event: E) -> Result<(String, Value), EventConvertError> {
    let (event_type, mut data) = match serde_json::to_value(event)? {
        Value::Object(root) => root.into_iter().next().ok_or(EventConvertError)?,
        _ => return Err(EventConvertError),
    };
    if let Some(fields) = data.as_object_mut() {
        fields.remove("id");
    }
    Ok((event_type, data))
}

fn from_event<E: Event>(event: E) -> Result<EventData, EventConvertError> {
    let (event_type, data) = event_payload(event)?;
    Ok(EventData::json(event_type, data)?)
}

fn try_from_resolved_event<E, I>(value: &ResolvedEvent) -> Result<E, EventConvertError>
where
    E: DeserializeOwned + Event<Id = I>,
    I: Id,
{
    let event = value.get_original_event();
    let id = entity_id::<I, I::Inner>(&event.stream_id).ok_or(EventConvertError)?;
    let mut data: Value = serde_json::from_slice(event.data.as_ref())?;
    data.as_object_mut()
        .ok_or(EventConvertError)?
        .insert("id".to_owned(), json!(id));
    let json = json!({ &event.event_type: data });
    Ok(serde_json::from_value(json)?)
}

fn json_event<T: Serialize>(event_type: &str, payload: &T) -> Result<EventData, EventConvertError> {
    Ok(EventData::json(event_type, payload)?)
}

fn from_json_event<T: DeserializeOwned>(value: &ResolvedEvent) -> Result<T, EventConvertError> {
    Ok(serde_json::from_slice(value.get_original_event().data.as_ref())?)
}

/// ストリームを先頭から読む (ストリームが無ければ空)
async fn read_events(
    client: &Client,
    stream_name: &str,
) -> Result<Vec<ResolvedEvent>, DataAccessError> {
    let mut stream = match client.read_stream(stream_name, &Default::default()).await {
        Ok(stream) => stream,
        Err(eventstore::Error::ResourceNotFound) | Err(eventstore::Error::ResourceDeleted) => {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    loop {
        match stream.next().await {
            Ok(Some(e)) => events.push(e),
            Ok(None) => break,
            Err(eventstore::Error::ResourceNotFound) | Err(eventstore::Error::ResourceDeleted) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(events)
}
