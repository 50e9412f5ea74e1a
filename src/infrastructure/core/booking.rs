use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};
use serde::{Deserialize, Serialize};

use crate::domain::core::{
    Booking, BookingCalendar, BookingEvent, BookingId, BookingRepository, ServiceId,
};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, read_events, try_from_resolved_event};
use crate::infrastructure::{from_json_event, json_event, stream_name};
use crate::infrastructure::EventConvertError;

/// 予約IDから予約台帳を引くためのイベント
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct BookingFiled {
    service_id: ServiceId,
}

/// 予約台帳をイベントストリームとして保存する
///
/// 追記時に読み込んだ時点のリビジョンを指定するため、
/// 同じ台帳への並行した書き込みは片方が失敗する。
#[derive(Clone)]
pub struct EventStoreBookingRepository {
    client: Client,
}

impl EventStoreBookingRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn file_bookings(
        &self,
        service_id: ServiceId,
        bookings: &[BookingId],
    ) -> Result<(), DataAccessError> {
        for booking_id in bookings {
            self.client
                .append_to_stream(
                    &stream_name::<Booking>(*booking_id),
                    &AppendToStreamOptions::default().expected_revision(ExpectedRevision::Any),
                    json_event("BookingFiled", &BookingFiled { service_id })?,
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for EventStoreBookingRepository {
    async fn find_calendar(
        &self,
        service_id: ServiceId,
    ) -> Result<BookingCalendar, DataAccessError> {
        let events = read_events(&self.client, &stream_name::<BookingCalendar>(service_id)).await?;
        let mut calendar = BookingCalendar::new(service_id);
        for e in &events {
            calendar.apply(BookingEvent::try_from(e)?);
        }
        calendar.clear();
        calendar.set_revision(events.last().map(|e| e.get_original_event().revision));
        Ok(calendar)
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
        let filed = match read_events(&self.client, &stream_name::<Booking>(id))
            .await?
            .first()
        {
            Some(e) => from_json_event::<BookingFiled>(e)?,
            None => return Ok(None),
        };
        let calendar = self.find_calendar(filed.service_id).await?;
        Ok(calendar.booking(&id).cloned())
    }

    async fn save(&self, calendar: &mut BookingCalendar) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<BookingCalendar>(calendar.id());
        let rev = match (calendar.peek(), calendar.revision()) {
            (None, _) => return Ok(false),
            (Some(_), Some(revision)) => ExpectedRevision::Exact(revision),
            (Some(_), None) => ExpectedRevision::NoStream,
        };
        let filed = calendar
            .iter()
            .filter_map(|e| match e {
                BookingEvent::BookingReserved { booking, .. } => Some(booking.id()),
                BookingEvent::BookingRescheduled { replacement, .. } => Some(replacement.id()),
                _ => None,
            })
            .collect::<Vec<_>>();
        let events = calendar
            .iter()
            .cloned()
            .map(EventData::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // 台帳より先に索引を書く (台帳の追記が失敗しても索引は台帳に無い予約を指すだけ)
        self.file_bookings(calendar.id(), &filed).await?;
        let result = self
            .client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        calendar.clear();
        calendar.set_revision(Some(result.next_expected_version));
        Ok(true)
    }
}

impl TryFrom<BookingEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: BookingEvent) -> Result<Self, Self::Error> {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for BookingEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
