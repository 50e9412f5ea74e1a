use std::ops::Range;

use async_trait::async_trait;
use bio::data_structures::interval_tree::IntervalTree;
use chrono::{DateTime, Duration, Utc};
use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{CustomerInfo, CustomerInfoError, Money, Service, ServiceId, UserId};

/// 予約リポジトリ
///
/// 予約はサービスごとの予約台帳 ([`BookingCalendar`]) 単位で読み書きする。
/// 台帳は読み込んだ時点のリビジョンを持ち、保存時にリビジョンが古ければ
/// [`DataAccessError::VersionConflict`] を返さなければならない。
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// サービスの予約台帳を取得する (予約が無ければ空の台帳)
    async fn find_calendar(&self, service_id: ServiceId)
        -> Result<BookingCalendar, DataAccessError>;
    /// IDで予約を検索する
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError>;
    /// 予約台帳の変更を保存する
    async fn save(&self, calendar: &mut BookingCalendar) -> Result<bool, DataAccessError>;
}

/// 予約ID
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Deref,
    Default,
)]
pub struct BookingId(u64);

impl Id for BookingId {
    type Inner = u64;
}

/// 予約確認用トークン
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, Deref)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

/// 予約ステータス
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BookingStatus {
    /// 承認待ち
    #[default]
    Pending,
    /// 確定
    Confirmed,
    /// 完了
    Completed,
    /// キャンセル
    Cancelled,
    /// 別の枠へ変更済み
    Rescheduled,
}

impl BookingStatus {
    /// 枠を占有しているか
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
                | (BookingStatus::Confirmed, BookingStatus::Rescheduled)
        )
    }
}

/// 予約エンティティ
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    service_id: ServiceId,
    provider_id: UserId,
    customer_id: UserId,
    start: DateTime<Utc>,
    duration_minutes: u32,
    status: BookingStatus,
    price: Money,
    customer_info: CustomerInfo,
    notes: Option<String>,
    confirmation_token: ConfirmationToken,
    reschedule_of: Option<BookingId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Booking {
    /// サービスの現在の所要時間・料金を写し取って予約を作る
    ///
    /// 承認が必要なサービスでは承認待ち、そうでなければ確定で作られる。
    pub fn reserve(
        id: BookingId,
        service: &Service,
        customer_id: UserId,
        customer_info: CustomerInfo,
        start: DateTime<Utc>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        customer_info.validate()?;
        let status = match service.policy().requires_approval {
            true => BookingStatus::Pending,
            false => BookingStatus::Confirmed,
        };
        Ok(Self {
            id,
            service_id: service.id(),
            provider_id: service.provider_id(),
            customer_id,
            start,
            duration_minutes: service.duration_minutes(),
            status,
            price: service.price(),
            customer_info,
            notes,
            confirmation_token: ConfirmationToken::generate(),
            reschedule_of: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// この予約を置き換える新しい予約を作る
    pub fn replacement(
        &self,
        id: BookingId,
        service: &Service,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        let mut booking = Self::reserve(
            id,
            service,
            self.customer_id,
            self.customer_info.clone(),
            start,
            self.notes.clone(),
            now,
        )?;
        booking.reschedule_of = Some(self.id);
        Ok(booking)
    }

    pub fn change_status(
        &mut self,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        self.validate_status(status)?;
        self.status = status;
        self.updated_at = at;
        Ok(())
    }

    pub fn validate_status(&self, status: BookingStatus) -> Result<(), BookingError> {
        match self.status.can_transition_to(status) {
            true => Ok(()),
            false => Err(BookingError::InvalidStatusTransition {
                from: self.status,
                to: status,
            }),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn provider_id(&self) -> UserId {
        self.provider_id
    }

    pub fn customer_id(&self) -> UserId {
        self.customer_id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration()
    }

    pub fn time(&self) -> Range<DateTime<Utc>> {
        self.start..self.end()
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn customer_info(&self) -> &CustomerInfo {
        &self.customer_info
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn confirmation_token(&self) -> &ConfirmationToken {
        &self.confirmation_token
    }

    pub fn reschedule_of(&self) -> Option<BookingId> {
        self.reschedule_of
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 半開区間 `[start, end)` 同士が重なるか
    pub fn overlaps(&self, time: &Range<DateTime<Utc>>) -> bool {
        time.start < self.end() && time.end > self.start
    }
}

impl Entity for Booking {
    type Id = BookingId;

    const ENTITY_NAME: &'static str = "booking";

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// 予約エラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum BookingError {
    #[display(fmt = "Cannot change booking status from {:?} to {:?}", from, to)]
    InvalidStatusTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[display(fmt = "Customer info error: {}", _0)]
    CustomerInfo(CustomerInfoError),
}

impl From<CustomerInfoError> for BookingError {
    fn from(value: CustomerInfoError) -> Self {
        BookingError::CustomerInfo(value)
    }
}

/// 予約台帳イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    /// 予約が入った
    BookingReserved { id: ServiceId, booking: Booking },
    /// 予約が承認された
    BookingConfirmed {
        id: ServiceId,
        booking_id: BookingId,
        at: DateTime<Utc>,
    },
    /// 予約がキャンセルされた
    BookingCancelled {
        id: ServiceId,
        booking_id: BookingId,
        at: DateTime<Utc>,
    },
    /// 予約が完了した
    BookingCompleted {
        id: ServiceId,
        booking_id: BookingId,
        at: DateTime<Utc>,
    },
    /// 予約が別の枠へ変更された
    BookingRescheduled {
        id: ServiceId,
        booking_id: BookingId,
        replacement: Booking,
        at: DateTime<Utc>,
    },
}

impl Event for BookingEvent {
    type Id = ServiceId;
}

/// サービスごとの予約台帳
///
/// 枠の重複禁止はこの集約の中で保証される。
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BookingCalendar {
    id: ServiceId,
    bookings: Vec<Booking>,
    #[serde(skip)]
    revision: Option<u64>,
    #[serde(skip)]
    events: EventQueue<BookingEvent>,
}

impl BookingCalendar {
    pub fn new(id: ServiceId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn reserve(&mut self, booking: Booking) -> Result<(), CalendarError> {
        self.validate_reserved(&booking)?;
        self.bookings.push(booking.clone());
        self.events.push(BookingEvent::BookingReserved {
            id: self.id,
            booking,
        });
        Ok(())
    }

    pub fn confirm(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        self.change_status(booking_id, BookingStatus::Confirmed, at)?;
        self.events.push(BookingEvent::BookingConfirmed {
            id: self.id,
            booking_id,
            at,
        });
        Ok(())
    }

    pub fn cancel(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        self.change_status(booking_id, BookingStatus::Cancelled, at)?;
        self.events.push(BookingEvent::BookingCancelled {
            id: self.id,
            booking_id,
            at,
        });
        Ok(())
    }

    pub fn complete(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        self.change_status(booking_id, BookingStatus::Completed, at)?;
        self.events.push(BookingEvent::BookingCompleted {
            id: self.id,
            booking_id,
            at,
        });
        Ok(())
    }

    /// 旧予約を変更済みにし、新しい予約を追加する
    ///
    /// 検証はすべて変更前に行うため、失敗時に台帳は一切変化しない。
    pub fn reschedule(
        &mut self,
        booking_id: BookingId,
        replacement: Booking,
        at: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        self.validate_rescheduled(&booking_id, &replacement)?;
        self.change_status(booking_id, BookingStatus::Rescheduled, at)?;
        self.bookings.push(replacement.clone());
        self.events.push(BookingEvent::BookingRescheduled {
            id: self.id,
            booking_id,
            replacement,
            at,
        });
        Ok(())
    }

    pub fn booking(&self, booking_id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *booking_id)
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.status.is_active())
    }

    pub fn find_by_token(&self, token: &str) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.confirmation_token.as_str() == token)
    }

    /// 指定時間帯と重なる有効な予約を探す
    pub fn find_conflict(
        &self,
        time: &Range<DateTime<Utc>>,
        except: Option<BookingId>,
    ) -> Option<&Booking> {
        IntervalTree::from_iter(self.active_bookings().map(|b| (b.time(), b)))
            .find(time.clone())
            .map(|entry| *entry.data())
            .find(|b| Some(b.id) != except && b.overlaps(time))
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn set_revision(&mut self, revision: Option<u64>) {
        self.revision = revision;
    }

    fn change_status(
        &mut self,
        booking_id: BookingId,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        match self.bookings.iter_mut().find(|b| b.id == booking_id) {
            Some(booking) => Ok(booking.change_status(status, at)?),
            None => Err(CalendarError::BookingNotFound),
        }
    }

    fn validate_id(&self, id: &ServiceId) -> Result<(), CalendarError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(CalendarError::MismatchedId),
        }
    }

    fn validate_reserved(&self, booking: &Booking) -> Result<(), CalendarError> {
        self.validate_id(&booking.service_id)?;
        self.validate_duplicate_booking(&booking.id)?;
        if !booking.status.is_active() {
            return Err(CalendarError::InactiveBooking);
        }
        match self.find_conflict(&booking.time(), None) {
            Some(_) => Err(CalendarError::OverlappingBooking),
            None => Ok(()),
        }
    }

    fn validate_status_changed(
        &self,
        booking_id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), CalendarError> {
        match self.booking(booking_id) {
            Some(booking) => Ok(booking.validate_status(status)?),
            None => Err(CalendarError::BookingNotFound),
        }
    }

    fn validate_rescheduled(
        &self,
        booking_id: &BookingId,
        replacement: &Booking,
    ) -> Result<(), CalendarError> {
        self.validate_status_changed(booking_id, BookingStatus::Rescheduled)?;
        self.validate_id(&replacement.service_id)?;
        self.validate_duplicate_booking(&replacement.id)?;
        if replacement.reschedule_of != Some(*booking_id) || !replacement.status.is_active() {
            return Err(CalendarError::InvalidReplacement);
        }
        match self.find_conflict(&replacement.time(), Some(*booking_id)) {
            Some(_) => Err(CalendarError::OverlappingBooking),
            None => Ok(()),
        }
    }

    fn validate_duplicate_booking(&self, booking_id: &BookingId) -> Result<(), CalendarError> {
        match self.booking(booking_id) {
            Some(_) => Err(CalendarError::DuplicateBooking),
            None => Ok(()),
        }
    }

    fn adopt(&mut self, id: ServiceId) {
        if self.bookings.is_empty() {
            self.id = id;
        }
    }
}

impl Entity for BookingCalendar {
    type Id = ServiceId;

    const ENTITY_NAME: &'static str = "booking_calendar";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for BookingCalendar {
    type Event = BookingEvent;
    type Error = CalendarError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            BookingEvent::BookingReserved { id, booking } => {
                if !self.bookings.is_empty() {
                    self.validate_id(id)?;
                }
                let mut calendar = self.clone();
                calendar.adopt(*id);
                calendar.validate_reserved(booking)
            }
            BookingEvent::BookingConfirmed { id, booking_id, .. } => {
                self.validate_id(id)?;
                self.validate_status_changed(booking_id, BookingStatus::Confirmed)
            }
            BookingEvent::BookingCancelled { id, booking_id, .. } => {
                self.validate_id(id)?;
                self.validate_status_changed(booking_id, BookingStatus::Cancelled)
            }
            BookingEvent::BookingCompleted { id, booking_id, .. } => {
                self.validate_id(id)?;
                self.validate_status_changed(booking_id, BookingStatus::Completed)
            }
            BookingEvent::BookingRescheduled {
                id,
                booking_id,
                replacement,
                ..
            } => {
                self.validate_id(id)?;
                self.validate_rescheduled(booking_id, replacement)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            BookingEvent::BookingReserved { id, booking } => {
                self.adopt(id);
                if self.id == id {
                    if let Err(_e) = self.reserve(booking) {}
                }
            }
            BookingEvent::BookingConfirmed { id, booking_id, at } => {
                if self.id == id {
                    if let Err(_e) = self.confirm(booking_id, at) {}
                }
            }
            BookingEvent::BookingCancelled { id, booking_id, at } => {
                if self.id == id {
                    if let Err(_e) = self.cancel(booking_id, at) {}
                }
            }
            BookingEvent::BookingCompleted { id, booking_id, at } => {
                if self.id == id {
                    if let Err(_e) = self.complete(booking_id, at) {}
                }
            }
            BookingEvent::BookingRescheduled {
                id,
                booking_id,
                replacement,
                at,
            } => {
                if self.id == id {
                    if let Err(_e) = self.reschedule(booking_id, replacement, at) {}
                }
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for BookingCalendar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.bookings == other.bookings
    }
}

impl Eq for BookingCalendar {}

/// 予約台帳エラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum CalendarError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Booking not found")]
    BookingNotFound,
    #[display(fmt = "Duplicate booking")]
    DuplicateBooking,
    #[display(fmt = "Booking overlaps with an active booking")]
    OverlappingBooking,
    #[display(fmt = "Only pending or confirmed bookings can be reserved")]
    InactiveBooking,
    #[display(fmt = "Replacement booking does not refer to the rescheduled booking")]
    InvalidReplacement,
    #[display(fmt = "Booking error: {}", _0)]
    Booking(BookingError),
}

impl From<BookingError> for CalendarError {
    fn from(value: BookingError) -> Self {
        CalendarError::Booking(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::core::{BookingPolicy, Currency, ServiceSpec};

    fn service(requires_approval: bool) -> Service {
        Service::create(
            ServiceId::from(1),
            UserId::from(100),
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
            },
        )
        .unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn customer() -> CustomerInfo {
        CustomerInfo::new("Hanako".to_owned(), Some("hanako@example.com".to_owned()), None)
    }

    fn booking(id: u64, start: DateTime<Utc>) -> Booking {
        Booking::reserve(
            BookingId(id),
            &service(false),
            UserId::from(200),
            customer(),
            start,
            None,
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_booking_reserve_snapshots_service() {
        let confirmed = booking(1, at(10, 0));
        assert_eq!(confirmed.status(), BookingStatus::Confirmed);
        assert_eq!(confirmed.duration_minutes(), 60);
        assert_eq!(confirmed.price(), Money::new(15000, Currency::USD));
        assert_eq!(confirmed.end(), at(11, 0));
        assert_eq!(confirmed.confirmation_token().len(), 32);

        let pending = Booking::reserve(
            BookingId(2),
            &service(true),
            UserId::from(200),
            customer(),
            at(10, 0),
            None,
            now(),
        )
        .unwrap();
        assert_eq!(pending.status(), BookingStatus::Pending);
        assert_ne!(pending.confirmation_token(), confirmed.confirmation_token());
    }

    #[test]
    fn test_booking_reserve_requires_customer_info() {
        let result = Booking::reserve(
            BookingId(1),
            &service(false),
            UserId::from(200),
            CustomerInfo::default(),
            at(10, 0),
            None,
            now(),
        );
        assert_eq!(
            result.err(),
            Some(BookingError::CustomerInfo(CustomerInfoError::NameRequired))
        );
    }

    #[test]
    fn test_terminal_status_rejects_transitions() {
        for terminal in [
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Rescheduled,
        ] {
            for next in [
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                BookingStatus::Completed,
                BookingStatus::Cancelled,
                BookingStatus::Rescheduled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Completed));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Rescheduled));
    }

    #[test]
    fn test_calendar_rejects_overlap() {
        let mut calendar = BookingCalendar::new(ServiceId::from(1));
        calendar.reserve(booking(1, at(10, 0))).unwrap();
        assert_eq!(
            calendar.reserve(booking(2, at(10, 30))),
            Err(CalendarError::OverlappingBooking)
        );
        assert_eq!(
            calendar.reserve(booking(3, at(9, 30))),
            Err(CalendarError::OverlappingBooking)
        );
        calendar.reserve(booking(4, at(11, 0))).unwrap();
        calendar.reserve(booking(5, at(9, 0))).unwrap();
        assert_eq!(calendar.active_bookings().count(), 3);
    }

    #[test]
    fn test_calendar_frees_slot_on_cancel() {
        let mut calendar = BookingCalendar::new(ServiceId::from(1));
        calendar.reserve(booking(1, at(10, 0))).unwrap();
        calendar.cancel(BookingId(1), now()).unwrap();
        calendar.reserve(booking(2, at(10, 0))).unwrap();
        assert_eq!(
            calendar.cancel(BookingId(1), now()),
            Err(CalendarError::Booking(BookingError::InvalidStatusTransition {
                from: BookingStatus::Cancelled,
                to: BookingStatus::Cancelled,
            }))
        );
    }

    #[test]
    fn test_calendar_reschedule_is_all_or_nothing() {
        let mut calendar = BookingCalendar::new(ServiceId::from(1));
        let original = booking(1, at(10, 0));
        calendar.reserve(original.clone()).unwrap();
        calendar.reserve(booking(2, at(14, 0))).unwrap();
        calendar.clear();

        let blocked = original
            .replacement(BookingId(3), &service(false), at(14, 30), now())
            .unwrap();
        assert_eq!(
            calendar.reschedule(BookingId(1), blocked, now()),
            Err(CalendarError::OverlappingBooking)
        );
        assert_eq!(calendar.booking(&BookingId(1)), Some(&original));
        assert!(calendar.peek().is_none());

        // 自分自身の枠とは重なってもよい
        let shifted = original
            .replacement(BookingId(4), &service(false), at(10, 30), now())
            .unwrap();
        calendar.reschedule(BookingId(1), shifted, now()).unwrap();
        assert_eq!(
            calendar.booking(&BookingId(1)).map(Booking::status),
            Some(BookingStatus::Rescheduled)
        );
        assert_eq!(
            calendar.booking(&BookingId(4)).and_then(Booking::reschedule_of),
            Some(BookingId(1))
        );
    }

    #[test]
    fn test_calendar_replay_events() {
        let mut calendar = BookingCalendar::new(ServiceId::from(1));
        calendar.reserve(booking(1, at(10, 0))).unwrap();
        calendar.reserve(booking(2, at(11, 0))).unwrap();
        calendar.cancel(BookingId(2), now()).unwrap();
        calendar.complete(BookingId(1), now()).unwrap();
        let mut replayed = BookingCalendar::default();
        for event in calendar.pop_all() {
            replayed.validate(&event).unwrap();
            replayed.apply(event);
        }
        replayed.clear();
        assert_eq!(replayed, calendar);
    }
}
