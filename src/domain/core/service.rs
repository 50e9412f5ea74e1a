use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{normalize_windows, AvailabilityError, AvailabilityWindow, Money, UserId};

/// サービスリポジトリ
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// IDでサービスを検索する
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError>;
    /// プロバイダーのサービスを一覧する
    async fn find_by_provider(&self, provider_id: UserId) -> Result<Vec<Service>, DataAccessError>;
    /// サービスを保存する
    async fn save(&self, entity: &mut Service) -> Result<bool, DataAccessError>;
}

/// サービスID
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
pub struct ServiceId(u64);

impl Id for ServiceId {
    type Inner = u64;
}

/// 受け付ける予約期間の上限 (日)
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 3650;

/// 予約ポリシー
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub max_advance_booking_days: u32,
    pub min_advance_booking_hours: u32,
    pub cancellation_policy_hours: u32,
    pub requires_approval: bool,
}

impl BookingPolicy {
    /// 予約可能な最も早い開始時刻
    pub fn earliest_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(self.min_advance_booking_hours as i64)
    }

    /// 予約可能な最も遅い開始時刻
    pub fn latest_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::days(self.max_advance_booking_days as i64)
    }

    /// これを過ぎるとお客様都合のキャンセルができない
    pub fn cancellation_deadline(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start - Duration::hours(self.cancellation_policy_hours as i64)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.max_advance_booking_days == 0
            || self.max_advance_booking_days > MAX_ADVANCE_BOOKING_DAYS
        {
            return Err(ServiceError::InvalidPolicy);
        }
        if self.cancellation_policy_hours > MAX_ADVANCE_BOOKING_DAYS * 24 {
            return Err(ServiceError::InvalidPolicy);
        }
        if self.min_advance_booking_hours as u64 >= self.max_advance_booking_days as u64 * 24 {
            return Err(ServiceError::InvalidPolicy);
        }
        Ok(())
    }
}

/// サービスの作成・更新内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub duration_minutes: u32,
    pub price: Money,
    pub policy: BookingPolicy,
}

/// サービスイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceEvent {
    /// サービスが作成された
    ServiceCreated {
        id: ServiceId,
        provider_id: UserId,
        name: String,
        duration_minutes: u32,
        price: Money,
        policy: BookingPolicy,
    },
    /// サービス内容が更新された
    ServiceUpdated {
        id: ServiceId,
        name: String,
        duration_minutes: u32,
        price: Money,
        policy: BookingPolicy,
    },
    /// 予約受付を再開した
    ServiceActivated { id: ServiceId },
    /// 予約受付を停止した
    ServiceDeactivated { id: ServiceId },
    /// 週間スケジュールが置き換えられた
    AvailabilityReplaced {
        id: ServiceId,
        windows: Vec<AvailabilityWindow>,
    },
}

impl Event for ServiceEvent {
    type Id = ServiceId;
}

/// サービスエンティティ
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Service {
    id: ServiceId,
    provider_id: UserId,
    name: String,
    duration_minutes: u32,
    price: Money,
    policy: BookingPolicy,
    is_active: bool,
    availability: Vec<AvailabilityWindow>,
    #[serde(skip)]
    events: EventQueue<ServiceEvent>,
}

impl Service {
    pub fn create(
        id: ServiceId,
        provider_id: UserId,
        spec: ServiceSpec,
    ) -> Result<Self, ServiceError> {
        Self::validate_spec(&spec)?;
        let ServiceSpec {
            name,
            duration_minutes,
            price,
            policy,
        } = spec;
        let mut entity = Service {
            id,
            provider_id,
            name: name.clone(),
            duration_minutes,
            price,
            policy,
            is_active: true,
            ..Default::default()
        };
        entity.events.push(ServiceEvent::ServiceCreated {
            id,
            provider_id,
            name,
            duration_minutes,
            price,
            policy,
        });
        Ok(entity)
    }

    /// 既存の予約には影響しない (予約側が所要時間と料金を保持している)
    pub fn update(&mut self, spec: ServiceSpec) -> Result<(), ServiceError> {
        Self::validate_spec(&spec)?;
        let ServiceSpec {
            name,
            duration_minutes,
            price,
            policy,
        } = spec;
        self.name = name.clone();
        self.duration_minutes = duration_minutes;
        self.price = price;
        self.policy = policy;
        self.events.push(ServiceEvent::ServiceUpdated {
            id: self.id,
            name,
            duration_minutes,
            price,
            policy,
        });
        Ok(())
    }

    pub fn activate(&mut self) {
        if !self.is_active {
            self.is_active = true;
            self.events
                .push(ServiceEvent::ServiceActivated { id: self.id });
        }
    }

    pub fn deactivate(&mut self) {
        if self.is_active {
            self.is_active = false;
            self.events
                .push(ServiceEvent::ServiceDeactivated { id: self.id });
        }
    }

    pub fn replace_availability(
        &mut self,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<(), ServiceError> {
        let windows = normalize_windows(windows)?;
        self.availability = windows.clone();
        self.events.push(ServiceEvent::AvailabilityReplaced {
            id: self.id,
            windows,
        });
        Ok(())
    }

    pub fn provider_id(&self) -> UserId {
        self.provider_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn availability(&self) -> &[AvailabilityWindow] {
        &self.availability
    }

    /// 指定曜日の受付時間帯 (開始時刻順)
    pub fn windows_on(&self, weekday: Weekday) -> Vec<&AvailabilityWindow> {
        self.availability
            .iter()
            .filter(|w| w.weekday() == weekday)
            .collect()
    }

    /// 開始時刻から所要時間分がいずれかの受付時間帯に収まるか
    pub fn accepts_start(&self, start: DateTime<Utc>) -> bool {
        let end = start + self.duration();
        if end.date_naive() != start.date_naive() {
            return false;
        }
        self.windows_on(start.weekday())
            .into_iter()
            .any(|w| w.start() <= start.time() && end.time() <= w.end())
    }

    fn validate_id(&self, id: &ServiceId) -> Result<(), ServiceError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ServiceError::MismatchedId),
        }
    }

    fn validate_spec(spec: &ServiceSpec) -> Result<(), ServiceError> {
        if spec.name.trim().is_empty() {
            return Err(ServiceError::NameIsBlank);
        }
        if spec.duration_minutes == 0 || spec.duration_minutes > 24 * 60 {
            return Err(ServiceError::InvalidDuration);
        }
        if spec.price.amount() < 0 {
            return Err(ServiceError::NegativePrice);
        }
        spec.policy.validate()
    }
}

impl Entity for Service {
    type Id = ServiceId;

    const ENTITY_NAME: &'static str = "service";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Service {
    type Event = ServiceEvent;
    type Error = ServiceError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ServiceEvent::ServiceCreated {
                name,
                duration_minutes,
                price,
                policy,
                ..
            } => Self::validate_spec(&ServiceSpec {
                name: name.clone(),
                duration_minutes: *duration_minutes,
                price: *price,
                policy: *policy,
            }),
            ServiceEvent::ServiceUpdated {
                id,
                name,
                duration_minutes,
                price,
                policy,
            } => {
                self.validate_id(id)?;
                Self::validate_spec(&ServiceSpec {
                    name: name.clone(),
                    duration_minutes: *duration_minutes,
                    price: *price,
                    policy: *policy,
                })
            }
            ServiceEvent::ServiceActivated { id } | ServiceEvent::ServiceDeactivated { id } => {
                self.validate_id(id)
            }
            ServiceEvent::AvailabilityReplaced { id, windows } => {
                self.validate_id(id)?;
                normalize_windows(windows.clone())?;
                Ok(())
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ServiceEvent::ServiceCreated {
                id,
                provider_id,
                name,
                duration_minutes,
                price,
                policy,
            } => {
                if self.id != id {
                    let spec = ServiceSpec {
                        name,
                        duration_minutes,
                        price,
                        policy,
                    };
                    if let Ok(entity) = Self::create(id, provider_id, spec) {
                        *self = entity;
                    }
                }
            }
            ServiceEvent::ServiceUpdated {
                id,
                name,
                duration_minutes,
                price,
                policy,
            } => {
                if self.id == id {
                    let spec = ServiceSpec {
                        name,
                        duration_minutes,
                        price,
                        policy,
                    };
                    if let Err(_e) = self.update(spec) {}
                }
            }
            ServiceEvent::ServiceActivated { id } => {
                if self.id == id {
                    self.activate();
                }
            }
            ServiceEvent::ServiceDeactivated { id } => {
                if self.id == id {
                    self.deactivate();
                }
            }
            ServiceEvent::AvailabilityReplaced { id, windows } => {
                if self.id == id {
                    if let Err(_e) = self.replace_availability(windows) {}
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

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.provider_id == other.provider_id
            && self.name == other.name
            && self.duration_minutes == other.duration_minutes
            && self.price == other.price
            && self.policy == other.policy
            && self.is_active == other.is_active
            && self.availability == other.availability
    }
}

impl Eq for Service {}

/// サービスエラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum ServiceError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Duration must be between 1 minute and 24 hours")]
    InvalidDuration,
    #[display(fmt = "Price cannot be negative")]
    NegativePrice,
    #[display(fmt = "Booking policy bounds are inconsistent")]
    InvalidPolicy,
    #[display(fmt = "Availability error: {}", _0)]
    Availability(AvailabilityError),
}

impl From<AvailabilityError> for ServiceError {
    fn from(value: AvailabilityError) -> Self {
        ServiceError::Availability(value)
    }
}
