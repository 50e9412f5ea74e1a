use derive_more::{Display, Error};

use crate::domain::{
    core::{
        AvailabilityError, BookingError, BookingId, BookingStatus, CalendarError,
        CustomerInfoError, ServiceError,
    },
    DataAccessError, Entity, Id,
};

use super::PaymentError;

/// スケジューリングエンジンのエラー
///
/// 失敗した呼び出しは必ずこのいずれかを返し、状態は変化しない。
#[derive(Error, Display, Debug)]
pub enum SchedulingError {
    /// 入力値が不正
    #[display(fmt = "Validation error: {}", reason)]
    Validation { reason: String },
    /// 存在しないサービス・予約
    #[display(fmt = "{} {} not found", entity, id)]
    NotFound { entity: &'static str, id: u64 },
    /// 確定時点で枠が埋まっていた (枠を取り直せば解決する)
    #[display(fmt = "The requested time is no longer available")]
    Conflict,
    #[display(fmt = "Policy violation: {}", _0)]
    PolicyViolation(PolicyViolation),
    /// プロバイダーでも予約したお客様でもない
    #[display(fmt = "Actor is not allowed to act on this booking")]
    Unauthorized,
    /// ストレージ障害 (再試行は呼び出し側の責務)
    #[display(fmt = "Transient store error: {}", _0)]
    TransientStore(DataAccessError),
}

impl SchedulingError {
    pub fn not_found<E>(id: E::Id) -> Self
    where
        E: Entity,
        E::Id: Id<Inner = u64>,
    {
        SchedulingError::NotFound {
            entity: E::ENTITY_NAME,
            id: *id,
        }
    }

    pub fn validation<T: ToString>(reason: T) -> Self {
        SchedulingError::Validation {
            reason: reason.to_string(),
        }
    }

    /// 予約台帳のエラーを対象の予約IDと合わせて変換する
    pub fn from_calendar(error: CalendarError, booking_id: BookingId) -> Self {
        match error {
            CalendarError::OverlappingBooking => SchedulingError::Conflict,
            CalendarError::BookingNotFound => SchedulingError::NotFound {
                entity: "booking",
                id: *booking_id,
            },
            CalendarError::Booking(e) => e.into(),
            e => SchedulingError::validation(e),
        }
    }
}

/// 予約ポリシー違反
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum PolicyViolation {
    #[display(fmt = "Service is not accepting bookings")]
    ServiceInactive,
    #[display(fmt = "Bookings must be made at least {} hours in advance", hours)]
    InsufficientNotice { hours: u32 },
    #[display(fmt = "Bookings cannot be made more than {} days ahead", days)]
    TooFarAhead { days: u32 },
    #[display(fmt = "The requested time is outside the service's availability")]
    OutsideAvailability,
    #[display(fmt = "Cancellation is closed within {} hours of the start", hours)]
    CancellationWindowClosed { hours: u32 },
    #[display(fmt = "Cannot change booking status from {:?} to {:?}", from, to)]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[display(fmt = "Booking cannot be completed before it ends")]
    NotYetEnded,
    #[display(fmt = "Payment failed: {}", _0)]
    PaymentFailed(PaymentError),
}

impl From<PolicyViolation> for SchedulingError {
    fn from(value: PolicyViolation) -> Self {
        SchedulingError::PolicyViolation(value)
    }
}

impl From<DataAccessError> for SchedulingError {
    fn from(value: DataAccessError) -> Self {
        match value {
            DataAccessError::VersionConflict(_) => SchedulingError::Conflict,
            e => SchedulingError::TransientStore(e),
        }
    }
}

impl From<BookingError> for SchedulingError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::InvalidStatusTransition { from, to } => {
                PolicyViolation::InvalidTransition { from, to }.into()
            }
            e => SchedulingError::validation(e),
        }
    }
}

impl From<ServiceError> for SchedulingError {
    fn from(value: ServiceError) -> Self {
        SchedulingError::validation(value)
    }
}

impl From<AvailabilityError> for SchedulingError {
    fn from(value: AvailabilityError) -> Self {
        SchedulingError::validation(value)
    }
}

impl From<CustomerInfoError> for SchedulingError {
    fn from(value: CustomerInfoError) -> Self {
        SchedulingError::validation(value)
    }
}
