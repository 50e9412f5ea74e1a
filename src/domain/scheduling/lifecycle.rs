use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::core::{Booking, BookingPolicy, BookingStatus, UserId};

use super::{PolicyViolation, SchedulingError};

/// 操作を行う主体
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    /// 定期処理など
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

impl From<UserId> for Actor {
    fn from(value: UserId) -> Self {
        Actor::User(value)
    }
}

/// 予約に対する主体の立場
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Provider,
    Customer,
    System,
}

/// 予約ステータスの変更要求
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusChange {
    Confirm,
    /// `forced` はキャンセル期限を無視する (プロバイダーのみ)
    Cancel { forced: bool },
    Complete,
}

impl StatusChange {
    pub fn target(&self) -> BookingStatus {
        match self {
            StatusChange::Confirm => BookingStatus::Confirmed,
            StatusChange::Cancel { .. } => BookingStatus::Cancelled,
            StatusChange::Complete => BookingStatus::Completed,
        }
    }
}

/// 予約ステータス遷移の権限・期限チェック
#[derive(Debug, Default, Clone, Copy)]
pub struct BookingLifecycle;

impl BookingLifecycle {
    pub fn role_of(&self, booking: &Booking, actor: Actor) -> Result<Role, SchedulingError> {
        match actor {
            Actor::System => Ok(Role::System),
            Actor::User(id) if id == booking.provider_id() => Ok(Role::Provider),
            Actor::User(id) if id == booking.customer_id() => Ok(Role::Customer),
            Actor::User(_) => Err(SchedulingError::Unauthorized),
        }
    }

    /// 変更要求を検証し、遷移先のステータスを返す
    pub fn check(
        &self,
        booking: &Booking,
        policy: &BookingPolicy,
        change: StatusChange,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<BookingStatus, SchedulingError> {
        let target = change.target();
        booking.validate_status(target)?;
        match change {
            StatusChange::Confirm => {
                if role != Role::Provider {
                    return Err(SchedulingError::Unauthorized);
                }
            }
            StatusChange::Cancel { forced: true } => {
                if role != Role::Provider {
                    return Err(SchedulingError::Unauthorized);
                }
            }
            StatusChange::Cancel { forced: false } => {
                Self::check_cancellation_window(booking, policy, now)?;
            }
            StatusChange::Complete => {
                if now < booking.end() && role != Role::Provider {
                    return Err(PolicyViolation::NotYetEnded.into());
                }
            }
        }
        Ok(target)
    }

    /// 日時変更の検証
    ///
    /// お客様はキャンセル期限を過ぎると変更できない。
    pub fn check_reschedule(
        &self,
        booking: &Booking,
        policy: &BookingPolicy,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        booking.validate_status(BookingStatus::Rescheduled)?;
        match role {
            Role::System => Err(SchedulingError::Unauthorized),
            Role::Customer => Self::check_cancellation_window(booking, policy, now),
            Role::Provider => Ok(()),
        }
    }

    fn check_cancellation_window(
        booking: &Booking,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        match now > policy.cancellation_deadline(booking.start()) {
            true => Err(PolicyViolation::CancellationWindowClosed {
                hours: policy.cancellation_policy_hours,
            }
            .into()),
            false => Ok(()),
        }
    }
}
