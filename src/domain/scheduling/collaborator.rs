use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    core::{Booking, BookingId, Money},
    Entity,
};

/// 現在時刻の取得元
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// システム時計
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 通知の種類
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum NotificationEvent {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingCompleted,
    BookingRescheduled,
}

/// 予約の通知先
///
/// 送信は結果を待たない。失敗しても予約操作には影響させないこと。
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, event: NotificationEvent, booking: &Booking);
}

/// ログに書き出すだけの通知
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingNotificationDispatcher {
    async fn send(&self, event: NotificationEvent, booking: &Booking) {
        info!(
            booking_id = %booking.id(),
            customer_id = %booking.customer_id(),
            start = %booking.start(),
            "notification {}",
            event
        );
    }
}

/// 決済エラー
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[display(fmt = "Payment declined: {}", reason)]
    Declined { reason: String },
    #[display(fmt = "Payment processor unavailable: {}", reason)]
    Unavailable { reason: String },
}

/// 予約確定時の決済
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError>;

    /// 保存できなかった予約の決済を取り消す
    async fn refund(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError>;
}

/// 決済は店頭で行う (常に成功)
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredPaymentProcessor;

#[async_trait]
impl PaymentProcessor for DeferredPaymentProcessor {
    async fn charge(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError> {
        debug!(%booking_id, "payment of {} deferred", amount);
        Ok(())
    }

    async fn refund(&self, booking_id: BookingId, amount: &Money) -> Result<(), PaymentError> {
        debug!(%booking_id, "deferred payment of {} dropped", amount);
        Ok(())
    }
}
