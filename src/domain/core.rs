mod activity;
mod availability;
mod booking;
mod customer;
mod service;

use std::fmt::Display;

use derive_more::{Deref, Display, From};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::domain::Id;

pub use self::activity::*;
pub use self::availability::*;
pub use self::booking::*;
pub use self::customer::*;
pub use self::service::*;

/// ユーザーID (プロバイダーとお客様で共通)
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
pub struct UserId(u64);

impl Id for UserId {
    type Inner = u64;
}

/// 通貨
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Currency {
    #[default]
    JPY,
    USD,
    EUR,
    GBP,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::JPY => "¥",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
        }
    }

    /// 補助単位の桁数
    pub fn minor_digits(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            Currency::USD | Currency::EUR | Currency::GBP => 2,
        }
    }
}

/// 金額 (補助単位の整数で保持する)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_free(&self) -> bool {
        self.amount == 0
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let scale = 10u64.pow(self.currency.minor_digits());
        let major = (abs / scale).to_formatted_string(&Locale::en);
        match self.currency.minor_digits() {
            0 => write!(f, "{}{}{}", sign, self.currency.symbol(), major),
            digits => write!(
                f,
                "{}{}{}.{:0width$}",
                sign,
                self.currency.symbol(),
                major,
                abs % scale,
                width = digits as usize
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_display() {
        let price = Money::new(1000000, Currency::JPY);
        assert_eq!(format!("{}", price), "¥1,000,000");
    }

    #[test]
    fn test_price_display_minor_units() {
        assert_eq!(Money::new(15000, Currency::USD).to_string(), "$150.00");
        assert_eq!(Money::new(123456789, Currency::EUR).to_string(), "€1,234,567.89");
        assert_eq!(Money::new(-505, Currency::GBP).to_string(), "-£5.05");
    }
}
