mod activity;
mod booking;
mod service;

pub use self::activity::*;
pub use self::booking::*;
pub use self::service::*;
