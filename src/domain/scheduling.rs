mod activity;
mod analytics;
mod collaborator;
mod engine;
mod error;
mod ledger;
mod lifecycle;
mod scheduler;
mod slot;
#[cfg(test)]
mod testing;

pub use self::activity::*;
pub use self::analytics::*;
pub use self::collaborator::*;
pub use self::engine::*;
pub use self::error::*;
pub use self::ledger::*;
pub use self::lifecycle::*;
pub use self::scheduler::*;
pub use self::slot::*;
