pub mod core;
pub mod scheduling;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use snowflake::SnowflakeIdGenerator;
use std::{
    collections::VecDeque,
    error::Error,
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
};
use tokio::sync::Mutex;

pub trait Id:
    Copy
    + Eq
    + Deref<Target = Self::Inner>
    + From<Self::Inner>
    + Display
    + Debug
    + Serialize
    + for<'de> Deserialize<'de>
{
    type Inner: FromStr;
}

pub trait Event: Clone + Eq + Debug + Serialize + for<'a> Deserialize<'a> {
    type Id;
}

pub trait Entity {
    type Id: Id;

    const ENTITY_NAME: &'static str;

    fn id(&self) -> Self::Id;
}

pub trait Aggregation: Entity + Debug + Default + Clone {
    type Event: Event<Id = Self::Id>;
    type Error: Error;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error>;
    fn apply(&mut self, event: Self::Event);
    fn events(&self) -> &EventQueue<Self::Event>;
    fn events_mut(&mut self) -> &mut EventQueue<Self::Event>;
    fn pop(&mut self) -> Option<Self::Event> {
        self.events_mut().pop()
    }
    fn pop_all(&mut self) -> Vec<Self::Event> {
        let mut events = Vec::new();
        while let Some(e) = self.pop() {
            events.push(e);
        }
        events
    }
    fn clear(&mut self) {
        self.events_mut().clear()
    }
    fn peek(&self) -> Option<&Self::Event> {
        self.events().peek()
    }
    fn iter(&self) -> EventQueueIter<'_, Self::Event> {
        self.events().iter()
    }
    fn iter_mut(&mut self) -> EventQueueIterMut<'_, Self::Event> {
        self.events_mut().iter_mut()
    }
}

#[derive(Error, Display, Debug)]
pub enum DataAccessError {
    #[display(fmt = "Database connection error: {}", _0)]
    ConnectionError(#[error(not(source))] Box<dyn Error + Send + Sync>),
    #[display(fmt = "Database query error: {}", _0)]
    QueryError(#[error(not(source))] Box<dyn Error + Send + Sync>),
    #[display(fmt = "Data read error: {}", _0)]
    ReadError(#[error(not(source))] Box<dyn Error + Send + Sync>),
    #[display(fmt = "Data write error: {}", _0)]
    WriteError(#[error(not(source))] Box<dyn Error + Send + Sync>),
    #[display(fmt = "Client side error: {}", _0)]
    ClientSideError(#[error(not(source))] Box<dyn Error + Send + Sync>),
    /// 読み込み後に別の書き込みが行われた
    #[display(fmt = "Stale revision for {}", _0)]
    VersionConflict(#[error(not(source))] String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventQueue<T> {
    queue: VecDeque<T>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
    pub fn peek(&self) -> Option<&T> {
        self.queue.front()
    }
    pub fn push(&mut self, value: T) {
        self.queue.push_back(value)
    }
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
    pub fn clear(&mut self) {
        self.queue.clear()
    }
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
    pub fn iter(&self) -> EventQueueIter<'_, T> {
        self.queue.iter()
    }
    pub fn iter_mut(&mut self) -> EventQueueIterMut<'_, T> {
        self.queue.iter_mut()
    }
}

impl<T> IntoIterator for EventQueue<T> {
    type Item = T;
    type IntoIter = EventQueueIntoIter<T>;
    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type EventQueueIntoIter<T> = std::collections::vec_deque::IntoIter<T>;
pub type EventQueueIter<'a, T> = std::collections::vec_deque::Iter<'a, T>;
pub type EventQueueIterMut<'a, T> = std::collections::vec_deque::IterMut<'a, T>;

/// Snowflake方式のID採番器
///
/// エンジンに注入して共有する。複数タスクから同時に呼ばれても重複しない。
pub struct IdGenerator(Mutex<SnowflakeIdGenerator>);

impl IdGenerator {
    pub fn new(machine_id: i32, node_id: i32) -> Self {
        Self::from(SnowflakeIdGenerator::new(machine_id, node_id))
    }

    pub async fn generate<T>(&self) -> T
    where
        T: From<u64>,
    {
        let id = self.0.lock().await.generate();
        T::from(id as u64)
    }
}

impl From<SnowflakeIdGenerator> for IdGenerator {
    fn from(value: SnowflakeIdGenerator) -> Self {
        Self(Mutex::new(value))
    }
}
