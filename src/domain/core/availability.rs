use std::ops::Range;

use bio::data_structures::interval_tree::IntervalTree;
use chrono::{NaiveTime, Weekday};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// 曜日番号 (0 = 月曜日 ... 6 = 日曜日) から曜日を得る
pub fn weekday_from_index(day_of_week: u32) -> Option<Weekday> {
    match day_of_week {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// 毎週繰り返す予約受付時間帯
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

impl AvailabilityWindow {
    pub fn new(
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self, AvailabilityError> {
        let window = Self {
            weekday,
            start,
            end,
        };
        window.validate_time()?;
        Ok(window)
    }

    /// 0 = 月曜日 ... 6 = 日曜日
    pub fn from_day_index(
        day_of_week: u32,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self, AvailabilityError> {
        let weekday = weekday_from_index(day_of_week).ok_or(AvailabilityError::InvalidWeekday)?;
        Self::new(weekday, start, end)
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn day_of_week(&self) -> u32 {
        self.weekday.num_days_from_monday()
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn time(&self) -> Range<NaiveTime> {
        self.start..self.end
    }

    fn validate_time(&self) -> Result<(), AvailabilityError> {
        match self.start < self.end {
            true => Ok(()),
            false => Err(AvailabilityError::InvalidTime),
        }
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.weekday == other.weekday && self.start < other.end && self.end > other.start
    }
}

/// 週間スケジュール全体を検証し、曜日・開始時刻順に並べて返す
pub fn normalize_windows(
    windows: Vec<AvailabilityWindow>,
) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
    let mut windows = windows;
    for window in &windows {
        window.validate_time()?;
    }
    windows.sort_by_key(|w| (w.day_of_week(), w.start, w.end));
    for day in 0..7 {
        let same_day = windows
            .iter()
            .filter(|w| w.day_of_week() == day)
            .collect::<Vec<_>>();
        validate_overlapping_windows(&same_day)?;
    }
    Ok(windows)
}

fn validate_overlapping_windows(
    windows: &[&AvailabilityWindow],
) -> Result<(), AvailabilityError> {
    let mut tree: IntervalTree<NaiveTime, &AvailabilityWindow> = IntervalTree::new();
    for window in windows {
        if tree
            .find(window.time())
            .any(|entry| window.overlaps(*entry.data()))
        {
            return Err(AvailabilityError::OverlappingWindow);
        }
        tree.insert(window.time(), *window);
    }
    Ok(())
}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum AvailabilityError {
    #[display(fmt = "Window start time must be before its end time")]
    InvalidTime,
    #[display(fmt = "Day of week must be between 0 and 6")]
    InvalidWeekday,
    #[display(fmt = "Window overlaps with another window on the same day")]
    OverlappingWindow,
}
