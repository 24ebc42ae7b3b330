//! Normal-hours check per person category.

use crate::types::Category;
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Half-open hour range `[start, end)`; `end` may be 24. A range with
/// `start > end` wraps past midnight, so `22..6` covers 22:00 to 05:59.
/// `start == end` covers no hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const ALL_DAY: HourRange = HourRange { start: 0, end: 24 };

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Offset of the site's local time from UTC.
    pub utc_offset_minutes: i32,
    pub resident: HourRange,
    pub employee: HourRange,
    pub authorized_visitor: HourRange,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: 0,
            resident: HourRange { start: 6, end: 24 },
            employee: HourRange { start: 7, end: 19 },
            authorized_visitor: HourRange { start: 8, end: 22 },
        }
    }
}

pub struct AccessSchedule {
    offset: FixedOffset,
    config: ScheduleConfig,
}

impl AccessSchedule {
    pub fn new(config: ScheduleConfig) -> Self {
        let offset = config
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    minutes = config.utc_offset_minutes,
                    "UTC offset out of range; using UTC"
                );
                Utc.fix()
            });
        Self { offset, config }
    }

    pub fn hours_for(&self, category: Category) -> HourRange {
        match category {
            Category::Resident => self.config.resident,
            Category::Employee => self.config.employee,
            Category::AuthorizedVisitor => self.config.authorized_visitor,
        }
    }

    /// True when `timestamp` falls outside the category's normal hours.
    pub fn is_unusual(&self, category: Category, timestamp: DateTime<Utc>) -> bool {
        let hour = timestamp.with_timezone(&self.offset).hour();
        !self.hours_for(category).contains(hour)
    }
}
