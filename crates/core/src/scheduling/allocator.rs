use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::schedule::Slot;
use crate::errors::DomainError;

/// What to do when slots are requested for a date before today.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastDatePolicy {
    #[default]
    Reject,
    Empty,
}

impl FromStr for PastDatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "empty" => Ok(Self::Empty),
            other => Err(format!("unsupported past date policy `{other}` (expected reject|empty)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusinessHours {
    open: NaiveTime,
    close: NaiveTime,
    break_start: NaiveTime,
    break_end: NaiveTime,
    slot_minutes: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open: hm(9, 0),
            close: hm(17, 0),
            break_start: hm(13, 0),
            break_end: hm(14, 0),
            slot_minutes: 30,
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(hour * 3600 + minute * 60, 0)
        .unwrap_or(NaiveTime::MIN)
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() / 60
}

impl BusinessHours {
    pub fn try_new(
        open: NaiveTime,
        close: NaiveTime,
        break_start: NaiveTime,
        break_end: NaiveTime,
        slot_minutes: u32,
    ) -> Result<Self, DomainError> {
        if slot_minutes == 0 || slot_minutes > 240 {
            return Err(DomainError::InvalidBusinessHours(
                "slot length must be in range 1..=240 minutes".to_string(),
            ));
        }
        if open >= close {
            return Err(DomainError::InvalidBusinessHours(format!(
                "opening time {open} must be before closing time {close}"
            )));
        }
        if break_start <= open || break_start >= break_end || break_end > close {
            return Err(DomainError::InvalidBusinessHours(format!(
                "break window {break_start}-{break_end} must start after {open}, \
                 be non-empty and end by {close}"
            )));
        }
        if (minute_of_day(close) - minute_of_day(open)) % slot_minutes != 0 {
            return Err(DomainError::InvalidBusinessHours(format!(
                "opening window {open}-{close} is not a multiple of {slot_minutes} minutes"
            )));
        }

        Ok(Self { open, close, break_start, break_end, slot_minutes })
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    pub fn break_window(&self) -> (NaiveTime, NaiveTime) {
        (self.break_start, self.break_end)
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    fn overlaps_break(&self, start_minute: u32) -> bool {
        let end_minute = start_minute + self.slot_minutes;
        start_minute < minute_of_day(self.break_end) && end_minute > minute_of_day(self.break_start)
    }
}

/// Computes bookable slots for a day. Holds configuration only; every call is
/// a pure function of its arguments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotAllocator {
    hours: BusinessHours,
    past_dates: PastDatePolicy,
}

impl SlotAllocator {
    pub fn new(hours: BusinessHours, past_dates: PastDatePolicy) -> Self {
        Self { hours, past_dates }
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    pub fn past_date_policy(&self) -> PastDatePolicy {
        self.past_dates
    }

    /// Every slot of the working day, booked or not.
    pub fn day_template(&self, date: NaiveDate) -> Vec<Slot> {
        let open = minute_of_day(self.hours.open);
        let close = minute_of_day(self.hours.close);
        let step = self.hours.slot_minutes;

        (open..close)
            .step_by(step as usize)
            .filter(|start| start + step <= close)
            .filter(|start| !self.hours.overlaps_break(*start))
            .filter_map(|start| NaiveTime::from_num_seconds_from_midnight_opt(start * 60, 0))
            .map(|start| Slot::new(date, start, step))
            .collect()
    }

    /// Slots of `date` whose start is not already taken by `existing`,
    /// in chronological order.
    pub fn available_slots(&self, date: NaiveDate, existing: &BTreeSet<Slot>) -> Vec<Slot> {
        let taken: HashSet<(NaiveDate, NaiveTime)> = existing.iter().map(Slot::key).collect();
        self.day_template(date).into_iter().filter(|slot| !taken.contains(&slot.key())).collect()
    }

    /// [`SlotAllocator::available_slots`] with the past-date policy applied
    /// against `today`.
    pub fn available_slots_from(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        existing: &BTreeSet<Slot>,
    ) -> Result<Vec<Slot>, DomainError> {
        if date < today {
            return match self.past_dates {
                PastDatePolicy::Reject => Err(DomainError::PastDate { date }),
                PastDatePolicy::Empty => Ok(Vec::new()),
            };
        }
        Ok(self.available_slots(date, existing))
    }

    /// Checks that a requested start time is a slot the practice offers.
    pub fn validate_start(&self, date: NaiveDate, time: NaiveTime) -> Result<Slot, DomainError> {
        let minute = minute_of_day(time);
        let open = minute_of_day(self.hours.open);
        let close = minute_of_day(self.hours.close);

        if minute < open || minute + self.hours.slot_minutes > close {
            return Err(DomainError::OutsideBusinessHours {
                time,
                open: self.hours.open,
                close: self.hours.close,
            });
        }
        if self.hours.overlaps_break(minute) {
            return Err(DomainError::DuringBreak {
                time,
                start: self.hours.break_start,
                end: self.hours.break_end,
            });
        }
        if (minute - open) % self.hours.slot_minutes != 0 || time.second() != 0 {
            return Err(DomainError::MisalignedSlot {
                time,
                slot_minutes: self.hours.slot_minutes,
            });
        }

        Ok(Slot::new(date, time, self.hours.slot_minutes))
    }
}

/// Slots for `date` under the default 09:00-17:00 day with a 13:00-14:00 break.
pub fn available_slots(date: NaiveDate, existing: &BTreeSet<Slot>) -> Vec<Slot> {
    SlotAllocator::default().available_slots(date, existing)
}
