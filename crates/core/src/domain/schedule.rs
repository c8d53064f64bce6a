use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::UserId;

/// A fixed-width interval on one day. Ordering is chronological.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Slot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, minutes: u32) -> Self {
        let end_time = start_time + Duration::minutes(i64::from(minutes));
        Self { date, start_time, end_time }
    }

    /// Identity used by the uniqueness invariant: one appointment per (date, start).
    pub fn key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.start_time)
    }

    pub fn start_label(&self) -> String {
        self.start_time.format("%H:%M").to_string()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date.format("%Y-%m-%d"),
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub user_id: UserId,
    pub slot: Slot,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(user_id: UserId, slot: Slot) -> Self {
        Self {
            id: AppointmentId(uuid::Uuid::new_v4().to_string()),
            user_id,
            slot,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::Slot;

    #[test]
    fn slot_display_and_label_use_clock_format() {
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).expect("date");
        let start = NaiveTime::from_hms_opt(9, 30, 0).expect("time");
        let slot = Slot::new(date, start, 30);

        assert_eq!(slot.start_label(), "09:30");
        assert_eq!(slot.to_string(), "2026-11-02 09:30-10:00");
    }

    #[test]
    fn slots_order_by_date_then_start() {
        let monday = NaiveDate::from_ymd_opt(2026, 11, 2).expect("date");
        let tuesday = NaiveDate::from_ymd_opt(2026, 11, 3).expect("date");
        let nine = NaiveTime::from_hms_opt(9, 0, 0).expect("time");
        let ten = NaiveTime::from_hms_opt(10, 0, 0).expect("time");

        let mut slots =
            vec![Slot::new(tuesday, nine, 30), Slot::new(monday, ten, 30), Slot::new(monday, nine, 30)];
        slots.sort();

        assert_eq!(slots[0].key(), (monday, nine));
        assert_eq!(slots[1].key(), (monday, ten));
        assert_eq!(slots[2].key(), (tuesday, nine));
    }
}
