//! Free-text interpretation for the booking dialogue.
//!
//! Everything here is a pure function of its inputs; dates are resolved
//! against an explicit `today` so results are reproducible.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

use medidesk_core::domain::schedule::Slot;

const BOOKING_VERBS: &[&str] = &["book", "booking", "schedule", "reserve"];
const APPOINTMENT_NOUNS: &[&str] = &["appointment", "appointments", "consultation", "visit"];
const APPOINTMENT_REQUESTS: &[&str] = &["make", "want", "get", "arrange", "like", "set"];
/// Openers of an information question ("how do I book...") rather than a
/// request to book.
const QUESTION_OPENERS: &[&str] =
    &["how", "what", "when", "where", "why", "which", "who", "do", "does", "is", "are"];
const CANCEL_WORDS: &[&str] = &["cancel", "stop", "quit", "abort", "nevermind"];
const CANCEL_PHRASES: &[&str] = &["never mind", "forget it", "no thanks"];
const DATE_CHANGE_PHRASES: &[&str] = &[
    "another date",
    "another day",
    "different date",
    "different day",
    "other date",
    "other day",
    "change date",
    "change the date",
    "new date",
    "change day",
];

/// What the user picked from an offered slot list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotChoice {
    Offered(Slot),
    /// A well-formed time that is not among the offered candidates.
    NotOffered(NaiveTime),
    Unrecognized,
}

pub fn detect_booking_intent(text: &str) -> bool {
    let tokens = tokenize(text);
    if tokens.first().is_some_and(|first| QUESTION_OPENERS.contains(&first.as_str())) {
        return false;
    }
    let has = |words: &[&str]| tokens.iter().any(|token| words.contains(&token.as_str()));

    has(BOOKING_VERBS) || (has(APPOINTMENT_NOUNS) && has(APPOINTMENT_REQUESTS))
}

pub fn detect_cancel(text: &str) -> bool {
    let tokens = tokenize(text);
    let joined = tokens.join(" ");

    tokens.iter().any(|token| CANCEL_WORDS.contains(&token.as_str()))
        || CANCEL_PHRASES.iter().any(|phrase| contains_phrase(&joined, phrase))
}

pub fn detect_date_change(text: &str) -> bool {
    let joined = tokenize(text).join(" ");
    DATE_CHANGE_PHRASES.iter().any(|phrase| contains_phrase(&joined, phrase))
}

/// Resolves the first date mentioned in `text`.
///
/// Accepts `YYYY-MM-DD`, `DD/MM/YYYY`, `today`, `tomorrow`,
/// `day after tomorrow` and weekday names, which mean the next such day
/// strictly after `today`.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(date) = NaiveDate::parse_from_str(token, "%d/%m/%Y") {
            return Some(date);
        }
    }

    let tokens = tokenize(text);
    let joined = tokens.join(" ");
    if contains_phrase(&joined, "day after tomorrow") {
        return today.checked_add_signed(Duration::days(2));
    }

    tokens.iter().find_map(|token| match token.as_str() {
        "today" => Some(today),
        "tomorrow" => today.checked_add_signed(Duration::days(1)),
        other => weekday(other).and_then(|target| next_weekday(today, target)),
    })
}

/// Interprets a reply to an offered slot list: a clock time (`10:30`,
/// `10.30`, `2pm`, `2:30 pm`), a 1-based option number, or `first`/`last`.
pub fn parse_slot_choice(text: &str, candidates: &[Slot]) -> SlotChoice {
    if let Some(time) = parse_clock_time(text) {
        return candidates
            .iter()
            .find(|slot| slot.start_time == time)
            .map(|slot| SlotChoice::Offered(*slot))
            .unwrap_or(SlotChoice::NotOffered(time));
    }

    let tokens = tokenize(text);
    let meaningful: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|token| !matches!(*token, "option" | "number" | "slot" | "the" | "one" | "please"))
        .collect();

    let index = match meaningful.as_slice() {
        [single] => match *single {
            "first" => Some(0),
            "second" => Some(1),
            "third" => Some(2),
            "last" => candidates.len().checked_sub(1),
            number => number.parse::<usize>().ok().and_then(|n| n.checked_sub(1)),
        },
        _ => None,
    };

    index
        .and_then(|index| candidates.get(index))
        .map(|slot| SlotChoice::Offered(*slot))
        .unwrap_or(SlotChoice::Unrecognized)
}

/// Finds a clock time in free text. Bare numbers are not times.
pub fn parse_clock_time(text: &str) -> Option<NaiveTime> {
    let lowered = text.to_ascii_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '?' | '!' | ';'))
        .filter(|token| !token.is_empty())
        .collect();

    for (position, raw) in tokens.iter().enumerate() {
        let token = raw.trim_end_matches('.');
        let next_meridiem =
            tokens.get(position + 1).and_then(|next| meridiem(next.trim_end_matches('.')));

        let (body, suffix) = split_meridiem(token);
        let marker = suffix.or(next_meridiem);

        let parsed = match body.split_once(|c: char| c == ':' || c == '.') {
            Some((hour, minute)) if minute.len() == 2 => {
                hour.parse::<u32>().ok().zip(minute.parse::<u32>().ok())
            }
            Some(_) => None,
            None if marker.is_some() => body.parse::<u32>().ok().map(|hour| (hour, 0)),
            None => None,
        };

        let Some((hour, minute)) = parsed else {
            continue;
        };
        let hour = match marker {
            Some(Meridiem::Pm) if (1..12).contains(&hour) => hour + 12,
            Some(Meridiem::Am) if hour == 12 => 0,
            Some(_) if hour == 0 || hour > 12 => continue,
            _ => hour,
        };
        if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return Some(time);
        }
    }
    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

fn meridiem(token: &str) -> Option<Meridiem> {
    match token {
        "am" | "a.m" => Some(Meridiem::Am),
        "pm" | "p.m" => Some(Meridiem::Pm),
        _ => None,
    }
}

fn split_meridiem(token: &str) -> (&str, Option<Meridiem>) {
    for (suffix, value) in [("am", Meridiem::Am), ("pm", Meridiem::Pm)] {
        if let Some(body) = token.strip_suffix(suffix) {
            let numeric = body.chars().all(|c| c.is_ascii_digit() || c == ':' || c == '.');
            if !body.is_empty() && numeric {
                return (body, Some(value));
            }
        }
    }
    (token, None)
}

fn weekday(token: &str) -> Option<Weekday> {
    Some(match token {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    })
}

fn next_weekday(today: NaiveDate, target: Weekday) -> Option<NaiveDate> {
    let current = today.weekday().num_days_from_monday();
    let wanted = target.num_days_from_monday();
    let ahead = match (wanted + 7 - current) % 7 {
        0 => 7,
        days => days,
    };
    today.checked_add_signed(Duration::days(i64::from(ahead)))
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(joined_tokens: &str, phrase: &str) -> bool {
    format!(" {joined_tokens} ").contains(&format!(" {phrase} "))
}
