// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Common free slots between two users' calendars.
//!
//! Candidates are whole-hour starts on weekdays within business hours,
//! evaluated in UTC.

use crate::models::Event;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use serde::Serialize;

/// Maximum number of slots returned.
pub const MAX_SLOTS: usize = 3;

/// Days after today that are searched (inclusive).
pub const SEARCH_DAYS: i64 = 14;

pub const BUSINESS_START_HOUR: u32 = 9;
pub const BUSINESS_END_HOUR: u32 = 17;

/// A candidate meeting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Find up to [`MAX_SLOTS`] slots, ascending, where neither user is busy.
///
/// Overlap is half-open: an event ending exactly when a slot starts does not
/// block it. Slots that start before `now` are skipped.
pub fn compute_common_slots(
    events_a: &[Event],
    events_b: &[Event],
    duration_minutes: u32,
    now: DateTime<Utc>,
) -> Vec<TimeSlot> {
    let window_minutes = (BUSINESS_END_HOUR - BUSINESS_START_HOUR) * 60;
    if duration_minutes == 0 || duration_minutes > window_minutes {
        return Vec::new();
    }

    let length = Duration::minutes(i64::from(duration_minutes));
    let today = now.date_naive();
    let mut slots = Vec::with_capacity(MAX_SLOTS);

    for offset in 0..=SEARCH_DAYS {
        let day = today + Duration::days(offset);
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }

        for hour in BUSINESS_START_HOUR..BUSINESS_END_HOUR {
            if hour * 60 + duration_minutes > BUSINESS_END_HOUR * 60 {
                break;
            }

            let Some(naive) = day.and_hms_opt(hour, 0, 0) else {
                continue;
            };
            let start = Utc.from_utc_datetime(&naive);
            if start < now {
                continue;
            }

            let slot = TimeSlot {
                start,
                end: start + length,
            };
            if is_free(events_a, &slot) && is_free(events_b, &slot) {
                slots.push(slot);
                if slots.len() == MAX_SLOTS {
                    return slots;
                }
            }
        }
    }

    slots
}

fn is_free(events: &[Event], slot: &TimeSlot) -> bool {
    !events
        .iter()
        .any(|e| e.start_time < slot.end && e.end_time > slot.start)
}
