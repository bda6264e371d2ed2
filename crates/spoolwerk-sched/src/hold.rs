// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `job-hold-until` keyword resolution.
//
// Symbolic periods are evaluated against local wall-clock time; an explicit
// `HH:MM[:SS]` is a GMT time of day, rolled to tomorrow once it has passed.
// Deadlines are computed by adding seconds to `now`, so a DST change inside
// the hold shifts the wall-clock result by the DST offset.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Timelike, Utc, Weekday};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::HoldUntil;

/// Resolve a `job-hold-until` keyword at local time `now`.
///
/// Returns `None` for `no-hold`.  A period that is already in effect yields a
/// deadline equal to `now`.
pub fn resolve_hold_until(token: &str, now: DateTime<FixedOffset>) -> Result<Option<HoldUntil>> {
    let (hour, min, sec) = (now.hour() as i64, now.minute() as i64, now.second() as i64);
    // Seconds from now until `target_hour` o'clock, counted from today's midnight.
    let until = |target_hour: i64| ((target_hour - 1 - hour) * 60 + 59 - min) * 60 + 60 - sec;
    let at = |secs: i64| Some(HoldUntil::At(now.with_timezone(&Utc) + Duration::seconds(secs)));

    let hold = match token {
        "no-hold" => None,
        "indefinite" => Some(HoldUntil::Indefinite),
        "day-time" => {
            // 18:00:00 sharp still belongs to the day shift.
            let in_day = hour < 18 || (hour == 18 && min == 0 && sec == 0);
            if in_day { at(0) } else { at(until(24 + 6)) }
        }
        "evening" | "night" => {
            if !(6..18).contains(&hour) { at(0) } else { at(until(18)) }
        }
        "second-shift" => {
            if hour >= 16 { at(0) } else { at(until(16)) }
        }
        "third-shift" => {
            if hour < 8 { at(0) } else { at(until(24)) }
        }
        "weekend" => match now.weekday() {
            Weekday::Sat | Weekday::Sun => at(0),
            day => {
                let days_to_saturday = 5 - day.num_days_from_monday() as i64;
                at(until(days_to_saturday * 24))
            }
        },
        other => {
            let time = parse_gmt_time(other)
                .ok_or_else(|| SpoolError::InvalidHoldUntil(other.to_string()))?;
            let now_utc = now.with_timezone(&Utc);
            let mut deadline = now_utc.date_naive().and_time(time).and_utc();
            if deadline < now_utc {
                deadline += Duration::days(1);
            }
            Some(HoldUntil::At(deadline))
        }
    };
    Ok(hold)
}

/// Parse `HH:MM` or `HH:MM:SS`.
fn parse_gmt_time(value: &str) -> Option<NaiveTime> {
    let mut parts = value.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    let second: u32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    /// Local time in a UTC+2 zone.
    fn local(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .expect("offset")
            .with_ymd_and_hms(y, m, d, h, mi, s)
            .single()
            .expect("valid time")
    }

    fn deadline(token: &str, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match resolve_hold_until(token, now).expect("valid token") {
            Some(HoldUntil::At(t)) => t.with_timezone(now.offset()),
            other => panic!("expected a deadline, got {other:?}"),
        }
    }

    #[test]
    fn indefinite_and_no_hold() {
        let now = local(2026, 10, 14, 12, 0, 0);
        assert_eq!(
            resolve_hold_until("indefinite", now).expect("ok"),
            Some(HoldUntil::Indefinite)
        );
        assert_eq!(resolve_hold_until("no-hold", now).expect("ok"), None);
    }

    #[test]
    fn day_time_in_the_evening_waits_for_six_am() {
        let now = local(2026, 10, 14, 20, 0, 0);
        assert_eq!(deadline("day-time", now), local(2026, 10, 15, 6, 0, 0));

        let now = local(2026, 10, 14, 19, 30, 15);
        assert_eq!(deadline("day-time", now), local(2026, 10, 15, 6, 0, 0));
    }

    #[test]
    fn day_time_boundary_is_immediate() {
        let now = local(2026, 10, 14, 18, 0, 0);
        assert_eq!(deadline("day-time", now), now);

        let now = local(2026, 10, 14, 9, 15, 0);
        assert_eq!(deadline("day-time", now), now);
    }

    #[test]
    fn evening_and_night() {
        let now = local(2026, 10, 14, 10, 0, 0);
        assert_eq!(deadline("evening", now), local(2026, 10, 14, 18, 0, 0));
        assert_eq!(deadline("night", now), local(2026, 10, 14, 18, 0, 0));

        let late = local(2026, 10, 14, 22, 0, 0);
        assert_eq!(deadline("evening", late), late);
        let early = local(2026, 10, 14, 3, 0, 0);
        assert_eq!(deadline("night", early), early);
    }

    #[test]
    fn shifts() {
        let now = local(2026, 10, 14, 9, 30, 0);
        assert_eq!(deadline("second-shift", now), local(2026, 10, 14, 16, 0, 0));
        assert_eq!(deadline("third-shift", now), local(2026, 10, 15, 0, 0, 0));

        let early = local(2026, 10, 14, 7, 0, 0);
        assert_eq!(deadline("third-shift", early), early);
        let late = local(2026, 10, 14, 17, 0, 0);
        assert_eq!(deadline("second-shift", late), late);
    }

    #[test]
    fn weekend_waits_for_saturday() {
        let wednesday = local(2026, 10, 14, 11, 20, 5);
        assert_eq!(wednesday.weekday(), Weekday::Wed);
        assert_eq!(deadline("weekend", wednesday), local(2026, 10, 17, 0, 0, 0));

        let sunday = local(2026, 10, 18, 11, 0, 0);
        assert_eq!(deadline("weekend", sunday), sunday);
    }

    #[test]
    fn explicit_gmt_time_rolls_over() {
        // 12:00 local is 10:00 UTC.
        let now = local(2026, 10, 14, 12, 0, 0);
        let later = deadline("14:30", now).with_timezone(&Utc);
        assert_eq!(later, Utc.with_ymd_and_hms(2026, 10, 14, 14, 30, 0).unwrap());

        let passed = deadline("09:00:30", now).with_timezone(&Utc);
        assert_eq!(passed, Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 30).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        let now = local(2026, 10, 14, 12, 0, 0);
        assert!(resolve_hold_until("lunchtime", now).is_err());
        assert!(resolve_hold_until("25:00", now).is_err());
        assert!(resolve_hold_until("12:00:00:00", now).is_err());
    }
}
