//! Conversions between the packed MS-DOS timestamp stored in every header,
//! the 64-bit Windows FILETIME used by the NTFS extra field, Unix seconds and
//! [`NaiveDateTime`]. DOS times carry no zone and are treated as UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::time::SystemTime;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn dos_max() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2107, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 58))
        .unwrap_or_default()
}

/// Decode a packed DOS date (high 16 bits) and time (low 16 bits).
///
/// Out-of-range fields are clamped; a zero date decodes to 1980-01-01.
pub fn dos_to_datetime(packed: u32) -> NaiveDateTime {
    let date = (packed >> 16) as u16;
    let time = packed as u16;

    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F).clamp(1, 12) as u32;
    let day = (date & 0x1F).max(1) as u32;
    let hour = ((time >> 11) & 0x1F).min(23) as u32;
    let minute = ((time >> 5) & 0x3F).min(59) as u32;
    let second = ((time & 0x1F) * 2).min(59) as u32;

    // Walk the day back for dates such as February 31st.
    (0..4)
        .find_map(|back| NaiveDate::from_ymd_opt(year, month, day.saturating_sub(back).max(1)))
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .unwrap_or_else(dos_epoch)
}

/// Encode a timestamp as packed DOS date/time.
///
/// Seconds are truncated to an even value and dates outside 1980..=2107 are
/// clamped to the representable boundary.
pub fn datetime_to_dos(dt: &NaiveDateTime) -> u32 {
    let dt = if *dt < dos_epoch() {
        dos_epoch()
    } else if *dt > dos_max() {
        dos_max()
    } else {
        *dt
    };

    let date = ((dt.year() - 1980) as u32) << 9 | dt.month() << 5 | dt.day();
    let time = dt.hour() << 11 | dt.minute() << 5 | dt.second() / 2;
    date << 16 | time
}

/// Split packed DOS date/time into the (time, date) header fields.
pub fn split_dos(packed: u32) -> (u16, u16) {
    (packed as u16, (packed >> 16) as u16)
}

pub fn filetime_to_datetime(ticks: u64) -> Option<NaiveDateTime> {
    let ticks = i64::try_from(ticks).ok()?;
    let secs = ticks / FILETIME_TICKS_PER_SECOND - FILETIME_UNIX_OFFSET;
    let nanos = (ticks % FILETIME_TICKS_PER_SECOND) as u32 * 100;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

pub fn datetime_to_filetime(dt: &NaiveDateTime) -> u64 {
    let utc = dt.and_utc();
    let secs = utc.timestamp() + FILETIME_UNIX_OFFSET;
    if secs < 0 {
        return 0;
    }
    (secs as u64)
        .saturating_mul(FILETIME_TICKS_PER_SECOND as u64)
        .saturating_add((utc.timestamp_subsec_nanos() / 100) as u64)
}

pub fn unix_to_datetime(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// Unix seconds clamped to the `i32` range of the extended timestamp field.
pub fn datetime_to_unix_i32(dt: &NaiveDateTime) -> i32 {
    dt.and_utc()
        .timestamp()
        .clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

pub fn system_time_to_datetime(time: SystemTime) -> NaiveDateTime {
    DateTime::<Utc>::from(time).naive_utc()
}

pub fn datetime_to_system_time(dt: &NaiveDateTime) -> SystemTime {
    SystemTime::from(dt.and_utc())
}

/// Current time, as stamped on newly added entries.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn known_dos_value_decodes() {
        // 2008-03-14 13:45:30
        let dt = ymd_hms(2008, 3, 14, 13, 45, 30);
        let packed = datetime_to_dos(&dt);
        assert_eq!(packed, 0x386E_6DAF);
        assert_eq!(dos_to_datetime(packed), dt);
    }

    #[test]
    fn odd_seconds_truncate_to_even() {
        let dt = ymd_hms(2020, 6, 1, 10, 0, 31);
        assert_eq!(dos_to_datetime(datetime_to_dos(&dt)).second(), 30);
    }

    #[test]
    fn out_of_range_years_clamp() {
        let early = ymd_hms(1970, 1, 1, 0, 0, 0);
        assert_eq!(dos_to_datetime(datetime_to_dos(&early)), dos_epoch());

        let late = ymd_hms(2200, 5, 5, 5, 5, 5);
        assert_eq!(dos_to_datetime(datetime_to_dos(&late)), dos_max());
    }

    #[test]
    fn zero_and_invalid_fields_are_clamped() {
        assert_eq!(dos_to_datetime(0), dos_epoch());
        // February 31st, 1999 with hour 31
        let date = (19u32 << 9) | (2 << 5) | 31;
        let time = 31u32 << 11;
        let dt = dos_to_datetime(date << 16 | time);
        assert_eq!((dt.month(), dt.day(), dt.hour()), (2, 28, 23));
    }

    #[test]
    fn filetime_matches_unix_epoch() {
        let epoch = ymd_hms(1970, 1, 1, 0, 0, 0);
        assert_eq!(datetime_to_filetime(&epoch), 116_444_736_000_000_000);
        assert_eq!(filetime_to_datetime(116_444_736_000_000_000), Some(epoch));
    }

    proptest! {
        #[test]
        fn dos_round_trip_within_two_seconds(secs in 315_532_800i64..4_102_444_800i64) {
            let dt = unix_to_datetime(secs).unwrap();
            let back = dos_to_datetime(datetime_to_dos(&dt));
            let diff = dt.and_utc().timestamp() - back.and_utc().timestamp();
            prop_assert!((0..2).contains(&diff));
        }

        #[test]
        fn encoded_dates_always_decode_in_range(secs in -10_000_000_000i64..10_000_000_000i64) {
            let dt = unix_to_datetime(secs).unwrap();
            let back = dos_to_datetime(datetime_to_dos(&dt));
            prop_assert!(back >= dos_epoch() && back <= dos_max());
        }
    }
}
