//! DDMMYY day codec and day-file naming.
//!
//! A day code packs a UTC calendar date into one integer:
//! `day·10000 + month·100 + (year − 2000)`, rendered zero-padded to six
//! digits in file names: `<set>.<DDMMYY>.dat`.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

pub const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

const FILE_EXT: &str = ".dat";

/// DDMMYY code for the UTC day containing `ts`.
pub fn day_code(ts: i64) -> Option<u32> {
    let date = DateTime::<Utc>::from_timestamp(ts, 0)?.date_naive();
    let year = date.year();
    if !(2000..2100).contains(&year) {
        return None;
    }
    Some(date.day() * 10000 + date.month() * 100 + (year as u32 - 2000))
}

/// Epoch of 00:00:00 UTC on the day encoded by `code`.
pub fn day_epoch(code: u32) -> Option<i64> {
    let day = code / 10000;
    let month = (code / 100) % 100;
    let year = 2000 + (code % 100) as i32;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// Epoch of 00:00:00 UTC on the day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(SECONDS_PER_DAY)
}

/// File name of one day of a series: `<set>.<DDMMYY>.dat`.
pub fn file_name(set: &str, code: u32) -> String {
    format!("{set}.{code:06}{FILE_EXT}")
}

/// Split a day-file name back into `(set, code)`.
///
/// Anything that is not `<set>.<digits>.dat` returns `None`.
pub fn parse_file_name(name: &str) -> Option<(&str, u32)> {
    let stem = name.strip_suffix(FILE_EXT)?;
    let (set, code) = stem.rsplit_once('.')?;
    if set.is_empty() || code.is_empty() {
        return None;
    }
    let code: u32 = code.parse().ok()?;
    if code == 0 {
        return None;
    }
    Some((set, code))
}
