#![allow(dead_code)]

pub use etldag_test_utils::*;

use chrono::{DateTime, TimeZone, Utc};

/// `2020-03-03T<hour>:00:00Z`, the logical dates most tests use.
pub fn hour(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 3, 3, h, 0, 0).unwrap()
}

/// A fixed UTC timestamp.
pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}
