use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use time::{OffsetDateTime, UtcOffset};

pub fn localized_datetime(time: OffsetDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    let utc = time.to_offset(UtcOffset::UTC);
    let datetime_utc = DateTime::<Utc>::from_timestamp(utc.unix_timestamp(), utc.nanosecond())?;
    Some(tz.from_utc_datetime(&datetime_utc.naive_utc()))
}

/// Wall-clock hour (0..=23) of `time` in `tz`.
///
/// Falls back to the UTC hour for timestamps chrono cannot represent.
pub fn local_hour(time: OffsetDateTime, tz: Tz) -> u32 {
    localized_datetime(time, tz)
        .map(|local| local.hour())
        .unwrap_or_else(|| u32::from(time.to_offset(UtcOffset::UTC).hour()))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn local_hour_applies_zone_offset() {
        let instant = datetime!(2026-01-15 08:30 UTC);
        assert_eq!(local_hour(instant, Tz::UTC), 8);
        assert_eq!(local_hour(instant, chrono_tz::Europe::Berlin), 9);
        assert_eq!(local_hour(instant, chrono_tz::America::New_York), 3);
    }

    #[test]
    fn local_hour_follows_daylight_saving() {
        let summer = datetime!(2026-07-15 08:30 UTC);
        assert_eq!(local_hour(summer, chrono_tz::Europe::Berlin), 10);
    }

    #[test]
    fn local_hour_normalizes_non_utc_input() {
        let instant = datetime!(2026-01-15 12:00 +03:00);
        assert_eq!(local_hour(instant, Tz::UTC), 9);
    }
}
