pub mod athena;
pub mod cache;
pub mod correction;
pub mod prompt;
pub mod schema;
pub mod shape;
pub mod tenancy;
pub mod validator;

use chrono::{FixedOffset, NaiveDate, Utc};

/// "Today" in the service's configured zone, fixed at request entry.
/// Every downstream comparison uses the resulting ISO date.
pub fn today_with_offset(utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    Utc::now().with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_today_with_offset_stays_near_utc() {
        let utc_today = Utc::now().date_naive();
        for minutes in [-12 * 60, 0, 7 * 60, 14 * 60] {
            let local = today_with_offset(minutes);
            let diff = (local - utc_today).num_days().abs();
            assert!(diff <= 1, "offset {} gave {} vs {}", minutes, local, utc_today);
        }
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        // FixedOffset rejects offsets beyond ±24h.
        assert_eq!(today_with_offset(30 * 60), today_with_offset(0));
    }
}
