//! Parse/bound symptom & test dates with timezone tolerance, and
//! canonicalize phone numbers to E.164.

use chrono::{Duration, NaiveDate, Utc};

use crate::errors::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Onset,
    Test,
}

/// Which observability tag a date-parse failure should carry; distinct
/// from the `ErrorCode`, which is the same for both kinds.
impl DateKind {
    pub fn obs_tag(self) -> &'static str {
        match self {
            DateKind::Onset => "FAILED_TO_PROCESS_SYMPTOM_ONSET_DATE",
            DateKind::Test => "FAILED_TO_PROCESS_TEST_DATE",
        }
    }
}

/// Empty input is not an error (`Ok(None)`). Non-empty input must parse as
/// `YYYY-MM-DD` and fall within `[today - allowed_symptom_age, today]`,
/// loosened by one day when the client reports a timezone west of UTC.
pub fn parse_date(
    input: &str,
    tz_offset_minutes: i32,
    allowed_symptom_age_days: i64,
    _kind: DateKind,
) -> Result<Option<NaiveDate>, ErrorCode> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ErrorCode::UnparsableRequest)?;

    let max_date = Utc::now().date_naive();
    let mut min_date = max_date - Duration::days(allowed_symptom_age_days);

    if tz_offset_minutes < 0 {
        min_date -= Duration::days(1);
    }

    if parsed < min_date || parsed > max_date {
        return Err(ErrorCode::InvalidDate);
    }

    Ok(Some(parsed))
}

/// E.164-canonicalizes `phone` against `country_code` (an ISO 3166-1
/// alpha-2 default region, e.g. `"US"`).
pub fn canonical_phone(phone: &str, country_code: &str) -> Result<String, ErrorCode> {
    let region = phonenumber::country::Id::try_from(country_code).ok();
    let parsed =
        phonenumber::parse(region.as_ref(), phone).map_err(|_| ErrorCode::UnparsableRequest)?;
    if !phonenumber::is_valid(&parsed) {
        return Err(ErrorCode::UnparsableRequest);
    }
    Ok(parsed.format().mode(phonenumber::Mode::E164).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_date_is_none() {
        assert_eq!(parse_date("", 0, 14, DateKind::Onset), Ok(None));
    }

    #[test]
    fn today_is_accepted() {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(parse_date(&today, 0, 14, DateKind::Test).unwrap().is_some());
    }

    #[test]
    fn too_far_in_the_past_is_rejected() {
        let ancient = (Utc::now().date_naive() - Duration::days(400))
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(
            parse_date(&ancient, 0, 14, DateKind::Onset),
            Err(ErrorCode::InvalidDate)
        );
    }

    #[test]
    fn future_date_is_rejected() {
        let future = (Utc::now().date_naive() + Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(
            parse_date(&future, 0, 14, DateKind::Test),
            Err(ErrorCode::InvalidDate)
        );
    }

    #[test]
    fn garbage_input_is_unparsable() {
        assert_eq!(
            parse_date("not-a-date", 0, 14, DateKind::Onset),
            Err(ErrorCode::UnparsableRequest)
        );
    }

    #[test]
    fn negative_offset_loosens_the_lower_bound_by_a_day() {
        let boundary = Utc::now().date_naive() - Duration::days(15);
        let s = boundary.format("%Y-%m-%d").to_string();
        assert!(parse_date(&s, 0, 14, DateKind::Onset).is_err());
        assert!(parse_date(&s, -60, 14, DateKind::Onset).is_ok());
    }

    #[test]
    fn canonical_phone_formats_to_e164() {
        let formatted = canonical_phone("206-867-5309", "US").unwrap();
        assert_eq!(formatted, "+12068675309");
    }

    #[test]
    fn canonical_phone_rejects_garbage() {
        assert!(canonical_phone("not a phone", "US").is_err());
    }
}
