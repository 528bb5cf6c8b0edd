//! Work-hour entries and the rules for creating and editing them.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Quick-pick hour values offered by the entry form.
pub const QUICK_HOURS: [u32; 3] = [4, 8, 12];

/// Hours pre-filled in a fresh entry form.
pub const DEFAULT_HOURS: u32 = 8;

/// Increment used by the form's +/- buttons (0.5 hours).
pub const HOUR_STEP: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Most hours a single day can hold.
pub const MAX_HOURS: Decimal = Decimal::from_parts(24, 0, 0, false, 0);

/// Message shown when the hours field is not a positive number.
pub const INVALID_HOURS_MESSAGE: &str = "Geçerli bir saat değeri giriniz";

/// One dated record of hours worked (`work_hours` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkHourEntry {
    pub id: String,
    pub user_id: String,
    /// Calendar day, no time-of-day component.
    pub date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    pub hours: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a work-hour entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewWorkHourEntry {
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub hours: Decimal,
    pub description: Option<String>,
}

/// Update payload. Only hours and description are mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkHourPatch {
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub hours: Decimal,
    /// Serialized as `null` when cleared.
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{}", INVALID_HOURS_MESSAGE)]
    InvalidHours,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Hours as submitted by a form: either a JSON number or free text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HoursInput {
    Number(serde_json::Number),
    Text(String),
}

impl HoursInput {
    /// Parse into a decimal in `(0, MAX_HOURS]`.
    ///
    /// Text accepts a comma as decimal separator ("7,5").
    pub fn parse(&self) -> Result<Decimal, ValidationError> {
        let raw = match self {
            HoursInput::Number(n) => n.to_string(),
            HoursInput::Text(s) => s.trim().replace(',', "."),
        };

        let hours = Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|_| ValidationError::InvalidHours)?;

        if hours <= Decimal::ZERO || hours > MAX_HOURS {
            return Err(ValidationError::InvalidHours);
        }

        Ok(hours.normalize())
    }
}

/// Entry creation form.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkHourForm {
    /// Defaults to the current local day when omitted.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub hours: HoursInput,
    #[serde(default)]
    pub description: Option<String>,
}

impl WorkHourForm {
    /// Validate the form into an insert payload owned by `user_id`.
    pub fn into_entry(
        self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<NewWorkHourEntry, ValidationError> {
        if user_id.is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        let hours = self.hours.parse()?;

        Ok(NewWorkHourEntry {
            user_id: user_id.to_string(),
            date: self.date.unwrap_or(today),
            hours,
            description: blank_to_none(self.description),
        })
    }
}

/// Entry edit form.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkHourEdit {
    pub hours: HoursInput,
    #[serde(default)]
    pub description: Option<String>,
}

impl WorkHourEdit {
    pub fn into_patch(self) -> Result<WorkHourPatch, ValidationError> {
        Ok(WorkHourPatch {
            hours: self.hours.parse()?,
            description: blank_to_none(self.description),
        })
    }
}

fn blank_to_none(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[rstest]
    #[case(r#"8"#, "8")]
    #[case(r#"7.5"#, "7.5")]
    #[case(r#""4""#, "4")]
    #[case(r#"" 7,5 ""#, "7.5")]
    #[case(r#""0.50""#, "0.5")]
    #[case(r#""24""#, "24")]
    fn test_hours_parse_accepts_positive_values(#[case] json: &str, #[case] expected: &str) {
        let input: HoursInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.parse().unwrap(), Decimal::from_str(expected).unwrap());
    }

    #[rstest]
    #[case(r#"0"#)]
    #[case(r#"-2"#)]
    #[case(r#""""#)]
    #[case(r#""sekiz""#)]
    #[case(r#""-0.5""#)]
    #[case(r#"24.5"#)]
    #[case(r#""79228162514264337593543950335""#)]
    fn test_hours_parse_rejects_invalid_values(#[case] json: &str) {
        let input: HoursInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.parse(), Err(ValidationError::InvalidHours));
    }

    #[test]
    fn test_invalid_hours_message_is_user_facing() {
        assert_eq!(
            ValidationError::InvalidHours.to_string(),
            "Geçerli bir saat değeri giriniz"
        );
    }

    #[test]
    fn test_form_defaults_date_to_today() {
        let form: WorkHourForm = serde_json::from_str(r#"{"hours": 8}"#).unwrap();
        let entry = form.into_entry("user-1", day("2024-01-20")).unwrap();
        assert_eq!(entry.date, day("2024-01-20"));
        assert_eq!(entry.user_id, "user-1");
        assert!(entry.description.is_none());
    }

    #[test]
    fn test_form_keeps_explicit_date_and_description() {
        let form: WorkHourForm = serde_json::from_str(
            r#"{"date": "2024-01-10", "hours": "6.5", "description": "Raporlama"}"#,
        )
        .unwrap();
        let entry = form.into_entry("user-1", day("2024-01-20")).unwrap();
        assert_eq!(entry.date, day("2024-01-10"));
        assert_eq!(entry.description.as_deref(), Some("Raporlama"));
    }

    #[test]
    fn test_form_empty_description_becomes_null() {
        let form: WorkHourForm =
            serde_json::from_str(r#"{"hours": 8, "description": ""}"#).unwrap();
        let entry = form.into_entry("user-1", day("2024-01-20")).unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["description"].is_null());
        assert_eq!(json["hours"], serde_json::json!(8.0));
        assert_eq!(json["date"], "2024-01-20");
    }

    #[test]
    fn test_form_without_user_is_rejected() {
        let form: WorkHourForm = serde_json::from_str(r#"{"hours": 8}"#).unwrap();
        assert_eq!(
            form.into_entry("", day("2024-01-20")),
            Err(ValidationError::MissingField("user_id"))
        );
    }

    #[test]
    fn test_edit_patch_serializes_cleared_description_as_null() {
        let edit: WorkHourEdit = serde_json::from_str(r#"{"hours": "4"}"#).unwrap();
        let patch = edit.into_patch().unwrap();
        let json = serde_json::to_value(&patch).unwrap();
        assert!(json.as_object().unwrap().contains_key("description"));
        assert!(json["description"].is_null());
    }

    #[test]
    fn test_entry_deserializes_numeric_hours() {
        let json = r#"{
            "id": "e1",
            "created_at": "2024-01-10T09:00:00+00:00",
            "user_id": "user-1",
            "date": "2024-01-10",
            "hours": 7.5,
            "description": null
        }"#;
        let entry: WorkHourEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.hours, Decimal::from_str("7.5").unwrap());
        assert_eq!(entry.date, day("2024-01-10"));
    }

    #[test]
    fn test_hour_step_is_half_an_hour() {
        assert_eq!(HOUR_STEP, Decimal::from_str("0.5").unwrap());
    }
}
