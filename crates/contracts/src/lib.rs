use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod distribution;

pub use distribution::{TypeCount, TypeDistribution};

/// Columns every upload must carry, in the order they are reported to clients.
pub const REQUIRED_COLUMNS: [&str; 4] = ["Type", "Flowrate", "Pressure", "Temperature"];

/// Human-readable timestamp layout used by history entries and the PDF report.
pub const UPLOADED_AT_FORMAT: &str = "%d %b %Y, %I:%M %p UTC";

pub fn format_uploaded_at(at: &DateTime<Utc>) -> String {
    at.format(UPLOADED_AT_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRow {
    #[serde(rename = "type")]
    pub equipment_type: String,
    pub flowrate: f64,
    pub pressure: f64,
    pub temperature: f64,
}

/// Aggregated statistics for one upload, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_equipment: u64,
    pub average_flowrate: f64,
    pub average_pressure: f64,
    pub average_temperature: f64,
    pub equipment_type_distribution: TypeDistribution,
}

impl SummaryStats {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.total_equipment == 0 {
            return Err("total_equipment must be positive");
        }
        if !self.average_flowrate.is_finite()
            || !self.average_pressure.is_finite()
            || !self.average_temperature.is_finite()
        {
            return Err("averages must be finite");
        }
        if self.equipment_type_distribution.total() != self.total_equipment {
            return Err("distribution counts must sum to total_equipment");
        }
        Ok(())
    }
}

/// A persisted summary. Identity and timestamp are assigned by the store at insert.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub stats: SummaryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub uploaded_at: String,
    #[serde(flatten)]
    pub stats: SummaryStats,
}

impl From<&UploadSummary> for HistoryEntry {
    fn from(summary: &UploadSummary) -> Self {
        Self {
            id: summary.id,
            uploaded_at: format_uploaded_at(&summary.created_at),
            stats: summary.stats.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats() -> SummaryStats {
        SummaryStats {
            total_equipment: 3,
            average_flowrate: 35.0 / 3.0,
            average_pressure: 5.0,
            average_temperature: 20.0,
            equipment_type_distribution: TypeDistribution::from_entries(vec![
                TypeCount::new("Pump", 2),
                TypeCount::new("Valve", 1),
            ])
            .expect("distribution should be valid"),
        }
    }

    #[test]
    fn uploaded_at_uses_fixed_twelve_hour_layout() {
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(format_uploaded_at(&at), "05 Mar 2026, 02:07 PM UTC");
    }

    #[test]
    fn stats_validate_rejects_distribution_total_mismatch() {
        let mut stats = stats();
        stats.total_equipment = 4;
        assert_eq!(
            stats.validate().unwrap_err(),
            "distribution counts must sum to total_equipment"
        );
    }

    #[test]
    fn stats_validate_accepts_consistent_summary() {
        stats().validate().expect("summary should be consistent");
    }

    #[test]
    fn history_entry_serializes_flat_with_ordered_distribution() {
        let summary = UploadSummary {
            id: 7,
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            stats: stats(),
        };
        let entry = HistoryEntry::from(&summary);
        let text = serde_json::to_string(&entry).expect("entry should serialize");

        assert!(text.contains(r#""uploaded_at":"02 Jan 2026, 03:04 AM UTC""#));
        assert!(text.contains(r#""equipment_type_distribution":{"Pump":2,"Valve":1}"#));

        let back: HistoryEntry = serde_json::from_str(&text).expect("entry should parse");
        assert_eq!(back, entry);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
