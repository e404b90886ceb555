use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifier of a content item in the content repository
pub type ContentId = i64;

/// Interval between scheduler firings of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Yearly,
    Daily,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yearly => "yearly",
            Self::Daily => "daily",
        }
    }

    /// Time added to the firing instant to get the next due time.
    /// A year is a fixed 365 days.
    pub fn period(&self) -> Duration {
        match self {
            Self::Yearly => Duration::days(365),
            Self::Daily => Duration::days(1),
        }
    }
}

impl FromStr for Recurrence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yearly" => Ok(Self::Yearly),
            "daily" => Ok(Self::Daily),
            other => Err(Error::Configuration(format!(
                "unknown recurrence '{}' (expected 'yearly' or 'daily')",
                other
            ))),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far back from the anchor date the cutoff lies.
///
/// Written as a count and a unit suffix: `5y`, `18m`, `30d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RetentionWindow {
    Years(u32),
    Months(u32),
    Days(u32),
}

impl RetentionWindow {
    /// Subtract the window from `date`, calendar-aware for years and months.
    ///
    /// Returns `None` when the result falls outside the representable range.
    pub fn subtract_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Self::Years(n) => date.checked_sub_months(Months::new(n.checked_mul(12)?)),
            Self::Months(n) => date.checked_sub_months(Months::new(n)),
            Self::Days(n) => date.checked_sub_days(Days::new(u64::from(n))),
        }
    }
}

impl FromStr for RetentionWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || {
            Error::Configuration(format!(
                "invalid retention window '{}' (expected e.g. '5y', '18m', '30d')",
                s
            ))
        };

        if s.len() < 2 {
            return Err(invalid());
        }
        let (count, unit) = s.split_at(s.len() - 1);
        let count: u32 = count.parse().map_err(|_| invalid())?;

        match unit {
            "y" | "Y" => Ok(Self::Years(count)),
            "m" | "M" => Ok(Self::Months(count)),
            "d" | "D" => Ok(Self::Days(count)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for RetentionWindow {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RetentionWindow> for String {
    fn from(value: RetentionWindow) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Years(n) => write!(f, "{}y", n),
            Self::Months(n) => write!(f, "{}m", n),
            Self::Days(n) => write!(f, "{}d", n),
        }
    }
}

/// Attribute predicate an item must satisfy to be eligible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub key: String,
    pub value: String,
}

/// Static shape of a policy, as declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub id: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub recurrence: Recurrence,
    pub retention: RetentionWindow,
    #[serde(default)]
    pub filter: Option<AttributeFilter>,
}

fn default_content_type() -> String {
    "media".to_string()
}

/// A recurring unpublish rule with its schedule state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub enabled: bool,
    pub since_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub retention: RetentionWindow,
    pub content_type: String,
    pub content_filter: Option<AttributeFilter>,
    #[serde(default)]
    pub exclusion_list: BTreeSet<ContentId>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// A disabled policy with no schedule state
    pub fn from_definition(def: &PolicyDefinition) -> Self {
        Self {
            policy_id: def.id.clone(),
            enabled: false,
            since_date: None,
            recurrence: def.recurrence,
            retention: def.retention,
            content_type: def.content_type.clone(),
            content_filter: def.filter.clone(),
            exclusion_list: BTreeSet::new(),
            next_due_at: None,
            last_run_at: None,
        }
    }

    /// First due instant after activation: midnight UTC of the since date,
    /// or `now` when no since date is set.
    pub fn activation_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.since_date
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(now)
    }
}

/// Raw configure request as received from the admin surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub enabled: bool,
    #[serde(default)]
    pub since_date: Option<String>,
    #[serde(default)]
    pub recurrence: Option<String>,
}

/// Validated policy changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub enabled: bool,
    pub since_date: Option<NaiveDate>,
    pub recurrence: Option<Recurrence>,
}

impl ConfigureRequest {
    /// Validate all fields; nothing is applied if any field is malformed
    pub fn validate(&self) -> Result<PolicyUpdate> {
        let since_date = match self.since_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                Error::Configuration(format!("malformed since date '{}': {}", raw, e))
            })?),
        };

        let recurrence = match self.recurrence.as_deref() {
            None => None,
            Some(raw) => Some(raw.parse::<Recurrence>()?),
        };

        Ok(PolicyUpdate {
            enabled: self.enabled,
            since_date,
            recurrence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_retention_parse_and_display() {
        assert_eq!("5y".parse::<RetentionWindow>().unwrap(), RetentionWindow::Years(5));
        assert_eq!("18m".parse::<RetentionWindow>().unwrap(), RetentionWindow::Months(18));
        assert_eq!(" 30d ".parse::<RetentionWindow>().unwrap(), RetentionWindow::Days(30));
        assert_eq!(RetentionWindow::Years(2).to_string(), "2y");
        assert!("y".parse::<RetentionWindow>().is_err());
        assert!("5w".parse::<RetentionWindow>().is_err());
        assert!("-5y".parse::<RetentionWindow>().is_err());
    }

    #[test]
    fn test_retention_subtract() {
        assert_eq!(
            RetentionWindow::Years(5).subtract_from(date(2025, 1, 1)),
            Some(date(2020, 1, 1))
        );
        // Leap day clamps to the end of February
        assert_eq!(
            RetentionWindow::Years(1).subtract_from(date(2024, 2, 29)),
            Some(date(2023, 2, 28))
        );
        assert_eq!(
            RetentionWindow::Days(1).subtract_from(date(2025, 3, 1)),
            Some(date(2025, 2, 28))
        );
        assert_eq!(RetentionWindow::Years(u32::MAX).subtract_from(date(2025, 1, 1)), None);
    }

    #[test]
    fn test_recurrence_parse() {
        assert_eq!("Yearly".parse::<Recurrence>().unwrap(), Recurrence::Yearly);
        assert_eq!("daily".parse::<Recurrence>().unwrap(), Recurrence::Daily);
        assert!(matches!("weekly".parse::<Recurrence>(), Err(Error::Configuration(_))));
        assert_eq!(Recurrence::Yearly.period(), Duration::days(365));
    }

    #[test]
    fn test_configure_request_validation() {
        let update = ConfigureRequest {
            enabled: true,
            since_date: Some("2025-01-01".into()),
            recurrence: Some("daily".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(update.since_date, Some(date(2025, 1, 1)));
        assert_eq!(update.recurrence, Some(Recurrence::Daily));

        let bad_date = ConfigureRequest {
            enabled: true,
            since_date: Some("01/01/2025".into()),
            recurrence: None,
        };
        assert!(matches!(bad_date.validate(), Err(Error::Configuration(_))));

        let bad_recurrence = ConfigureRequest {
            enabled: false,
            since_date: None,
            recurrence: Some("hourly".into()),
        };
        assert!(matches!(bad_recurrence.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_definition_from_toml() {
        let def: PolicyDefinition = toml::from_str(
            r#"
            id = "two-years"
            recurrence = "daily"
            retention = "2y"
            filter = { key = "gated_content_disclaimer", value = "1" }
            "#,
        )
        .unwrap();
        assert_eq!(def.content_type, "media");
        assert_eq!(def.retention, RetentionWindow::Years(2));

        let policy = Policy::from_definition(&def);
        assert!(!policy.enabled);
        assert_eq!(policy.content_filter.unwrap().key, "gated_content_disclaimer");
    }

    #[test]
    fn test_activation_time() {
        let now = Utc::now();
        let mut policy = Policy::from_definition(&PolicyDefinition {
            id: "p".into(),
            content_type: "media".into(),
            recurrence: Recurrence::Daily,
            retention: RetentionWindow::Days(1),
            filter: None,
        });
        assert_eq!(policy.activation_time(now), now);

        policy.since_date = Some(date(2025, 1, 1));
        assert_eq!(
            policy.activation_time(now).to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
    }
}
