use bigdecimal::BigDecimal;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod bus;
pub mod error;
pub mod template;

pub use error::{BackendError, ExecutionCause, SummaryError};

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "AWS-local")]
    AwsLocal,
    #[serde(rename = "Azure")]
    Azure,
    #[serde(rename = "Azure-local")]
    AzureLocal,
    #[serde(rename = "GCP")]
    Gcp,
    #[serde(rename = "GCP-local")]
    GcpLocal,
    #[serde(rename = "OCI")]
    Oci,
    #[serde(rename = "OCI-local")]
    OciLocal,
    #[serde(rename = "OCP")]
    Ocp,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Aws => "AWS",
            ProviderType::AwsLocal => "AWS-local",
            ProviderType::Azure => "Azure",
            ProviderType::AzureLocal => "Azure-local",
            ProviderType::Gcp => "GCP",
            ProviderType::GcpLocal => "GCP-local",
            ProviderType::Oci => "OCI",
            ProviderType::OciLocal => "OCI-local",
            ProviderType::Ocp => "OCP",
        }
    }

    /// Case-insensitive parse of the provider type tag stored with each source.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [
            ProviderType::Aws,
            ProviderType::AwsLocal,
            ProviderType::Azure,
            ProviderType::AzureLocal,
            ProviderType::Gcp,
            ProviderType::GcpLocal,
            ProviderType::Oci,
            ProviderType::OciLocal,
            ProviderType::Ocp,
        ]
        .into_iter()
        .find(|p| p.as_str().eq_ignore_ascii_case(s))
    }

    /// The non-local flavour of this provider. Local sources share tables with the real provider.
    pub fn base(&self) -> ProviderType {
        match self {
            ProviderType::AwsLocal => ProviderType::Aws,
            ProviderType::AzureLocal => ProviderType::Azure,
            ProviderType::GcpLocal => ProviderType::Gcp,
            ProviderType::OciLocal => ProviderType::Oci,
            other => *other,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which container metric drives cost attribution in overlay summaries.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Cpu,
    Memory,
}

impl Distribution {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("memory") => Distribution::Memory,
            _ => Distribution::Cpu,
        }
    }

    pub fn pod_column(&self) -> &'static str {
        match self {
            Distribution::Cpu => "pod_effective_usage_cpu_core_hours",
            Distribution::Memory => "pod_effective_usage_memory_gigabyte_hours",
        }
    }

    pub fn node_column(&self) -> &'static str {
        match self {
            Distribution::Cpu => "node_capacity_cpu_core_hours",
            Distribution::Memory => "node_capacity_memory_gigabyte_hours",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Plain,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Gzip => "GZIP",
            Compression::Plain => "PLAIN",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, SummaryError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GZIP" => Ok(Compression::Gzip),
            "PLAIN" => Ok(Compression::Plain),
            other => Err(SummaryError::Configuration(format!(
                "Compression {} is not supported.",
                other
            ))),
        }
    }
}

// --- Billing periods & dates ---

/// One billing cycle (calendar month).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    pub year: i32,
    pub month: u32,
}

impl BillingPeriod {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn end(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|next| next - Duration::days(1))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Four digit year, as used in partition values.
    pub fn year_str(&self) -> String {
        format!("{:04}", self.year)
    }

    /// Zero-padded month ("03"), as used in partition values.
    pub fn month_str(&self) -> String {
        format!("{:02}", self.month)
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Every calendar day in `[start, end]`, inclusive. Empty when `end < start`.
pub fn list_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

// --- Entities ---

/// One ingestion attempt for a provider's billing period.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub id: i64,
    pub provider_uuid: Uuid,
    pub billing_period_start: NaiveDate,
    pub ready_for_summary: bool,
}

impl Manifest {
    pub fn billing_period(&self) -> BillingPeriod {
        BillingPeriod::from_date(self.billing_period_start)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CostEntryBill {
    pub id: i64,
    pub provider_uuid: Uuid,
    pub billing_period_start: NaiveDate,
}

/// Tag mapping with case-insensitive unique keys.
///
/// The first spelling of a key wins; later inserts under a differently-cased key replace the value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct TagMap(BTreeMap<String, String>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let existing = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&key))
            .cloned();
        self.0.insert(existing.unwrap_or(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Build from a JSON object (or a JSON-encoded object string). Non-string values are stringified.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = match value {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::String(s) => match serde_json::from_str(s).ok()? {
                serde_json::Value::Object(map) => map,
                _ => return None,
            },
            _ => return None,
        };
        let mut tags = TagMap::new();
        for (k, v) in object {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            tags.insert(k, v);
        }
        Some(tags)
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagMap::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

/// Multiplicative markup applied on top of base provider cost (0.10 == 10%).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupRate(BigDecimal);

impl MarkupRate {
    pub fn zero() -> Self {
        Self(BigDecimal::from(0))
    }

    pub fn from_fraction(rate: BigDecimal) -> Self {
        Self(rate)
    }

    /// Cost models store markup as a percentage.
    pub fn from_percent(percent: &BigDecimal) -> Self {
        Self(percent / &BigDecimal::from(100))
    }

    pub fn parse_percent(raw: &str) -> Option<Self> {
        BigDecimal::from_str(raw.trim())
            .ok()
            .map(|p| Self::from_percent(&p))
    }

    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    /// Markup cost for a base cost: always `base * rate`, never accumulated.
    pub fn apply(&self, base_cost: &BigDecimal) -> BigDecimal {
        base_cost * &self.0
    }
}

impl Default for MarkupRate {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for MarkupRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn provider_type_parse_roundtrip() {
        for p in [
            ProviderType::Aws,
            ProviderType::AzureLocal,
            ProviderType::Gcp,
            ProviderType::Oci,
            ProviderType::Ocp,
        ] {
            assert_eq!(ProviderType::parse(p.as_str()), Some(p));
            assert_eq!(ProviderType::parse(&p.as_str().to_lowercase()), Some(p));
        }
        assert_eq!(ProviderType::parse("IBM"), None);
        assert_eq!(ProviderType::AzureLocal.base(), ProviderType::Azure);
    }

    #[test]
    fn billing_period_bounds() {
        let feb = BillingPeriod::from_date(d(2024, 2, 17));
        assert_eq!(feb.start(), d(2024, 2, 1));
        assert_eq!(feb.end(), d(2024, 2, 29));
        assert_eq!(feb.month_str(), "02");
        assert_eq!(feb.year_str(), "2024");

        let dec = BillingPeriod { year: 2023, month: 12 };
        assert_eq!(dec.end(), d(2023, 12, 31));
        assert!(dec.contains(d(2023, 12, 5)));
        assert!(!dec.contains(d(2024, 12, 5)));
    }

    #[test]
    fn list_days_is_inclusive() {
        let days = list_days(d(2023, 7, 30), d(2023, 8, 2));
        assert_eq!(
            days,
            vec![d(2023, 7, 30), d(2023, 7, 31), d(2023, 8, 1), d(2023, 8, 2)]
        );
        assert_eq!(list_days(d(2023, 7, 3), d(2023, 7, 3)).len(), 1);
        assert!(list_days(d(2023, 7, 3), d(2023, 7, 2)).is_empty());
    }

    #[test]
    fn tag_map_keys_are_case_insensitive() {
        let mut tags = TagMap::new();
        tags.insert("App", "web");
        tags.insert("app", "api");
        tags.insert("tier", "db");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("APP"), Some("api"));
        assert_eq!(tags.iter().next().map(|(k, _)| k.as_str()), Some("App"));

        let parsed = TagMap::from_json(&serde_json::json!("{\"env\": \"prod\"}")).unwrap();
        assert_eq!(parsed.get("env"), Some("prod"));
        assert!(TagMap::from_json(&serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn markup_is_recomputed_from_base() {
        let base = BigDecimal::from_str("100.00").unwrap();
        let ten = MarkupRate::parse_percent("10").unwrap();
        let fifteen = MarkupRate::parse_percent("15").unwrap();

        assert_eq!(ten.apply(&base), BigDecimal::from_str("10.00").unwrap());
        assert_eq!(ten.apply(&base), ten.apply(&base));
        assert_eq!(fifteen.apply(&base), BigDecimal::from_str("15").unwrap());
        assert_eq!(MarkupRate::zero().apply(&base), BigDecimal::from(0));
    }

    #[test]
    fn compression_rejects_unknown_formats() {
        assert_eq!(Compression::parse("gzip").unwrap(), Compression::Gzip);
        assert_eq!(Compression::parse("PLAIN").unwrap(), Compression::Plain);
        assert!(matches!(
            Compression::parse("zip"),
            Err(SummaryError::Configuration(_))
        ));
    }

    #[test]
    fn distribution_columns() {
        assert_eq!(Distribution::parse(None), Distribution::Cpu);
        assert_eq!(Distribution::parse(Some("Memory")), Distribution::Memory);
        assert_eq!(
            Distribution::Memory.pod_column(),
            "pod_effective_usage_memory_gigabyte_hours"
        );
        assert_eq!(Distribution::Cpu.node_column(), "node_capacity_cpu_core_hours");
    }
}
