//! Indicator Record Data Structure
//!
//! This module defines [`IndicatorRecord`], the unit of data flowing through
//! every path of the system: broker payloads decode into it, batches are
//! vectors of it, and the RPC surface converts to and from it.
//!
//! ## Structure
//! - **id**: opaque identity string. Uniqueness is not enforced here.
//! - **source**: the feed the indicator came from (e.g. `otx`, `abuse.ch`)
//! - **first_seen / last_seen**: optional timestamps. `None` is a valid
//!   value and must survive every conversion as `None`, never as the epoch.
//! - **ioc_type**: indicator kind (`ip`, `domain`, `sha256`, ...), serialized
//!   as `type`
//! - **value**: the indicator itself
//! - **tags**: ordered labels
//! - **additional_data**: free-form string attributes
//!
//! ## Normalization
//! Source, type, value and every tag are lowercased before persistence.
//! The id, timestamps and additional data are left untouched. Applying
//! [`IndicatorRecord::normalize`] twice yields the same record as applying
//! it once.
//!
//! ## Example
//! ```ignore
//! let record = IndicatorRecord::new("42", "OTX", "Domain", "Evil.Example")
//!     .with_tags(["Phishing"])
//!     .normalized();
//! assert_eq!(record.value, "evil.example");
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single indicator of compromise.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub id: String,

    pub source: String,

    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(rename = "type")]
    pub ioc_type: String,

    pub value: String,

    /// Producers may send `null` for an empty list.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub additional_data: HashMap<String, String>,
}

impl IndicatorRecord {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        ioc_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            ioc_type: ioc_type.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seen(
        mut self,
        first_seen: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Self {
        self.first_seen = first_seen;
        self.last_seen = last_seen;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    /// Lowercase source, type, value and each tag in place.
    pub fn normalize(&mut self) {
        self.source = self.source.to_lowercase();
        self.ioc_type = self.ioc_type.to_lowercase();
        self.value = self.value.to_lowercase();
        for tag in &mut self.tags {
            *tag = tag.to_lowercase();
        }
    }

    /// Consuming form of [`normalize`](Self::normalize).
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Substring match used by page and stream reads.
    ///
    /// Checks id, source, type, value and each tag. Matching is
    /// case-sensitive against the stored (already normalized) fields.
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.id.contains(filter)
            || self.source.contains(filter)
            || self.ioc_type.contains(filter)
            || self.value.contains(filter)
            || self.tags.iter().any(|t| t.contains(filter))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An ordered group of records written in a single storage transaction.
pub type Batch = Vec<IndicatorRecord>;

/// Record count keyed by indicator type.
pub type TypeCounts = HashMap<String, i64>;

/// Record count keyed by source.
pub type SourceCounts = HashMap<String, i64>;

/// Per-source breakdown of record counts by type.
pub type TypesBySource = HashMap<String, TypeCounts>;

/// A page query over stored records.
///
/// `limit` and `offset` are passed to storage as given; nothing here
/// validates or clamps them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadRequest {
    pub limit: u64,
    pub offset: u64,
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoadRequest {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit,
            offset,
            filter: None,
        }
    }

    /// Attach a filter. Empty strings mean "no filter".
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.is_empty() { None } else { Some(filter) };
        self
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}
