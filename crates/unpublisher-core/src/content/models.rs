use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{AttributeFilter, ContentId};
use crate::{Error, Result};

/// Publication status of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Published,
    Draft,
    Unpublished,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Draft => "draft",
            Self::Unpublished => "unpublished",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "published" => Ok(Self::Published),
            "draft" => Ok(Self::Draft),
            "unpublished" => Ok(Self::Unpublished),
            other => Err(Error::Other(format!("unknown content status '{}'", other))),
        }
    }
}

/// A content item as stored in the bundled content repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub content_type: String,
    pub status: ContentStatus,
    #[serde(default)]
    pub title: Option<String>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Eligibility criteria for one selection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub content_type: String,
    /// Inclusive by calendar day
    pub modified_on_or_before: NaiveDate,
    pub filter: Option<AttributeFilter>,
    pub exclude: BTreeSet<ContentId>,
}

impl CandidateQuery {
    /// Whether an item satisfies the query; mirrors what repositories must filter
    pub fn matches(&self, item: &ContentItem) -> bool {
        item.status == ContentStatus::Published
            && item.content_type == self.content_type
            && item.modified_at.date_naive() <= self.modified_on_or_before
            && !self.exclude.contains(&item.id)
            && self.filter.as_ref().map_or(true, |filter| {
                item.attributes.get(&filter.key) == Some(&filter.value)
            })
    }
}
