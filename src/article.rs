use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Labels;
use crate::db::RawRecord;

const PLACEHOLDER_HEADLINE: &str =
    "Lorem Ipsum is simply dummy text of the printing and typesetting industry.";

/// A news article as stored in a category collection.
///
/// The identifier is assigned by the document store and injected as `id`
/// before decoding, so documents never carry it themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub headline: String,
    pub author: String,
    pub lead: String,
    pub body: String,
    pub tail: String,
    pub category: String,
    pub breaking_news: bool,
    pub news_of_the_day: bool,
    /// Seconds since epoch
    pub created_at: f64,
}

impl Article {
    /// Decode a raw store record, attaching the store-assigned identifier.
    pub fn from_record(record: &RawRecord) -> Result<Self, serde_json::Error> {
        let mut fields = record.fields.clone();
        fields.insert(
            "id".to_string(),
            serde_json::Value::String(record.id.clone()),
        );
        serde_json::from_value(serde_json::Value::Object(fields))
    }

    /// Stand-in shown while real articles are loading
    pub fn placeholder() -> Self {
        Self {
            id: "demo".to_string(),
            headline: PLACEHOLDER_HEADLINE.to_string(),
            author: "Alex P.".to_string(),
            lead: String::new(),
            body: String::new(),
            tail: String::new(),
            category: String::new(),
            breaking_news: false,
            news_of_the_day: true,
            created_at: 0.0,
        }
    }

    pub fn byline(&self) -> String {
        format!("by {}", self.author)
    }

    /// Label for the header view: breaking news wins over news of the day,
    /// which wins over the plain category.
    pub fn news_type<'a>(&'a self, labels: &'a Labels) -> &'a str {
        if self.breaking_news {
            &labels.breaking_news
        } else if self.news_of_the_day {
            &labels.news_of_the_day
        } else {
            &self.category
        }
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        let secs = self.created_at.floor();
        let nanos = ((self.created_at - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }

    /// Relative age such as `2h ago`, measured against `now`.
    pub fn time_ago(&self, now: DateTime<Utc>) -> String {
        match self.created() {
            Some(created) => format_time_ago(created, now),
            None => String::new(),
        }
    }
}

/// Largest non-zero unit wins. Future timestamps yield an empty string.
pub fn format_time_ago(from: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    let elapsed = (now - from).num_seconds();
    let units = [
        (YEAR, "y"),
        (MONTH, "mo"),
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (1, "s"),
    ];

    units
        .iter()
        .find(|(size, _)| elapsed / size > 0)
        .map(|(size, unit)| format!("{}{} ago", elapsed / size, unit))
        .unwrap_or_default()
}

/// Kind of image attached to an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Hero,
    Body,
}

impl ImageKind {
    pub const ALL: [ImageKind; 2] = [ImageKind::Hero, ImageKind::Body];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Hero => "hero",
            ImageKind::Body => "body",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hero" => Some(ImageKind::Hero),
            "body" => Some(ImageKind::Body),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort newest first. Stable, so equal timestamps keep their input order.
pub fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
}
