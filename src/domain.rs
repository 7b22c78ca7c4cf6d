use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Languages the Espoo feed is published in. Finnish is the primary
/// language: secondary-language records merge into Finnish ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Fi,
    Sv,
    En,
}

impl Language {
    /// Import order. Finnish must come first so that later language passes
    /// find the primary records already assembled.
    pub const ALL: [Language; 3] = [Language::Fi, Language::Sv, Language::En];

    /// Languages the location registry stores street addresses in.
    pub const ADDRESS_LANGUAGES: [Language; 2] = [Language::Fi, Language::Sv];

    pub fn code(self) -> &'static str {
        match self {
            Language::Fi => "fi",
            Language::Sv => "sv",
            Language::En => "en",
        }
    }

    /// Numeric language id used by the feed.
    pub fn feed_id(self) -> i64 {
        match self {
            Language::Fi => 1,
            Language::En => 2,
            Language::Sv => 3,
        }
    }

    pub fn from_feed_id(id: i64) -> Option<Language> {
        Language::ALL.into_iter().find(|lang| lang.feed_id() == id)
    }

    pub fn is_primary(self) -> bool {
        self == Language::Fi
    }

    /// The language to store a street address under. Falls back to the first
    /// address language when this language has no address translations.
    pub fn address_language(self) -> Language {
        if Self::ADDRESS_LANGUAGES.contains(&self) {
            self
        } else {
            Self::ADDRESS_LANGUAGES[0]
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Per-language text values keyed by language.
pub type LocalizedText = HashMap<Language, String>;

/// An external data provider (the municipal feed, the location registry,
/// the keyword vocabulary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
}

/// Publisher organization for imported records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub origin_id: String,
    pub data_source: String,
    pub name: String,
}

/// Canonical taxonomy term identified by a namespaced id (`source:code`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub data_source: String,
    pub names: LocalizedText,
    pub deprecated: bool,
    /// Replacement for merged or retired terms. Chains must be followed to
    /// a fixed point before the keyword is attached to an event.
    pub replaced_by: Option<String>,
}

/// A physical venue. Places created by this importer belong to the espoo
/// data source; places from the authoritative registry are read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub origin_id: String,
    pub data_source: String,
    pub publisher: Option<String>,
    pub names: LocalizedText,
    pub info_urls: LocalizedText,
    /// Street address per address language.
    pub street_addresses: LocalizedText,
    pub postal_code: Option<String>,
    pub address_locality: Option<String>,
    /// Cached number of events held at this place.
    pub n_events: u64,
    pub deleted: bool,
}

/// Price and ticketing information attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub prices: LocalizedText,
    pub info_urls: LocalizedText,
    pub descriptions: LocalizedText,
    pub is_free: bool,
}

/// Resolved location of an event plus free-text directions per language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLocation {
    pub place_id: String,
    pub extra_info: LocalizedText,
}

/// The unified multilingual event record. One per logical event id;
/// language variants of the same event share a single record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Composite public id, `espoo:<origin_id>`.
    pub id: String,
    pub origin_id: String,
    pub data_source: String,
    pub publisher: String,
    pub names: LocalizedText,
    pub descriptions: LocalizedText,
    pub short_descriptions: LocalizedText,
    pub info_urls: LocalizedText,
    pub providers: LocalizedText,
    /// Canonical feed URL of each language variant.
    pub source_urls: LocalizedText,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub date_published: Option<DateTime<Utc>>,
    pub location: EventLocation,
    pub keywords: BTreeSet<String>,
    /// Demographic subset of `keywords`, tracked as its own facet.
    pub audience: BTreeSet<String>,
    pub offer: Option<Offer>,
    pub image_url: Option<String>,
    pub deleted: bool,
}

/// Bookkeeping record for one importer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Option<Uuid>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub events_processed: Option<u64>,
}
