//! Identifiers and policy constants shared across the importer.

/// Data source id under which imported events and synthesized places are stored.
pub const ESPOO_DATA_SOURCE: &str = "espoo";
pub const ESPOO_DATA_SOURCE_NAME: &str = "City of Espoo";

/// Authoritative location registry, preferred over espoo-created places.
pub const TPREK_DATA_SOURCE: &str = "tprek";

/// Canonical keyword vocabulary.
pub const YSO_DATA_SOURCE: &str = "yso";

/// Publisher organization for all imported events.
pub const PUBLISHER_ORIGIN_ID: &str = "kaupunki";
pub const PUBLISHER_NAME: &str = "Espoon kaupunki";

pub const DEFAULT_BASE_URL: &str = "http://www.espoo.fi";

/// Maximum number of attempts to fetch a feed page before giving up.
pub const MAX_RETRY: u32 = 5;

/// Fixed pause between retries, in seconds. No exponential backoff.
pub const RETRY_DELAY_SECS: u64 = 5;

/// Events that ended more than this many days ago are not imported.
pub const RETENTION_DAYS: i64 = 31;

/// Feed node type denoting online presence; carries no taxonomy value.
pub const ONLINE_PRESENCE_NODE_TYPE: i64 = 12;

/// Mass-deletion guard: the delete phase aborts when more than
/// `DELETE_GUARD_MIN` objects would be deleted and they exceed
/// `DELETE_GUARD_RATIO` of the reconciliation target set.
pub const DELETE_GUARD_MIN: usize = 5;
pub const DELETE_GUARD_RATIO: f64 = 0.2;

/// Feed URL for the first page of a language's event listing.
pub fn feed_url(base_url: &str, feed_language_id: i64) -> String {
    format!(
        "{}/api/opennc/v1/ContentLanguages({})/Contents?$filter=TemplateId eq 58\
         &$expand=ExtendedProperties,LanguageVersions&$orderby=EventEndDate desc&$format=json",
        base_url, feed_language_id
    )
}

/// Absolute URL for a relative `odata.nextLink` value.
pub fn next_page_url(base_url: &str, next_link: &str) -> String {
    format!("{}/api/opennc/v1/{}&$format=json", base_url, next_link)
}

/// Canonical source URL of a single feed record.
pub fn content_url(base_url: &str, content_id: i64) -> String {
    format!("{}/api/opennc/v1/Contents({})", base_url, content_id)
}
