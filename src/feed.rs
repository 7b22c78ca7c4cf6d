//! Wire types for the paginated event feed. Pages carry a `value` array of
//! records plus an optional `odata.nextLink`; scalar ids arrive as either
//! JSON numbers or strings, so they get a tolerant decoder.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// One page of the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub value: Vec<FeedRecord>,
    #[serde(rename = "odata.nextLink")]
    pub next_link: Option<String>,
}

/// One language variant of one source event.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRecord {
    #[serde(rename = "ContentId", deserialize_with = "scalar_id")]
    pub content_id: i64,
    #[serde(rename = "EventStartDate")]
    pub event_start_date: String,
    #[serde(rename = "EventEndDate")]
    pub event_end_date: String,
    #[serde(rename = "PublicDate")]
    pub public_date: Option<String>,
    #[serde(rename = "ExtendedProperties", default)]
    pub extended_properties: Vec<ExtendedProperty>,
    #[serde(rename = "Classifications", default)]
    pub classifications: Vec<Classification>,
    #[serde(rename = "LanguageVersions", default)]
    pub language_versions: Vec<LanguageVersion>,
}

/// Typed name/value entry. Exactly one of the value columns is populated.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedProperty {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Text")]
    pub text: Option<String>,
    #[serde(rename = "Number")]
    pub number: Option<serde_json::Value>,
    #[serde(rename = "Date")]
    pub date: Option<String>,
}

/// Classification node attached to a record.
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    #[serde(rename = "NodeId", deserialize_with = "scalar_id")]
    pub node_id: i64,
    #[serde(rename = "NodeName")]
    pub node_name: String,
    #[serde(rename = "Type", deserialize_with = "scalar_id")]
    pub node_type: i64,
}

/// Cross-reference to a sibling language variant of the same logical event.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageVersion {
    #[serde(rename = "ContentId", deserialize_with = "scalar_id")]
    pub content_id: i64,
    #[serde(rename = "LanguageId", deserialize_with = "scalar_id")]
    pub language_id: i64,
}

impl FeedRecord {
    /// Collapse the extended properties into `name -> value` pairs, taking
    /// the first populated value column of each property. Later duplicates
    /// of a name do not overwrite earlier ones.
    pub fn extended_properties(&self) -> HashMap<String, String> {
        let mut props = HashMap::new();
        for prop in &self.extended_properties {
            let value = prop
                .text
                .clone()
                .filter(|text| !text.is_empty())
                .or_else(|| {
                    prop.number.as_ref().and_then(|number| match number {
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                        _ => None,
                    })
                })
                .or_else(|| prop.date.clone().filter(|date| !date.is_empty()));
            if let Some(value) = value {
                props.entry(prop.name.clone()).or_insert(value);
            }
        }
        props
    }

    /// Content ids of this record's sibling variants in the given feed language.
    pub fn sibling_ids(&self, feed_language_id: i64) -> Vec<i64> {
        self.language_versions
            .iter()
            .filter(|version| version.language_id == feed_language_id)
            .map(|version| version.content_id)
            .collect()
    }
}

/// Accept ids encoded as numbers or numeric strings.
fn scalar_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Number(i64),
        Text(String),
    }

    match Scalar::deserialize(deserializer)? {
        Scalar::Number(id) => Ok(id),
        Scalar::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_parses_with_string_ids() {
        let json = r#"{
            "value": [{
                "ContentId": "42",
                "EventStartDate": "2026-08-01T10:00:00",
                "EventEndDate": "2026-08-01T12:00:00",
                "PublicDate": "2026-07-01T00:00:00",
                "ExtendedProperties": [
                    {"Name": "name", "Text": "Konsertti", "Number": null, "Date": null},
                    {"Name": "Price", "Text": null, "Number": 12, "Date": null}
                ],
                "Classifications": [
                    {"NodeId": 15325, "NodeName": "Musiikki", "Type": 1}
                ],
                "LanguageVersions": [
                    {"ContentId": 43, "LanguageId": 3}
                ]
            }],
            "odata.nextLink": "Contents?$skiptoken=2"
        }"#;
        let page: FeedPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("Contents?$skiptoken=2"));

        let record = &page.value[0];
        assert_eq!(record.content_id, 42);
        let props = record.extended_properties();
        assert_eq!(props.get("name").map(String::as_str), Some("Konsertti"));
        assert_eq!(props.get("Price").map(String::as_str), Some("12"));
        assert_eq!(record.sibling_ids(3), vec![43]);
        assert!(record.sibling_ids(2).is_empty());
    }

    #[test]
    fn empty_property_columns_are_skipped() {
        let json = r#"{
            "Name": "URL", "Text": "", "Number": null, "Date": null
        }"#;
        let prop: ExtendedProperty = serde_json::from_str(json).unwrap();
        let record = FeedRecord {
            content_id: 1,
            event_start_date: String::new(),
            event_end_date: String::new(),
            public_date: None,
            extended_properties: vec![prop],
            classifications: vec![],
            language_versions: vec![],
        };
        assert!(record.extended_properties().is_empty());
    }
}
