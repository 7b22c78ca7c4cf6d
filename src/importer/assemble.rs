//! Folds raw per-language feed records into unified multilingual events.
//! Finnish records create the entries; Swedish and English records merge
//! into them when the sibling cross-reference and the exact start/end
//! times line up, and fork into separate entries otherwise.

use crate::constants::{self, ONLINE_PRESENCE_NODE_TYPE};
use crate::domain::{Event, EventLocation, Language, LocalizedText, Offer};
use crate::error::{ImporterError, Result};
use crate::feed::FeedRecord;
use crate::importer::fetch::{RecordSink, TimeWindow};
use crate::importer::keywords::{self, KeywordMapper};
use crate::importer::places::PlaceResolver;
use crate::storage::Storage;
use crate::text;
use async_trait::async_trait;
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Europe::Helsinki;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Free-admission phrases the feed uses in its price field.
const FREE_ADMISSION_PREFIXES: [&str; 2] = ["Vapaa pääsy", "Fritt inträde"];

/// Accumulates one logical event across language passes. Every field is an
/// explicit slot: nothing is created implicitly on access.
struct EventBuilder {
    origin_id: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    date_published: Option<DateTime<Utc>>,
    names: LocalizedText,
    descriptions: LocalizedText,
    short_descriptions: LocalizedText,
    info_urls: LocalizedText,
    providers: LocalizedText,
    source_urls: LocalizedText,
    location_id: Option<String>,
    location_extra_info: LocalizedText,
    keywords: BTreeSet<String>,
    audience: BTreeSet<String>,
    offer: Option<Offer>,
    image_url: Option<String>,
}

impl EventBuilder {
    fn new(origin_id: i64, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            origin_id,
            start_time,
            end_time,
            date_published: None,
            names: HashMap::new(),
            descriptions: HashMap::new(),
            short_descriptions: HashMap::new(),
            info_urls: HashMap::new(),
            providers: HashMap::new(),
            source_urls: HashMap::new(),
            location_id: None,
            location_extra_info: HashMap::new(),
            keywords: BTreeSet::new(),
            audience: BTreeSet::new(),
            offer: None,
            image_url: None,
        }
    }

    fn build(self, data_source: &str, publisher: &str) -> Option<Event> {
        let place_id = match self.location_id {
            Some(place_id) => place_id,
            None => {
                warn!("Event {} reached finalize without a location", self.origin_id);
                return None;
            }
        };
        Some(Event {
            id: format!("{}:{}", data_source, self.origin_id),
            origin_id: self.origin_id.to_string(),
            data_source: data_source.to_string(),
            publisher: publisher.to_string(),
            names: self.names,
            descriptions: self.descriptions,
            short_descriptions: self.short_descriptions,
            info_urls: self.info_urls,
            providers: self.providers,
            source_urls: self.source_urls,
            start_time: self.start_time,
            end_time: self.end_time,
            date_published: self.date_published,
            location: EventLocation {
                place_id,
                extra_info: self.location_extra_info,
            },
            keywords: self.keywords,
            audience: self.audience,
            offer: self.offer,
            image_url: self.image_url,
            deleted: false,
        })
    }
}

/// Merges raw records into the shared event map. Owns the run-scoped
/// keyword and place caches; construct one per import run.
pub struct EventAssembler<'a> {
    keywords: KeywordMapper<'a>,
    places: PlaceResolver<'a>,
    /// Feed classification node id -> place id, from the static venue table.
    node_places: HashMap<i64, String>,
    data_source: String,
    publisher: String,
    base_url: String,
    cutoff: DateTime<Utc>,
    events: HashMap<i64, EventBuilder>,
}

impl<'a> EventAssembler<'a> {
    pub async fn create(
        storage: &'a dyn Storage,
        node_places: HashMap<i64, String>,
        data_source: String,
        publisher: String,
        base_url: String,
        cutoff: DateTime<Utc>,
    ) -> Result<EventAssembler<'a>> {
        let keywords = KeywordMapper::preload(storage).await?;
        let places = PlaceResolver::new(storage, publisher.clone());
        Ok(EventAssembler {
            keywords,
            places,
            node_places,
            data_source,
            publisher,
            base_url,
            cutoff,
            events: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Finish assembly: drop builders (none should remain incomplete) and
    /// return the events ordered by end time, earliest first, for a
    /// deterministic reconciliation order.
    pub fn finish(self) -> Vec<Event> {
        let EventAssembler {
            events,
            data_source,
            publisher,
            ..
        } = self;
        let mut events: Vec<Event> = events
            .into_values()
            .filter_map(|builder| builder.build(&data_source, &publisher))
            .collect();
        events.sort_by_key(|event| event.end_time);
        events
    }
}

#[async_trait]
impl<'a> RecordSink for EventAssembler<'a> {
    async fn consume(&mut self, language: Language, record: FeedRecord) -> Result<TimeWindow> {
        let start_time = parse_local_datetime(&record.event_start_date)?;
        let end_time = parse_local_datetime(&record.event_end_date)?;
        let window = TimeWindow {
            start_time,
            end_time,
        };

        // Events past the retention window only feed the pagination
        // early-stop check.
        if end_time < self.cutoff {
            return Ok(window);
        }

        let record_id = record.content_id;

        // Secondary languages merge into the primary record referenced by
        // the sibling list, but only when the times agree exactly; a
        // mismatched window forks a separate logical event.
        let mut target_id = record_id;
        if !language.is_primary() {
            for sibling_id in record.sibling_ids(Language::Fi.feed_id()) {
                let Some(primary) = self.events.get(&sibling_id) else {
                    continue;
                };
                if primary.start_time == start_time && primary.end_time == end_time {
                    target_id = sibling_id;
                    break;
                }
                warn!(
                    "Event {}: {} times differ from primary variant {}, keeping it separate",
                    record_id, language, sibling_id
                );
            }
        }

        let builder = self
            .events
            .entry(target_id)
            .or_insert_with(|| EventBuilder::new(target_id, start_time, end_time));

        // Language-invariant fields: keep the first write, log the clash.
        if builder.start_time != start_time {
            warn!(
                "Event {}: start_time mismatch ({} vs. {})",
                record_id, builder.start_time, start_time
            );
        }
        if builder.end_time != end_time {
            warn!(
                "Event {}: end_time mismatch ({} vs. {})",
                record_id, builder.end_time, end_time
            );
        }

        // Publication date changes per language version; only the first
        // (primary) sighting sets it.
        if builder.date_published.is_none() {
            if let Some(public_date) = &record.public_date {
                builder.date_published = Some(parse_local_datetime(public_date)?);
            }
        }

        let mut props = record.extended_properties();

        if let Some(name) = props.remove("name") {
            builder.names.insert(language, text::clean_text(&name, true));
        }
        if let Some(description) = props.remove("EventDescription") {
            builder
                .descriptions
                .insert(language, text::sanitize_description(&description));
        }
        if let Some(lift_content) = props.remove("LiftContent") {
            builder.short_descriptions.insert(
                language,
                text::clean_text(&text::strip_tags(&lift_content), false),
            );
        }

        let had_offer = builder.offer.is_some();
        let mut offer = builder.offer.take().unwrap_or_default();
        let mut has_offer = false;
        if let Some(price) = props.remove("Price") {
            let price = text::clean_text(&price, true);
            if FREE_ADMISSION_PREFIXES
                .iter()
                .any(|prefix| price.starts_with(prefix))
            {
                offer.is_free = true;
            }
            offer.prices.insert(language, price);
            has_offer = true;
        }
        if let Some(ticket_links) = props.remove("TicketLinks") {
            if let Some(url) = text::find_url(&ticket_links) {
                offer.info_urls.insert(language, url);
            }
            has_offer = true;
        }
        if let Some(tickets) = props.remove("Tickets") {
            offer.descriptions.insert(language, tickets);
            has_offer = true;
        }
        if had_offer || has_offer {
            builder.offer = Some(offer);
        }

        // URL stays in the props: it doubles as the info url of a place
        // created further down.
        if let Some(markup) = props.get("URL") {
            if let Some(url) = text::find_url(markup) {
                builder.info_urls.insert(language, url);
            }
        }
        if let Some(organizer) = props.remove("Organizer") {
            builder
                .providers
                .insert(language, text::clean_text(&organizer, true));
        }
        if let Some(lift_picture) = props.remove("LiftPicture") {
            if let Some(src) = text::find_image_src(&lift_picture) {
                builder.image_url = Some(src);
            }
        }
        builder
            .source_urls
            .insert(language, constants::content_url(&self.base_url, record_id));

        // Classification triage: known venue nodes pin the location, the
        // online-presence node type and the disregard list are dropped, the
        // rest goes through taxonomy mapping.
        for classification in &record.classifications {
            if let Some(place_id) = self.node_places.get(&classification.node_id) {
                if builder.location_id.is_none() {
                    builder.location_id = Some(place_id.clone());
                }
                continue;
            }
            if classification.node_type == ONLINE_PRESENCE_NODE_TYPE {
                continue;
            }
            if keywords::is_disregarded(&classification.node_name) {
                continue;
            }
            let node_name = classification.node_name.to_lowercase();
            let resolved = self.keywords.resolve(&node_name, language).await?;
            for keyword_id in resolved {
                if keywords::is_audience_keyword(&keyword_id) {
                    builder.audience.insert(keyword_id.clone());
                }
                builder.keywords.insert(keyword_id);
            }
        }

        if let Some(street_address) = props.remove("StreetAddress") {
            if builder.location_id.is_some() {
                // Already placed: keep the address as free-text directions.
                builder
                    .location_extra_info
                    .insert(language, street_address);
            } else {
                let venue_name = props
                    .get("EventLocation")
                    .map(|name| text::clean_text(name, true))
                    .unwrap_or_default();
                let info_url = props.get("URL").cloned().unwrap_or_default();
                match self
                    .places
                    .resolve_or_create(&street_address, language, &venue_name, &info_url)
                    .await?
                {
                    Some(place_id) => builder.location_id = Some(place_id),
                    None => warn!("Cannot find {}", street_address),
                }
            }
        }
        if let Some(venue_name) = props.remove("EventLocation") {
            builder
                .location_extra_info
                .insert(language, text::clean_text(&venue_name, true));
        }

        if builder.location_id.is_none() {
            let name = builder.names.get(&language).cloned().unwrap_or_default();
            warn!("Missing location for event {} ({})", name, record_id);
            self.events.remove(&target_id);
        } else {
            debug!("Assembled {} variant of event {}", language, target_id);
        }
        Ok(window)
    }
}

/// Parse a feed-local (Helsinki) timestamp into UTC.
fn parse_local_datetime(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map_err(|parse_error| ImporterError::Timestamp {
            value: value.to_string(),
            message: parse_error.to_string(),
        })?;
    match Helsinki.from_local_datetime(&naive) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => {
            warn!("Ambiguous local time {}, using the earlier offset", value);
            Ok(earlier.with_timezone(&Utc))
        }
        LocalResult::None => Err(ImporterError::Timestamp {
            value: value.to_string(),
            message: "nonexistent local time".to_string(),
        }),
    }
}
