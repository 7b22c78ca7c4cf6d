use crate::domain::{DataSource, Event, ImportRun, Keyword, Language, Organization, Place};
use crate::error::{ImporterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Persistence contract the importer needs: get-or-create bootstrap,
/// filtered queries, partial-field saves and soft deletes. The relational
/// engine behind it is out of scope here.
#[async_trait]
pub trait Storage: Send + Sync {
    // Data source and publisher bootstrap
    async fn get_or_create_data_source(&self, id: &str, name: &str) -> Result<(DataSource, bool)>;
    async fn get_or_create_organization(
        &self,
        data_source: &str,
        origin_id: &str,
        name: &str,
    ) -> Result<(Organization, bool)>;

    // Keyword operations
    async fn get_keyword(&self, id: &str) -> Result<Option<Keyword>>;
    /// Case-insensitive keyword lookup by localized name (any language when
    /// `language` is `None`). Only non-deprecated keywords are returned;
    /// `sources` is the preference order when several sources match.
    async fn find_keyword_by_name(
        &self,
        name: &str,
        language: Option<Language>,
        sources: &[&str],
    ) -> Result<Option<Keyword>>;

    // Place operations
    async fn get_place(&self, id: &str) -> Result<Option<Place>>;
    async fn places_by_origin_ids(
        &self,
        data_source: &str,
        origin_ids: &[String],
    ) -> Result<Vec<Place>>;
    /// Non-deleted places whose street address in `language` contains
    /// `street` (case-insensitive), ordered by position of their data source
    /// in `sources`, then by descending event count.
    async fn find_places_by_street_address(
        &self,
        street: &str,
        language: Language,
        sources: &[&str],
    ) -> Result<Vec<Place>>;
    /// One greater than the highest numeric origin id for this source, or 1.
    async fn next_place_origin_id(&self, data_source: &str) -> Result<i64>;
    async fn create_place(&self, place: &Place) -> Result<()>;
    /// Persist only the named fields of an already stored place.
    async fn save_place(&self, place: &Place, fields: &[&str]) -> Result<()>;
    async fn bulk_update_places(&self, places: &[Place], fields: &[&str]) -> Result<()>;

    // Event operations
    async fn get_event(&self, id: &str) -> Result<Option<Event>>;
    async fn upsert_event(&self, event: &Event) -> Result<Event>;
    /// The reconciliation target set: non-deleted events of one origin that
    /// have not yet ended.
    async fn active_events(
        &self,
        data_source: &str,
        ends_after: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
    /// Soft-delete an event. Idempotent: returns `false` when the event is
    /// already deleted, `true` when this call deleted it.
    async fn mark_event_deleted(&self, id: &str) -> Result<bool>;
    async fn count_events_at_place(&self, place_id: &str) -> Result<u64>;

    // Import run bookkeeping
    async fn create_import_run(&self, run: &mut ImportRun) -> Result<()>;
    async fn update_import_run(&self, run: &ImportRun) -> Result<()>;
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    data_sources: Arc<Mutex<HashMap<String, DataSource>>>,
    organizations: Arc<Mutex<HashMap<String, Organization>>>,
    keywords: Arc<Mutex<HashMap<String, Keyword>>>,
    places: Arc<Mutex<HashMap<String, Place>>>,
    events: Arc<Mutex<HashMap<String, Event>>>,
    import_runs: Arc<Mutex<HashMap<Uuid, ImportRun>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            data_sources: Arc::new(Mutex::new(HashMap::new())),
            organizations: Arc::new(Mutex::new(HashMap::new())),
            keywords: Arc::new(Mutex::new(HashMap::new())),
            places: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(HashMap::new())),
            import_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed a keyword, for tests and local fixtures. The importer itself
    /// never creates keywords.
    pub fn add_keyword(&self, keyword: Keyword) {
        let mut keywords = self.keywords.lock().unwrap();
        keywords.insert(keyword.id.clone(), keyword);
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_or_create_data_source(&self, id: &str, name: &str) -> Result<(DataSource, bool)> {
        let mut data_sources = self.data_sources.lock().unwrap();
        if let Some(existing) = data_sources.get(id) {
            return Ok((existing.clone(), false));
        }
        let data_source = DataSource {
            id: id.to_string(),
            name: name.to_string(),
        };
        data_sources.insert(id.to_string(), data_source.clone());
        debug!("Created data source {}", id);
        Ok((data_source, true))
    }

    async fn get_or_create_organization(
        &self,
        data_source: &str,
        origin_id: &str,
        name: &str,
    ) -> Result<(Organization, bool)> {
        let id = format!("{}:{}", data_source, origin_id);
        let mut organizations = self.organizations.lock().unwrap();
        if let Some(existing) = organizations.get(&id) {
            return Ok((existing.clone(), false));
        }
        let organization = Organization {
            id: id.clone(),
            origin_id: origin_id.to_string(),
            data_source: data_source.to_string(),
            name: name.to_string(),
        };
        organizations.insert(id.clone(), organization.clone());
        debug!("Created organization {}", id);
        Ok((organization, true))
    }

    async fn get_keyword(&self, id: &str) -> Result<Option<Keyword>> {
        let keywords = self.keywords.lock().unwrap();
        Ok(keywords.get(id).cloned())
    }

    async fn find_keyword_by_name(
        &self,
        name: &str,
        language: Option<Language>,
        sources: &[&str],
    ) -> Result<Option<Keyword>> {
        let keywords = self.keywords.lock().unwrap();
        let name_lower = name.to_lowercase();
        let matches_name = |keyword: &Keyword| match language {
            Some(language) => keyword
                .names
                .get(&language)
                .map(|n| n.to_lowercase() == name_lower)
                .unwrap_or(false),
            None => keyword
                .names
                .values()
                .any(|n| n.to_lowercase() == name_lower),
        };
        for source in sources {
            if let Some(keyword) = keywords
                .values()
                .find(|k| !k.deprecated && k.data_source == *source && matches_name(k))
            {
                return Ok(Some(keyword.clone()));
            }
        }
        Ok(None)
    }

    async fn get_place(&self, id: &str) -> Result<Option<Place>> {
        let places = self.places.lock().unwrap();
        Ok(places.get(id).cloned())
    }

    async fn places_by_origin_ids(
        &self,
        data_source: &str,
        origin_ids: &[String],
    ) -> Result<Vec<Place>> {
        let places = self.places.lock().unwrap();
        Ok(places
            .values()
            .filter(|p| p.data_source == data_source && origin_ids.contains(&p.origin_id))
            .cloned()
            .collect())
    }

    async fn find_places_by_street_address(
        &self,
        street: &str,
        language: Language,
        sources: &[&str],
    ) -> Result<Vec<Place>> {
        let places = self.places.lock().unwrap();
        let street_lower = street.to_lowercase();
        let mut matching: Vec<Place> = places
            .values()
            .filter(|p| {
                !p.deleted
                    && sources.contains(&p.data_source.as_str())
                    && p.street_addresses
                        .get(&language)
                        .map(|a| a.to_lowercase().contains(&street_lower))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        let source_rank = |place: &Place| {
            sources
                .iter()
                .position(|s| *s == place.data_source)
                .unwrap_or(sources.len())
        };
        matching.sort_by(|a, b| {
            source_rank(a)
                .cmp(&source_rank(b))
                .then(b.n_events.cmp(&a.n_events))
                .then(a.id.cmp(&b.id))
        });
        Ok(matching)
    }

    async fn next_place_origin_id(&self, data_source: &str) -> Result<i64> {
        let places = self.places.lock().unwrap();
        let max_id = places
            .values()
            .filter(|p| p.data_source == data_source)
            .filter_map(|p| p.origin_id.parse::<i64>().ok())
            .max();
        Ok(max_id.map(|id| id + 1).unwrap_or(1))
    }

    async fn create_place(&self, place: &Place) -> Result<()> {
        let mut places = self.places.lock().unwrap();
        places.insert(place.id.clone(), place.clone());
        debug!("Created place {}", place.id);
        Ok(())
    }

    async fn save_place(&self, place: &Place, fields: &[&str]) -> Result<()> {
        let mut places = self.places.lock().unwrap();
        let stored = places
            .get_mut(&place.id)
            .ok_or_else(|| ImporterError::Storage {
                message: format!("Cannot save unknown place {}", place.id),
            })?;
        copy_place_fields(stored, place, fields)?;
        debug!("Saved place {} fields {:?}", place.id, fields);
        Ok(())
    }

    async fn bulk_update_places(&self, updated: &[Place], fields: &[&str]) -> Result<()> {
        let mut places = self.places.lock().unwrap();
        for place in updated {
            let stored = places
                .get_mut(&place.id)
                .ok_or_else(|| ImporterError::Storage {
                    message: format!("Cannot update unknown place {}", place.id),
                })?;
            copy_place_fields(stored, place, fields)?;
        }
        debug!("Bulk updated {} places, fields {:?}", updated.len(), fields);
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events.get(id).cloned())
    }

    async fn upsert_event(&self, event: &Event) -> Result<Event> {
        let mut events = self.events.lock().unwrap();
        events.insert(event.id.clone(), event.clone());
        debug!("Upserted event {}", event.id);
        Ok(event.clone())
    }

    async fn active_events(
        &self,
        data_source: &str,
        ends_after: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let events = self.events.lock().unwrap();
        let mut active: Vec<Event> = events
            .values()
            .filter(|e| e.data_source == data_source && !e.deleted && e.end_time >= ends_after)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn mark_event_deleted(&self, id: &str) -> Result<bool> {
        let mut events = self.events.lock().unwrap();
        let event = events.get_mut(id).ok_or_else(|| ImporterError::Storage {
            message: format!("Cannot delete unknown event {}", id),
        })?;
        if event.deleted {
            return Ok(false);
        }
        event.deleted = true;
        debug!("Soft-deleted event {}", id);
        Ok(true)
    }

    async fn count_events_at_place(&self, place_id: &str) -> Result<u64> {
        let events = self.events.lock().unwrap();
        Ok(events
            .values()
            .filter(|e| !e.deleted && e.location.place_id == place_id)
            .count() as u64)
    }

    async fn create_import_run(&self, run: &mut ImportRun) -> Result<()> {
        let id = Uuid::new_v4();
        run.id = Some(id);

        let mut runs = self.import_runs.lock().unwrap();
        runs.insert(id, run.clone());

        debug!("Created import run {} with id {}", run.name, id);
        Ok(())
    }

    async fn update_import_run(&self, run: &ImportRun) -> Result<()> {
        let run_id = run.id.ok_or_else(|| ImporterError::Storage {
            message: "Cannot update import run without ID".to_string(),
        })?;

        let mut runs = self.import_runs.lock().unwrap();
        runs.insert(run_id, run.clone());

        debug!("Updated import run {} with id {}", run.name, run_id);
        Ok(())
    }
}

fn copy_place_fields(stored: &mut Place, from: &Place, fields: &[&str]) -> Result<()> {
    for field in fields {
        match *field {
            "names" => stored.names = from.names.clone(),
            "info_urls" => stored.info_urls = from.info_urls.clone(),
            "street_addresses" => stored.street_addresses = from.street_addresses.clone(),
            "postal_code" => stored.postal_code = from.postal_code.clone(),
            "address_locality" => stored.address_locality = from.address_locality.clone(),
            "n_events" => stored.n_events = from.n_events,
            "deleted" => stored.deleted = from.deleted,
            unknown => {
                return Err(ImporterError::Storage {
                    message: format!("Unknown place field '{}'", unknown),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn place(id: &str, data_source: &str, street_fi: &str, n_events: u64) -> Place {
        Place {
            id: id.to_string(),
            origin_id: id.split(':').nth(1).unwrap_or(id).to_string(),
            data_source: data_source.to_string(),
            publisher: None,
            names: HashMap::new(),
            info_urls: HashMap::new(),
            street_addresses: HashMap::from([(Language::Fi, street_fi.to_string())]),
            postal_code: None,
            address_locality: None,
            n_events,
            deleted: false,
        }
    }

    fn event(id: &str, place_id: &str) -> Event {
        Event {
            id: id.to_string(),
            origin_id: id.split(':').nth(1).unwrap_or(id).to_string(),
            data_source: "espoo".to_string(),
            publisher: "espoo:kaupunki".to_string(),
            names: HashMap::new(),
            descriptions: HashMap::new(),
            short_descriptions: HashMap::new(),
            info_urls: HashMap::new(),
            providers: HashMap::new(),
            source_urls: HashMap::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            date_published: None,
            location: crate::domain::EventLocation {
                place_id: place_id.to_string(),
                extra_info: HashMap::new(),
            },
            keywords: BTreeSet::new(),
            audience: BTreeSet::new(),
            offer: None,
            image_url: None,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn address_matches_order_by_source_then_event_count() {
        let storage = InMemoryStorage::new();
        storage
            .create_place(&place("espoo:1", "espoo", "Kamreerintie 2", 10))
            .await
            .unwrap();
        storage
            .create_place(&place("tprek:20267", "tprek", "Kamreerintie 2, Espoo", 2))
            .await
            .unwrap();

        let matches = storage
            .find_places_by_street_address("kamreerintie 2", Language::Fi, &["tprek", "espoo"])
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["tprek:20267", "espoo:1"]);
    }

    #[tokio::test]
    async fn origin_ids_are_sequential_per_source() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.next_place_origin_id("espoo").await.unwrap(), 1);
        storage
            .create_place(&place("espoo:7", "espoo", "Otakaari 1", 0))
            .await
            .unwrap();
        storage
            .create_place(&place("tprek:900", "tprek", "Otakaari 1", 0))
            .await
            .unwrap();
        assert_eq!(storage.next_place_origin_id("espoo").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent() {
        let storage = InMemoryStorage::new();
        storage
            .upsert_event(&event("espoo:1", "tprek:20267"))
            .await
            .unwrap();
        assert!(storage.mark_event_deleted("espoo:1").await.unwrap());
        assert!(!storage.mark_event_deleted("espoo:1").await.unwrap());
    }

    #[tokio::test]
    async fn save_place_touches_only_named_fields() {
        let storage = InMemoryStorage::new();
        storage
            .create_place(&place("espoo:1", "espoo", "Kamreerintie 2", 3))
            .await
            .unwrap();

        let mut updated = place("espoo:1", "espoo", "Changed 9", 99);
        updated
            .names
            .insert(Language::Fi, "Kulttuurikeskus".to_string());
        storage.save_place(&updated, &["names"]).await.unwrap();

        let stored = storage.get_place("espoo:1").await.unwrap().unwrap();
        assert_eq!(
            stored.names.get(&Language::Fi).map(String::as_str),
            Some("Kulttuurikeskus")
        );
        // untouched fields keep their stored values
        assert_eq!(
            stored.street_addresses.get(&Language::Fi).map(String::as_str),
            Some("Kamreerintie 2")
        );
        assert_eq!(stored.n_events, 3);
    }
}
