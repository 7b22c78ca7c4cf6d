//! The Espoo import run: setup, per-language paginated fetch into the
//! assembler, then reconciliation of the assembled set against storage.

pub mod assemble;
pub mod fetch;
pub mod keywords;
pub mod places;
pub mod sync;

use crate::config::EspooConfig;
use crate::constants::{
    self, ESPOO_DATA_SOURCE, ESPOO_DATA_SOURCE_NAME, PUBLISHER_NAME, PUBLISHER_ORIGIN_ID,
    TPREK_DATA_SOURCE,
};
use crate::domain::{Event, ImportRun, Language};
use crate::error::Result;
use crate::storage::Storage;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

use assemble::EventAssembler;
use fetch::{FeedClient, FeedFetcher};
use places::LOCATION_NODES;
use sync::ModelSyncher;

/// Caller-facing switches for one run.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Bypass the mass-deletion guard in the reconciliation finish step.
    pub force: bool,
}

/// What one run did, for logs and exit reporting.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub assembled: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub delete_aborted: bool,
}

/// Imports the Espoo event feed into storage.
pub struct EspooImporter {
    storage: Arc<dyn Storage>,
    client: Arc<dyn FeedClient>,
    config: EspooConfig,
    options: ImportOptions,
}

impl EspooImporter {
    pub fn new(
        storage: Arc<dyn Storage>,
        client: Arc<dyn FeedClient>,
        config: EspooConfig,
        options: ImportOptions,
    ) -> Self {
        Self {
            storage,
            client,
            config,
            options,
        }
    }

    /// Run the whole import: fetch every language, assemble, reconcile.
    /// A fatal feed failure aborts before any reconciliation side effects.
    #[instrument(skip(self))]
    pub async fn import_events(&self) -> Result<ImportSummary> {
        info!("Importing Espoo events");
        let mut run = ImportRun {
            id: None,
            name: ESPOO_DATA_SOURCE.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            events_processed: None,
        };
        self.storage.create_import_run(&mut run).await?;

        let storage: &dyn Storage = self.storage.as_ref();
        let (data_source, _) = storage
            .get_or_create_data_source(ESPOO_DATA_SOURCE, ESPOO_DATA_SOURCE_NAME)
            .await?;
        storage
            .get_or_create_data_source(TPREK_DATA_SOURCE, "Toimipisterekisteri")
            .await?;
        let (organization, _) = storage
            .get_or_create_organization(ESPOO_DATA_SOURCE, PUBLISHER_ORIGIN_ID, PUBLISHER_NAME)
            .await?;

        let node_places = self.build_location_nodes().await?;
        let cutoff = Utc::now() - Duration::days(constants::RETENTION_DAYS);
        let mut assembler = EventAssembler::create(
            storage,
            node_places,
            data_source.id.clone(),
            organization.id.clone(),
            self.config.base_url.clone(),
            cutoff,
        )
        .await?;

        let fetcher = FeedFetcher::new(
            self.client.as_ref(),
            self.config.base_url.clone(),
            self.config.max_retries,
            self.config.retry_delay_secs,
        );
        for language in Language::ALL {
            let url = constants::feed_url(&self.config.base_url, language.feed_id());
            info!("Processing lang {}", language);
            info!("from URL {}", url);
            fetcher.fetch_all(&url, language, &mut assembler).await?;
        }

        let events = assembler.finish();
        let assembled = events.len();

        let target = self
            .storage
            .active_events(ESPOO_DATA_SOURCE, Utc::now())
            .await?;
        let mut touched_places: HashSet<String> = target
            .iter()
            .map(|event| event.location.place_id.clone())
            .collect();

        let mut syncher = ModelSyncher::new(target, |event: &Event| event.origin_id.clone());
        let mut upserted = 0usize;
        for event in events {
            touched_places.insert(event.location.place_id.clone());
            let saved = self.storage.upsert_event(&event).await?;
            syncher.mark(saved)?;
            upserted += 1;
        }

        let delete_storage = self.storage.clone();
        let outcome = syncher
            .finish(self.options.force, move |event: Event| {
                let storage = delete_storage.clone();
                async move { storage.mark_event_deleted(&event.id).await }
            })
            .await?;

        self.refresh_place_event_counts(touched_places).await?;

        run.finished_at = Some(Utc::now());
        run.events_processed = Some(upserted as u64);
        self.storage.update_import_run(&run).await?;

        info!("{} events processed", upserted);
        Ok(ImportSummary {
            assembled,
            upserted,
            deleted: outcome.deleted,
            delete_aborted: outcome.aborted,
        })
    }

    /// Resolve the static venue-node table against the location registry.
    /// Nodes whose registry place is missing simply stay unmapped; their
    /// classifications then run through keyword mapping like any other.
    async fn build_location_nodes(&self) -> Result<HashMap<i64, String>> {
        let origin_ids: Vec<String> = LOCATION_NODES
            .iter()
            .map(|node| node.registry_origin_id.to_string())
            .collect();
        let places = self
            .storage
            .places_by_origin_ids(TPREK_DATA_SOURCE, &origin_ids)
            .await?;
        let by_origin: HashMap<&str, &str> = places
            .iter()
            .map(|place| (place.origin_id.as_str(), place.id.as_str()))
            .collect();

        let mut node_places = HashMap::new();
        for node in LOCATION_NODES.iter() {
            if let Some(place_id) = by_origin.get(node.registry_origin_id) {
                for node_id in node.node_ids {
                    node_places.insert(*node_id, place_id.to_string());
                }
            }
        }
        Ok(node_places)
    }

    /// Refresh the cached per-place event counts for every place touched by
    /// this run, in one bulk write.
    async fn refresh_place_event_counts(&self, place_ids: HashSet<String>) -> Result<()> {
        let mut updated = Vec::new();
        for place_id in place_ids {
            let Some(mut place) = self.storage.get_place(&place_id).await? else {
                continue;
            };
            place.n_events = self.storage.count_events_at_place(&place_id).await?;
            updated.push(place);
        }
        if !updated.is_empty() {
            self.storage
                .bulk_update_places(&updated, &["n_events"])
                .await?;
        }
        Ok(())
    }
}
