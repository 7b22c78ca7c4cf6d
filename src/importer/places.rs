//! Street-address to place resolution. The feed has no place registry of
//! its own, so raw addresses are matched against the authoritative registry
//! and this origin's previously created places, or a new place is minted
//! under the next sequential origin id.

use crate::constants::{ESPOO_DATA_SOURCE, TPREK_DATA_SOURCE};
use crate::domain::{Language, Place};
use crate::error::Result;
use crate::storage::Storage;
use crate::text;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::{info, warn};

/// Known venues the feed tags through classification nodes instead of
/// addresses: feed node ids and the registry place they stand for.
pub struct LocationNode {
    pub name: &'static str,
    pub node_ids: &'static [i64],
    pub registry_origin_id: &'static str,
}

pub static LOCATION_NODES: Lazy<Vec<LocationNode>> = Lazy::new(|| {
    vec![
        LocationNode {
            name: "Matinkylän asukaspuisto",
            node_ids: &[15728],
            registry_origin_id: "20267",
        },
        LocationNode {
            name: "Soukan asukaspuisto",
            node_ids: &[15740],
            registry_origin_id: "20355",
        },
        LocationNode {
            name: "Espoon kulttuurikeskus",
            node_ids: &[15325],
            registry_origin_id: "58548",
        },
        LocationNode {
            name: "Näyttelykeskus WeeGee",
            node_ids: &[15349],
            registry_origin_id: "20404",
        },
        LocationNode {
            name: "KAMU",
            node_ids: &[28944],
            registry_origin_id: "20405",
        },
        LocationNode {
            name: "Karatalo",
            node_ids: &[15357],
            registry_origin_id: "21432",
        },
        LocationNode {
            name: "Nuuksio",
            node_ids: &[15041],
            registry_origin_id: "28401",
        },
        LocationNode {
            name: "Olarin asukaspuisto",
            node_ids: &[15730],
            registry_origin_id: "20268",
        },
        LocationNode {
            name: "Lasten kulttuurikeskus Aurora",
            node_ids: &[15350],
            registry_origin_id: "21431",
        },
        LocationNode {
            name: "Suviniityn avoin päiväkoti",
            node_ids: &[15781],
            registry_origin_id: "20376",
        },
        LocationNode {
            name: "Sellosali",
            node_ids: &[15281],
            registry_origin_id: "59212",
        },
        LocationNode {
            name: "Talomuseo Glims",
            node_ids: &[28954],
            registry_origin_id: "59312",
        },
    ]
});

/// Maps raw venue/address strings to place ids, caching resolutions for the
/// duration of a run. Construct one per import run.
pub struct PlaceResolver<'a> {
    storage: &'a dyn Storage,
    publisher: String,
    cache: HashMap<String, String>,
}

impl<'a> PlaceResolver<'a> {
    pub fn new(storage: &'a dyn Storage, publisher: String) -> PlaceResolver<'a> {
        PlaceResolver {
            storage,
            publisher,
            cache: HashMap::new(),
        }
    }

    /// Return the id of the place matching `raw_address`, creating a new
    /// place with the address, name and url when no match exists. Returns
    /// `None` when the address cannot be reduced to a street address.
    pub async fn resolve_or_create(
        &mut self,
        raw_address: &str,
        language: Language,
        name: &str,
        info_url: &str,
    ) -> Result<Option<String>> {
        let Some(address) = text::parse_street_address(raw_address) else {
            warn!("Address not matching {}", raw_address);
            return Ok(None);
        };
        let street_address = address.street_address.clone();
        if street_address.is_empty() {
            return Ok(None);
        }

        // The cache does not care about address language.
        if let Some(place_id) = self.cache.get(&street_address) {
            return Ok(Some(place_id.clone()));
        }

        let address_language = language.address_language();
        let candidates = self
            .storage
            .find_places_by_street_address(
                &street_address,
                address_language,
                &[TPREK_DATA_SOURCE, ESPOO_DATA_SOURCE],
            )
            .await?;
        if candidates.len() > 1 {
            warn!(
                "Several tprek and/or espoo places match the address \"{}\"",
                street_address
            );
        }

        let place_id = match candidates.into_iter().next() {
            Some(mut place) if place.data_source == ESPOO_DATA_SOURCE => {
                // Our own places stay mutable: refresh metadata in the
                // requesting language. Registry places are read-only here.
                if !name.is_empty() {
                    place.names.insert(language, name.to_string());
                }
                if !info_url.is_empty() {
                    place.info_urls.insert(language, info_url.to_string());
                }
                place
                    .street_addresses
                    .insert(address_language, street_address.clone());
                self.storage
                    .save_place(&place, &["names", "info_urls", "street_addresses"])
                    .await?;
                place.id
            }
            Some(place) => place.id,
            None => {
                let origin_id = self
                    .storage
                    .next_place_origin_id(ESPOO_DATA_SOURCE)
                    .await?;
                let mut place = Place {
                    id: format!("{}:{}", ESPOO_DATA_SOURCE, origin_id),
                    origin_id: origin_id.to_string(),
                    data_source: ESPOO_DATA_SOURCE.to_string(),
                    publisher: Some(self.publisher.clone()),
                    names: HashMap::new(),
                    info_urls: HashMap::new(),
                    street_addresses: HashMap::from([(
                        address_language,
                        street_address.clone(),
                    )]),
                    postal_code: (!address.postal_code.is_empty()).then_some(address.postal_code),
                    address_locality: (!address.address_locality.is_empty())
                        .then_some(address.address_locality),
                    n_events: 0,
                    deleted: false,
                };
                if !name.is_empty() {
                    place.names.insert(language, name.to_string());
                }
                if !info_url.is_empty() {
                    place.info_urls.insert(language, info_url.to_string());
                }
                self.storage.create_place(&place).await?;
                info!("Created place {} for address {}", place.id, street_address);
                place.id
            }
        };

        self.cache.insert(street_address, place_id.clone());
        Ok(Some(place_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn registry_place(id: &str, street_fi: &str, n_events: u64) -> Place {
        Place {
            id: format!("tprek:{}", id),
            origin_id: id.to_string(),
            data_source: TPREK_DATA_SOURCE.to_string(),
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

    #[tokio::test]
    async fn creates_a_place_when_nothing_matches() {
        let storage = InMemoryStorage::new();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        let place_id = resolver
            .resolve_or_create(
                "Kamreerintie 2, 02100 Espoo",
                Language::Fi,
                "Kaupungintalo",
                "http://www.espoo.fi",
            )
            .await
            .unwrap()
            .expect("place should be created");
        assert_eq!(place_id, "espoo:1");

        let place = storage.get_place("espoo:1").await.unwrap().unwrap();
        assert_eq!(
            place.street_addresses.get(&Language::Fi).map(String::as_str),
            Some("Kamreerintie 2")
        );
        assert_eq!(place.postal_code.as_deref(), Some("02100"));
        assert_eq!(
            place.names.get(&Language::Fi).map(String::as_str),
            Some("Kaupungintalo")
        );
    }

    #[tokio::test]
    async fn resolution_is_idempotent_within_a_run() {
        let storage = InMemoryStorage::new();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        let first = resolver
            .resolve_or_create("Otakaari 1, 02150 Espoo", Language::Fi, "", "")
            .await
            .unwrap();
        let second = resolver
            .resolve_or_create("Otakaari 1, 02150 Espoo", Language::Fi, "", "")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.next_place_origin_id("espoo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn registry_places_win_over_own_places() {
        let storage = InMemoryStorage::new();
        storage
            .create_place(&registry_place("20267", "Kamreerintie 2, Espoo", 0))
            .await
            .unwrap();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        let place_id = resolver
            .resolve_or_create("Kamreerintie 2", Language::Fi, "Nimi", "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(place_id, "tprek:20267");

        // registry metadata stays untouched
        let place = storage.get_place("tprek:20267").await.unwrap().unwrap();
        assert!(place.names.is_empty());
    }

    #[tokio::test]
    async fn own_places_get_metadata_updates() {
        let storage = InMemoryStorage::new();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        resolver
            .resolve_or_create("Otakaari 1", Language::Fi, "Vanha nimi", "")
            .await
            .unwrap();

        // a fresh resolver simulates a later run without the cache
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        resolver
            .resolve_or_create("Otakaari 1", Language::Fi, "Uusi nimi", "http://x.fi")
            .await
            .unwrap();

        let place = storage.get_place("espoo:1").await.unwrap().unwrap();
        assert_eq!(
            place.names.get(&Language::Fi).map(String::as_str),
            Some("Uusi nimi")
        );
        assert_eq!(
            place.info_urls.get(&Language::Fi).map(String::as_str),
            Some("http://x.fi")
        );
        assert_eq!(
            place.street_addresses.get(&Language::Fi).map(String::as_str),
            Some("Otakaari 1")
        );
        // no duplicate place was minted for the same address
        assert_eq!(storage.next_place_origin_id("espoo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn english_requests_store_the_address_in_finnish() {
        let storage = InMemoryStorage::new();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        resolver
            .resolve_or_create("Kamreerintie 2", Language::En, "City Hall", "")
            .await
            .unwrap();
        let place = storage.get_place("espoo:1").await.unwrap().unwrap();
        assert_eq!(
            place.street_addresses.get(&Language::Fi).map(String::as_str),
            Some("Kamreerintie 2")
        );
        assert!(place.street_addresses.get(&Language::En).is_none());
        assert_eq!(
            place.names.get(&Language::En).map(String::as_str),
            Some("City Hall")
        );
    }

    #[tokio::test]
    async fn blank_addresses_resolve_to_nothing() {
        let storage = InMemoryStorage::new();
        let mut resolver = PlaceResolver::new(&storage, "espoo:kaupunki".to_string());
        let resolved = resolver
            .resolve_or_create("???", Language::Fi, "", "")
            .await
            .unwrap();
        assert!(resolved.is_none());
    }
}
