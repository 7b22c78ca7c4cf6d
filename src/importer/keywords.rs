//! Classification-label to canonical-keyword resolution. A static table of
//! known feed labels is checked first; anything it misses falls back to the
//! persisted keyword store by localized name. Unmapped primary-language
//! labels are logged so content editors can extend the table.

use crate::constants::{ESPOO_DATA_SOURCE, YSO_DATA_SOURCE};
use crate::domain::{Keyword, Language};
use crate::error::{ImporterError, Result};
use crate::storage::Storage;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Known feed classification labels (lower-cased Finnish) and the canonical
/// term codes they map to.
static LABEL_TO_CODES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        ("koululaiset ja opiskelijat", &["p16485", "p16486"]),
        ("yhdistykset ja seurat", &["p1393"]),
        ("näyttelyt ja tapahtumat", &["p5121", "p2108"]),
        ("nuoriso", &["p11617"]),
        ("koulutus, kurssit ja luennot", &["p84", "p9270", "p15875"]),
        ("stand up ja esittävä taide", &["p9244", "p2850"]),
        ("nuorisotyö", &["p1925"]),
        ("ohjaus, neuvonta ja tuki", &["p178", "p23"]),
        ("hyvinvointi ja terveys", &["p38424", "p2762"]),
        ("ilmastonmuutos", &["p5729"]),
        ("leirit, matkat ja retket", &["p143", "p366", "p25261"]),
        ("kerhot ja kurssit", &["p7642", "p9270"]),
        ("internet", &["p20405"]),
        ("tapahtumat", &["p2108"]),
        ("asukastoiminta", &["p2250"]),
        ("rakentaminen", &["p3673"]),
        ("kaavoitus", &["p8268"]),
        ("laitteet ja työtilat", &["p2442", "p546"]),
        ("museot", &["p4934"]),
        ("museot ja kuvataide", &["p4934", "p2739"]),
        ("näyttelyt ja galleriat", &["p5121", "p6044"]),
        ("musiikki", &["p1808"]),
        ("teatteri", &["p2625"]),
        ("kevyt liikenne", &["p4288"]),
        ("liikenne", &["p3466"]),
        ("tiet ja kadut", &["p1210", "p8317"]),
        ("liikuntapalvelut", &["p9824"]),
        ("liikuntapaikat", &["p5871"]),
        ("luonto- ja ulkoilureitit", &["p13084", "p5350"]),
        ("uimahallit", &["p9415"]),
        ("ulkoilualueet", &["p4858"]),
        ("urheilu- ja liikuntajärjestöt", &["p965", "p2042"]),
        ("virkistysalueet", &["p4058"]),
        ("bändit", &["p5072"]),
        ("nuorisotilat", &["p17790"]),
        ("aikuiskoulutus", &["p300"]),
        ("korkeakouluopetus", &["p1246"]),
        ("perusopetus", &["p19327"]),
        ("päivähoito (lapsille)", &["p3523"]),
        ("lapsille", &["p4354"]),
        ("elokuva", &["p16327"]),
        ("elokuvat", &["p16327"]),
        ("musiikki ja konsertit", &["p1808", "p11185"]),
        ("liikunta, ulkoilu ja urheilu", &["p916", "p2771", "p965"]),
        ("liikuntalajit", &["p916"]),
        ("ohjattu liikunta", &["p916"]),
        ("harrastus- ja kerhotoiminta", &["p2901", "p7642", "p8090"]),
        ("perheet", &["p4363"]),
        ("koko perheelle", &["p4363"]),
        ("yrittäjät ja yritykset", &["p1178", "p3128"]),
        ("yrittäjät", &["p1178"]),
        ("lapset", &["p4354"]),
        ("kirjastot", &["p2787"]),
        ("opiskelijat", &["p16486"]),
        ("konsertit ja klubit", &["p11185", "p20421"]),
        ("kurssit", &["p9270"]),
        ("venäjä", &["p7643"]),
        ("seniorit", &["p2433"]),
        ("senioreille", &["p2433"]),
        ("senioripalvelut", &["p2433"]),
        ("näyttelyt", &["p5121"]),
        ("kirjallisuus", &["p8113"]),
        ("kielikahvilat ja keskusteluryhmät", &["p18105"]),
        ("maahanmuuttajat", &["p6165"]),
        ("opastukset ja kurssit", &["p2149", "p9270"]),
        ("nuoret", &["p11617"]),
        ("pelitapahtumat", &["p6062"]),
        ("satutunnit", &["p14710"]),
        ("koululaiset", &["p16485"]),
        ("lasten ja nuorten tapahtumat", &["p4354", "p11617"]),
        ("lapset ja perheet", &["p4354", "p4363"]),
        ("lukupiirit", &["p11406"]),
        // the trailing spaces appear in the feed itself
        ("asuminen ja ympäristö  ", &["p1797", "p6033"]),
        ("ympäristö ja luonto", &["p13084"]),
        ("tanssi ja voimistelu", &["p1278", "p963"]),
        ("tanssi ja sirkus", &["p1278", "p5007"]),
        ("sosiaali- ja terveyspalvelut", &["p1307", "p3307"]),
        ("terveys ja hyvinvointi", &["p38424", "p2762"]),
        ("asemakaava", &["p8268"]),
        ("asemakaavat", &["p8268"]),
        ("asemakaavoituskohteet", &["p8268"]),
        ("kasvatus ja opetus", &["p476", "p2630"]),
        ("avoin varhaiskasvatus ja kerhot", &["p1650", "p7642"]),
    ];
    entries.iter().copied().collect()
});

/// Keyword ids promoted into the audience facet alongside the general
/// keyword set.
static AUDIENCE_KEYWORD_IDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "yso:p4354",  // lapset
        "yso:p11617", // nuoret
        "yso:p16485", // koululaiset
        "yso:p16486", // opiskelijat
        "yso:p2433",  // seniorit
        "yso:p4363",  // perheet
        "yso:p6165",  // maahanmuuttajat
    ])
});

/// Classification labels that carry no taxonomy value: catch-all buckets and
/// venue names that are handled through the location tables instead.
static DISREGARDED_LABELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "tapahtumat",
        "kulttuuri",
        "kulttuuri ja liikunta",
        "kulttuuri ja liikunta  ",
        "kaikki tapahtumat",
        "muut tapahtumat",
        "sellosali",
        "espoon kulttuurikeskus",
        "espoon kaupunginmuseo",
        "kamu",
        "näyttelykeskus weegee",
        "karatalo",
        "ohjelmisto",
        "kulttuurikohteet ja -toimijat",
        "espoo.fi",
        "kulttuuriespoo.fi",
        "kulttuurikeskukset ja -talot",
    ])
});

fn static_codes(label_lower: &str) -> Option<&'static [&'static str]> {
    LABEL_TO_CODES.get(label_lower).copied()
}

/// True for labels the caller should drop before attempting resolution.
pub fn is_disregarded(label: &str) -> bool {
    DISREGARDED_LABELS.contains(label.to_lowercase().as_str())
}

/// True for keyword ids that double as audience classification.
pub fn is_audience_keyword(id: &str) -> bool {
    AUDIENCE_KEYWORD_IDS.contains(id)
}

/// Resolves raw classification labels to canonical keyword ids. Holds the
/// run-scoped keyword index; construct one per import run.
pub struct KeywordMapper<'a> {
    storage: &'a dyn Storage,
    index: HashMap<String, Keyword>,
}

impl<'a> KeywordMapper<'a> {
    /// Cache the canonical keywords referenced by the static table. A store
    /// with no canonical vocabulary at all disables the static layer rather
    /// than failing: the per-name fallback still works.
    pub async fn preload(storage: &'a dyn Storage) -> Result<KeywordMapper<'a>> {
        let mut index = HashMap::new();
        let mut codes = BTreeSet::new();
        for mapped in LABEL_TO_CODES.values() {
            codes.extend(mapped.iter().copied());
        }
        for code in codes {
            let id = format!("{}:{}", YSO_DATA_SOURCE, code);
            if let Some(keyword) = storage.get_keyword(&id).await? {
                let canonical = canonical_keyword(storage, keyword).await?;
                if !canonical.deprecated {
                    index.insert(id, canonical);
                }
            }
        }
        Ok(KeywordMapper { storage, index })
    }

    /// Resolve one classification label. Returns the canonical keyword ids,
    /// empty when nothing matches. Labels known to the static table must
    /// resolve against the cached canonical set; a miss there is a
    /// configuration defect, not bad input.
    pub async fn resolve(&mut self, label: &str, language: Language) -> Result<BTreeSet<String>> {
        let label_lower = label.to_lowercase();
        if !self.index.is_empty() {
            if let Some(codes) = static_codes(&label_lower) {
                let mut resolved = BTreeSet::new();
                for code in codes {
                    let id = format!("{}:{}", YSO_DATA_SOURCE, code);
                    let keyword = self
                        .index
                        .get(&id)
                        .ok_or(ImporterError::KeywordConfig(id))?;
                    resolved.insert(keyword.id.clone());
                }
                return Ok(resolved);
            }
        }

        if let Some(keyword) = self
            .storage
            .find_keyword_by_name(
                label_lower.trim(),
                Some(language),
                &[YSO_DATA_SOURCE, ESPOO_DATA_SOURCE],
            )
            .await?
        {
            self.index.insert(keyword.id.clone(), keyword.clone());
            return Ok(BTreeSet::from([keyword.id]));
        }

        if language.is_primary() {
            // Content editors watch for this to extend the label table.
            warn!("Cannot find yso classification for keyword: {}", label);
        }
        Ok(BTreeSet::new())
    }
}

/// Follow replacement references of merged/retired keywords to a fixed
/// point. Cycles are broken with a warning.
async fn canonical_keyword(storage: &dyn Storage, keyword: Keyword) -> Result<Keyword> {
    let mut seen = HashSet::from([keyword.id.clone()]);
    let mut current = keyword;
    while current.deprecated {
        let Some(next_id) = current.replaced_by.clone() else {
            break;
        };
        if !seen.insert(next_id.clone()) {
            warn!("Keyword replacement cycle at {}", next_id);
            break;
        }
        match storage.get_keyword(&next_id).await? {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn keyword(id: &str, name_fi: &str) -> Keyword {
        Keyword {
            id: id.to_string(),
            data_source: id.split(':').next().unwrap_or("").to_string(),
            names: HashMap::from([(Language::Fi, name_fi.to_string())]),
            deprecated: false,
            replaced_by: None,
        }
    }

    fn storage_with_static_codes() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        let mut codes = BTreeSet::new();
        for mapped in LABEL_TO_CODES.values() {
            codes.extend(mapped.iter().copied());
        }
        for code in codes {
            storage.add_keyword(keyword(&format!("yso:{}", code), code));
        }
        storage
    }

    #[tokio::test]
    async fn every_static_label_resolves_to_its_codes() {
        let storage = storage_with_static_codes();
        let mut mapper = KeywordMapper::preload(&storage).await.unwrap();
        for (label, codes) in LABEL_TO_CODES.iter() {
            let resolved = mapper.resolve(label, Language::Fi).await.unwrap();
            let expected: BTreeSet<String> =
                codes.iter().map(|code| format!("yso:{}", code)).collect();
            assert_eq!(resolved, expected, "label {}", label);
        }
    }

    #[tokio::test]
    async fn missing_static_code_is_a_config_error() {
        let storage = storage_with_static_codes();
        let mut mapper = KeywordMapper::preload(&storage).await.unwrap();
        mapper.index.remove("yso:p1808");
        let result = mapper.resolve("Musiikki", Language::Fi).await;
        assert!(matches!(result, Err(ImporterError::KeywordConfig(_))));
    }

    #[tokio::test]
    async fn stored_names_back_up_the_static_table() {
        let storage = storage_with_static_codes();
        let mut kw = keyword("yso:p1235", "elokuvafestivaalit");
        kw.names
            .insert(Language::Sv, "filmfestivaler".to_string());
        storage.add_keyword(kw);

        let mut mapper = KeywordMapper::preload(&storage).await.unwrap();
        let resolved = mapper
            .resolve("Filmfestivaler", Language::Sv)
            .await
            .unwrap();
        assert_eq!(resolved, BTreeSet::from(["yso:p1235".to_string()]));
    }

    #[tokio::test]
    async fn unmapped_labels_resolve_to_nothing() {
        let storage = storage_with_static_codes();
        let mut mapper = KeywordMapper::preload(&storage).await.unwrap();
        let resolved = mapper
            .resolve("jotain aivan muuta", Language::Fi)
            .await
            .unwrap();
        assert!(resolved.is_empty());
        let resolved = mapper.resolve("something else", Language::En).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn replacement_chains_end_at_the_live_keyword() {
        let storage = InMemoryStorage::new();
        let mut retired = keyword("yso:p1808", "musiikki (vanha)");
        retired.deprecated = true;
        retired.replaced_by = Some("yso:p99001".to_string());
        storage.add_keyword(retired);
        storage.add_keyword(keyword("yso:p99001", "musiikki"));
        // the rest of the static codes so the static layer stays enabled
        let mut codes = BTreeSet::new();
        for mapped in LABEL_TO_CODES.values() {
            codes.extend(mapped.iter().copied());
        }
        for code in codes {
            if code != "p1808" {
                storage.add_keyword(keyword(&format!("yso:{}", code), code));
            }
        }

        let mut mapper = KeywordMapper::preload(&storage).await.unwrap();
        let resolved = mapper.resolve("musiikki", Language::Fi).await.unwrap();
        assert_eq!(resolved, BTreeSet::from(["yso:p99001".to_string()]));
    }

    #[test]
    fn disregard_list_is_case_insensitive() {
        assert!(is_disregarded("Tapahtumat"));
        assert!(is_disregarded("näyttelykeskus WeeGee"));
        assert!(!is_disregarded("musiikki"));
    }

    #[test]
    fn audience_subset_is_flagged() {
        assert!(is_audience_keyword("yso:p4354"));
        assert!(!is_audience_keyword("yso:p1808"));
    }
}
