use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::coefficient::{similarity_coefficient, GeneSetOverlap};
use super::filter::{hypergeom_overlap, FilterMetric, PostAnalysisFilterType};
use super::similarity::{SimilarityConfig, SIGNATURE_INTERACTION_TYPE};
use crate::model::similarity::DATASET_1;
use crate::model::{
    DataSet, EnrichmentMap, GeneSet, GeneSetCollection, GenesetSimilarity, Ranking, SimilarityKey,
    SimilarityResults,
};
use crate::stat::MannWhitneyCache;
use crate::task::{CancellationToken, DiscreteProgress, ParallelCoordinator, ProgressMonitor, TaskOutcome};
use crate::{Error, Result};

/// Prefix given to signature gene sets whose name is already used by an
/// enrichment gene set.
pub const DUPLICATE_NAME_PREFIX: &str = "PA_";

/// Population size used for the hypergeometric test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UniverseType {
    /// Every gene known to the map.
    #[default]
    Gmt,
    /// Genes of the data set's expression file.
    ExpressionSet,
    /// Rows of the data set's expression matrix.
    Intersection,
    /// A size supplied by the user.
    UserDefined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A struct representing the options for post-analysis signature matching
pub struct PostAnalysisConfig {
    /// The [`PostAnalysisFilterType`] deciding which overlaps pass (default: none)
    pub filter_type: PostAnalysisFilterType,
    /// Cutoff for the filter, see [`PostAnalysisFilterType::default_value`]
    pub cutoff: f64,
    /// Which universe size the hypergeometric test uses
    pub universe: UniverseType,
    /// Universe size for [`UniverseType::UserDefined`]
    pub user_defined_universe_size: usize,
    /// Rank file to use per data set name for Mann-Whitney tests
    pub data_set_to_rank_file: AHashMap<String, String>,
    /// Signature gene sets to compare; all of them when `None`
    pub selected_gene_sets: Option<Vec<String>>,
    /// Worker threads (default: number of CPUs)
    pub threads: usize,
    /// How often the watchdog checks for cancellation (default: 1s)
    pub poll_interval: Duration,
    /// Upper bound on the whole run (default: 3h)
    pub timeout: Duration,
    pub similarity: SimilarityConfig,
}

impl Default for PostAnalysisConfig {
    fn default() -> Self {
        let coordinator = ParallelCoordinator::default();
        PostAnalysisConfig {
            filter_type: PostAnalysisFilterType::NoFilter,
            cutoff: PostAnalysisFilterType::NoFilter.default_value(),
            universe: UniverseType::Gmt,
            user_defined_universe_size: 0,
            data_set_to_rank_file: AHashMap::default(),
            selected_gene_sets: None,
            threads: coordinator.threads,
            poll_interval: coordinator.poll_interval,
            timeout: coordinator.timeout,
            similarity: SimilarityConfig::default(),
        }
    }
}

impl PostAnalysisConfig {
    /// Default configuration using `filter_type` with its default cutoff.
    pub fn with_filter(filter_type: PostAnalysisFilterType) -> Self {
        PostAnalysisConfig {
            filter_type,
            cutoff: filter_type.default_value(),
            ..PostAnalysisConfig::default()
        }
    }

    fn coordinator(&self) -> ParallelCoordinator {
        ParallelCoordinator {
            threads: self.threads,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        }
    }

    fn universe_size(&self, map: &EnrichmentMap, data_set: &DataSet) -> usize {
        match self.universe {
            UniverseType::Gmt => map.number_of_genes,
            UniverseType::ExpressionSet => data_set.expression_universe,
            UniverseType::Intersection => data_set.expression_matrix_size,
            UniverseType::UserDefined => self.user_defined_universe_size,
        }
    }

    /// Universe size for the hypergeometric test on `data_set`, which must
    /// not be empty.
    fn checked_universe_size(&self, map: &EnrichmentMap, data_set: &DataSet) -> Result<usize> {
        match self.universe_size(map, data_set) {
            0 => Err(Error::InvalidArgument(format!(
                "{:?} universe of data set '{}' is empty",
                self.universe, data_set.name
            ))),
            size => Ok(size),
        }
    }

    /// Picks the ranking a Mann-Whitney test uses for `data_set`.
    ///
    /// An explicit mapping wins; otherwise a data set with a single ranking
    /// uses it and a data set without rankings gets an empty one.
    fn ranking_for(&self, data_set: &DataSet) -> Result<Arc<Ranking>> {
        if let Some(rank_file) = self.data_set_to_rank_file.get(&data_set.name) {
            return data_set.ranks.get(rank_file).cloned().ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "data set '{}' has no ranking named '{}'",
                    data_set.name, rank_file
                ))
            });
        }
        let mut ranks = data_set.ranks.values();
        match (ranks.next(), ranks.next()) {
            (None, _) => Ok(Arc::new(Ranking::default())),
            (Some(ranking), None) => Ok(Arc::clone(ranking)),
            (Some(_), Some(_)) => Err(Error::InvalidArgument(format!(
                "data set '{}' has several rankings, choose one for the Mann-Whitney test",
                data_set.name
            ))),
        }
    }
}

/// Output of a post-analysis run.
#[derive(Debug, Clone, Default)]
pub struct SignatureResults {
    /// Signature gene sets that were compared, after renaming duplicates.
    pub signature_gene_sets: GeneSetCollection,
    /// One record per (hub, gene set, data set) with a non-empty overlap.
    pub similarities: SimilarityResults,
}

/// Compares signature ("hub") gene sets with every gene set of interest in
/// every data set of the map.
///
/// Each hub is one unit of work on a pool of `config.threads` workers.
/// Genes are restricted to the map's enrichment genes; only pairs with a
/// non-empty overlap produce a record. Every record gets hypergeometric
/// statistics and the filter value, and is marked as passing or not.
///
/// # Errors
///
/// Configuration errors are raised before any work starts: an invalid
/// similarity config, an unknown selected signature gene set, an empty
/// hypergeometric universe, or an ambiguous ranking for a Mann-Whitney
/// filter. [`Error::Timeout`] is
/// returned when the run exceeds `config.timeout`.
pub fn compute_signature_similarities(
    map: &EnrichmentMap,
    config: &PostAnalysisConfig,
    token: &CancellationToken,
    monitor: &dyn ProgressMonitor,
) -> Result<TaskOutcome<SignatureResults>> {
    config.similarity.validate()?;

    let enrichment_names: Vec<String> = {
        let mut names: Vec<String> = map.all_gene_set_of_interest_names().into_iter().collect();
        names.sort();
        names
    };
    let mut signature_gene_sets = selected_signature_gene_sets(map, config)?;
    handle_duplicate_names(&enrichment_names, &mut signature_gene_sets);

    let cache = Arc::new(MannWhitneyCache::new());
    let filters: Vec<FilterMetric> = map
        .data_sets
        .iter()
        .map(|ds| {
            let ranks = if config.filter_type.is_mann_whitney() {
                Some(config.ranking_for(ds)?)
            } else {
                None
            };
            FilterMetric::new(
                config.filter_type,
                config.cutoff,
                config.checked_universe_size(map, ds)?,
                ranks,
                Arc::clone(&cache),
            )
        })
        .collect::<Result<_>>()?;

    let gene_universe = map.all_enrichment_genes();
    let mut hubs: Vec<&GeneSet> = signature_gene_sets.values().collect();
    hubs.sort_by(|a, b| a.name().cmp(b.name()));

    let progress = DiscreteProgress::new(monitor, "Post analysis geneset similarities", hubs.len(), "tasks");
    log::debug!(
        "comparing {} signature gene sets with {} enrichment gene sets over {} data sets",
        hubs.len(),
        enrichment_names.len(),
        map.data_sets.len()
    );

    let matcher = HubMatcher {
        map,
        config,
        filters: &filters,
        enrichment_names: &enrichment_names,
        gene_universe: &gene_universe,
        similarities: DashMap::default(),
    };
    let outcome = config.coordinator().run(&hubs, token, |hub, interrupted| {
        matcher.match_hub(hub, interrupted)?;
        progress.inc();
        Ok(())
    })?;
    if outcome.is_cancelled() {
        log::debug!("post analysis cancelled after {} of {} tasks", progress.current(), hubs.len());
        return Ok(TaskOutcome::Cancelled);
    }

    let similarities: SimilarityResults = matcher
        .similarities
        .into_iter()
        .map(|(key, similarity)| (key.to_string(), similarity))
        .collect();
    log::info!(
        "computed {} signature similarities ({} Mann-Whitney tests cached)",
        similarities.len(),
        cache.len()
    );
    Ok(TaskOutcome::Completed(SignatureResults {
        signature_gene_sets,
        similarities,
    }))
}

fn selected_signature_gene_sets(map: &EnrichmentMap, config: &PostAnalysisConfig) -> Result<GeneSetCollection> {
    let Some(selected) = &config.selected_gene_sets else {
        return Ok(map.signature_gene_sets.clone());
    };
    selected
        .iter()
        .map(|name| {
            map.signature_gene_sets
                .get(name)
                .map(|gs| (name.clone(), gs.clone()))
                .ok_or_else(|| Error::InvalidArgument(format!("unknown signature gene set '{name}'")))
        })
        .collect()
}

/// Renames signature gene sets that share a name with an enrichment gene set.
fn handle_duplicate_names(enrichment_names: &[String], signature_gene_sets: &mut GeneSetCollection) {
    let taken: AHashSet<&str> = enrichment_names.iter().map(String::as_str).collect();
    let duplicates: Vec<String> = signature_gene_sets
        .keys()
        .filter(|name| taken.contains(name.as_str()))
        .cloned()
        .collect();
    for name in duplicates {
        if let Some(gs) = signature_gene_sets.remove(&name) {
            let renamed = format!("{DUPLICATE_NAME_PREFIX}{name}");
            log::warn!("signature gene set '{}' renamed to '{}'", name, renamed);
            let gene_set = GeneSet::new(renamed.clone(), gs.description(), gs.genes().clone());
            signature_gene_sets.insert(renamed, gene_set);
        }
    }
}

struct HubMatcher<'a> {
    map: &'a EnrichmentMap,
    config: &'a PostAnalysisConfig,
    /// One filter per data set, same order as `map.data_sets`.
    filters: &'a [FilterMetric],
    enrichment_names: &'a [String],
    gene_universe: &'a AHashSet<u32>,
    similarities: DashMap<SimilarityKey, GenesetSimilarity, ahash::RandomState>,
}

impl<'a> HubMatcher<'a> {
    /// Compares one hub with every enrichment gene set. Keys always start
    /// with the hub's name, so two hubs never write the same key.
    fn match_hub(&self, hub: &GeneSet, interrupted: &AtomicBool) -> Result<()> {
        let sig_genes = hub.genes();
        let sig_in_universe = hub.restricted_to(self.gene_universe);

        for name in self.enrichment_names {
            for (data_set, filter) in self.map.data_sets.iter().zip(self.filters) {
                if interrupted.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let Some(enrichment_set) = data_set.gene_set(name) else {
                    continue;
                };
                let enr_genes = enrichment_set.restricted_to(self.gene_universe);
                let overlap = GeneSetOverlap::of(&sig_in_universe, &enr_genes);
                if overlap.intersection.is_empty() {
                    continue;
                }
                let union_size = sig_genes.union(&enr_genes).count();
                let Some(coefficient) = similarity_coefficient(
                    self.config.similarity.metric,
                    self.config.similarity.combined_constant,
                    overlap.intersection.len(),
                    union_size,
                    sig_genes.len(),
                    enr_genes.len(),
                ) else {
                    continue;
                };

                let mut similarity = GenesetSimilarity::new(
                    hub.name(),
                    name.as_str(),
                    coefficient,
                    SIGNATURE_INTERACTION_TYPE,
                    overlap.intersection,
                    DATASET_1,
                );
                similarity.data_set = Some(data_set.name.clone());

                let value = filter.compute_value(&enr_genes, &sig_in_universe, Some(&mut similarity))?;
                if similarity.hypergeom.is_none() {
                    similarity.hypergeom = Some(hypergeom_overlap(
                        self.map.number_of_genes,
                        sig_in_universe.len(),
                        enr_genes.len(),
                        similarity.overlap_size(),
                    )?);
                }
                similarity.filter_value = Some(value);
                similarity.passes_filter = filter.passes(value);

                let key = SimilarityKey::with_data_set(
                    hub.name(),
                    SIGNATURE_INTERACTION_TYPE,
                    name.as_str(),
                    data_set.name.as_str(),
                );
                self.similarities.insert(key, similarity);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_set(name: &str, ranks: &[(&str, Ranking)]) -> DataSet {
        let mut ds = DataSet::new(name);
        for (file, ranking) in ranks {
            ds.ranks.insert((*file).to_owned(), Arc::new(ranking.clone()));
        }
        ds
    }

    #[test]
    fn ranking_resolution() {
        let config = PostAnalysisConfig::with_filter(PostAnalysisFilterType::MannWhitTwoSided);
        let none = data_set("none", &[]);
        assert!(config.ranking_for(&none).unwrap().is_empty());

        let one = data_set("one", &[("a.rnk", Ranking::new([(1, 1.0)]))]);
        assert_eq!(config.ranking_for(&one).unwrap().len(), 1);

        let two = data_set(
            "two",
            &[("a.rnk", Ranking::new([(1, 1.0)])), ("b.rnk", Ranking::new([(1, 1.0), (2, 2.0)]))],
        );
        assert!(matches!(config.ranking_for(&two), Err(Error::InvalidArgument(_))));

        let mut mapped = config.clone();
        mapped.data_set_to_rank_file.insert("two".to_owned(), "b.rnk".to_owned());
        assert_eq!(mapped.ranking_for(&two).unwrap().len(), 2);
        mapped.data_set_to_rank_file.insert("two".to_owned(), "c.rnk".to_owned());
        assert!(mapped.ranking_for(&two).is_err());
    }

    #[test]
    fn duplicate_signature_names_are_prefixed() {
        let mut sigs = GeneSetCollection::default();
        sigs.insert("APOPTOSIS".to_owned(), GeneSet::from_genes("APOPTOSIS", "", [1, 2]));
        sigs.insert("DRUG".to_owned(), GeneSet::from_genes("DRUG", "", [3]));
        handle_duplicate_names(&["APOPTOSIS".to_owned()], &mut sigs);
        assert!(sigs.contains_key("PA_APOPTOSIS"));
        assert!(sigs.contains_key("DRUG"));
        assert!(!sigs.contains_key("APOPTOSIS"));
        assert_eq!(sigs["PA_APOPTOSIS"].name(), "PA_APOPTOSIS");
    }

    #[test]
    fn universe_sizes() {
        let map = EnrichmentMap {
            number_of_genes: 100,
            ..EnrichmentMap::default()
        };
        let mut ds = DataSet::new("ds");
        ds.expression_universe = 80;
        ds.expression_matrix_size = 60;
        let mut config = PostAnalysisConfig::default();
        assert_eq!(config.universe_size(&map, &ds), 100);
        config.universe = UniverseType::ExpressionSet;
        assert_eq!(config.universe_size(&map, &ds), 80);
        config.universe = UniverseType::Intersection;
        assert_eq!(config.universe_size(&map, &ds), 60);
        config.universe = UniverseType::UserDefined;
        config.user_defined_universe_size = 42;
        assert_eq!(config.universe_size(&map, &ds), 42);
    }

    #[test]
    fn empty_universe_is_rejected() {
        let map = EnrichmentMap {
            number_of_genes: 100,
            ..EnrichmentMap::default()
        };
        let ds = DataSet::new("ds");
        let mut config = PostAnalysisConfig::with_filter(PostAnalysisFilterType::Hypergeom);
        assert_eq!(config.checked_universe_size(&map, &ds).unwrap(), 100);
        for universe in [UniverseType::ExpressionSet, UniverseType::Intersection, UniverseType::UserDefined] {
            config.universe = universe;
            assert!(matches!(
                config.checked_universe_size(&map, &ds),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
