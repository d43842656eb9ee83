use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::coefficient::{GeneSetOverlap, SimilarityMetric};
use super::filter::{FilterMetric, PostAnalysisFilterType};
use crate::model::similarity::{COMBINED_SETS, CROSS_DATASET, DATASET_1, DATASET_2};
use crate::model::{EnrichmentMap, GeneSet, GeneSetCollection, GenesetSimilarity, SimilarityKey, SimilarityResults};
use crate::task::{CancellationToken, DiscreteProgress, ProgressMonitor, TaskOutcome};
use crate::{Error, Result};

pub const ENRICHMENT_INTERACTION_TYPE: &str = "Geneset_Overlap";
pub const ENRICHMENT_INTERACTION_TYPE_SET1: &str = "Geneset_Overlap_set1";
pub const ENRICHMENT_INTERACTION_TYPE_SET2: &str = "Geneset_Overlap_set2";
pub const ENRICHMENT_INTERACTION_TYPE_CROSS: &str = "Geneset_Overlap_cross";
pub const SIGNATURE_INTERACTION_TYPE: &str = "sig";

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Options shared by every gene set similarity computation
pub struct SimilarityConfig {
    /// The [`SimilarityMetric`] used for coefficients (default: overlap)
    pub metric: SimilarityMetric,
    /// Weight of the overlap coefficient in the combined metric, in `[0, 1]` (default: 0.5)
    pub combined_constant: f64,
    /// Edge type for enrichment-vs-enrichment comparisons
    pub enrichment_edge_type: String,
    /// Compare the two data sets separately instead of pooling their gene sets
    pub distinct_expression_sets: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        SimilarityConfig {
            metric: SimilarityMetric::Overlap,
            combined_constant: 0.5,
            enrichment_edge_type: ENRICHMENT_INTERACTION_TYPE.to_owned(),
            distinct_expression_sets: false,
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.combined_constant) {
            return Err(Error::InvalidArgument(format!(
                "combined constant must be within [0, 1], got {}",
                self.combined_constant
            )));
        }
        Ok(())
    }
}

/// Which gene sets the inner loop runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMode {
    /// Gene sets of interest against each other.
    Enrichment,
    /// Gene sets of interest against the map's signature gene sets.
    Signature,
}

/// Compares every gene set of interest with every other one (or with every
/// signature gene set in [`SimilarityMode::Signature`]) and returns one
/// record per unordered pair and edge type.
///
/// With distinct expression sets the first data set is compared with
/// itself, then the second with itself, then pairs that are of interest in
/// both data sets are compared across them; each population has its own
/// edge type.
///
/// Cancellation is checked once per outer gene set. A cancelled run returns
/// [`TaskOutcome::Cancelled`] and no partial results.
///
/// # Errors
///
/// [`Error::UnsupportedMap`] if the map does not have one or two data sets
/// (exactly two with distinct expression sets), and
/// [`Error::InvalidArgument`] for an invalid `config`.
pub fn compute_geneset_similarities(
    map: &EnrichmentMap,
    config: &SimilarityConfig,
    mode: SimilarityMode,
    filter: &FilterMetric,
    token: &CancellationToken,
    monitor: &dyn ProgressMonitor,
) -> Result<TaskOutcome<SimilarityResults>> {
    config.validate()?;
    let distinct = config.distinct_expression_sets;
    match (map.data_sets.len(), distinct) {
        (1..=2, false) | (2, true) => {}
        (count, _) => {
            return Err(Error::UnsupportedMap(format!(
                "similarity computation needs one or two data sets (two with distinct expression sets), found {count}"
            )))
        }
    }

    let pooled;
    let of_interest: &GeneSetCollection = if distinct {
        &map.data_sets[0].gene_sets_of_interest
    } else {
        pooled = map.all_gene_sets_of_interest();
        &pooled
    };
    let (inner, edge_type, indicator) = match mode {
        SimilarityMode::Enrichment if distinct => (of_interest, ENRICHMENT_INTERACTION_TYPE_SET1, DATASET_1),
        SimilarityMode::Enrichment => (of_interest, config.enrichment_edge_type.as_str(), COMBINED_SETS),
        SimilarityMode::Signature if distinct => (&map.signature_gene_sets, SIGNATURE_INTERACTION_TYPE, DATASET_1),
        SimilarityMode::Signature => (&map.signature_gene_sets, SIGNATURE_INTERACTION_TYPE, COMBINED_SETS),
    };

    let mut total = of_interest.len();
    if distinct && mode == SimilarityMode::Enrichment {
        total += 2 * map.data_sets[1].gene_sets_of_interest.len();
    }
    let progress = DiscreteProgress::new(monitor, "Computing geneset similarities", total, "gene sets");
    log::debug!(
        "computing {:?} similarities for {} gene sets against {}",
        mode,
        of_interest.len(),
        inner.len()
    );

    let mut comparer = PairComparer {
        config,
        mode,
        filter,
        token,
        progress: &progress,
        similarities: AHashMap::default(),
    };

    let first = Pass {
        outer: of_interest,
        inner,
        lookup: None,
        edge_type,
        indicator,
        include: &|_, _| true,
    };
    if comparer.run(&first)?.is_cancelled() {
        return Ok(TaskOutcome::Cancelled);
    }

    if distinct && mode == SimilarityMode::Enrichment {
        let set1 = &map.data_sets[0];
        let set2 = &map.data_sets[1];
        let second = Pass {
            outer: &set2.gene_sets_of_interest,
            inner: &set2.gene_sets_of_interest,
            lookup: None,
            edge_type: ENRICHMENT_INTERACTION_TYPE_SET2,
            indicator: DATASET_2,
            include: &|_, _| true,
        };
        if comparer.run(&second)?.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }

        let all_gene_sets = map.all_gene_sets();
        let in_both = |name: &str| {
            set1.enrichments.contains(name)
                && set1.gene_sets_of_interest.contains_key(name)
                && set2.gene_sets_of_interest.contains_key(name)
        };
        let cross = Pass {
            outer: &set2.gene_sets_of_interest,
            inner: &set1.gene_sets_of_interest,
            lookup: Some(&all_gene_sets),
            edge_type: ENRICHMENT_INTERACTION_TYPE_CROSS,
            indicator: CROSS_DATASET,
            include: &|a, b| in_both(a) && in_both(b),
        };
        if comparer.run(&cross)?.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
    }

    let results: SimilarityResults = comparer
        .similarities
        .into_iter()
        .map(|(key, similarity)| (key.to_string(), similarity))
        .collect();
    log::info!("computed {} geneset similarities", results.len());
    Ok(TaskOutcome::Completed(results))
}

/// One outer-by-inner sweep.
struct Pass<'a> {
    outer: &'a GeneSetCollection,
    inner: &'a GeneSetCollection,
    /// Where gene sets are resolved from, instead of outer then inner.
    lookup: Option<&'a GeneSetCollection>,
    edge_type: &'a str,
    indicator: u8,
    include: &'a dyn Fn(&str, &str) -> bool,
}

impl<'a> Pass<'a> {
    fn resolve(&self, name: &str) -> Option<&'a GeneSet> {
        match self.lookup {
            Some(lookup) => lookup.get(name),
            None => self.outer.get(name).or_else(|| self.inner.get(name)),
        }
    }
}

struct PairComparer<'a> {
    config: &'a SimilarityConfig,
    mode: SimilarityMode,
    filter: &'a FilterMetric,
    token: &'a CancellationToken,
    progress: &'a DiscreteProgress<'a>,
    similarities: AHashMap<SimilarityKey, GenesetSimilarity>,
}

impl<'a> PairComparer<'a> {
    fn run(&mut self, pass: &Pass<'_>) -> Result<TaskOutcome<()>> {
        for name1 in pass.outer.keys() {
            if self.token.is_cancelled() {
                log::debug!("geneset similarity computation cancelled");
                return Ok(TaskOutcome::Cancelled);
            }
            self.progress.inc();

            for name2 in pass.inner.keys() {
                if same_name(name1, name2) || !(pass.include)(name1, name2) {
                    continue;
                }
                let key = SimilarityKey::new(name1.as_str(), pass.edge_type, name2.as_str());
                if self.similarities.contains_key(&key) {
                    continue;
                }
                let (Some(geneset1), Some(geneset2)) = (pass.resolve(name1), pass.resolve(name2)) else {
                    log::warn!("gene set '{}' or '{}' has no genes defined, skipping", name1, name2);
                    continue;
                };
                if let Some(similarity) = self.compare(name1, name2, geneset1, geneset2, pass)? {
                    // Signature gene sets come from the inner loop, so the
                    // hub is named first.
                    let key = match self.mode {
                        SimilarityMode::Signature => key.swap(),
                        SimilarityMode::Enrichment => key.normalized(),
                    };
                    self.similarities.insert(key, similarity);
                }
            }
        }
        Ok(TaskOutcome::Completed(()))
    }

    fn compare(
        &self,
        name1: &str,
        name2: &str,
        geneset1: &GeneSet,
        geneset2: &GeneSet,
        pass: &Pass<'_>,
    ) -> Result<Option<GenesetSimilarity>> {
        let genes1 = geneset1.genes();
        let genes2 = geneset2.genes();
        let overlap = GeneSetOverlap::of(genes1, genes2);
        let Some(coefficient) = overlap.coefficient(
            self.config.metric,
            self.config.combined_constant,
            genes1.len(),
            genes2.len(),
        ) else {
            log::warn!("gene sets '{}' and '{}' are both empty, skipping", name1, name2);
            return Ok(None);
        };

        let (first, second) = match self.mode {
            SimilarityMode::Signature => (name2, name1),
            SimilarityMode::Enrichment if name1 <= name2 => (name1, name2),
            SimilarityMode::Enrichment => (name2, name1),
        };
        let mut similarity = GenesetSimilarity::new(
            first,
            second,
            coefficient,
            pass.edge_type,
            overlap.intersection,
            pass.indicator,
        );

        if self.filter.filter_type() != PostAnalysisFilterType::NoFilter {
            // The outer gene set plays the enrichment role, the inner one the signature role.
            let value = self.filter.compute_value(genes1, genes2, Some(&mut similarity))?;
            similarity.filter_value = Some(value);
            similarity.passes_filter = self.filter.passes(value);
        }
        Ok(Some(similarity))
    }
}

/// Gene set names are compared without regard to case.
fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
