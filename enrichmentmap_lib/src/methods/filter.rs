use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::model::{GenesetSimilarity, HypergeomStats, MannWhitneyStats, Ranking};
use crate::stat::{hyper_geom_pvalue_sum, MannWhitneyCache, MannWhitneyResult, MannWhitneySide};
use crate::{Error, Result};

/// P-value reported when a Mann-Whitney test has no ranking to compare against.
/// Lies outside `[0, 1]` so it can never pass a cutoff.
pub const MISSING_RANKS_P_VALUE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PostAnalysisFilterType {
    #[default]
    NoFilter,
    Hypergeom,
    MannWhitTwoSided,
    MannWhitGreater,
    MannWhitLess,
    /// Overlap of at least `cutoff` genes.
    Number,
    /// Overlap of at least `cutoff` percent of the enrichment gene set.
    Percent,
    /// Overlap of at least `cutoff` percent of the signature gene set.
    Specific,
}

impl PostAnalysisFilterType {
    pub fn default_value(&self) -> f64 {
        match self {
            PostAnalysisFilterType::NoFilter => 0.0,
            PostAnalysisFilterType::Hypergeom
            | PostAnalysisFilterType::MannWhitTwoSided
            | PostAnalysisFilterType::MannWhitGreater
            | PostAnalysisFilterType::MannWhitLess => 0.05,
            PostAnalysisFilterType::Number => 5.0,
            PostAnalysisFilterType::Percent | PostAnalysisFilterType::Specific => 25.0,
        }
    }

    pub fn mann_whitney_side(&self) -> Option<MannWhitneySide> {
        match self {
            PostAnalysisFilterType::MannWhitTwoSided => Some(MannWhitneySide::TwoSided),
            PostAnalysisFilterType::MannWhitGreater => Some(MannWhitneySide::Greater),
            PostAnalysisFilterType::MannWhitLess => Some(MannWhitneySide::Less),
            _ => None,
        }
    }

    pub fn is_mann_whitney(&self) -> bool {
        self.mann_whitney_side().is_some()
    }
}

impl FromStr for PostAnalysisFilterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" | "no-filter" => Ok(PostAnalysisFilterType::NoFilter),
            "hypergeom" | "hypergeometric" => Ok(PostAnalysisFilterType::Hypergeom),
            "mann-whit" | "mann-whit-two-sided" => Ok(PostAnalysisFilterType::MannWhitTwoSided),
            "mann-whit-greater" => Ok(PostAnalysisFilterType::MannWhitGreater),
            "mann-whit-less" => Ok(PostAnalysisFilterType::MannWhitLess),
            "number" => Ok(PostAnalysisFilterType::Number),
            "percent" => Ok(PostAnalysisFilterType::Percent),
            "specific" => Ok(PostAnalysisFilterType::Specific),
            other => Err(Error::InvalidArgument(format!("unknown filter type '{other}'"))),
        }
    }
}

impl fmt::Display for PostAnalysisFilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostAnalysisFilterType::NoFilter => "no-filter",
            PostAnalysisFilterType::Hypergeom => "hypergeom",
            PostAnalysisFilterType::MannWhitTwoSided => "mann-whit-two-sided",
            PostAnalysisFilterType::MannWhitGreater => "mann-whit-greater",
            PostAnalysisFilterType::MannWhitLess => "mann-whit-less",
            PostAnalysisFilterType::Number => "number",
            PostAnalysisFilterType::Percent => "percent",
            PostAnalysisFilterType::Specific => "specific",
        };
        f.write_str(name)
    }
}

/// A post-analysis filter: computes a value for a pair of gene sets and
/// decides whether that value passes the cutoff.
///
/// Percent, Number and Specific pass when the value is at least the cutoff
/// (percent cutoffs are given on a 0-100 scale). The statistical filters
/// pass when the p-value is at most the cutoff.
#[derive(Clone)]
pub enum FilterMetric {
    NoFilter,
    Percent {
        cutoff: f64,
    },
    Number {
        cutoff: f64,
    },
    Specific {
        cutoff: f64,
    },
    Hypergeom {
        cutoff: f64,
        universe_size: usize,
    },
    MannWhitney {
        cutoff: f64,
        side: MannWhitneySide,
        ranks: Arc<Ranking>,
        cache: Arc<MannWhitneyCache>,
    },
}

impl fmt::Debug for FilterMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterMetric({}, cutoff = {})", self.filter_type(), self.cutoff())
    }
}

impl FilterMetric {
    /// Builds a Mann-Whitney filter.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `filter_type` is not one of the three
    /// Mann-Whitney variants.
    pub fn mann_whitney(
        cutoff: f64,
        ranks: Arc<Ranking>,
        filter_type: PostAnalysisFilterType,
        cache: Arc<MannWhitneyCache>,
    ) -> Result<Self> {
        let side = filter_type.mann_whitney_side().ok_or_else(|| {
            Error::InvalidArgument(format!("filter type is not Mann-Whitney: {filter_type}"))
        })?;
        Ok(FilterMetric::MannWhitney {
            cutoff,
            side,
            ranks,
            cache,
        })
    }

    /// Builds the filter for `filter_type`.
    ///
    /// `universe_size` is only used by the hypergeometric filter; `ranks` is
    /// required by the Mann-Whitney variants.
    pub fn new(
        filter_type: PostAnalysisFilterType,
        cutoff: f64,
        universe_size: usize,
        ranks: Option<Arc<Ranking>>,
        cache: Arc<MannWhitneyCache>,
    ) -> Result<Self> {
        Ok(match filter_type {
            PostAnalysisFilterType::NoFilter => FilterMetric::NoFilter,
            PostAnalysisFilterType::Percent => FilterMetric::Percent { cutoff },
            PostAnalysisFilterType::Number => FilterMetric::Number { cutoff },
            PostAnalysisFilterType::Specific => FilterMetric::Specific { cutoff },
            PostAnalysisFilterType::Hypergeom => FilterMetric::Hypergeom {
                cutoff,
                universe_size,
            },
            PostAnalysisFilterType::MannWhitTwoSided
            | PostAnalysisFilterType::MannWhitGreater
            | PostAnalysisFilterType::MannWhitLess => {
                let ranks = ranks.ok_or_else(|| {
                    Error::InvalidArgument(format!("{filter_type} filter requires a ranking"))
                })?;
                FilterMetric::mann_whitney(cutoff, ranks, filter_type, cache)?
            }
        })
    }

    pub fn filter_type(&self) -> PostAnalysisFilterType {
        match self {
            FilterMetric::NoFilter => PostAnalysisFilterType::NoFilter,
            FilterMetric::Percent { .. } => PostAnalysisFilterType::Percent,
            FilterMetric::Number { .. } => PostAnalysisFilterType::Number,
            FilterMetric::Specific { .. } => PostAnalysisFilterType::Specific,
            FilterMetric::Hypergeom { .. } => PostAnalysisFilterType::Hypergeom,
            FilterMetric::MannWhitney { side, .. } => match side {
                MannWhitneySide::TwoSided => PostAnalysisFilterType::MannWhitTwoSided,
                MannWhitneySide::Greater => PostAnalysisFilterType::MannWhitGreater,
                MannWhitneySide::Less => PostAnalysisFilterType::MannWhitLess,
            },
        }
    }

    pub fn cutoff(&self) -> f64 {
        match self {
            FilterMetric::NoFilter => 0.0,
            FilterMetric::Percent { cutoff }
            | FilterMetric::Number { cutoff }
            | FilterMetric::Specific { cutoff }
            | FilterMetric::Hypergeom { cutoff, .. }
            | FilterMetric::MannWhitney { cutoff, .. } => *cutoff,
        }
    }

    pub fn passes(&self, value: f64) -> bool {
        match self {
            FilterMetric::NoFilter => true,
            FilterMetric::Percent { cutoff } | FilterMetric::Specific { cutoff } => {
                value >= cutoff / 100.0
            }
            FilterMetric::Number { cutoff } => value >= *cutoff,
            FilterMetric::Hypergeom { cutoff, .. } | FilterMetric::MannWhitney { cutoff, .. } => {
                value <= *cutoff
            }
        }
    }

    /// Computes the filter value for an enrichment gene set and a signature
    /// gene set. The statistical filters also record their intermediate
    /// statistics on `similarity` when one is given.
    pub fn compute_value(
        &self,
        gene_set: &AHashSet<u32>,
        sig_set: &AHashSet<u32>,
        similarity: Option<&mut GenesetSimilarity>,
    ) -> Result<f64> {
        let intersection = || -> Vec<u32> { gene_set.intersection(sig_set).copied().collect() };
        match self {
            FilterMetric::NoFilter => Ok(0.0),
            FilterMetric::Percent { .. } => Ok(fraction(intersection().len(), gene_set.len())),
            FilterMetric::Number { .. } => Ok(intersection().len() as f64),
            FilterMetric::Specific { .. } => Ok(fraction(intersection().len(), sig_set.len())),
            FilterMetric::Hypergeom { universe_size, .. } => {
                let stats = hypergeom_overlap(
                    *universe_size,
                    sig_set.len(),
                    gene_set.len(),
                    intersection().len(),
                )?;
                if let Some(similarity) = similarity {
                    similarity.hypergeom = Some(stats);
                }
                Ok(stats.p_value)
            }
            FilterMetric::MannWhitney {
                side, ranks, cache, ..
            } => {
                let stats = mann_whitney_overlap(&intersection(), ranks, cache)?;
                if let Some(similarity) = similarity {
                    similarity.mann_whitney = Some(stats);
                }
                Ok(MannWhitneyResult::from(&stats).p_value(*side))
            }
        }
    }
}

fn fraction(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Hypergeometric overlap statistics. An empty overlap is never significant
/// and gets a p-value of exactly 1.
pub fn hypergeom_overlap(u: usize, n: usize, m: usize, k: usize) -> Result<HypergeomStats> {
    let p_value = if k > 0 {
        hyper_geom_pvalue_sum(u, n, m, k, 0)?
    } else {
        1.0
    };
    Ok(HypergeomStats { p_value, u, n, m, k })
}

/// Mann-Whitney statistics of the overlap genes' scores against the whole
/// ranking.
///
/// An empty ranking yields [`MISSING_RANKS_P_VALUE`] on every side with the
/// missing-ranks flag set. If none of the overlap genes is ranked there is
/// nothing to test and every side is 1.
pub fn mann_whitney_overlap(
    overlap: &[u32],
    ranks: &Ranking,
    cache: &MannWhitneyCache,
) -> Result<MannWhitneyStats> {
    if ranks.is_empty() {
        return Ok(MannWhitneyStats {
            two_sided: MISSING_RANKS_P_VALUE,
            greater: MISSING_RANKS_P_VALUE,
            less: MISSING_RANKS_P_VALUE,
            missing_ranks: true,
        });
    }
    let overlap_scores: Vec<f64> = overlap.iter().filter_map(|g| ranks.score(*g)).collect();
    let result = if overlap_scores.is_empty() {
        MannWhitneyResult::no_signal()
    } else {
        cache.test(&overlap_scores, ranks.scores())?
    };
    Ok(MannWhitneyStats {
        two_sided: result.two_sided,
        greater: result.greater,
        less: result.less,
        missing_ranks: false,
    })
}

impl From<&MannWhitneyStats> for MannWhitneyResult {
    fn from(stats: &MannWhitneyStats) -> Self {
        MannWhitneyResult {
            two_sided: stats.two_sided,
            greater: stats.greater,
            less: stats.less,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::assert_almost_eq;

    const THRESHOLD: f64 = 1e-12;

    fn set(genes: &[u32]) -> AHashSet<u32> {
        genes.iter().copied().collect()
    }

    fn cache() -> Arc<MannWhitneyCache> {
        Arc::new(MannWhitneyCache::new())
    }

    #[test]
    fn simple_filters() {
        let gs = set(&[1, 2, 3, 4]);
        let sig = set(&[3, 4, 5, 6, 7, 8, 9, 10]);

        let percent = FilterMetric::Percent { cutoff: 50.0 };
        let value = percent.compute_value(&gs, &sig, None).unwrap();
        assert_almost_eq!(value, 0.5, THRESHOLD);
        assert!(percent.passes(value));

        let number = FilterMetric::Number { cutoff: 3.0 };
        let value = number.compute_value(&gs, &sig, None).unwrap();
        assert_eq!(value, 2.0);
        assert!(!number.passes(value));

        let specific = FilterMetric::Specific { cutoff: 25.0 };
        let value = specific.compute_value(&gs, &sig, None).unwrap();
        assert_almost_eq!(value, 0.25, THRESHOLD);
        assert!(specific.passes(value));

        let none = FilterMetric::NoFilter;
        assert_eq!(none.compute_value(&gs, &sig, None).unwrap(), 0.0);
        assert!(none.passes(f64::MAX));
    }

    #[test]
    fn hypergeom_records_stats() {
        let gs = set(&[1, 2, 3, 4]);
        let sig = set(&[3, 4, 5]);
        let filter = FilterMetric::Hypergeom {
            cutoff: 0.05,
            universe_size: 100,
        };
        let mut sim = GenesetSimilarity::new("sig", "gs", 0.5, "sig", [3, 4], 1);
        let value = filter.compute_value(&gs, &sig, Some(&mut sim)).unwrap();
        let stats = sim.hypergeom.unwrap();
        assert_eq!((stats.u, stats.n, stats.m, stats.k), (100, 3, 4, 2));
        assert_eq!(stats.p_value, value);
        assert!(filter.passes(value));
    }

    #[test]
    fn hypergeom_empty_intersection_is_one() {
        let filter = FilterMetric::Hypergeom {
            cutoff: 0.05,
            universe_size: 100,
        };
        let value = filter.compute_value(&set(&[1, 2]), &set(&[3, 4]), None).unwrap();
        assert_eq!(value, 1.0);
        assert!(!filter.passes(value));
    }

    #[test]
    fn mann_whitney_missing_ranks() {
        let filter = FilterMetric::mann_whitney(
            0.05,
            Arc::new(Ranking::default()),
            PostAnalysisFilterType::MannWhitGreater,
            cache(),
        )
        .unwrap();
        let mut sim = GenesetSimilarity::new("sig", "gs", 0.5, "sig", [1], 1);
        let value = filter
            .compute_value(&set(&[1, 2]), &set(&[1, 3]), Some(&mut sim))
            .unwrap();
        assert_eq!(value, MISSING_RANKS_P_VALUE);
        assert!(!filter.passes(value));
        let stats = sim.mann_whitney.unwrap();
        assert!(stats.missing_ranks);
        assert_eq!(stats.two_sided, MISSING_RANKS_P_VALUE);
    }

    #[test]
    fn mann_whitney_uses_ranks() {
        let ranks = Arc::new(Ranking::new((1..=20).map(|g| (g, g as f64))));
        let filter = FilterMetric::mann_whitney(
            0.05,
            ranks,
            PostAnalysisFilterType::MannWhitGreater,
            cache(),
        )
        .unwrap();
        let top = set(&[17, 18, 19, 20]);
        let value = filter.compute_value(&top, &top, None).unwrap();
        assert!(filter.passes(value));
    }

    #[test]
    fn mann_whitney_reports_the_configured_side() {
        let ranks = Arc::new(Ranking::new((1..=20).map(|g| (g, g as f64))));
        let top = set(&[17, 18, 19, 20]);
        let sides: [(PostAnalysisFilterType, fn(&MannWhitneyStats) -> f64); 3] = [
            (PostAnalysisFilterType::MannWhitTwoSided, |s| s.two_sided),
            (PostAnalysisFilterType::MannWhitGreater, |s| s.greater),
            (PostAnalysisFilterType::MannWhitLess, |s| s.less),
        ];
        for (filter_type, expected) in sides {
            let filter = FilterMetric::mann_whitney(0.05, Arc::clone(&ranks), filter_type, cache()).unwrap();
            let mut sim = GenesetSimilarity::new("sig", "gs", 0.5, "sig", [17], 1);
            let value = filter.compute_value(&top, &top, Some(&mut sim)).unwrap();
            assert_eq!(value, expected(&sim.mann_whitney.unwrap()));
        }
    }

    #[test]
    fn mann_whitney_rejects_other_types() {
        let err = FilterMetric::mann_whitney(
            0.05,
            Arc::new(Ranking::default()),
            PostAnalysisFilterType::Hypergeom,
            cache(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn filter_type_round_trips_through_new() {
        for filter_type in [
            PostAnalysisFilterType::NoFilter,
            PostAnalysisFilterType::Percent,
            PostAnalysisFilterType::Number,
            PostAnalysisFilterType::Specific,
            PostAnalysisFilterType::Hypergeom,
            PostAnalysisFilterType::MannWhitLess,
        ] {
            let filter = FilterMetric::new(
                filter_type,
                filter_type.default_value(),
                100,
                Some(Arc::new(Ranking::default())),
                cache(),
            )
            .unwrap();
            assert_eq!(filter.filter_type(), filter_type);
            assert_eq!(filter.cutoff(), filter_type.default_value());
        }
        assert!(FilterMetric::new(PostAnalysisFilterType::MannWhitLess, 0.05, 100, None, cache()).is_err());
        assert_eq!(
            "mann_whit_greater".parse::<PostAnalysisFilterType>().unwrap(),
            PostAnalysisFilterType::MannWhitGreater
        );
    }
}
