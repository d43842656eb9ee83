use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Dataset indicator for comparisons over the combined gene sets of interest.
pub const COMBINED_SETS: u8 = 0;
/// Comparison within the first data set (or a signature comparison).
pub const DATASET_1: u8 = 1;
/// Comparison within the second data set.
pub const DATASET_2: u8 = 2;
/// Comparison across the first and second data sets.
pub const CROSS_DATASET: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HypergeomStats {
    pub p_value: f64,
    /// Universe size.
    pub u: usize,
    /// Signature genes in the universe.
    pub n: usize,
    /// Enrichment genes in the universe.
    pub m: usize,
    /// Size of the overlap.
    pub k: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitneyStats {
    pub two_sided: f64,
    pub greater: f64,
    pub less: f64,
    pub missing_ranks: bool,
}

/// Result of comparing two gene sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesetSimilarity {
    pub name_a: String,
    pub name_b: String,
    pub coefficient: f64,
    pub edge_type: String,
    /// Overlapping gene ids, ascending.
    pub overlap_genes: Vec<u32>,
    pub dataset_indicator: u8,
    pub data_set: Option<String>,
    pub hypergeom: Option<HypergeomStats>,
    pub mann_whitney: Option<MannWhitneyStats>,
    /// Value computed by the post-analysis filter, if one ran.
    pub filter_value: Option<f64>,
    /// Whether `filter_value` passed the filter cutoff.
    pub passes_filter: bool,
}

impl GenesetSimilarity {
    pub fn new<I>(
        name_a: impl Into<String>,
        name_b: impl Into<String>,
        coefficient: f64,
        edge_type: impl Into<String>,
        overlap: I,
        dataset_indicator: u8,
    ) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut overlap_genes: Vec<u32> = overlap.into_iter().collect();
        overlap_genes.sort_unstable();
        GenesetSimilarity {
            name_a: name_a.into(),
            name_b: name_b.into(),
            coefficient,
            edge_type: edge_type.into(),
            overlap_genes,
            dataset_indicator,
            data_set: None,
            hypergeom: None,
            mann_whitney: None,
            filter_value: None,
            passes_filter: true,
        }
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_genes.len()
    }
}

/// Similarity records keyed by the display form of their [`SimilarityKey`](super::SimilarityKey).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResults {
    pub similarities: AHashMap<String, GenesetSimilarity>,
}

impl SimilarityResults {
    pub fn len(&self) -> usize {
        self.similarities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.similarities.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&GenesetSimilarity> {
        self.similarities.get(key)
    }

    /// Records whose coefficient reaches `cutoff` and that passed the
    /// post-analysis filter, sorted by key.
    pub fn passing(&self, cutoff: f64) -> Vec<(&String, &GenesetSimilarity)> {
        let mut edges: Vec<(&String, &GenesetSimilarity)> = self
            .similarities
            .iter()
            .filter(|(_, sim)| sim.passes_filter && sim.coefficient >= cutoff)
            .collect();
        edges.sort_by(|a, b| a.0.cmp(b.0));
        edges
    }

    /// All records sorted by key.
    pub fn sorted(&self) -> Vec<(&String, &GenesetSimilarity)> {
        let mut all: Vec<(&String, &GenesetSimilarity)> = self.similarities.iter().collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all
    }
}

impl FromIterator<(String, GenesetSimilarity)> for SimilarityResults {
    fn from_iter<T: IntoIterator<Item = (String, GenesetSimilarity)>>(iter: T) -> Self {
        SimilarityResults {
            similarities: iter.into_iter().collect(),
        }
    }
}
