use std::fmt;
use std::str::FromStr;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Set similarity measure used for gene set edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimilarityMetric {
    /// `|A ∩ B| / |A ∪ B|`
    Jaccard,
    /// `|A ∩ B| / min(|A|, |B|)`
    #[default]
    Overlap,
    /// `k * overlap + (1 - k) * jaccard`
    Combined,
}

impl FromStr for SimilarityMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jaccard" => Ok(SimilarityMetric::Jaccard),
            "overlap" => Ok(SimilarityMetric::Overlap),
            "combined" => Ok(SimilarityMetric::Combined),
            other => Err(Error::InvalidArgument(format!("unknown similarity metric '{other}'"))),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimilarityMetric::Jaccard => "jaccard",
            SimilarityMetric::Overlap => "overlap",
            SimilarityMetric::Combined => "combined",
        };
        f.write_str(name)
    }
}

/// Computes the similarity coefficient from set sizes.
///
/// Returns `None` when the union is empty, i.e. both gene sets are empty and
/// no coefficient is defined. If only one set is empty the intersection is
/// empty as well and the overlap coefficient is taken as 0.
pub fn similarity_coefficient(
    metric: SimilarityMetric,
    combined_constant: f64,
    intersection: usize,
    union: usize,
    genes1: usize,
    genes2: usize,
) -> Option<f64> {
    if union == 0 {
        return None;
    }
    let intersection = intersection as f64;
    let jaccard = || intersection / union as f64;
    let overlap = || {
        let smaller = genes1.min(genes2);
        if smaller == 0 {
            0.0
        } else {
            intersection / smaller as f64
        }
    };
    Some(match metric {
        SimilarityMetric::Jaccard => jaccard(),
        SimilarityMetric::Overlap => overlap(),
        SimilarityMetric::Combined => {
            combined_constant * overlap() + (1.0 - combined_constant) * jaccard()
        }
    })
}

/// Intersection and union size of two gene id sets.
pub struct GeneSetOverlap {
    pub intersection: Vec<u32>,
    pub union_size: usize,
}

impl GeneSetOverlap {
    pub fn of(genes1: &AHashSet<u32>, genes2: &AHashSet<u32>) -> Self {
        let (small, large) = if genes1.len() <= genes2.len() {
            (genes1, genes2)
        } else {
            (genes2, genes1)
        };
        let intersection: Vec<u32> = small.iter().filter(|g| large.contains(g)).copied().collect();
        let union_size = genes1.len() + genes2.len() - intersection.len();
        GeneSetOverlap {
            intersection,
            union_size,
        }
    }

    pub fn coefficient(
        &self,
        metric: SimilarityMetric,
        combined_constant: f64,
        genes1: usize,
        genes2: usize,
    ) -> Option<f64> {
        similarity_coefficient(
            metric,
            combined_constant,
            self.intersection.len(),
            self.union_size,
            genes1,
            genes2,
        )
    }
}
