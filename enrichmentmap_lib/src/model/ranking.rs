use std::sync::Arc;

use ahash::AHashMap;

/// Ranked gene scores from one rank file.
///
/// The full score vector is kept behind an [`Arc`] so every Mann-Whitney
/// comparison against this ranking shares one background sample.
#[derive(Debug, Clone)]
pub struct Ranking {
    by_gene: AHashMap<u32, f64>,
    scores: Arc<[f64]>,
}

impl Default for Ranking {
    fn default() -> Self {
        Ranking {
            by_gene: AHashMap::default(),
            scores: Arc::from(Vec::new()),
        }
    }
}

impl Ranking {
    pub fn new<I>(ranks: I) -> Self
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        let by_gene: AHashMap<u32, f64> = ranks.into_iter().collect();
        let mut genes: Vec<(&u32, &f64)> = by_gene.iter().collect();
        genes.sort_by_key(|(gene, _)| **gene);
        let scores: Arc<[f64]> = genes.into_iter().map(|(_, score)| *score).collect();
        Ranking { by_gene, scores }
    }

    pub fn score(&self, gene: u32) -> Option<f64> {
        self.by_gene.get(&gene).copied()
    }

    /// All scores, ordered by gene id.
    pub fn scores(&self) -> &Arc<[f64]> {
        &self.scores
    }

    pub fn is_empty(&self) -> bool {
        self.by_gene.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_gene.len()
    }
}
