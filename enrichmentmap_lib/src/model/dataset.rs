use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use super::{GeneSet, GeneSetCollection, Ranking};

/// One enrichment data set: its gene sets, the subset of interest and the
/// expression context used for hypergeometric universes and rank tests.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub name: String,
    /// Every gene set loaded for this data set.
    pub gene_sets: GeneSetCollection,
    /// Gene sets that passed the enrichment thresholds.
    pub gene_sets_of_interest: GeneSetCollection,
    /// Names of gene sets with an enrichment result in this data set.
    pub enrichments: AHashSet<String>,
    /// Rankings keyed by rank file name.
    pub ranks: BTreeMap<String, Arc<Ranking>>,
    /// Number of genes in the expression file.
    pub expression_universe: usize,
    /// Number of rows in the expression matrix after intersecting with the gene sets.
    pub expression_matrix_size: usize,
}

impl DataSet {
    pub fn new(name: impl Into<String>) -> Self {
        DataSet {
            name: name.into(),
            ..DataSet::default()
        }
    }

    pub fn gene_set(&self, name: &str) -> Option<&GeneSet> {
        self.gene_sets.get(name)
    }

    /// Adds a gene set that is of interest (and therefore enriched).
    pub fn add_gene_set_of_interest(&mut self, gene_set: GeneSet) {
        let name = gene_set.name().to_owned();
        self.enrichments.insert(name.clone());
        self.gene_sets.insert(name.clone(), gene_set.clone());
        self.gene_sets_of_interest.insert(name, gene_set);
    }
}

/// The inputs shared by every similarity computation on one map.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentMap {
    pub data_sets: Vec<DataSet>,
    /// Signature gene sets loaded for post-analysis.
    pub signature_gene_sets: GeneSetCollection,
    /// Number of distinct genes known to the map (the GMT universe).
    pub number_of_genes: usize,
}

impl EnrichmentMap {
    pub fn data_set(&self, name: &str) -> Option<&DataSet> {
        self.data_sets.iter().find(|ds| ds.name == name)
    }

    /// Gene sets of interest across every data set. Later data sets win on
    /// name clashes.
    pub fn all_gene_sets_of_interest(&self) -> GeneSetCollection {
        let mut all = AHashMap::default();
        for ds in &self.data_sets {
            for (name, gs) in &ds.gene_sets_of_interest {
                all.insert(name.clone(), gs.clone());
            }
        }
        all
    }

    pub fn all_gene_set_of_interest_names(&self) -> AHashSet<String> {
        self.data_sets
            .iter()
            .flat_map(|ds| ds.gene_sets_of_interest.keys().cloned())
            .collect()
    }

    /// Every gene set of every data set.
    pub fn all_gene_sets(&self) -> GeneSetCollection {
        let mut all = AHashMap::default();
        for ds in &self.data_sets {
            for (name, gs) in &ds.gene_sets {
                all.insert(name.clone(), gs.clone());
            }
        }
        all
    }

    /// Genes that appear in any gene set of interest.
    pub fn all_enrichment_genes(&self) -> AHashSet<u32> {
        self.data_sets
            .iter()
            .flat_map(|ds| ds.gene_sets_of_interest.values())
            .flat_map(|gs| gs.genes().iter().copied())
            .collect()
    }
}
