use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// Gene sets keyed by name. Callers are expected to normalise name case.
pub type GeneSetCollection = AHashMap<String, GeneSet>;

/// A named set of interned gene identifiers.
///
/// Gene sets are built once by a reader and never change afterwards; the
/// similarity engines only ever borrow them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSet {
    name: String,
    description: String,
    genes: AHashSet<u32>,
    source: Option<String>,
}

impl GeneSet {
    /// Creates a gene set. The source tag is taken from the second `%`
    /// separated token of the name, e.g. `APOPTOSIS%REACTOME%R-HSA-109581`
    /// has source `REACTOME`.
    pub fn new(name: impl Into<String>, description: impl Into<String>, genes: AHashSet<u32>) -> Self {
        let name = name.into();
        let source = name
            .split('%')
            .nth(1)
            .map(|token| token.to_owned());
        GeneSet {
            name,
            description: description.into(),
            genes,
            source,
        }
    }

    pub fn from_genes<I>(name: impl Into<String>, description: impl Into<String>, genes: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        GeneSet::new(name, description, genes.into_iter().collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn genes(&self) -> &AHashSet<u32> {
        &self.genes
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Genes of this set that are also part of `universe`.
    pub fn restricted_to(&self, universe: &AHashSet<u32>) -> AHashSet<u32> {
        self.genes.intersection(universe).copied().collect()
    }
}
