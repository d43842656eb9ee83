use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Maps gene symbols to dense `u32` ids and back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneInterner {
    ids: AHashMap<String, u32>,
    symbols: Vec<String>,
}

impl GeneInterner {
    pub fn new() -> Self {
        GeneInterner::default()
    }

    /// Id of `symbol`, assigning the next free id on first sight.
    pub fn intern(&mut self, symbol: &str) -> u32 {
        if let Some(id) = self.ids.get(symbol) {
            return *id;
        }
        let id = self.symbols.len() as u32;
        self.symbols.push(symbol.to_owned());
        self.ids.insert(symbol.to_owned(), id);
        id
    }

    pub fn id(&self, symbol: &str) -> Option<u32> {
        self.ids.get(symbol).copied()
    }

    pub fn symbol(&self, id: u32) -> Option<&str> {
        self.symbols.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// A gene set as written in an input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneSetRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub genes: Vec<String>,
}

/// One data set of an input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetRecord {
    pub name: String,
    pub gene_sets: Vec<GeneSetRecord>,
    /// Names of the gene sets that passed the enrichment thresholds.
    pub of_interest: Vec<String>,
    /// Gene scores keyed by rank file name.
    #[serde(default)]
    pub ranks: AHashMap<String, AHashMap<String, f64>>,
    #[serde(default)]
    pub expression_universe: usize,
    #[serde(default)]
    pub expression_matrix_size: usize,
}

/// Top level input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRecord {
    pub data_sets: Vec<DataSetRecord>,
    #[serde(default)]
    pub signature_gene_sets: Vec<GeneSetRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut interner = GeneInterner::new();
        let tp53 = interner.intern("TP53");
        let brca1 = interner.intern("BRCA1");
        assert_eq!(interner.intern("TP53"), tp53);
        assert_ne!(tp53, brca1);
        assert_eq!(interner.symbol(brca1), Some("BRCA1"));
        assert_eq!(interner.id("EGFR"), None);
        assert_eq!(interner.len(), 2);
    }
}
