pub mod dataset;
pub mod geneset;
pub mod key;
pub mod ranking;
pub mod similarity;

pub use dataset::{DataSet, EnrichmentMap};
pub use geneset::{GeneSet, GeneSetCollection};
pub use key::SimilarityKey;
pub use ranking::Ranking;
pub use similarity::{GenesetSimilarity, HypergeomStats, MannWhitneyStats, SimilarityResults};
