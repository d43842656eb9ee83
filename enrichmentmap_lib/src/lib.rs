pub mod methods;
pub mod model;
pub mod readers;
pub mod stat;
pub mod task;
pub mod writers;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed input: {0}")]
    MalformedFile(#[from] MalformedError),
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported enrichment map: {0}")]
    UnsupportedMap(String),
    #[error("statistics error: {0}")]
    Statistics(#[from] StatisticsError),
    #[error("similarity computation did not finish within {0:?}")]
    Timeout(Duration),
    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum MalformedError {
    #[error("gene set '{0}' is listed as of interest but not defined")]
    UnknownGeneSet(String),
    #[error("gene set '{0}' is defined more than once")]
    DuplicateGeneSet(String),
    #[error("no data sets found")]
    NoDataSets,
}

#[derive(Debug, Error, PartialEq)]
pub enum StatisticsError {
    #[error("found NaN value")]
    FoundNANValue,
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_error_converts() {
        let err: Error = StatisticsError::FoundNANValue.into();
        assert!(matches!(err, Error::Statistics(StatisticsError::FoundNANValue)));
        assert_eq!(err.to_string(), "statistics error: found NaN value");
    }
}
