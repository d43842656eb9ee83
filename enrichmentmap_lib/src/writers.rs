//! Collection of utilities to save results to a file/folder
use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Serialize;

use crate::model::{GenesetSimilarity, SimilarityResults};
use crate::readers::utils::GeneInterner;
use crate::Result;

pub fn save_json(path: &str, results: &SimilarityResults) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    write_json(file, results)
}

pub fn write_json<W: Write>(mut writer: W, results: &SimilarityResults) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.flush()?;
    Ok(())
}

/// One line of the edge table.
#[derive(Debug, Serialize)]
struct EdgeRow<'a> {
    key: &'a str,
    name_a: &'a str,
    edge_type: &'a str,
    name_b: &'a str,
    data_set: &'a str,
    coefficient: f64,
    overlap_size: usize,
    overlap_genes: String,
    hypergeom_p_value: Option<f64>,
    mann_whitney_two_sided: Option<f64>,
    mann_whitney_greater: Option<f64>,
    mann_whitney_less: Option<f64>,
    filter_value: Option<f64>,
    passes_filter: bool,
}

impl<'a> EdgeRow<'a> {
    fn new(key: &'a str, sim: &'a GenesetSimilarity, interner: Option<&GeneInterner>) -> Self {
        let overlap_genes = sim
            .overlap_genes
            .iter()
            .map(|id| match interner.and_then(|i| i.symbol(*id)) {
                Some(symbol) => symbol.to_owned(),
                None => id.to_string(),
            })
            .collect::<Vec<String>>()
            .join(",");
        EdgeRow {
            key,
            name_a: &sim.name_a,
            edge_type: &sim.edge_type,
            name_b: &sim.name_b,
            data_set: sim.data_set.as_deref().unwrap_or_default(),
            coefficient: sim.coefficient,
            overlap_size: sim.overlap_size(),
            overlap_genes,
            hypergeom_p_value: sim.hypergeom.map(|h| h.p_value),
            mann_whitney_two_sided: sim.mann_whitney.map(|m| m.two_sided),
            mann_whitney_greater: sim.mann_whitney.map(|m| m.greater),
            mann_whitney_less: sim.mann_whitney.map(|m| m.less),
            filter_value: sim.filter_value,
            passes_filter: sim.passes_filter,
        }
    }
}

/// Saves the records as a tab separated table sorted by key. Overlap genes
/// are written as symbols when an interner is given, as ids otherwise.
pub fn save_tsv(path: &str, results: &SimilarityResults, interner: Option<&GeneInterner>) -> Result<()> {
    let file = File::create(path)?;
    write_tsv(file, results, interner)
}

pub fn write_tsv<W: Write>(writer: W, results: &SimilarityResults, interner: Option<&GeneInterner>) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for (key, sim) in results.sorted() {
        wtr.serialize(EdgeRow::new(key, sim, interner))?;
    }
    wtr.flush()?;
    Ok(())
}
