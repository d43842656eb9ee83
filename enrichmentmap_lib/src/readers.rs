pub mod utils;
use crate::model::{DataSet, EnrichmentMap, GeneSet, GeneSetCollection, Ranking};
use crate::{MalformedError, Result};
use ahash::AHashMap;
use std::{
    fs::File,
    io::{BufReader, Read},
};
use utils::{GeneInterner, GeneSetRecord, MapRecord};

/// Reads a tab separated GMT file: name, description, then one gene per column.
/// Empty gene columns are ignored.
pub fn read_gmt_file(path: &str, interner: &mut GeneInterner) -> Result<GeneSetCollection> {
    let file = File::open(path)?;
    read_gmt(file, interner)
}

pub fn read_gmt<R: Read>(reader: R, interner: &mut GeneInterner) -> Result<GeneSetCollection> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(false)
        .from_reader(reader);
    let mut gene_sets = GeneSetCollection::default();
    for r in rdr.records() {
        let record = r?;
        let Some(name) = record.get(0).filter(|n| !n.is_empty()) else {
            continue;
        };
        let description = record.get(1).unwrap_or_default();
        let genes = record
            .iter()
            .skip(2)
            .filter(|g| !g.is_empty())
            .map(|g| interner.intern(g));
        let gene_set = GeneSet::from_genes(name, description, genes);
        if gene_sets.insert(name.to_owned(), gene_set).is_some() {
            return Err(MalformedError::DuplicateGeneSet(name.to_owned()).into());
        }
    }
    Ok(gene_sets)
}

/// Reads a two column rank file (gene, score). Lines whose score does not
/// parse, such as a header, are skipped.
pub fn read_rank_file(path: &str, interner: &mut GeneInterner) -> Result<Ranking> {
    let file = File::open(path)?;
    read_rank(file, interner)
}

pub fn read_rank<R: Read>(reader: R, interner: &mut GeneInterner) -> Result<Ranking> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(false)
        .from_reader(reader);
    let mut scores = Vec::new();
    for r in rdr.records() {
        let record = r?;
        let (Some(gene), Some(score)) = (record.get(0), record.get(1)) else {
            continue;
        };
        match score.trim().parse::<f64>() {
            Ok(score) => scores.push((interner.intern(gene), score)),
            Err(_) => log::debug!("skipping rank line for '{}'", gene),
        }
    }
    Ok(Ranking::new(scores))
}

/// Reads an enrichment map document (see [`utils::MapRecord`]) from a JSON file.
pub fn read_map_file(path: &str) -> Result<(EnrichmentMap, GeneInterner)> {
    let file = File::open(path)?;
    read_map(BufReader::new(file))
}

pub fn read_map<R: Read>(reader: R) -> Result<(EnrichmentMap, GeneInterner)> {
    let record: MapRecord = serde_json::from_reader(reader)?;
    let mut interner = GeneInterner::new();
    let map = build_map(record, &mut interner)?;
    Ok((map, interner))
}

/// Interns every gene of `record` and assembles the map. The number of
/// genes of the map is the number of distinct genes seen.
pub fn build_map(record: MapRecord, interner: &mut GeneInterner) -> Result<EnrichmentMap> {
    if record.data_sets.is_empty() {
        return Err(MalformedError::NoDataSets.into());
    }
    let mut data_sets = Vec::with_capacity(record.data_sets.len());
    for ds_record in record.data_sets {
        let mut data_set = DataSet::new(ds_record.name);
        data_set.gene_sets = collect_gene_sets(ds_record.gene_sets, interner)?;
        for name in ds_record.of_interest {
            let gene_set = data_set
                .gene_set(&name)
                .cloned()
                .ok_or_else(|| MalformedError::UnknownGeneSet(name.clone()))?;
            data_set.add_gene_set_of_interest(gene_set);
        }
        for (rank_file, scores) in ds_record.ranks {
            let ranking = Ranking::new(
                scores
                    .into_iter()
                    .map(|(gene, score)| (interner.intern(&gene), score)),
            );
            data_set.ranks.insert(rank_file, ranking.into());
        }
        data_set.expression_universe = ds_record.expression_universe;
        data_set.expression_matrix_size = ds_record.expression_matrix_size;
        log::debug!(
            "data set '{}': {} gene sets, {} of interest, {} rankings",
            data_set.name,
            data_set.gene_sets.len(),
            data_set.gene_sets_of_interest.len(),
            data_set.ranks.len()
        );
        data_sets.push(data_set);
    }
    let signature_gene_sets = collect_gene_sets(record.signature_gene_sets, interner)?;
    Ok(EnrichmentMap {
        data_sets,
        signature_gene_sets,
        number_of_genes: interner.len(),
    })
}

fn collect_gene_sets(records: Vec<GeneSetRecord>, interner: &mut GeneInterner) -> Result<GeneSetCollection> {
    let mut gene_sets: GeneSetCollection = AHashMap::with_capacity(records.len());
    for record in records {
        let genes = record.genes.iter().map(|g| interner.intern(g));
        let gene_set = GeneSet::from_genes(record.name.as_str(), record.description, genes);
        if gene_sets.insert(record.name.clone(), gene_set).is_some() {
            return Err(MalformedError::DuplicateGeneSet(record.name).into());
        }
    }
    Ok(gene_sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn gmt_lines() {
        let gmt = "APOPTOSIS%REACTOME%R-HSA-109581\thttp://x\tTP53\tBAX\t\nDNA_REPAIR%GO%1\tna\tTP53\tBRCA1\n";
        let mut interner = GeneInterner::new();
        let sets = read_gmt(gmt.as_bytes(), &mut interner).unwrap();
        assert_eq!(sets.len(), 2);
        let apoptosis = &sets["APOPTOSIS%REACTOME%R-HSA-109581"];
        assert_eq!(apoptosis.len(), 2);
        assert_eq!(apoptosis.source(), Some("REACTOME"));
        assert_eq!(interner.len(), 3);
    }

    #[test]
    fn duplicate_gmt_entry() {
        let gmt = "A\t\tX\nA\t\tY\n";
        let err = read_gmt(gmt.as_bytes(), &mut GeneInterner::new()).unwrap_err();
        assert!(matches!(err, Error::MalformedFile(MalformedError::DuplicateGeneSet(_))));
    }

    #[test]
    fn rank_lines_skip_header() {
        let rnk = "gene\tscore\nTP53\t2.5\nBAX\t-1\n";
        let mut interner = GeneInterner::new();
        let ranking = read_rank(rnk.as_bytes(), &mut interner).unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking.score(interner.id("BAX").unwrap()), Some(-1.0));
    }

    #[test]
    fn map_document() {
        let json = r#"{
            "data_sets": [{
                "name": "ds1",
                "gene_sets": [
                    {"name": "A", "genes": ["g1", "g2"]},
                    {"name": "B", "description": "b", "genes": ["g2", "g3"]}
                ],
                "of_interest": ["A"],
                "ranks": {"ds1.rnk": {"g1": 1.0, "g4": 0.5}}
            }],
            "signature_gene_sets": [{"name": "S", "genes": ["g3", "g5"]}]
        }"#;
        let (map, interner) = read_map(json.as_bytes()).unwrap();
        assert_eq!(map.number_of_genes, 5);
        assert_eq!(interner.len(), 5);
        let ds = &map.data_sets[0];
        assert_eq!(ds.gene_sets.len(), 2);
        assert!(ds.gene_sets_of_interest.contains_key("A"));
        assert!(ds.enrichments.contains("A"));
        assert_eq!(ds.ranks["ds1.rnk"].len(), 2);
        assert_eq!(map.signature_gene_sets["S"].len(), 2);
    }

    #[test]
    fn unknown_gene_set_of_interest() {
        let json = r#"{"data_sets": [{"name": "ds", "gene_sets": [], "of_interest": ["X"]}]}"#;
        let err = read_map(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedFile(MalformedError::UnknownGeneSet(_))));
    }

    #[test]
    fn no_data_sets() {
        let err = read_map(r#"{"data_sets": []}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedFile(MalformedError::NoDataSets)));
    }
}
