use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bincode::serialize_into;
use clap::{Args, Parser, Subcommand, ValueEnum};
use enrichmentmap_lib::methods::coefficient::SimilarityMetric;
use enrichmentmap_lib::methods::filter::{FilterMetric, PostAnalysisFilterType};
use enrichmentmap_lib::methods::signature::{compute_signature_similarities, PostAnalysisConfig, UniverseType};
use enrichmentmap_lib::methods::similarity::{compute_geneset_similarities, SimilarityConfig, SimilarityMode};
use enrichmentmap_lib::model::{EnrichmentMap, SimilarityResults};
use enrichmentmap_lib::readers::utils::GeneInterner;
use enrichmentmap_lib::readers::{read_gmt_file, read_map_file, read_rank_file};
use enrichmentmap_lib::stat::MannWhitneyCache;
use enrichmentmap_lib::task::{CancellationToken, LogMonitor, TaskOutcome};
use enrichmentmap_lib::writers::{save_json, save_tsv};
use owo_colors::{
    OwoColorize,
    Stream::{Stderr, Stdout},
};

/// EnrichmentMap CLI.
/// Gene set similarity and post-analysis signature matching.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare the gene sets of interest with each other
    Similarity(SimilarityArgs),
    /// Compare signature gene sets with the gene sets of interest of every data set
    Signature(SignatureArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Enrichment map document (JSON)
    #[arg(short, long)]
    map: String,
    /// Output path
    #[arg(short, long)]
    out: String,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Similarity metric: jaccard, overlap or combined
    #[arg(long, default_value_t = SimilarityMetric::Overlap)]
    metric: SimilarityMetric,
    /// Weight of the overlap coefficient for the combined metric
    #[arg(long, default_value_t = 0.5)]
    combined_constant: f64,
    /// Filter type, e.g. hypergeom, mann-whit-greater, percent
    #[arg(long, default_value_t = PostAnalysisFilterType::NoFilter)]
    filter: PostAnalysisFilterType,
    /// Filter cutoff (defaults to the filter type's default)
    #[arg(long)]
    cutoff: Option<f64>,
}

#[derive(Args, Debug)]
struct SimilarityArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Compare the two data sets separately instead of pooling them
    #[arg(long)]
    distinct: bool,
    /// Compare against the map's signature gene sets instead
    #[arg(long)]
    signature_mode: bool,
    /// Rank file for Mann-Whitney filters
    #[arg(long)]
    rank: Option<String>,
}

#[derive(Args, Debug)]
struct SignatureArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// GMT file with additional signature gene sets
    #[arg(long)]
    gmt: Option<String>,
    /// Rank file for a data set, as DATA_SET=PATH
    #[arg(long, value_parser = parse_rank_arg)]
    rank: Vec<(String, String)>,
    /// Only compare these signature gene sets
    #[arg(long)]
    select: Vec<String>,
    /// Universe size used by the hypergeometric test
    #[arg(long, value_enum, default_value_t = Universe::Gmt)]
    universe: Universe,
    /// Universe size for --universe user-defined
    #[arg(long, default_value_t = 0)]
    universe_size: usize,
    /// Worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    threads: Option<usize>,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 3 * 60 * 60)]
    timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Tsv,
    Bincode,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Universe {
    Gmt,
    ExpressionSet,
    Intersection,
    UserDefined,
}

impl From<Universe> for UniverseType {
    fn from(value: Universe) -> Self {
        match value {
            Universe::Gmt => UniverseType::Gmt,
            Universe::ExpressionSet => UniverseType::ExpressionSet,
            Universe::Intersection => UniverseType::Intersection,
            Universe::UserDefined => UniverseType::UserDefined,
        }
    }
}

fn parse_rank_arg(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((data_set, path)) if !data_set.is_empty() && !path.is_empty() => {
            Ok((data_set.to_owned(), path.to_owned()))
        }
        _ => Err(format!("expected DATA_SET=PATH, got '{s}'")),
    }
}

type CliResult<T> = Result<T, Box<dyn Error>>;

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!("interrupted, cancelling");
        handler_token.cancel();
    }) {
        log::warn!("could not install Ctrl-C handler: {}", err);
    }

    let start = Instant::now();
    let outcome = match cli.command {
        Commands::Similarity(args) => run_similarity(args, &token),
        Commands::Signature(args) => run_signature(args, &token),
    };
    match outcome {
        Ok(Some(count)) => println!(
            "{} {} similarities in {:?}",
            "Done:".if_supports_color(Stdout, |t| t.green()),
            count,
            start.elapsed()
        ),
        Ok(None) => println!("{}", "Cancelled".if_supports_color(Stdout, |t| t.yellow())),
        Err(err) => {
            eprintln!("{} {}", "Error:".if_supports_color(Stderr, |t| t.red()), err);
            std::process::exit(1);
        }
    }
}

fn similarity_config(common: &CommonArgs) -> SimilarityConfig {
    SimilarityConfig {
        metric: common.metric,
        combined_constant: common.combined_constant,
        ..SimilarityConfig::default()
    }
}

fn run_similarity(args: SimilarityArgs, token: &CancellationToken) -> CliResult<Option<usize>> {
    let (map, mut interner) = read_map_file(&args.common.map)?;
    let config = SimilarityConfig {
        distinct_expression_sets: args.distinct,
        ..similarity_config(&args.common)
    };
    let mode = if args.signature_mode {
        SimilarityMode::Signature
    } else {
        SimilarityMode::Enrichment
    };
    let ranks = match &args.rank {
        Some(path) => Some(Arc::new(read_rank_file(path, &mut interner)?)),
        None => None,
    };
    let filter_type = args.common.filter;
    let filter = FilterMetric::new(
        filter_type,
        args.common.cutoff.unwrap_or(filter_type.default_value()),
        map.number_of_genes,
        ranks,
        Arc::new(MannWhitneyCache::new()),
    )?;
    print_map_summary(&map);

    let outcome = compute_geneset_similarities(&map, &config, mode, &filter, token, &LogMonitor)?;
    let TaskOutcome::Completed(results) = outcome else {
        return Ok(None);
    };
    write_results(&args.common, &results, &interner)?;
    Ok(Some(results.len()))
}

fn run_signature(args: SignatureArgs, token: &CancellationToken) -> CliResult<Option<usize>> {
    let (mut map, mut interner) = read_map_file(&args.common.map)?;
    if let Some(gmt) = &args.gmt {
        let signature_gene_sets = read_gmt_file(gmt, &mut interner)?;
        log::info!("read {} signature gene sets from {}", signature_gene_sets.len(), gmt);
        map.signature_gene_sets.extend(signature_gene_sets);
    }

    let mut config = PostAnalysisConfig::with_filter(args.common.filter);
    if let Some(cutoff) = args.common.cutoff {
        config.cutoff = cutoff;
    }
    for (data_set_name, path) in &args.rank {
        let ranking = read_rank_file(path, &mut interner)?;
        let Some(data_set) = map.data_sets.iter_mut().find(|ds| &ds.name == data_set_name) else {
            return Err(format!("unknown data set '{data_set_name}'").into());
        };
        data_set.ranks.insert(path.clone(), Arc::new(ranking));
        config.data_set_to_rank_file.insert(data_set_name.clone(), path.clone());
    }
    config.universe = args.universe.into();
    config.user_defined_universe_size = args.universe_size;
    if !args.select.is_empty() {
        config.selected_gene_sets = Some(args.select.clone());
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    config.timeout = Duration::from_secs(args.timeout);
    config.similarity = similarity_config(&args.common);
    print_map_summary(&map);

    let outcome = compute_signature_similarities(&map, &config, token, &LogMonitor)?;
    let TaskOutcome::Completed(results) = outcome else {
        return Ok(None);
    };
    let passing = results.similarities.passing(0.0).len();
    println!(
        "{} of {} signature overlaps pass the {} filter",
        passing.if_supports_color(Stdout, |t| t.bold()),
        results.similarities.len(),
        config.filter_type
    );
    write_results(&args.common, &results.similarities, &interner)?;
    Ok(Some(results.similarities.len()))
}

fn print_map_summary(map: &EnrichmentMap) {
    for ds in &map.data_sets {
        println!(
            "{} {}: {} gene sets of interest",
            "Data set".if_supports_color(Stdout, |t| t.cyan()),
            ds.name,
            ds.gene_sets_of_interest.len()
        );
    }
    println!(
        "{} {} signature gene sets, {} genes",
        "Map".if_supports_color(Stdout, |t| t.cyan()),
        map.signature_gene_sets.len(),
        map.number_of_genes
    );
}

fn write_results(common: &CommonArgs, results: &SimilarityResults, interner: &GeneInterner) -> CliResult<()> {
    match common.format {
        OutputFormat::Json => save_json(&common.out, results)?,
        OutputFormat::Tsv => save_tsv(&common.out, results, Some(interner))?,
        OutputFormat::Bincode => {
            let mut f = BufWriter::new(File::create(&common.out)?);
            serialize_into(&mut f, results)?;
        }
    }
    log::info!("wrote {}", common.out);
    Ok(())
}
