//! Curation CLI
//!
//! Usage:
//!   curate --schema schema.toml diff -a alice=alice.json -a bob=bob.json
//!   curate --schema schema.toml merge -a alice=alice.json -a bob=bob.json -o curated.json
//!   curate --schema schema.toml layers

mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use curation_core::{
    AnnotationGraph, CurationConfig, GraphProvider, LayerProvider, LoggingConfig,
    MergeStrategyKind, CURATION_USER,
};
use curation_diff::{
    evaluate_sets, evaluate_units, units_from_layer, CasDiff, CurationUnit, DiffResult,
};
use curation_merge::{merge_cas, strategy_from_config, CasMerge, MergeContext, MergeReport};

use store::FileStore;

#[derive(Parser)]
#[command(name = "curate")]
#[command(about = "Compare annotator graphs and merge them into a curation graph")]
#[command(version)]
struct Cli {
    /// Layer schema (TOML)
    #[arg(short, long)]
    schema: PathBuf,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Document name used in logs
    #[arg(short, long, default_value = "document")]
    document: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration sets and their curation state
    Diff {
        /// Annotator graph as NAME=FILE (repeatable)
        #[arg(short, long = "annotator", value_parser = parse_annotator, required = true)]
        annotators: Vec<(String, PathBuf)>,

        /// Existing curation graph
        #[arg(long)]
        curation: Option<PathBuf>,

        /// Only positions covered by BEGIN:END
        #[arg(short, long, value_parser = parse_range)]
        range: Option<(usize, usize)>,

        /// Layer whose annotations define curation units (e.g. Sentence)
        #[arg(short, long)]
        units: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Merge what the strategy adopts into the curation graph
    Merge {
        /// Annotator graph as NAME=FILE (repeatable)
        #[arg(short, long = "annotator", value_parser = parse_annotator, required = true)]
        annotators: Vec<(String, PathBuf)>,

        /// Existing curation graph
        #[arg(long)]
        curation: Option<PathBuf>,

        /// Where to write the curation graph (defaults to --curation)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Strategy, overriding the configuration
        #[arg(long)]
        strategy: Option<MergeStrategyKind>,
    },

    /// List the layers of the schema
    Layers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_annotator(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=FILE, got '{s}'")),
    }
}

fn parse_range(s: &str) -> std::result::Result<(usize, usize), String> {
    let (begin, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected BEGIN:END, got '{s}'"))?;
    let begin: usize = begin.trim().parse().map_err(|e| format!("begin: {e}"))?;
    let end: usize = end.trim().parse().map_err(|e| format!("end: {e}"))?;
    if begin > end {
        return Err(format!("begin {begin} is after end {end}"));
    }
    Ok((begin, end))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CurationConfig> {
    let config = match path {
        Some(path) => CurationConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CurationConfig::default(),
    };
    Ok(config.with_env_override()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    let schema = FileStore::read_schema(&cli.schema)
        .await
        .with_context(|| format!("loading schema {}", cli.schema.display()))?;

    match cli.command {
        Commands::Diff {
            annotators,
            curation,
            range,
            units,
            format,
        } => {
            let store = build_store(&cli.document, schema, annotators, curation.clone(), None);
            let output =
                run_diff(&store, &config, curation.is_some(), range, units.as_deref()).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Text => print_diff(&output),
            }
        }
        Commands::Merge {
            annotators,
            curation,
            output,
            strategy,
        } => {
            if let Some(strategy) = strategy {
                config.merge.strategy = strategy;
            }
            let store = build_store(&cli.document, schema, annotators, curation, output);
            let report = run_merge(&store, &config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Layers => {
            let store = FileStore::new(&cli.document, schema);
            for layer in store.list_layers(&cli.document).await? {
                let features: Vec<String> = store
                    .list_features(&cli.document, &layer.name)
                    .await?
                    .into_iter()
                    .map(|f| f.name)
                    .collect();
                println!(
                    "{:<20} {:<10} {:?} [{}]",
                    layer.name,
                    layer.kind.to_string(),
                    layer.overlap_mode,
                    features.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn build_store(
    document: &str,
    schema: curation_core::LayerSchema,
    annotators: Vec<(String, PathBuf)>,
    curation: Option<PathBuf>,
    output: Option<PathBuf>,
) -> FileStore {
    annotators
        .into_iter()
        .fold(FileStore::new(document, schema), |store, (name, path)| {
            store.with_annotator(name, path)
        })
        .with_curation(curation)
        .with_output(output)
}

/// Load every annotator graph, plus the curation graph under
/// [`CURATION_USER`] when one exists
async fn load_graphs(
    store: &FileStore,
    with_curation: bool,
) -> Result<BTreeMap<String, AnnotationGraph>> {
    let mut graphs = store
        .load_annotator_graphs(store.document(), &store.annotators())
        .await?;
    if with_curation {
        let curation = store.load_curation_graph(store.document()).await?;
        graphs.insert(CURATION_USER.to_string(), curation);
    }
    Ok(graphs)
}

fn compute(
    store: &FileStore,
    config: &CurationConfig,
    graphs: &BTreeMap<String, AnnotationGraph>,
    range: Option<(usize, usize)>,
) -> DiffResult {
    let diff = CasDiff::new(store.schema().layers()).with_link_compare(config.diff.link_compare);
    match range {
        Some((begin, end)) => diff.with_range(begin, end).compute(graphs),
        None => diff.compute(graphs),
    }
}

#[derive(Debug, Serialize)]
struct DiffOutput {
    diff: DiffResult,
    states: Vec<String>,
    units: Vec<CurationUnit>,
}

async fn run_diff(
    store: &FileStore,
    config: &CurationConfig,
    with_curation: bool,
    range: Option<(usize, usize)>,
    unit_layer: Option<&str>,
) -> Result<DiffOutput> {
    let graphs = load_graphs(store, with_curation).await?;
    let diff = compute(store, config, &graphs, range);
    let curator = with_curation.then_some(CURATION_USER);

    let groups: BTreeSet<&str> = diff.cas_group_ids().collect();
    let states = diff
        .configuration_sets()
        .iter()
        .map(|set| evaluate_sets([set], &groups, curator).to_string())
        .collect();

    let mut units = match unit_layer {
        Some(layer) => graphs
            .iter()
            .find(|(group, _)| group.as_str() != CURATION_USER)
            .map(|(_, graph)| units_from_layer(graph, layer))
            .unwrap_or_default(),
        None => Vec::new(),
    };
    evaluate_units(&mut units, &diff, curator);

    Ok(DiffOutput { diff, states, units })
}

fn print_diff(output: &DiffOutput) {
    for (set, state) in output.diff.configuration_sets().iter().zip(&output.states) {
        let values: Vec<String> = set
            .cas_group_ids()
            .map(|group| {
                let values: Vec<String> = set
                    .configurations(group)
                    .iter()
                    .map(|c| c.value.to_string())
                    .collect();
                format!("{group}={}", values.join("|"))
            })
            .collect();
        println!("{:<11} {} {}", state, set.key(), values.join(" "));
    }
    for unit in &output.units {
        println!("unit {}-{}: {}", unit.begin, unit.end, unit.state);
    }
    println!(
        "{} configuration sets, {} differing",
        output.diff.len(),
        output.diff.differing_configuration_sets().count()
    );
}

async fn run_merge(store: &FileStore, config: &CurationConfig) -> Result<MergeReport> {
    let mut target = store.load_curation_graph(store.document()).await?;

    let mut graphs = load_graphs(store, false).await?;
    graphs.insert(CURATION_USER.to_string(), target.clone());
    let diff = compute(store, config, &graphs, None);

    let strategy = strategy_from_config(&config.merge);
    let context = MergeContext::from_diff(&diff, Some(CURATION_USER));
    let merge = CasMerge::new(store.schema())
        .with_target_user(CURATION_USER)
        .with_allow_stacking(config.merge.allow_stacking);
    let report = merge_cas(&merge, &mut target, &diff, &graphs, strategy.as_ref(), &context);

    store
        .save_curation_graph(store.document(), &target)
        .await
        .context("saving curation graph")?;
    info!(document = store.document(), created = report.created, "Curation graph saved");
    Ok(report)
}
