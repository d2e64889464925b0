pub mod conflicts;
pub mod cumulative;
pub mod dep;
pub mod list;
pub mod summary;
pub mod top;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Subcommand, ValueEnum};

use depscope_core::compile::{DependencyAggregate, RankMap, compile, rank_map};
use depscope_core::config::DepscopeConfig;
use depscope_core::load::{LoadedCorpus, load_corpus};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "depscope.toml";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Corpus overview: node counts, dependency kinds, most used packages
    Summary(summary::SummaryArgs),
    /// Analyse one dependency, or every dependency matching a pattern
    Dep(dep::DepArgs),
    /// Most used base packages
    Top(top::TopArgs),
    /// List dependencies of one kind
    List(list::ListArgs),
    /// Packages pinned to different exact versions by different nodes
    Conflicts(conflicts::ConflictsArgs),
    /// Growth of distinct dependencies by node download rank
    Cumulative(cumulative::CumulativeArgs),
    /// Refresh the registry dump (and optionally requirements) from the network
    Update(update::UpdateArgs),
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub nodes: Option<PathBuf>,
    pub quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub async fn run(cmd: Command, opts: &GlobalOpts) -> anyhow::Result<()> {
    match cmd {
        Command::Summary(args) => summary::run(args, opts),
        Command::Dep(args) => dep::run(args, opts),
        Command::Top(args) => top::run(args, opts),
        Command::List(args) => list::run(args, opts),
        Command::Conflicts(args) => conflicts::run(args, opts),
        Command::Cumulative(args) => cumulative::run(args, opts),
        Command::Update(args) => update::run(args, opts).await,
    }
}

/// Load the config and the directory its relative paths resolve against.
pub fn load_config(opts: &GlobalOpts) -> anyhow::Result<(DepscopeConfig, PathBuf)> {
    let (mut config, base_dir) = match &opts.config {
        Some(path) => {
            let config = DepscopeConfig::load(path)
                .with_context(|| format!("Cannot load config: {}", path.display()))?;
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            (config, base)
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            let config = DepscopeConfig::load(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("Cannot load config: {DEFAULT_CONFIG}"))?;
            (config, PathBuf::from("."))
        }
        None => (DepscopeConfig::default(), PathBuf::from(".")),
    };

    if let Some(nodes) = &opts.nodes {
        // Relative to the working directory, like any other CLI path.
        config.sources.nodes_path = std::path::absolute(nodes)
            .with_context(|| format!("Cannot resolve path: {}", nodes.display()))?;
    }
    Ok((config, base_dir))
}

/// Everything a read-only report needs.
#[derive(Debug)]
pub struct Session {
    pub corpus: LoadedCorpus,
    pub agg: DependencyAggregate,
    pub ranks: RankMap,
}

pub fn open_session(opts: &GlobalOpts) -> anyhow::Result<Session> {
    let (config, base_dir) = load_config(opts)?;
    let corpus = load_corpus(&config.sources, &base_dir).context("Cannot read sources")?;
    let agg = compile(&corpus.store);
    let ranks = rank_map(&corpus.store);
    Ok(Session { corpus, agg, ranks })
}

pub fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

/// `part` as a percentage of `whole`, zero when `whole` is zero.
#[allow(clippy::cast_precision_loss)]
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
