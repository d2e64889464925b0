use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use tracing::info;

use depscope_core::fetch::{
    FetchConfig, FetchFailure, Fetcher, HttpRegistryApi, ingest_pages, update_requirements_cache,
};
use depscope_core::load::{read_json, resolve, write_json};
use depscope_core::progress::{IndicatifReporter, NoopReporter, ProgressReporter};
use depscope_core::sources::{NodesFile, RequirementsCache};
use depscope_core::store::NodeStore;

use super::{GlobalOpts, load_config};

/// Cache file used when `sources.requirements_cache_path` is not configured.
const DEFAULT_REQUIREMENTS_CACHE: &str = "requirements-cache.json";

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Also fetch each node's requirements.txt into the requirements cache
    #[arg(long)]
    pub requirements: bool,

    /// Write the registry dump even if some pages failed
    #[arg(long)]
    pub allow_partial: bool,
}

pub async fn run(args: UpdateArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let (config, base_dir) = load_config(opts)?;
    let started = Instant::now();

    let api = HttpRegistryApi::new(&config).context("Cannot create registry client")?;
    let progress: Arc<dyn ProgressReporter> = if opts.quiet {
        Arc::new(NoopReporter)
    } else {
        Arc::new(IndicatifReporter::new())
    };
    let fetcher = Fetcher::new(Arc::new(api), FetchConfig::from_section(&config.fetch))
        .with_progress(Arc::clone(&progress));

    info!(registry = %config.registry.base_url, "Fetching registry listing");
    let pages = fetcher
        .fetch_registry()
        .await
        .context("Cannot fetch registry listing")?;

    let mut failures: Vec<FetchFailure> = pages.failures.clone();
    let mut units = pages.succeeded.len() + pages.failures.len();

    let nodes_path = resolve(&base_dir, &config.sources.nodes_path);
    let mut store = NodeStore::new();
    let load = ingest_pages(&mut store, pages.values());

    if pages.is_complete() || args.allow_partial {
        let dump = NodesFile {
            nodes: pages.values().flat_map(|p| p.nodes.iter().cloned()).collect(),
        };
        write_json(&nodes_path, &dump).context("Cannot write registry dump")?;
    }

    println!("Registry updated from {}", config.registry.base_url);
    println!();
    println!(
        "  Pages:            {} fetched, {} failed",
        pages.succeeded.len(),
        pages.failures.len()
    );
    println!("  Nodes:            {} ({} duplicate ids)", load.loaded, load.duplicates);
    if pages.is_complete() || args.allow_partial {
        println!("  Written to:       {}", nodes_path.display());
    } else {
        println!("  Not written:      {} (pass --allow-partial to keep partial data)", nodes_path.display());
    }

    if args.requirements {
        let cache_path = config.sources.requirements_cache_path.as_ref().map_or_else(
            || base_dir.join(DEFAULT_REQUIREMENTS_CACHE),
            |p| resolve(&base_dir, p),
        );
        let mut cache: RequirementsCache = if cache_path.exists() {
            read_json(&cache_path).context("Cannot read requirements cache")?
        } else {
            RequirementsCache::default()
        };

        let ids: Vec<String> = store
            .iter()
            .filter(|n| n.repository_url.is_some())
            .map(|n| n.id().to_string())
            .collect();
        let shared = store.into_shared();
        let reqs = fetcher.fetch_requirements(&shared, &ids).await;

        let changed = {
            let guard = shared.lock().await;
            guard
                .iter()
                .filter_map(|n| n.dependency_diff())
                .filter(|d| !d.is_empty())
                .count()
        };
        let (stored, dropped) = update_requirements_cache(&mut cache, &reqs);
        info!(stored, dropped, "Requirements cache updated");
        write_json(&cache_path, &cache).context("Cannot write requirements cache")?;

        println!();
        println!(
            "  Requirements:     {} fetched, {} without file, {} failed",
            reqs.succeeded.len(),
            reqs.missing.len(),
            reqs.failures.len()
        );
        println!("  Differ from registry: {changed} nodes");
        println!(
            "  Cache:            {} ({dropped} stale entries dropped)",
            cache_path.display()
        );

        units += ids.len();
        failures.extend(reqs.failures);
    }

    println!("  Duration:         {:.2?}", started.elapsed());
    progress.finish();

    if !failures.is_empty() {
        println!();
        println!("  Failed units ({}):", failures.len());
        for failure in &failures {
            let deadline = if failure.deadline_hit { ", deadline" } else { "" };
            println!(
                "    - {} after {} attempt(s){deadline}: {}",
                failure.unit, failure.attempts, failure.reason
            );
        }
        anyhow::bail!("Partial fetch: {} of {units} units failed", failures.len());
    }

    Ok(())
}
