use clap::Args;

use depscope_core::analysis::version_conflicts;

use super::{GlobalOpts, OutputFormat, open_session, percent, print_json};

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// How many of the most used packages to show
    #[arg(short = 'n', long, default_value_t = 10)]
    pub top: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: SummaryArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let store = &session.corpus.store;
    let agg = &session.agg;
    let conflicts = version_conflicts(agg);
    let top: Vec<(&str, usize)> = agg.sorted_by_frequency().into_iter().take(args.top).collect();

    if args.format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "load": session.corpus.load,
            "reconcile": session.corpus.reconcile,
            "total_nodes": store.len(),
            "nodes_with_dependencies": agg.nodes_with_dependencies.len(),
            "nodes_without_dependencies": agg.nodes_without_dependencies.len(),
            "unique_base_dependencies": agg.unique_base_dependencies.len(),
            "unique_raw_specs": agg.unique_raw_specs(),
            "total_references": agg.total_references(),
            "git_dependencies": agg.git_dependencies.len(),
            "pip_commands": agg.pip_commands.len(),
            "commented_dependencies": agg.commented_dependencies.len(),
            "version_conflicts": conflicts.len(),
            "top": top,
        }));
    }

    let load = &session.corpus.load;
    println!("Dependency summary");
    println!();
    println!("  Nodes:                 {}", store.len());
    if load.duplicates > 0 || load.skipped > 0 {
        println!(
            "    ({} duplicate ids replaced, {} entries without id skipped)",
            load.duplicates, load.skipped
        );
    }
    println!(
        "  With dependencies:     {} ({:.1}%)",
        agg.nodes_with_dependencies.len(),
        percent(agg.nodes_with_dependencies.len(), store.len())
    );
    println!("  Without dependencies:  {}", agg.nodes_without_dependencies.len());
    println!();
    println!("  Unique packages:       {}", agg.unique_base_dependencies.len());
    println!("  Unique raw specs:      {}", agg.unique_raw_specs());
    println!("  Total references:      {}", agg.total_references());
    println!(
        "  Git references:        {} ({} nodes)",
        agg.git_dependencies.len(),
        agg.nodes_with_git().len()
    );
    println!(
        "  Pip directives:        {} ({} nodes)",
        agg.pip_commands.len(),
        agg.nodes_with_pip_commands().len()
    );
    println!(
        "  Commented out:         {} ({} nodes)",
        agg.commented_dependencies.len(),
        agg.nodes_with_commented().len()
    );
    println!("  Version conflicts:     {}", conflicts.len());

    if !session.corpus.reconcile.is_empty() {
        println!();
        println!("  Sources:");
        for report in &session.corpus.reconcile {
            println!(
                "    {:<20} {:>6} matched ({} via fork), {} unmatched",
                report.source,
                report.matched(),
                report.matched_fork,
                report.unmatched.len()
            );
        }
    }

    if !top.is_empty() {
        println!();
        println!("  Most used packages:");
        let with_deps = agg.nodes_with_dependencies.len();
        for (i, (name, count)) in top.iter().enumerate() {
            println!(
                "    {:>3}. {name:<32} {count:>6} nodes ({:.1}%)",
                i + 1,
                percent(*count, with_deps)
            );
        }
    }

    Ok(())
}
