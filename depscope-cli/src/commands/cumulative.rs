use clap::Args;

use depscope_core::analysis::{cumulative_dependencies, milestones};

use super::{GlobalOpts, OutputFormat, open_session, print_json};

/// Ranks reported unless `--all` is given.
const MILESTONES: &[usize] = &[10, 50, 100, 500, 1000];

#[derive(Args, Debug)]
pub struct CumulativeArgs {
    /// Print every rank instead of milestones
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: CumulativeArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let points = cumulative_dependencies(&session.corpus.store, &session.ranks);

    if args.format == OutputFormat::Json {
        return print_json(&points);
    }

    println!("Distinct dependencies needed for the top N nodes by downloads:");
    println!();
    if args.all {
        println!("  {:>6}  {:>6}  {:>5}  {:>5}  node", "rank", "total", "new", "own");
        let mut previous = 0;
        for p in &points {
            println!(
                "  {:>6}  {:>6}  {:>+5}  {:>5}  {}",
                p.rank,
                p.cumulative_unique,
                p.cumulative_unique - previous,
                p.node_unique,
                p.display_name
            );
            previous = p.cumulative_unique;
        }
    } else {
        for (rank, count) in milestones(&points, MILESTONES) {
            println!("  top {rank:>6}: {count:>6} distinct dependencies");
        }
    }
    Ok(())
}
