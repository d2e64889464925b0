use clap::Args;

use depscope_core::analysis::version_conflicts;

use super::{GlobalOpts, OutputFormat, open_session, print_json};

#[derive(Args, Debug)]
pub struct ConflictsArgs {
    /// Only show packages pinned by at least this many nodes
    #[arg(long, default_value_t = 2)]
    pub min_nodes: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: ConflictsArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let mut conflicts = version_conflicts(&session.agg);
    conflicts.retain(|c| c.node_count() >= args.min_nodes);
    conflicts.sort_by(|a, b| b.node_count().cmp(&a.node_count()));

    if args.format == OutputFormat::Json {
        return print_json(&conflicts);
    }

    if conflicts.is_empty() {
        println!("No conflicting version pins.");
        return Ok(());
    }

    println!("{} packages pinned to conflicting versions:", conflicts.len());
    for conflict in &conflicts {
        println!();
        println!("  {} ({} nodes)", conflict.name, conflict.node_count());
        for (version, nodes) in &conflict.pins {
            println!("    =={version:<20} {}", nodes.join(", "));
        }
    }
    Ok(())
}
