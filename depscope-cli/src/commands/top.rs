use clap::Args;

use super::{GlobalOpts, OutputFormat, open_session, percent, print_json};

#[derive(Args, Debug)]
pub struct TopArgs {
    /// Number of packages to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub count: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: TopArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let agg = &session.agg;
    let top: Vec<(&str, usize)> = agg.sorted_by_frequency().into_iter().take(args.count).collect();

    if args.format == OutputFormat::Json {
        let rows: Vec<serde_json::Value> = top
            .iter()
            .map(|(name, nodes)| serde_json::json!({ "name": name, "nodes": nodes }))
            .collect();
        return print_json(&rows);
    }

    let with_deps = agg.nodes_with_dependencies.len();
    println!(
        "Top {} of {} packages ({} nodes with dependencies)",
        top.len(),
        agg.unique_base_dependencies.len(),
        with_deps
    );
    println!();
    for (i, (name, nodes)) in top.iter().enumerate() {
        println!(
            "  {:>3}. {name:<36} {nodes:>6} ({:.1}%)",
            i + 1,
            percent(*nodes, with_deps)
        );
    }
    Ok(())
}
