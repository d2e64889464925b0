use clap::Args;

use depscope_core::analysis::{DependencyReport, SearchResult, analyze_dependency, search};

use super::{GlobalOpts, OutputFormat, Session, open_session, print_json};

#[derive(Args, Debug)]
pub struct DepArgs {
    /// Package name, or a wildcard pattern such as `torch*`
    pub query: String,

    /// Nodes shown per package
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: DepArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let result = search(&session.agg, &args.query);

    let analyse = |name: &str| {
        analyze_dependency(&session.corpus.store, &session.agg, name, &session.ranks)
    };

    if args.format == OutputFormat::Json {
        let reports: Vec<DependencyReport> = match &result {
            SearchResult::Exact(name) => vec![analyse(name)],
            SearchResult::Pattern(names) => names.iter().map(|n| analyse(n)).collect(),
            SearchResult::Prefix(_) | SearchResult::Substring(_) | SearchResult::NotFound => {
                Vec::new()
            }
        };
        return print_json(&serde_json::json!({
            "query": args.query,
            "result": result,
            "reports": reports,
        }));
    }

    match &result {
        SearchResult::Exact(name) => print_report(&analyse(name), &session, args.limit),
        SearchResult::Pattern(names) => {
            println!("{} packages match '{}':", names.len(), args.query);
            for name in names {
                println!();
                print_report(&analyse(name), &session, args.limit);
            }
        }
        SearchResult::Prefix(names) | SearchResult::Substring(names) => {
            let how = if matches!(result, SearchResult::Prefix(_)) {
                "starting with"
            } else {
                "containing"
            };
            println!(
                "No exact match for '{}'. {} packages {how} it:",
                args.query,
                names.len()
            );
            for name in names.iter().take(20) {
                println!("  - {name:<40} ({} nodes)", session.agg.node_count(name));
            }
            if names.len() > 20 {
                println!("  ... and {} more", names.len() - 20);
            }
        }
        SearchResult::NotFound => {
            println!("No dependency matching '{}'.", args.query);
            // A package that only appears commented out is still worth a warning.
            let report = analyse(&args.query);
            if !report.commented.is_empty() {
                print_commented(&report);
            }
        }
    }
    Ok(())
}

fn print_report(report: &DependencyReport, session: &Session, limit: usize) {
    let with_deps = session.agg.nodes_with_dependencies.len();
    println!(
        "{}: used by {} nodes ({:.1}% of nodes with dependencies)",
        report.name,
        report.total_nodes(),
        super::percent(report.total_nodes(), with_deps)
    );

    if !report.version_counts.is_empty() {
        println!();
        println!("  Versions:");
        for (version, count) in &report.version_counts {
            println!("    {version:<30} {count:>5}");
        }
    }

    if !report.nodes_using.is_empty() {
        println!();
        println!("  Nodes (by downloads):");
        for usage in report.nodes_using.iter().take(limit) {
            let rank = usage.rank.map_or_else(|| "-".to_string(), |r| format!("#{r}"));
            println!("    {rank:>6} {} ({})", usage.display_name, usage.node_id);
            println!(
                "           downloads {} | stars {} | latest {}",
                usage.downloads,
                usage.stars,
                usage.latest_date.as_deref().unwrap_or("n/a")
            );
            println!("           spec: {}", usage.spec);
        }
        if report.nodes_using.len() > limit {
            println!("    ... and {} more", report.nodes_using.len() - limit);
        }
    }

    if !report.commented.is_empty() {
        print_commented(report);
    }
}

fn print_commented(report: &DependencyReport) {
    println!();
    println!(
        "  Warning: {} nodes list {} in a commented-out line:",
        report.commented.len(),
        report.name
    );
    for c in report.commented.iter().take(5) {
        println!("    {} ({}): # {}", c.display_name, c.node_id, c.commented_spec);
    }
    if report.commented.len() > 5 {
        println!("    ... and {} more", report.commented.len() - 5);
    }
}
