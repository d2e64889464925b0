use clap::{Args, ValueEnum};

use depscope_core::compile::NodeSpec;

use super::{GlobalOpts, OutputFormat, open_session, print_json};

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListKind {
    /// Base package names with node counts
    #[default]
    Regular,
    /// VCS references
    Git,
    /// Pip directives such as `--extra-index-url`
    Pip,
    /// Commented-out lines
    Commented,
    /// Nodes without any dependency
    Empty,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Which kind of entry to list
    #[arg(long, value_enum, default_value_t)]
    pub kind: ListKind,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: ListArgs, opts: &GlobalOpts) -> anyhow::Result<()> {
    let session = open_session(opts)?;
    let agg = &session.agg;

    match args.kind {
        ListKind::Regular => {
            if args.format == OutputFormat::Json {
                let rows: Vec<serde_json::Value> = agg
                    .unique_base_dependencies
                    .iter()
                    .map(|name| serde_json::json!({ "name": name, "nodes": agg.node_count(name) }))
                    .collect();
                return print_json(&rows);
            }
            for name in &agg.unique_base_dependencies {
                println!("{name:<40} {:>6}", agg.node_count(name));
            }
        }
        ListKind::Git => print_specs(&agg.git_dependencies, args.format, |s| {
            s.spec.git_url.clone().unwrap_or_else(|| s.spec.raw_text.clone())
        })?,
        ListKind::Pip => print_specs(&agg.pip_commands, args.format, |s| s.spec.raw_text.clone())?,
        ListKind::Commented => {
            print_specs(&agg.commented_dependencies, args.format, |s| {
                format!("# {}", s.spec.raw_text)
            })?;
        }
        ListKind::Empty => {
            if args.format == OutputFormat::Json {
                return print_json(&agg.nodes_without_dependencies);
            }
            for id in &agg.nodes_without_dependencies {
                println!("{id}");
            }
        }
    }
    Ok(())
}

fn print_specs(
    specs: &[NodeSpec],
    format: OutputFormat,
    text: impl Fn(&NodeSpec) -> String,
) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&specs);
    }
    for spec in specs {
        println!("{:<40} {}", spec.node_id, text(spec));
    }
    Ok(())
}
