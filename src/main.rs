use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use unearth::{excavate, Excavation, Rule};

#[derive(Debug, Parser)]
#[command(name = "unearth", version)]
#[command(about = "Excavate build dependencies from shell recipes")]
struct Args {
    /// Recipe file, one shell command per line (defaults to stdin).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "json")]
    format: Format,

    /// Verbose debugging information.
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Knit,
    Make,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let recipes = match &args.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading recipes from {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let root = std::env::current_dir()?;

    let mut ex = Excavation::default();
    for line in recipes.lines() {
        if line.is_empty() {
            continue;
        }
        eprintln!("{line}");

        let report =
            excavate("sh", &["-c", line], &root).with_context(|| format!("tracing `{line}`"))?;
        ex.push(Rule {
            command: line.to_string(),
            inputs: report.inputs,
            outputs: report.outputs,
            removals: report.removed,
        });
    }

    let rendered = match args.format {
        Format::Json => ex.to_json()?,
        Format::Knit => ex.to_knit(),
        Format::Make => ex.to_make(),
    };

    match &args.output {
        Some(path) => {
            let mut out = fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            writeln!(out, "{rendered}")?;
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
