use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pointflow::{AnalysisSession, CollectSink, SessionOpts, StreamMask};

#[derive(Parser, Debug)]
#[command(name = "pointflow", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of a pipeline document.
    Info(InfoArgs),
    /// Refresh a pipeline document headlessly and summarize the leaf
    /// outputs.
    Run(RunArgs),
    /// Strip hazardous filters from a document and write it back out.
    Strip(StripArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input pipeline state JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Input pipeline state JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Refuse to run hazardous filters (strip them first).
    #[arg(long)]
    safe: bool,
}

#[derive(Parser, Debug)]
struct StripArgs {
    /// Input pipeline state JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output path for the stripped document.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Info(args) => cmd_info(args),
        Command::Run(args) => cmd_run(args),
        Command::Strip(args) => cmd_strip(args),
    }
}

fn load_session(path: &Path, strip_hazardous: bool) -> anyhow::Result<AnalysisSession> {
    let f = File::open(path).with_context(|| format!("open state '{}'", path.display()))?;
    let mut session = AnalysisSession::new(SessionOpts::default());
    let mut errors = Vec::new();
    session
        .load_state(BufReader::new(f), &mut errors, strip_hazardous)
        .map_err(|e| {
            for msg in &errors {
                eprintln!("error: {msg}");
            }
            anyhow::anyhow!("load failed: {e}")
        })?;
    Ok(session)
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let session = load_session(&args.in_path, false)?;
    println!("filters: {}", session.tree().len());
    for (id, depth) in session.tree().pre_order() {
        let label = session
            .tree()
            .filter(id)
            .map(|f| f.label())
            .unwrap_or_default();
        println!("{}{label}", "  ".repeat(depth));
    }
    for (_, name) in session.stash_list() {
        println!("stash: {name}");
    }
    if session.has_hazardous_contents() {
        println!("warning: document contains hazardous filters");
    }
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut session = load_session(&args.in_path, args.safe)?;
    let mut sink = CollectSink::default();
    let mut outputs = session
        .refresh(&mut sink, |_| true)
        .context("refresh failed")?;
    for (label, message) in &sink.console {
        println!("[{label}] {message}");
    }
    for leaf in &outputs {
        let label = session
            .tree()
            .filter(leaf.node)
            .map(|f| f.label())
            .unwrap_or_default();
        for &h in &leaf.streams {
            if let Some(data) = session.stream(h) {
                println!(
                    "{label}: {:?} stream, {} objects, ~{} bytes",
                    data.kind(),
                    data.n_objects(),
                    data.approx_bytes()
                );
            }
        }
    }
    session.release_outputs(&mut outputs, StreamMask::EMPTY);
    Ok(())
}

fn cmd_strip(args: StripArgs) -> anyhow::Result<()> {
    let mut session = load_session(&args.in_path, true)?;
    let removed = session.make_safe();
    if removed > 0 {
        eprintln!("removed {removed} hazardous filter nodes");
    }
    let out =
        File::create(&args.out).with_context(|| format!("create '{}'", args.out.display()))?;
    session
        .save_state(BufWriter::new(out))
        .context("write stripped state")?;
    Ok(())
}
