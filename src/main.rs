// Entry point and high-level CLI flow.
//
// - Option [1] loads a CSV/spreadsheet and runs the metric pipeline.
// - Option [2] prints the dashboard for the current upload.
// - Option [3] asks the advisor a question about the current upload.
// - Option [4] resets the session back to idle.
// Passing a file on the command line loads it before the menu starts;
// `--non-interactive` prints the dashboard (and any `--question` answer) and exits.
mod advisor;
mod config;
mod context;
mod error;
mod loader;
mod matcher;
mod output;
mod reports;
mod resolver;
mod session;
mod types;
mod util;

use advisor::{answer, OpenAiAdvisor, FALLBACK_REPLY};
use anyhow::{Context, Result};
use clap::Parser;
use config::Settings;
use session::SessionState;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use types::Outcome;

#[derive(Parser, Debug)]
#[command(name = "sales_insight", about = "Business KPIs from any sales or finance export")]
struct Cli {
    /// CSV, TSV or spreadsheet file to analyze (`-` reads CSV from stdin)
    path: Option<PathBuf>,

    /// Write the metric record (or error) as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write the column mapping preview as CSV
    #[arg(long)]
    mapping_csv: Option<PathBuf>,

    /// Ask the advisor one question about the loaded file
    #[arg(long, short)]
    question: Option<String>,

    /// Print results and exit instead of opening the menu
    #[arg(long)]
    non_interactive: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Read a single line of input after printing `prompt`.
fn read_line(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Load `path`, run the pipeline, and store the outcome in the session.
fn handle_load(path: &Path, cli: &Cli) {
    let loaded = if path == Path::new("-") {
        loader::load_reader(io::stdin().lock())
    } else {
        loader::load_frame(path)
    };
    let (frame, load_report) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load file: {}\n", e);
            return;
        }
    };
    println!(
        "Processing dataset... ({} rows, {} columns)",
        util::format_int(frame.len()),
        util::format_int(load_report.columns)
    );
    if load_report.blank_rows > 0 {
        println!(
            "Note: {} of {} rows were blank and skipped.",
            util::format_int(load_report.blank_rows),
            util::format_int(load_report.total_rows)
        );
    }

    let mut session = session::global();
    if let Err(e) = session.reset() {
        eprintln!("{}\n", e);
        return;
    }
    let state = match session.process(&frame) {
        Ok(state) => state.clone(),
        Err(e) => {
            eprintln!("{}\n", e);
            return;
        }
    };
    drop(session);

    let outcome = match state {
        SessionState::Ready(record) => Outcome::Ready(record),
        SessionState::Failed(error) => Outcome::Failed { error },
        _ => return,
    };
    match outcome.error() {
        Some(e) => println!("Error: {}\n", e),
        None => println!("Ready. Choose [2] to view the dashboard.\n"),
    }
    export(&outcome, cli);
}

fn export(outcome: &Outcome, cli: &Cli) {
    if let Some(path) = &cli.json {
        match output::write_json(path, outcome) {
            Ok(()) => println!("(Summary exported to {})", path.display()),
            Err(e) => eprintln!("Write error: {}", e),
        }
    }
    if let (Some(path), Some(record)) = (&cli.mapping_csv, outcome.record()) {
        match output::write_csv(path, &record.mapping_preview) {
            Ok(()) => println!("(Column mapping exported to {})", path.display()),
            Err(e) => eprintln!("Write error: {}", e),
        }
    }
}

fn current_outcome() -> Option<Outcome> {
    let session = session::global();
    if let Some(record) = session.record() {
        return Some(Outcome::Ready(Box::new(record.clone())));
    }
    match session.state() {
        SessionState::Failed(e) => Some(Outcome::Failed { error: e.clone() }),
        _ => None,
    }
}

fn handle_dashboard() {
    match current_outcome() {
        Some(outcome) => println!("{}", output::render_dashboard(&outcome)),
        None => println!("Error: No data loaded. Please load a file first (option 1).\n"),
    }
}

fn handle_question(question: &str, settings: &Settings) {
    let record = match current_outcome() {
        Some(Outcome::Ready(r)) => r,
        Some(Outcome::Failed { error }) => {
            println!("Error: {}\n", error);
            return;
        }
        None => {
            println!("Error: No data loaded. Please load a file first (option 1).\n");
            return;
        }
    };
    let reply = match OpenAiAdvisor::from_settings(settings) {
        Ok(advisor) => answer(&advisor, &record, question),
        Err(e) => {
            error!("advisor unavailable: {}", e);
            FALLBACK_REPLY.to_string()
        }
    };
    println!("{}\n", reply);
}

fn run_menu(cli: &Cli, settings: &Settings) {
    loop {
        println!("Sales Insight:");
        println!("[1] Load a file");
        println!("[2] Show dashboard");
        println!("[3] Ask the assistant");
        println!("[4] Reset");
        println!("[0] Exit\n");
        match read_line("Enter choice: ").as_str() {
            "1" => {
                let path = read_line("File path: ");
                if path.is_empty() {
                    println!("No path given.\n");
                } else {
                    handle_load(Path::new(&path), cli);
                }
            }
            "2" => handle_dashboard(),
            "3" => {
                let question = read_line("Question: ");
                if !question.is_empty() {
                    handle_question(&question, settings);
                }
            }
            "4" => match session::global().reset() {
                Ok(()) => println!("Session cleared.\n"),
                Err(e) => println!("{}\n", e),
            },
            "0" => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice. Please enter 0-4.\n"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // Settings first so a RUST_LOG in .env reaches the filter below.
    let settings = Settings::from_env();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!("advisor model {} at {}", settings.model, settings.base_url);

    if let Some(path) = &cli.path {
        handle_load(path, &cli);
    }
    if cli.non_interactive {
        handle_dashboard();
        if let Some(q) = &cli.question {
            handle_question(q, &settings);
        }
        return Ok(());
    }
    if let Some(q) = &cli.question {
        handle_question(q, &settings);
    }
    run_menu(&cli, &settings);
    Ok(())
}
