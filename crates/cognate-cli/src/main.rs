#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "cognate: ranked cross-language lexical lead discovery",
    long_about = None
)]
struct Cli {
    /// Config file (default: ./cognate.toml when present).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        OutputMode::from_json_flag(self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Retrieve and rank leads with embedding indexes",
        after_help = "EXAMPLES:\n    # Arabic against two English stages, form model only\n    cognate discover --source ara=ar.jsonl --target eng@old=ang.jsonl --target eng@modern=en.jsonl --models form\n\n    # Reproducible run with pinned id\n    cognate discover --source ara=ar.jsonl --target lat=la.jsonl --run-id baseline --json"
    )]
    Discover(cmd::discover::DiscoverArgs),

    #[command(
        about = "Score every source/target pair without an index",
        after_help = "EXAMPLES:\n    # Arabic lemmas against a split Latin lexicon\n    cognate match --source ar.jsonl --target la_1.jsonl --target la_2.jsonl --source-script arabic"
    )]
    Match(cmd::match_cmd::MatchArgs),

    #[command(
        about = "Summarise a lead file",
        after_help = "EXAMPLES:\n    cognate analyze .cognate/leads/discovery_20240101_000000.jsonl --top 10"
    )]
    Analyze(cmd::analyze::AnalyzeArgs),

    #[command(about = "Generate shell completions")]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("COGNATE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "cognate=debug,info"
        } else {
            "cognate=info,warn"
        })
    });

    let format = env::var("COGNATE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let output = cli.output_mode();
    match cli.command {
        Commands::Discover(ref args) => {
            let config = cognate_core::config::load_config(cli.config.as_deref())?;
            cmd::discover::run_discover(args, config, output)
        }
        Commands::Match(ref args) => {
            let config = cognate_core::config::load_config(cli.config.as_deref())?;
            cmd::match_cmd::run_match_cmd(args, config, output)
        }
        Commands::Analyze(ref args) => cmd::analyze::run_analyze(args, output),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if render_error(output, &CliError::from(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["cognate", "discover", "--source", "ara=a.jsonl", "--target", "eng=e.jsonl"],
            vec!["cognate", "match", "--source", "a.jsonl", "--target", "b.jsonl"],
            vec!["cognate", "analyze", "leads.jsonl"],
            vec!["cognate", "completions", "bash"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(
                result.is_ok(),
                "Failed to parse: {:?}: {:?}",
                args,
                result.err()
            );
        }
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["cognate", "analyze", "x.jsonl", "--json"]);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["cognate", "analyze", "x.jsonl", "--config", "c.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn repeated_targets_and_models_parse() {
        let cli = Cli::parse_from([
            "cognate",
            "discover",
            "--source",
            "ara=a.jsonl",
            "--target",
            "eng@old=o.jsonl",
            "--target",
            "eng@modern=m.jsonl",
            "--models",
            "semantic",
            "form",
            "--top-k",
            "-3",
        ]);
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        assert_eq!(args.targets.len(), 2);
        assert_eq!(args.models, vec!["semantic", "form"]);
        assert_eq!(args.top_k, Some(-3));
    }

    #[test]
    fn source_script_parses() {
        let cli = Cli::parse_from([
            "cognate",
            "match",
            "--source",
            "a.jsonl",
            "--target",
            "b.jsonl",
            "--source-script",
            "hebrew",
        ]);
        let Commands::Match(args) = cli.command else {
            panic!("expected match");
        };
        assert_eq!(
            args.source_script,
            Some(cognate_search::fallback::ScriptFilter::Hebrew)
        );
    }

    #[test]
    fn unknown_script_is_a_parse_error() {
        let result = Cli::try_parse_from([
            "cognate",
            "match",
            "--source",
            "a.jsonl",
            "--source-script",
            "klingon",
        ]);
        assert!(result.is_err());
    }
}
