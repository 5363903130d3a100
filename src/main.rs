mod debug_report;

use std::io::{self, IsTerminal, Read};
use tableforge::{Document, Engine, RollOptions};

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let document = match Document::from_json(&config.document_json) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("error: malformed document: {err}");
            std::process::exit(1);
        }
    };

    let mut engine = Engine::new();
    if let Err(err) = engine.load_collection(document, config.collection_id.as_str(), false) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    engine.resolve_imports(None);

    let options = RollOptions { enable_trace: config.trace, seed: config.seed };
    let result = match &config.target {
        Target::Table(id) => engine.roll(id, &config.collection_id, &options),
        Target::Template(name) => engine.roll_template(name, &config.collection_id, &options),
    };

    match result {
        Ok(result) => debug_report::print_run(&result, config.color),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

enum Target {
    Table(String),
    Template(String),
}

struct CliConfig {
    document_json: String,
    collection_id: String,
    target: Target,
    trace: bool,
    seed: Option<u64>,
    color: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut document_path: Option<String> = None;
    let mut collection_id = "main".to_string();
    let mut target: Option<Target> = None;
    let mut trace = false;
    let mut seed: Option<u64> = None;
    let mut color = io::stdout().is_terminal();
    let mut args = std::env::args().skip(1).peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("tableforge {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--trace" => trace = true,
            "--document" | "-d" => {
                let value = args.next().ok_or_else(|| "error: --document expects a value".to_string())?;
                document_path = Some(value);
            }
            "--collection" | "-c" => {
                collection_id = args.next().ok_or_else(|| "error: --collection expects a value".to_string())?;
            }
            "--roll" => {
                let value = args.next().ok_or_else(|| "error: --roll expects a table id".to_string())?;
                if target.is_some() {
                    return Err("error: --roll/--roll-template provided multiple times".to_string());
                }
                target = Some(Target::Table(value));
            }
            "--roll-template" => {
                let value = args.next().ok_or_else(|| "error: --roll-template expects a template name".to_string())?;
                if target.is_some() {
                    return Err("error: --roll/--roll-template provided multiple times".to_string());
                }
                target = Some(Target::Template(value));
            }
            "--seed" => {
                let value = args.next().ok_or_else(|| "error: --seed expects a value".to_string())?;
                seed = Some(value.parse::<u64>().map_err(|_| format!("error: invalid --seed '{value}'"))?);
            }
            _ if arg.starts_with("--document=") => {
                document_path = Some(arg.trim_start_matches("--document=").to_string());
            }
            _ if arg.starts_with("--collection=") => {
                collection_id = arg.trim_start_matches("--collection=").to_string();
            }
            _ if arg.starts_with("--roll=") => {
                if target.is_some() {
                    return Err("error: --roll/--roll-template provided multiple times".to_string());
                }
                target = Some(Target::Table(arg.trim_start_matches("--roll=").to_string()));
            }
            _ if arg.starts_with("--roll-template=") => {
                if target.is_some() {
                    return Err("error: --roll/--roll-template provided multiple times".to_string());
                }
                target = Some(Target::Template(arg.trim_start_matches("--roll-template=").to_string()));
            }
            _ if arg.starts_with("--seed=") => {
                let value = arg.trim_start_matches("--seed=");
                seed = Some(value.parse::<u64>().map_err(|_| format!("error: invalid --seed '{value}'"))?);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                return Err(format!("error: unexpected argument '{arg}'"));
            }
        }
    }

    let document_json = match document_path {
        Some(path) => std::fs::read_to_string(&path).map_err(|err| format!("error: failed to read '{path}': {err}"))?,
        None => read_stdin_input()?,
    };

    if document_json.trim().is_empty() {
        return Err(format!("error: no document provided\n\n{}", help_text()));
    }

    let target = target.ok_or_else(|| format!("error: one of --roll or --roll-template is required\n\n{}", help_text()))?;

    Ok(CliConfig { document_json, collection_id, target, trace, seed, color })
}

fn read_stdin_input() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "tableforge {version}

Procedural content generation engine for random tables.

Usage:
  tableforge --roll <tableId> [OPTIONS] [--document <path>]
  tableforge --roll-template <name> [OPTIONS] [--document <path>]

Options:
  -d, --document <path>       Document JSON file to load. If omitted, reads stdin.
  -c, --collection <id>       Collection id to register the document under.
                               Default: main
  --roll <tableId>            Roll a table by id.
  --roll-template <name>      Roll a template by name.
  --seed <u64>                Seed the RNG for a deterministic roll.
  --trace                     Include an execution trace in the report.
  --color                     Force ANSI color output.
  --no-color                  Disable ANSI color output.
  -h, --help                  Show this help message.
  -V, --version                Print version information.

Exit codes:
  0  Success.
  1  Internal error (malformed document, unknown table/template, ...).
  2  Invalid arguments or missing input.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
