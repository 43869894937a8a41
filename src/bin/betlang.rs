use std::{fs, io::IsTerminal, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand, ValueEnum};

use betlang::{
    diagnostics::{Diagnostic, Severity},
    driver::{self, Config, PipelineError},
    pretty,
    repl::Repl,
    span::SourceMap,
};

const EXIT_EVAL_ERROR: u8 = 1;
const EXIT_FRONTEND_ERROR: u8 = 2;
const EXIT_USAGE: u8 = 64;

#[derive(Parser)]
#[command(name = "betlang", version, about = "BetLang interpreter and toolchain")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, elaborate and evaluate a program; print the final value
    Run {
        file: PathBuf,
        /// Seed for the deterministic generator (BETLANG_SEED otherwise)
        #[arg(long)]
        seed: Option<u64>,
        /// Abort evaluation after this many steps
        #[arg(long)]
        limit: Option<u64>,
        /// Toggle the safety subsystems
        #[arg(long, value_enum, default_value_t = Toggle::On)]
        safety: Toggle,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Parse and elaborate only
    Check {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Start an interactive session
    Repl,
    /// Round-trip a file through the parser and print the keyword form
    Fmt { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version requests are not usage errors.
            if err.use_stderr() {
                eprintln!("{err}");
                return ExitCode::from(EXIT_USAGE);
            }
            print!("{err}");
            return ExitCode::SUCCESS;
        }
    };

    match args.command {
        Command::Run {
            file,
            seed,
            limit,
            safety,
            format,
        } => run(&file, seed, limit, safety, format),
        Command::Check { file, format } => check(&file, format),
        Command::Repl => {
            let mut repl = Repl::new(Config::from_env());
            match repl.run() {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("error: {err}");
                    ExitCode::from(EXIT_EVAL_ERROR)
                }
            }
        }
        Command::Fmt { file } => fmt(&file),
    }
}

fn run(
    file: &PathBuf,
    seed: Option<u64>,
    limit: Option<u64>,
    safety: Toggle,
    format: Format,
) -> ExitCode {
    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", file.display());
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let mut config = Config::from_env();
    if let Some(seed) = seed {
        config.seed = seed;
    }
    config.step_limit = limit;
    config.safety_enabled = matches!(safety, Toggle::On);

    let map = SourceMap::new(&source);
    let mut cooloff = config.new_cooloff();
    match driver::run_source(&source, &config, &mut cooloff) {
        Ok(outcome) => {
            report(&outcome.warnings, &map, format);
            println!("{}", outcome.value);
            ExitCode::SUCCESS
        }
        Err(PipelineError::Frontend(diags)) => {
            report(&diags, &map, format);
            ExitCode::from(EXIT_FRONTEND_ERROR)
        }
        Err(PipelineError::Runtime(diag)) => {
            report(&[diag], &map, format);
            ExitCode::from(EXIT_EVAL_ERROR)
        }
    }
}

fn check(file: &PathBuf, format: Format) -> ExitCode {
    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", file.display());
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let map = SourceMap::new(&source);
    match driver::check_source(&source, &Config::from_env()) {
        Ok(warnings) => {
            report(&warnings, &map, format);
            ExitCode::SUCCESS
        }
        Err(diags) => {
            report(&diags, &map, format);
            ExitCode::from(EXIT_FRONTEND_ERROR)
        }
    }
}

fn fmt(file: &PathBuf) -> ExitCode {
    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", file.display());
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let map = SourceMap::new(&source);
    match driver::parse(&source) {
        Ok(program) => {
            print!("{}", pretty::format_program(&program));
            ExitCode::SUCCESS
        }
        Err(diags) => {
            report(&diags, &map, Format::Text);
            ExitCode::from(EXIT_FRONTEND_ERROR)
        }
    }
}

/// Diagnostics go to stderr in source order: colored line-oriented text, or
/// one JSON object per line under `--format=json`.
fn report(diagnostics: &[Diagnostic], map: &SourceMap, format: Format) {
    let mut sorted: Vec<&Diagnostic> = diagnostics.iter().collect();
    sorted.sort_by_key(|d| d.span.map(|s| s.start).unwrap_or(usize::MAX));
    for diag in sorted {
        match format {
            Format::Json => match serde_json::to_string(diag) {
                Ok(line) => eprintln!("{line}"),
                Err(err) => eprintln!("error: cannot serialize diagnostic: {err}"),
            },
            Format::Text => eprintln!("{}", colorize(diag, &diag.render(map))),
        }
    }
}

fn colorize(diag: &Diagnostic, rendered: &str) -> String {
    if !std::io::stderr().is_terminal() {
        return rendered.to_string();
    }
    let color = match diag.severity {
        Severity::Error => "\x1b[31m",
        Severity::Warning => "\x1b[33m",
        Severity::Note => "\x1b[36m",
    };
    format!("{color}{rendered}\x1b[0m")
}
