use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use stackvm::bytecode::{self, EncodeError};
use stackvm::program::ProgramError;
use stackvm::report::{render_environment, render_error};
use stackvm::{Environment, ExecutionConfig, Interpreter, Program, Stack};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PROGRAM: &str = "./support/countdown.asm";

const USAGE: &str = "usage: stackvm [--trace] [--profile] [--emit OUT] [FILE]";

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}\n{}", USAGE)]
    Usage(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Encode {
        path: PathBuf,
        source: EncodeError,
    },
    #[error("{path}: {source}")]
    Program {
        path: PathBuf,
        source: ProgramError,
    },
}

#[derive(Debug)]
struct Options {
    config: ExecutionConfig,
    emit: Option<PathBuf>,
    path: PathBuf,
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<Options, CliError> {
    let mut config = ExecutionConfig::default();
    let mut emit = None;
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace" => config.trace = true,
            "--profile" => config.profile = true,
            "--emit" => {
                let out = args.next().ok_or_else(|| {
                    CliError::Usage("--emit requires a path".to_string())
                })?;
                emit = Some(PathBuf::from(out));
            }
            flag if flag.starts_with("--") => {
                return Err(CliError::Usage(format!("unknown flag `{flag}`")));
            }
            other => {
                if path.is_some() {
                    return Err(CliError::Usage(format!("unexpected `{other}`")));
                }
                path = Some(PathBuf::from(other));
            }
        }
    }
    Ok(Options {
        config,
        emit,
        path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM)),
    })
}

/// Warning for a run that completed without writing any register, which
/// usually means the program forgot to store its result.
fn unwritten_output_warning(env: &Environment) -> Option<&'static str> {
    env.is_empty()
        .then_some("program completed without writing any register")
}

/// Load and run the program, returns whether the run succeeded.
fn run(options: Options) -> Result<bool, CliError> {
    let bytes = fs::read(&options.path).map_err(|source| CliError::Io {
        path: options.path.clone(),
        source,
    })?;
    let program =
        Program::from_bytes(&bytes).map_err(|source| CliError::Program {
            path: options.path.clone(),
            source,
        })?;
    info!(path = %options.path.display(), instructions = program.len(), "loaded program");

    if let Some(out) = &options.emit {
        let bytes =
            bytecode::encode(&program).map_err(|source| CliError::Encode {
                path: out.clone(),
                source,
            })?;
        fs::write(out, bytes).map_err(|source| CliError::Io {
            path: out.clone(),
            source,
        })?;
        info!(path = %out.display(), "wrote bytecode");
    }

    let mut env = Environment::new();
    let mut stack = Stack::new();
    let execution = Interpreter::with_config(options.config).execute(
        &program,
        &mut env,
        &mut stack,
    );

    if let Some(trace) = &execution.trace {
        eprint!("{}", trace.debug());
    }
    if let Some(profile) = &execution.profile {
        eprintln!("{}", profile.summary());
    }

    match render_error(&execution.result) {
        None => {
            if let Some(message) = unwritten_output_warning(&env) {
                warn!(path = %options.path.display(), "{message}");
            }
            println!("Environment:\n");
            print!("{}", render_environment(&env));
            Ok(true)
        }
        Some(report) => {
            print!("{report}");
            Ok(false)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match parse_args(env::args().skip(1)).and_then(run) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
