//! declaro command-line tool.
//!
//! Provides the `declaro` binary:
//! - `check` validates a program document and prints its outline
//! - `run` builds a runtime, dispatches actions and prints the resulting state
//! - `update` applies a hot update to a program and prints the report
//! - `load` fetches a module document through the deduplicating loader
//!
//! Exit codes: 0 = success, 1 = runtime error, 2 = definition error,
//! 3 = I/O error.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use declaro_core::ProgramUpdate;
use declaro_loader::{Fetcher, FsFetcher, HttpFetcher, LoadError, LoaderConfig, ModuleLoader};
use declaro_runtime::{EventKind, RenderTarget, Runtime, RuntimeConfig, RuntimeError, RuntimeEvent};

const EXIT_RUNTIME: i32 = 1;
const EXIT_DEFINITION: i32 = 2;
const EXIT_IO: i32 = 3;

/// Reactive declarative JSON app engine.
#[derive(Parser)]
#[command(name = "declaro", about = "Run and inspect declaro programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a program document.
    Check {
        /// Path to the program JSON document.
        program: PathBuf,
    },

    /// Build a runtime, dispatch actions and print the final state.
    Run {
        /// Path to the program JSON document.
        program: PathBuf,

        /// Action to dispatch, as NAME or NAME:JSON_ARGS (repeatable, in order).
        #[arg(short, long = "dispatch", value_name = "ACTION")]
        dispatches: Vec<String>,

        /// Identifier to print after dispatching (repeatable). Default: all state.
        #[arg(short, long = "get", value_name = "ID")]
        gets: Vec<String>,

        /// Attach a headless render target so mount/interval/timeout effects run.
        #[arg(long)]
        attach: bool,
    },

    /// Apply a hot update to a program and print the update report.
    Update {
        /// Path to the program JSON document.
        program: PathBuf,

        /// Path to the update JSON document (partial program definition).
        update: PathBuf,
    },

    /// Load a module document and print its outline.
    Load {
        /// Module key: URL, file:// URL or path.
        key: String,

        /// Base for relative keys (default: $DECLARO_MODULE_BASE).
        #[arg(short, long)]
        base: Option<String>,

        /// Print this component instead of the outline.
        #[arg(short, long)]
        component: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Check { program } => run_check(&program),
        Commands::Run {
            program,
            dispatches,
            gets,
            attach,
        } => run_program(&program, &dispatches, &gets, attach),
        Commands::Update { program, update } => run_update(&program, &update),
        Commands::Load {
            key,
            base,
            component,
        } => run_load(&key, base, component).await,
    };
    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Execute the check subcommand.
fn run_check(path: &Path) -> i32 {
    let runtime = match build_runtime(path) {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    let graph = runtime.graph();
    print_json(&json!({
        "state": graph.state_ids(),
        "computed": graph.computed_ids(),
        "actions": runtime.dispatcher().action_ids(),
        "effects": graph.effect_ids(),
        "invariants": graph.invariants().iter().map(|i| i.name.clone()).collect::<Vec<_>>(),
        "components": runtime.component_names(),
    }));
    0
}

/// Execute the run subcommand.
fn run_program(path: &Path, dispatches: &[String], gets: &[String], attach: bool) -> i32 {
    let runtime = match build_runtime(path) {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    let _effects = runtime.on(EventKind::Effect, |event| {
        if let RuntimeEvent::Effect { event, value } = event {
            tracing::info!(event = %event, value = %value, "effect");
        }
    });
    let _violations = runtime.on(EventKind::InvariantViolation, |event| {
        if let RuntimeEvent::InvariantViolation(violation) = event {
            eprintln!("invariant '{}' violated: {}", violation.name, violation.message);
        }
    });

    if attach {
        runtime.attach(Box::new(HeadlessTarget));
    }

    for raw in dispatches {
        let (action, args) = match parse_dispatch(raw) {
            Ok(parsed) => parsed,
            Err(msg) => {
                eprintln!("Error: {}", msg);
                return EXIT_RUNTIME;
            }
        };
        if let Err(err) = runtime.dispatch(&action, &args) {
            eprintln!("Error: dispatch '{}' failed: {}", action, err);
            return EXIT_RUNTIME;
        }
    }

    if gets.is_empty() {
        print_json(&Value::Object(runtime.snapshot()));
        return 0;
    }
    let mut out = serde_json::Map::new();
    for id in gets {
        match runtime.get(id) {
            Ok(value) => {
                out.insert(id.clone(), value);
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                return EXIT_RUNTIME;
            }
        }
    }
    print_json(&Value::Object(out));
    0
}

/// Execute the update subcommand.
fn run_update(program: &Path, update_path: &Path) -> i32 {
    let runtime = match build_runtime(program) {
        Ok(runtime) => runtime,
        Err(code) => return code,
    };
    let text = match read(update_path) {
        Ok(text) => text,
        Err(code) => return code,
    };
    let update = match ProgramUpdate::from_json(&text) {
        Ok(update) => update,
        Err(err) => {
            eprintln!("Error: invalid update '{}': {}", update_path.display(), err);
            return EXIT_DEFINITION;
        }
    };

    match runtime.apply_update(update) {
        Ok(report) => {
            print_json(&json!({
                "report": report,
                "state": runtime.snapshot(),
            }));
            0
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            EXIT_RUNTIME
        }
    }
}

/// Execute the load subcommand.
async fn run_load(key: &str, base: Option<String>, component: Option<String>) -> i32 {
    let config = match base {
        Some(base) => LoaderConfig::new(base),
        None => LoaderConfig::from_env(),
    };
    let canonical = declaro_loader::canonicalize(key, &config.base);
    let fetcher: Arc<dyn Fetcher> = if canonical.starts_with("http://") || canonical.starts_with("https://") {
        Arc::new(HttpFetcher::new())
    } else {
        Arc::new(FsFetcher::new())
    };
    let loader = ModuleLoader::new(fetcher, config);

    let result = match &component {
        Some(name) => loader.load_component(key, name).await,
        None => loader.load(key).await.map(|document| {
            json!({
                "key": document.key,
                "hash": document.hash,
                "components": document.components.keys().collect::<Vec<_>>(),
                "update": document.update.as_ref().map(ProgramUpdate::sections),
            })
        }),
    };

    match result {
        Ok(value) => {
            print_json(&value);
            0
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            load_exit_code(&err)
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Renders nothing; lets deferred effects run from the command line.
struct HeadlessTarget;

impl RenderTarget for HeadlessTarget {
    fn render(&self, _root: &Value) {
        tracing::debug!("render requested");
    }
}

fn read(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path).map_err(|err| {
        eprintln!("Error: failed to read '{}': {}", path.display(), err);
        EXIT_IO
    })
}

fn build_runtime(path: &Path) -> Result<Runtime, i32> {
    let text = read(path)?;
    Runtime::from_json(&text, RuntimeConfig::from_env()).map_err(|err| {
        eprintln!("Error: invalid program '{}': {}", path.display(), err);
        definition_exit_code(&err)
    })
}

/// Effects run while the runtime is built; their failures are runtime
/// errors rather than definition errors.
fn definition_exit_code(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::ActionUndefined { .. }
        | RuntimeError::EffectDepthExceeded { .. }
        | RuntimeError::InvariantViolation { .. } => EXIT_RUNTIME,
        _ => EXIT_DEFINITION,
    }
}

fn load_exit_code(err: &LoadError) -> i32 {
    match err {
        LoadError::LoadFailed { .. } => EXIT_IO,
        LoadError::InvalidDocument { .. } | LoadError::ParseError { .. } => EXIT_DEFINITION,
        LoadError::ComponentNotFound { .. } => EXIT_RUNTIME,
    }
}

/// Parses `NAME` or `NAME:JSON_ARGS`. A JSON array supplies positional
/// arguments; any other JSON value is a single argument.
fn parse_dispatch(raw: &str) -> Result<(String, Vec<Value>), String> {
    let (name, args) = match raw.split_once(':') {
        Some((name, args)) => (name.trim(), Some(args)),
        None => (raw.trim(), None),
    };
    if name.is_empty() {
        return Err(format!("missing action name in '{}'", raw));
    }
    let args = match args {
        None => Vec::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(single) => vec![single],
            Err(err) => return Err(format!("invalid arguments for '{}': {}", name, err)),
        },
    };
    Ok((name.to_string(), args))
}

fn print_json(value: &Value) {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize output: {}\"}}", e));
    println!("{}", text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_arguments() {
        assert_eq!(parse_dispatch("reset").unwrap(), ("reset".to_string(), vec![]));
        assert_eq!(
            parse_dispatch("add:[1, \"x\"]").unwrap(),
            ("add".to_string(), vec![json!(1), json!("x")])
        );
        assert_eq!(
            parse_dispatch("rename:\"bob\"").unwrap(),
            ("rename".to_string(), vec![json!("bob")])
        );
        assert!(parse_dispatch(":[1]").is_err());
        assert!(parse_dispatch("add:[1,").is_err());
    }

    #[test]
    fn load_errors_map_to_exit_codes() {
        let failed = LoadError::LoadFailed {
            key: "k".into(),
            status: Some(500),
            reason: "status 500".into(),
        };
        assert_eq!(load_exit_code(&failed), EXIT_IO);
        let invalid = LoadError::InvalidDocument {
            key: "k".into(),
            reason: "missing marker".into(),
        };
        assert_eq!(load_exit_code(&invalid), EXIT_DEFINITION);
    }

    #[test]
    fn effect_failures_while_building_are_runtime_errors() {
        assert_eq!(
            definition_exit_code(&RuntimeError::ActionUndefined { action: "a".into() }),
            EXIT_RUNTIME
        );
        assert_eq!(
            definition_exit_code(&RuntimeError::DuplicateIdentifier { id: "a".into() }),
            EXIT_DEFINITION
        );
    }
}
