use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use testrig_core::{sanitize_for_fs, Guest};
use testrig_runner::{absolute_path, load_plan, ExecuteStep, LocalGuest, Plan};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TESTRIG_LOG";

#[derive(Parser)]
#[command(name = "rig", version, about = "Run test plans on guests")]
struct Cli {
    /// Raise log verbosity to debug.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the plan on the local guest.
    Run {
        plan: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Name the local guest (matched against `where`).
        #[arg(long, default_value = "localhost")]
        guest: String,
        #[arg(long)]
        json: bool,
    },
    /// Describe the execute phases configured by the plan.
    Show {
        plan: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Print the packages guests need to run the plan.
    Requires {
        plan: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print results persisted by a previous run.
    Results {
        plan: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a plan document without running it.
    Validate { plan: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_workdir(plan: &Plan) -> PathBuf {
    Path::new(".testrig")
        .join("runs")
        .join(sanitize_for_fs(&plan.name))
}

fn woken_step(plan_path: &Path, workdir: Option<PathBuf>) -> Result<ExecuteStep> {
    let plan = load_plan(plan_path)?;
    let workdir = absolute_path(&workdir.unwrap_or_else(|| default_workdir(&plan)))?;
    debug!(plan = %plan.name, workdir = %workdir.display(), "waking execute step");
    let mut step = ExecuteStep::new(&plan, &workdir);
    step.wake()?;
    Ok(step)
}

fn results_payload(step: &ExecuteStep) -> Value {
    let results: Vec<Value> = step
        .results()
        .iter()
        .map(|result| {
            json!({
                "name": result.name,
                "result": result.result.as_str(),
                "log": result.log,
                "duration": result.duration,
                "note": result.note,
            })
        })
        .collect();
    json!({
        "ok": true,
        "workdir": step.workdir(),
        "summary": step.summary(),
        "results": results,
    })
}

fn print_results(step: &ExecuteStep) {
    for result in step.results() {
        match &result.note {
            Some(note) => println!("{:<6} {} ({})", result.result, result.name, note),
            None => println!("{:<6} {}", result.result, result.name),
        }
    }
    println!("{}", step.summary());
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            plan,
            workdir,
            guest,
            json,
        } => {
            let mut step = woken_step(&plan, workdir)?;
            let local = LocalGuest::named(guest);
            let guests: [&dyn Guest; 1] = [&local];
            step.go(&guests)?;
            if json {
                return Ok(Some(results_payload(&step)));
            }
            print_results(&step);
            Ok(None)
        }
        Commands::Show { plan, workdir } => {
            let step = woken_step(&plan, workdir)?;
            print!("{}", step.show());
            Ok(None)
        }
        Commands::Requires {
            plan,
            workdir,
            json,
        } => {
            let step = woken_step(&plan, workdir)?;
            let requires = step.requires();
            if json {
                return Ok(Some(json!({ "ok": true, "requires": requires })));
            }
            for package in requires {
                println!("{}", package);
            }
            Ok(None)
        }
        Commands::Results {
            plan,
            workdir,
            json,
        } => {
            let step = woken_step(&plan, workdir)?;
            if step.results().is_empty() {
                return Err(anyhow!(
                    "no results recorded under {}",
                    step.workdir().display()
                ));
            }
            if json {
                return Ok(Some(results_payload(&step)));
            }
            print_results(&step);
            Ok(None)
        }
        Commands::Validate { plan } => {
            let parsed = load_plan(&plan)?;
            println!(
                "ok: {} ({} tests)",
                parsed.name,
                parsed.tests().len()
            );
            Ok(None)
        }
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Requires { json, .. }
        | Commands::Results { json, .. } => *json,
        Commands::Show { .. } | Commands::Validate { .. } => false,
    }
}
