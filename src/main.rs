use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use jasm_runtime::RuntimeConfig;
use jasm_runtime::runtime::inspect::{HeapDump, to_json};
use jasm_runtime::runtime::{Runtime, Trap};
use jasm_runtime::workloads::{self, Workload};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WorkloadArg {
    Churn,
    Retain,
    LinkedList,
    Polymorphism,
    WideClass,
}

impl From<WorkloadArg> for Workload {
    fn from(arg: WorkloadArg) -> Self {
        match arg {
            WorkloadArg::Churn => Workload::Churn,
            WorkloadArg::Retain => Workload::Retain,
            WorkloadArg::LinkedList => Workload::LinkedList,
            WorkloadArg::Polymorphism => Workload::Polymorphism,
            WorkloadArg::WideClass => Workload::WideClass,
        }
    }
}

#[derive(Parser)]
#[command(name = "jasm-rt")]
#[command(about = "Managed-memory runtime for linear-memory programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in workload against a fresh runtime
    Run {
        /// The workload to run
        #[arg(value_enum)]
        workload: WorkloadArg,

        /// Iterations or element count (defaults per workload)
        #[arg(long)]
        size: Option<u32>,

        /// Runtime configuration file (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Disable garbage collection (grow memory instead)
        #[arg(long)]
        no_gc: bool,

        /// Print GC statistics
        #[arg(long)]
        gc_stats: bool,

        /// Dump the values reachable from registered roots as JSON
        #[arg(long)]
        dump: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective runtime configuration as TOML
    Config {
        /// Runtime configuration file (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::load(path),
        None => Ok(RuntimeConfig::default()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            size,
            config,
            no_gc,
            gc_stats,
            dump,
            json,
        } => {
            let mut config = match load_config(config.as_ref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if no_gc {
                config.gc_enabled = false;
            }
            config.gc_stats |= gc_stats;
            let print_stats = config.gc_stats;

            let workload: Workload = workload.into();
            let size = size.unwrap_or_else(|| workload.default_size());
            let (runtime, report) = match workloads::run(workload, size, config) {
                Ok(result) => result,
                Err(trap) => {
                    eprintln!("trap: {}", trap);
                    return ExitCode::FAILURE;
                }
            };

            if json {
                match to_json(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("error: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                let status = if report.passed { "ok" } else { "FAILED" };
                println!("{} ({}): {}", report.workload, report.size, status);
            }

            if print_stats {
                let stats = &report.gc;
                eprintln!(
                    "[GC] Collections: {}, Total pause: {}us, Max pause: {}us",
                    stats.cycles, stats.total_pause_us, stats.max_pause_us
                );
                eprintln!(
                    "[GC] Reclaimed: {} values ({} bytes), Heap growths: {}, Pages: {}",
                    stats.values_reclaimed,
                    stats.bytes_reclaimed,
                    stats.heap_growths,
                    report.heap.pages
                );
            }

            if dump {
                match dump_roots(&runtime) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("error: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }

            if !report.passed {
                return ExitCode::FAILURE;
            }
        }
        Commands::Config { config } => {
            let text = load_config(config.as_ref()).and_then(|config| config.to_toml());
            match text {
                Ok(text) => print!("{}", text),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

/// Dump each value held by a registered global root, one level deep.
fn dump_roots(runtime: &Runtime) -> Result<String, String> {
    let inspector = runtime.inspector();
    let mut dumps: Vec<HeapDump> = Vec::new();
    for index in 0..runtime.layout().global_slots {
        let Ok(location) = runtime.global_location(index) else {
            continue;
        };
        if !runtime.is_root(location) {
            continue;
        }
        let reference = runtime
            .load_reference(location)
            .and_then(|r| inspector.dump(r, false))
            .map_err(|e: Trap| format!("failed to dump global {}: {}", index, e))?;
        dumps.push(reference);
    }
    to_json(&serde_json::json!({
        "summary": inspector.summary(),
        "roots": dumps,
    }))
}
