//! Command-line driver.
//!
//! Usage:
//!   engram [options] [name=value ...] [propsFile]
//!
//! `name=value` pairs override the properties file and cannot be
//! overwritten by it. A file ending in `.json` is read as a serialized
//! `ModelConfig` instead.

use std::path::Path;
use std::process;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engram::config::{ModelConfig, Props};
use engram::distributed::comm::DEFAULT_TIMEOUT;
use engram::distributed::{Distribution, LayerPinned, RoundRobin, ThreadComm};
use engram::error::{ConfigError, SimError};
use engram::observer::{SystemSnapshot, LAYER_HEADER, SCORE_HEADER, TRACT_HEADER};
use engram::{RunReport, Simulation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    RoundRobin,
    Layer,
}

#[derive(Debug)]
struct Options {
    trace_level: String,
    trace_tags: Vec<String>,
    json: bool,
    workers: usize,
    policy: Policy,
    conn_state: bool,
    strict: bool,
    overrides: Vec<(String, String)>,
    config_file: Option<String>,
}

fn usage() -> ! {
    eprintln!("Usage: engram [options] [name=value ...] [propsFile]\n");
    eprintln!("Options:");
    eprintln!("  --trace-level LEVEL         error|warn|info|debug|trace (default: warn)");
    eprintln!("  --trace-tags a,b            debug output for the named targets");
    eprintln!("                              (plasticity, inhibition, schedule, sync, props)");
    eprintln!("  --json                      print the run report and final snapshot as JSON");
    eprintln!("  --workers N                 run N in-process workers");
    eprintln!("  --policy round-robin|layer  unit partitioning across workers");
    eprintln!("  --conn-state                print final connection and unit state");
    eprintln!("  --strict                    unused properties are an error");
    process::exit(2);
}

fn parse_args() -> Options {
    let mut opts = Options {
        trace_level: "warn".into(),
        trace_tags: Vec::new(),
        json: false,
        workers: 1,
        policy: Policy::RoundRobin,
        conn_state: false,
        strict: false,
        overrides: Vec::new(),
        config_file: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => usage(),
            "--trace-level" => opts.trace_level = args.next().unwrap_or_else(|| usage()),
            "--trace-tags" => {
                let tags = args.next().unwrap_or_else(|| usage());
                opts.trace_tags = tags.split(',').map(|t| t.trim().to_string()).collect();
            }
            "--json" => opts.json = true,
            "--conn-state" => opts.conn_state = true,
            "--strict" => opts.strict = true,
            "--workers" => {
                opts.workers = args
                    .next()
                    .and_then(|n| n.parse().ok())
                    .filter(|&n| n >= 1)
                    .unwrap_or_else(|| usage());
            }
            "--policy" => {
                opts.policy = match args.next().as_deref() {
                    Some("round-robin") => Policy::RoundRobin,
                    Some("layer") => Policy::Layer,
                    _ => usage(),
                };
            }
            s if s.starts_with("--") => {
                eprintln!("Unknown option: {s}");
                usage();
            }
            s => match s.split_once('=') {
                Some((name, value)) => opts.overrides.push((name.to_string(), value.to_string())),
                None if opts.config_file.is_none() => opts.config_file = Some(s.to_string()),
                None => usage(),
            },
        }
    }
    opts
}

fn init_tracing(opts: &Options) {
    let mut directives = vec![opts.trace_level.clone()];
    directives.extend(opts.trace_tags.iter().map(|t| format!("engram::{t}=debug")));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives.join(",")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(opts: &Options) -> Result<ModelConfig, SimError> {
    if let Some(path) = opts.config_file.as_deref().filter(|p| p.ends_with(".json")) {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.into(),
            source,
        })?;
        return Ok(ModelConfig::from_json(&text)?);
    }

    if opts.config_file.is_none() && opts.overrides.is_empty() {
        info!("no properties given, using the built-in model");
        return Ok(ModelConfig::default());
    }

    let mut props = Props::new();
    for (name, value) in &opts.overrides {
        props.set(name, value.as_str(), true);
    }
    if let Some(path) = opts.config_file.as_deref() {
        props.read_file(Path::new(path))?;
    }
    if !opts.json {
        print!("{props}");
    }

    let config = ModelConfig::from_props(&mut props)?;
    props.report_unused(opts.strict)?;
    Ok(config)
}

fn distribution(policy: Policy, comm: ThreadComm) -> Box<dyn Distribution> {
    match policy {
        Policy::RoundRobin => Box::new(RoundRobin::new(comm)),
        Policy::Layer => Box::new(LayerPinned::new(comm)),
    }
}

/// What worker 0 hands back to the printer.
#[derive(Debug)]
struct Output {
    report: RunReport,
    state: Option<Vec<String>>,
    snapshot: Option<SystemSnapshot>,
}

/// Run one worker to completion. The state lines and the snapshot are
/// collectives; only worker 0 gets them back.
fn run_worker(mut sim: Simulation, conn_state: bool, snapshot: bool) -> Result<Output, SimError> {
    let report = sim.run()?;
    let state = if conn_state { sim.state_lines()? } else { None };
    let snapshot = if snapshot { sim.collect_snapshot()? } else { None };
    Ok(Output {
        report,
        state,
        snapshot,
    })
}

/// The error to report when workers fail. A worker that hit a model error
/// usually leaves its peers timing out or disconnected; prefer the model
/// error.
fn root_cause(mut failures: Vec<SimError>) -> Option<SimError> {
    if failures.is_empty() {
        return None;
    }
    let pos = failures
        .iter()
        .position(|e| !matches!(e, SimError::Distributed(_)))
        .unwrap_or(0);
    Some(failures.swap_remove(pos))
}

/// Run one in-process worker per config, rank `i` on `configs[i]`.
fn run_workers(
    configs: Vec<ModelConfig>,
    policy: Policy,
    conn_state: bool,
    snapshot: bool,
    timeout: Duration,
) -> Result<Output, SimError> {
    let comms = ThreadComm::group(configs.len());
    let results: Vec<Result<Output, SimError>> = thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(configs)
            .map(|(comm, config)| {
                scope.spawn(move || {
                    let dist = distribution(policy, comm.with_timeout(timeout));
                    let sim = Simulation::with_distribution(config, dist)?;
                    run_worker(sim, conn_state, snapshot)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| process::exit(1)))
            .collect()
    });

    let mut coordinator = None;
    let mut failures = Vec::new();
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(out) if rank == 0 => coordinator = Some(out),
            Ok(_) => {}
            Err(e) => {
                error!(rank, "worker failed: {e}");
                failures.push(e);
            }
        }
    }
    if let Some(e) = root_cause(failures) {
        return Err(e);
    }
    coordinator.ok_or_else(|| SimError::Config(ConfigError::Invalid("coordinator produced no report".into())))
}

fn execute(opts: &Options, config: ModelConfig) -> Result<Output, SimError> {
    if opts.workers <= 1 {
        let sim = Simulation::new(config)?;
        let sizes = sim.network().size_summary();
        for e in &sizes.layers {
            info!(layer = %e.id, units = e.count, "layer size");
        }
        for e in &sizes.tracts {
            info!(tract = %e.id, connections = e.count, "tract size");
        }
        info!(units = sizes.total_units, connections = sizes.total_connections, "network size");
        return run_worker(sim, opts.conn_state, opts.json);
    }

    let configs = vec![config; opts.workers];
    run_workers(configs, opts.policy, opts.conn_state, opts.json, DEFAULT_TIMEOUT)
}

fn print_report(report: &RunReport) {
    println!("{SCORE_HEADER}");
    println!("{LAYER_HEADER}");
    println!("{TRACT_HEADER}");
    for r in &report.records {
        println!("{r}");
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a RunReport,
    snapshot: Option<&'a SystemSnapshot>,
}

fn main() {
    let opts = parse_args();
    init_tracing(&opts);

    let outcome = load_config(&opts).and_then(|config| execute(&opts, config));
    match outcome {
        Ok(out) => {
            if opts.json {
                let json = JsonOutput {
                    report: &out.report,
                    snapshot: out.snapshot.as_ref(),
                };
                match serde_json::to_string_pretty(&json) {
                    Ok(s) => println!("{s}"),
                    Err(e) => {
                        error!("cannot encode report: {e}");
                        process::exit(1);
                    }
                }
            } else {
                print_report(&out.report);
            }
            for l in out.state.into_iter().flatten() {
                println!("{l}");
            }
        }
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
