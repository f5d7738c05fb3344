//! Minimal front-end: run a JSON graph description to completion.
//!
//! Exit codes: 0 success, 1 graph construction error, 2 runtime error,
//! 3 configuration error.

use std::process::ExitCode;

use log::{error, warn};

use clflow::{Config, Error, Graph, PluginRegistry, Profiler, ResourceManager, Scheduler};

fn main() -> ExitCode {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: runjson <graph.json>");
            return ExitCode::from(3);
        }
    };

    if std::env::var_os("ENGINE_PLUGIN_PATH").is_some() {
        warn!("ENGINE_PLUGIN_PATH is set, but dynamic plugin loading is not built in");
    }

    let json = match std::fs::read_to_string(&path) {
        Ok(json) => json,
        Err(err) => {
            error!("cannot read {}: {}", path, err);
            return ExitCode::from(3);
        }
    };

    let registry = PluginRegistry::with_builtins();
    let resources = ResourceManager::new(Config::from_env());

    let graph = match Graph::from_json(&json, &registry) {
        Ok(graph) => graph,
        Err(err) => {
            error!("graph construction failed: {}", err);
            return ExitCode::from(1);
        }
    };

    let mut scheduler = Scheduler::new(graph, &resources);
    scheduler.set_registry(&registry);
    scheduler.set_profiler(std::sync::Arc::new(Profiler::from_env()));

    match scheduler.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ (Error::BadGraph(..) | Error::PluginNotFound(..))) => {
            error!("graph construction failed: {}", err);
            ExitCode::from(1)
        }
        Err(err) => {
            error!("run failed: {}", err);
            ExitCode::from(2)
        }
    }
}
