//! `run` command: boot a replica and block until shutdown.

use anyhow::{Context, Result};
use qkv_config::ConfigLoader;

pub fn run(file: Option<String>, env_prefix: &str) -> Result<()> {
    let mut loader = ConfigLoader::new().with_env_prefix(env_prefix.to_string());
    if let Some(file) = &file {
        loader = loader.with_file(file);
    }
    let config = loader.load().context("failed to load configuration")?;

    println!("quorumkv replica starting");
    println!("  engine:     {:?}", config.engine);
    println!("  replica id: {}", config.replica_id);
    println!("  cluster:    {} members", config.cluster_size());

    let handle = qkv_replica::boot(&config).context("failed to boot replica")?;

    println!("Replica is ready. Press Ctrl+C to stop.");
    wait_for_shutdown_signal();

    handle.stop();
    println!("Replica stopped.");

    Ok(())
}

/// Blocks until the process receives a termination signal. A simple
/// channel-based wait, matching the blocking, no-async-runtime model the
/// rest of this service uses.
fn wait_for_shutdown_signal() {
    let (tx, rx) = std::sync::mpsc::channel();
    let result = ctrlc_handler(move || {
        let _ = tx.send(());
    });
    if result.is_err() {
        // No Ctrl+C handler available in this environment; fall back to
        // parking the thread forever so `run` still blocks as documented.
        loop {
            std::thread::park();
        }
    }
    let _ = rx.recv();
}

/// Installs a handler for SIGINT/Ctrl+C. Kept as its own function so tests
/// never have to actually register a process-wide signal handler.
fn ctrlc_handler(on_signal: impl Fn() + Send + 'static) -> Result<(), ()> {
    ctrlc::set_handler(on_signal).map_err(|_| ())
}
