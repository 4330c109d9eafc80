//! Broker daemon entry point: parses CLI arguments, loads the startup
//! config, replays backend registrations and mounts, then serves clients.
//!
//! Grounded on the teacher's `src/main.rs`/`lib.rs` `handle_forever` shape.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use vfs_broker::backends::memory::InMemoryBackend;
use vfs_broker::backends::shadow::ShadowBackend;
use vfs_broker::config::Config;
use vfs_broker::namespace::Namespace;
use vfs_broker::server;

#[derive(Parser, Debug)]
#[command(name = "vfsbrokerd", about = "Virtual file system broker daemon")]
struct Args {
    /// Address to bind the client-facing listener to.
    #[arg(long, default_value = "127.0.0.1:7049")]
    listen: String,

    /// Path to the TOML startup config (backend registrations and mounts).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let namespace = Arc::new(Namespace::new());

    if let Some(path) = &args.config {
        let config = match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("vfsbrokerd: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = replay(&namespace, &config).await {
            eprintln!("vfsbrokerd: {err}");
            return ExitCode::FAILURE;
        }
    }

    let listener = match TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("vfsbrokerd: could not bind {}: {err}", args.listen);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %args.listen, "vfsbrokerd listening");

    tokio::select! {
        result = server::handle_forever(listener, namespace.clone()) => {
            if let Err(err) = result {
                tracing::error!(%err, "accept loop terminated");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            namespace.registry.shutdown();
        }
    }
    ExitCode::SUCCESS
}

async fn replay(namespace: &Namespace, config: &Config) -> Result<(), String> {
    for backend in &config.backends {
        let instance: Arc<dyn vfs_broker::backend::Backend> = match &backend.path {
            Some(path) => Arc::new(ShadowBackend::new(path)),
            None => Arc::new(InMemoryBackend::new()),
        };
        namespace.register_backend(backend.name.clone(), backend.instance, instance).await;
        tracing::info!(name = %backend.name, instance = backend.instance, "backend registered");
    }

    for mount in &config.mounts {
        let (handle, backend) = namespace
            .registry
            .resolve(&mount.backend, mount.instance, false)
            .await
            .map_err(|err| format!("mount {:?}: backend not registered ({err})", mount.point))?;
        namespace
            .mount(&mount.point, handle, backend, 0, mount.instance, &mount.backend, &mount.options)
            .await
            .map_err(|err| format!("mount {:?} failed: {err}", mount.point))?;
        tracing::info!(point = %mount.point, backend = %mount.backend, "mount replayed");
    }
    Ok(())
}
