mod cli;

use recast::{
    config, invoker::TranscodeInvoker, queue::JobQueue, registry::JobRegistry, server,
    staging::StagingStore, store::DurableStore, worker,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_service(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting recast job service");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    // Encoder misconfiguration is fatal before any job is accepted.
    let invoker = Arc::new(TranscodeInvoker::from_config(
        &config.encoder,
        config.jobs.convert_timeout(),
    ));
    let encoder_path = invoker.resolve().with_context(|| {
        format!(
            "encoder binary '{}' not found; install it or set [encoder].program",
            config.encoder.program
        )
    })?;
    tracing::info!("Using encoder at {}", encoder_path.display());

    // Determine data directory from config path or current directory
    let data_dir = config_path
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let state_path = config
        .storage
        .state_file
        .clone()
        .unwrap_or_else(|| data_dir.join("recast-state.json"));
    tracing::info!("Persisting job state to {}", state_path.display());

    let registry = JobRegistry::new(Some(state_path));

    // Reconcile state left behind by a previous session, then sweep the
    // staging root for files those jobs left on disk.
    let reconciled = registry.mark_lost();
    if reconciled > 0 {
        tracing::info!("Reconciled {} jobs from previous session", reconciled);
    }

    let staging = Arc::new(StagingStore::new(
        &config.storage.staging_root,
        config.storage.max_staging_bytes,
    )?);
    staging.sweep_orphans(&registry.in_progress_ids());

    let store = Arc::new(DurableStore::new(&config.storage.output_root)?);

    let queue = Arc::new(JobQueue::new(
        config.jobs.max_queue_depth,
        config.jobs.max_input_bytes,
    ));

    let cancels = worker::CancelRegistry::default();
    let pool = worker::WorkerPool::start(
        config.jobs.max_workers,
        registry.clone(),
        queue.clone(),
        staging.clone(),
        store.clone(),
        invoker,
        cancels.clone(),
    );

    // Periodic eviction of terminal jobs past retention.
    let reaper = {
        let registry = registry.clone();
        let retention = config.jobs.retention();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                registry.reap(retention);
            }
        })
    };

    let ctx = server::AppContext {
        registry,
        queue,
        staging,
        store,
        cancels,
        config: Arc::new(config.clone()),
    };

    let server_result = server::start_server(&config, ctx).await;

    // Cleanup
    tracing::info!("Shutting down...");
    reaper.abort();
    pool.shutdown(config.jobs.drain_grace()).await;

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "recast=trace,tower_http=debug".to_string()
        } else {
            "recast=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_service(host, port, cli.config.as_deref()))
        }
        Commands::Convert {
            input,
            output,
            codec,
            bitrate,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(
                &input,
                output.as_deref(),
                codec,
                bitrate,
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("recast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn convert_file(
    input: &std::path::Path,
    output: Option<&std::path::Path>,
    codec: Option<String>,
    bitrate: Option<String>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let mut params = config.encoder.default_params();
    if let Some(codec) = codec {
        params.audio_codec = codec;
    }
    if let Some(bitrate) = bitrate {
        params.audio_bitrate = bitrate;
    }

    let output = output
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| input.with_extension(&params.extension));

    let invoker =
        TranscodeInvoker::from_config(&config.encoder, config.jobs.convert_timeout());
    invoker.resolve().with_context(|| {
        format!("encoder binary '{}' not found", config.encoder.program)
    })?;

    println!(
        "Converting {:?} -> {:?} ({} @ {})",
        input, output, params.audio_codec, params.audio_bitrate
    );

    let cancel = tokio_util::sync::CancellationToken::new();
    invoker
        .convert(input, &output, &params, &cancel)
        .await
        .context("conversion failed")?;

    println!("Done: {:?}", output);
    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let invoker =
        TranscodeInvoker::from_config(&config.encoder, config.jobs.convert_timeout());
    match invoker.resolve() {
        Ok(path) => {
            println!("✓ {} - {}", config.encoder.program, path.display());
            println!("\nAll required tools are available!");
            Ok(())
        }
        Err(_) => {
            println!("✗ {} (not found on PATH)", config.encoder.program);
            anyhow::bail!("encoder binary is missing")
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Workers: {}", config.jobs.max_workers);
            println!("  Queue depth: {}", config.jobs.max_queue_depth);
            println!("  Max input: {} bytes", config.jobs.max_input_bytes);
            println!("  Staging root: {:?}", config.storage.staging_root);
            println!("  Output root: {:?}", config.storage.output_root);
            println!("  Encoder: {}", config.encoder.program);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Workers: {}", config.jobs.max_workers);
        }
    }

    Ok(())
}
