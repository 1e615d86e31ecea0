use clap::{Parser, Subcommand};
use image_cdn::config::{self, ServiceConfig};
use image_cdn::imaging::{ContextSettings, ImagingContext};
use image_cdn::pipeline::Pipeline;
use image_cdn::store::AssetStore;
use image_cdn::{http, logging};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "image-cdn")]
#[command(about = "Image upload and on-demand resize service")]
#[command(long_about = "\
Image upload and on-demand resize service

Uploads are normalized to sRGB and stored as compact AVIF masters under a
generated UUID. Retrieval resizes and center-crops the master to the exact
requested size and re-encodes it for delivery (lossless WebP by default).

Routes:

  GET  /                                   Upload form
  POST /save                               multipart field 'image' → {\"uuid\", \"message\"}
  GET  /get?uuid=<id>&width=<w>&height=<h> Image at exactly w×h

Stored layout:

  images/
  ├── Image-<uuid>.avif   # raster master
  ├── Image-<uuid>.png    # high bit depth master
  ├── Image-<uuid>.gif    # animated source, kept as uploaded
  └── Image-<uuid>.svg    # vector source, kept as uploaded

Run 'image-cdn gen-config' to generate a documented image-cdn.toml.")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Print a stock image-cdn.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Config file (default: ./image-cdn.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overrides server.port
    #[arg(long)]
    port: Option<u16>,

    /// Asset directory, overrides storage.root
    #[arg(long)]
    storage_root: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            logging::init(cli.log_json);
            let config = load_service_config(&args)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(serve(config))?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Config file plus CLI overrides, validated.
fn load_service_config(args: &ServeArgs) -> Result<ServiceConfig, config::ConfigError> {
    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = &args.storage_root {
        config.storage.root = root.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = AssetStore::open(&config.storage.root)?;
    let ctx = Arc::new(ImagingContext::start(ContextSettings {
        workers: config::effective_threads(&config.processing),
        limits: config.processing.limits(),
    })?);
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&ctx),
        store,
        config.master.settings(),
        config.delivery.settings(),
    ));

    let app = http::router(pipeline, config.server.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        storage = %config.storage.root.display(),
        delivery = ?config.delivery.format,
        version = env!("CARGO_PKG_VERSION"),
        "listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    ctx.shutdown();
    tracing::info!("server stopped");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
