//! ContentForge CLI - headless media generation and content pipelines

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use contentforge_lib::core::binary::{decode_data_uri, encode_data_uri, RasterAdapter};
use contentforge_lib::core::credentials::{CredentialConfig, CredentialStore, VaultBackend};
use contentforge_lib::core::generative::provider_impls::{GeminiArticleWriter, VeoStudio};
use contentforge_lib::core::generative::{
    Asset, DispatcherImageSource, GenerationRequest, ProviderDispatcher, ProviderRegistry,
};
use contentforge_lib::core::http::ReqwestTransport;
use contentforge_lib::core::pipeline::{ContentBundle, ContentGenerationPipeline};
use contentforge_lib::core::polling::AsyncPollingEngine;
use contentforge_lib::core::settings::{EngineSettings, SettingsManager};

/// Environment variable holding the vault passphrase
const VAULT_KEY_ENV: &str = "CONTENTFORGE_VAULT_KEY";

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(name = "contentforge")]
#[command(about = "Media generation across image, text and video providers", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (settings and credential vault)
    #[arg(long, global = true, env = "CONTENTFORGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Credential operations
    #[command(subcommand)]
    Credentials(CredentialCommands),

    /// Dispatch one generation request and print the result
    Submit {
        /// Service id (openai, stability, replicate, ideogram)
        #[arg(long)]
        service: String,

        /// Prompt text
        #[arg(long, default_value = "")]
        prompt: String,

        /// Provider model id
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value_t = 1024)]
        width: u32,

        #[arg(long, default_value_t = 1024)]
        height: u32,

        /// Sampling steps
        #[arg(long)]
        steps: Option<u32>,

        /// Guidance / CFG scale
        #[arg(long)]
        guidance: Option<f32>,

        /// What to avoid
        #[arg(long)]
        negative: Option<String>,

        /// Reference image file (variation, or edit with --mask)
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Mask image file
        #[arg(long)]
        mask: Option<PathBuf>,
    },

    /// Run the article + image + video pipeline
    Generate {
        /// Topic prompt
        #[arg(long)]
        prompt: String,

        /// Write article.md, image and video files here instead of printing JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store or replace a credential
    Set {
        /// Service id
        id: String,

        /// API key
        #[arg(long, env = "CONTENTFORGE_SECRET", hide_env_values = true)]
        secret: String,

        /// Default model for this service
        #[arg(long)]
        model: Option<String>,

        /// Base URL override
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Show a credential (secret masked)
    Get {
        id: String,

        /// Follow aliases when the id itself is not stored
        #[arg(long)]
        resolve: bool,
    },

    /// Remove a credential
    Delete { id: String },

    /// List stored credential ids
    List,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialView {
    id: String,
    secret: String,
    model: Option<String>,
    base_url: Option<String>,
    updated_at: i64,
}

fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries command output, logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "contentforge.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No platform data directory; pass --data-dir")?
            .join("contentforge"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

fn open_store(data_dir: &Path) -> Result<Arc<CredentialStore>> {
    let passphrase = std::env::var(VAULT_KEY_ENV)
        .with_context(|| format!("{} must be set to open the credential vault", VAULT_KEY_ENV))?;
    let vault = VaultBackend::open(data_dir.join("credentials.vault"), &passphrase)?;
    Ok(Arc::new(CredentialStore::new(Arc::new(vault))))
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_credentials(command: CredentialCommands, store: &CredentialStore) -> Result<()> {
    match command {
        CredentialCommands::Set {
            id,
            secret,
            model,
            base_url,
        } => {
            let mut config = CredentialConfig::new(id, secret);
            config.model = model;
            config.base_url = base_url;
            let saved = store.save(config)?;
            println!("Stored credential '{}'", saved.id);
        }
        CredentialCommands::Get { id, resolve } => {
            let found = if resolve {
                store.resolve_with_fallback(&id)
            } else {
                store.get(&id)
            };
            let Some(credential) = found else {
                bail!("No credential stored for '{}'", id);
            };
            print_json(&CredentialView {
                secret: mask_secret(&credential.secret),
                id: credential.id,
                model: credential.model,
                base_url: credential.base_url,
                updated_at: credential.updated_at,
            })?;
        }
        CredentialCommands::Delete { id } => {
            store.delete(&id)?;
            println!("Deleted credential '{}'", id);
        }
        CredentialCommands::List => {
            for id in store.list() {
                println!("{}", id);
            }
        }
    }
    Ok(())
}

/// Reads an image file into a data URI
fn file_data_uri(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mime_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(encode_data_uri(&bytes, mime_type))
}

fn build_dispatcher(
    store: Arc<CredentialStore>,
    transport: Arc<ReqwestTransport>,
    settings: &EngineSettings,
    polling: AsyncPollingEngine,
) -> ProviderDispatcher {
    ProviderDispatcher::new(
        store,
        ProviderRegistry::with_defaults(),
        transport,
        Arc::new(RasterAdapter::new()),
    )
    .with_base_urls(settings.providers.base_urls.clone())
    .with_poll_config(settings.polling.image_job())
    .with_polling(polling)
}

/// Cancels `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning run");
            token.cancel();
        }
    });
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/png" => "png",
        "video/webm" => "webm",
        _ if mime_type.starts_with("video/") => "mp4",
        _ => "bin",
    }
}

fn write_bundle(bundle: &ContentBundle, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create output directory {}", out.display()))?;

    std::fs::write(out.join("article.md"), &bundle.article)?;

    match &bundle.image {
        Asset::Url { url } => std::fs::write(out.join("image.url"), url)?,
        image => {
            if let Some(uri) = image.to_data_uri() {
                let decoded = decode_data_uri(&uri)?;
                let name = format!("image.{}", extension_for(&decoded.mime_type));
                std::fs::write(out.join(name), decoded.bytes)?;
            }
        }
    }

    let video = decode_data_uri(&bundle.video)?;
    let name = format!("video.{}", extension_for(&video.mime_type));
    std::fs::write(out.join(&name), video.bytes)?;

    info!(dir = %out.display(), "Bundle written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref());

    let data_dir = data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Credentials(command) => {
            let store = open_store(&data_dir)?;
            run_credentials(command, &store)?;
        }

        Commands::Submit {
            service,
            prompt,
            model,
            width,
            height,
            steps,
            guidance,
            negative,
            reference,
            mask,
        } => {
            let settings = SettingsManager::new(&data_dir).load();
            let store = open_store(&data_dir)?;
            let transport = Arc::new(ReqwestTransport::new(settings.http.timeout())?);
            let polling = AsyncPollingEngine::new();
            cancel_on_interrupt(polling.cancellation_token());
            let dispatcher = build_dispatcher(store, transport, &settings, polling);

            let mut request = GenerationRequest::new(service, prompt).with_size(width, height);
            request.model = model;
            request.steps = steps;
            request.guidance_scale = guidance;
            request.negative_prompt = negative;
            if let Some(path) = reference {
                request.reference_asset = Some(file_data_uri(&path)?);
            }
            if let Some(path) = mask {
                request.mask_asset = Some(file_data_uri(&path)?);
            }

            let result = dispatcher.dispatch(&request).await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Generate { prompt, out } => {
            let settings = SettingsManager::new(&data_dir).load();
            let store = open_store(&data_dir)?;
            let transport = Arc::new(ReqwestTransport::new(settings.http.timeout())?);
            let pipeline_settings = settings.pipeline.clone();

            let writer = GeminiArticleWriter::new(store.clone(), transport.clone())
                .with_service(pipeline_settings.article_service.clone())
                .with_model(pipeline_settings.article_model.clone())
                .with_base_url(
                    settings
                        .providers
                        .base_url(&pipeline_settings.article_service)
                        .map(str::to_string),
                );

            // One token stops the image-job poll and every later stage
            let polling = AsyncPollingEngine::new();
            let cancel = polling.cancellation_token();
            cancel_on_interrupt(cancel.clone());

            let dispatcher = Arc::new(build_dispatcher(
                store.clone(),
                transport.clone(),
                &settings,
                polling,
            ));
            let images = DispatcherImageSource::new(dispatcher, pipeline_settings.image_service.clone())
                .with_model(pipeline_settings.image_model.clone())
                .with_size(pipeline_settings.image_size());

            let studio = VeoStudio::new(store, transport)
                .with_service(pipeline_settings.video_service.clone())
                .with_model(pipeline_settings.video_model.clone())
                .with_base_url(
                    settings
                        .providers
                        .base_url(&pipeline_settings.video_service)
                        .map(str::to_string),
                );

            let pipeline = ContentGenerationPipeline::new(
                Arc::new(writer),
                Arc::new(images),
                Arc::new(studio),
                Arc::new(RasterAdapter::new()),
            )
            .with_settings(pipeline_settings)
            .with_cancellation(cancel);

            let bundle = pipeline.generate(&prompt).await?;
            match out {
                Some(dir) => write_bundle(&bundle, &dir)?,
                None => print_json(&bundle)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("sk-abcdefghijkl"), "sk-a****");
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("video/quicktime"), "mp4");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/json"), "bin");
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "contentforge",
            "submit",
            "--service",
            "openai",
            "--prompt",
            "a fox",
            "--width",
            "512",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit { service, width, height, .. } => {
                assert_eq!(service, "openai");
                assert_eq!((width, height), (512, 1024));
            }
            _ => panic!("expected submit"),
        }
    }
}
