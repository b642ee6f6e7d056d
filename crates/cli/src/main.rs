//! `comfy-studio` -- run one image generation from the terminal.
//!
//! The prompt is taken from the command-line arguments, or from standard
//! input when no arguments are given. Progress is logged while the job
//! runs; Ctrl-C cancels it. Produced image URLs are printed on stdout,
//! one per line.
//!
//! # Flags
//!
//! | Flag          | Effect                                      |
//! |---------------|---------------------------------------------|
//! | `--status`    | Print engine and queue status, then exit    |
//! | `--clear`     | Clear the engine's pending queue, then exit |
//! | `--interrupt` | Interrupt the running job, then exit        |
//!
//! Configuration comes from environment variables (and `.env`); see
//! [`ClientConfig::from_env`].

use std::sync::Arc;

use anyhow::{bail, Context};
use studio_cli::config::ClientConfig;
use studio_cli::prompt::final_prompt;
use studio_engine::api::{EngineApi, HttpEngineApi};
use studio_engine::client::EventChannelClient;
use studio_engine::connection::ConnectionManager;
use studio_session::orchestrator::{Orchestrator, SessionHandle};
use studio_session::state::{Session, SessionState};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfy_studio=info,studio_cli=info,studio_session=info,studio_engine=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    let api = Arc::new(HttpEngineApi::new(config.api_base_url.clone()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--status") => return print_status(&api).await,
        Some("--clear") => {
            let response = api.clear().await.context("Failed to clear the queue")?;
            println!("{}", response.status);
            return Ok(());
        }
        Some("--interrupt") => {
            let response = api.interrupt().await.context("Failed to interrupt")?;
            println!("{}", response.status);
            return Ok(());
        }
        _ => {}
    }

    let input = if args.is_empty() {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read prompt from stdin")?;
        buf
    } else {
        args.join(" ")
    };

    let Some(prompt) = final_prompt(&config.preferences, &input) else {
        bail!("Please enter a prompt");
    };

    tracing::info!(
        api = %config.api_base_url,
        ws = %config.ws_url,
        engine = %config.engine_url(),
        mode = ?config.preferences.prompt_mode,
        "Starting comfy-studio",
    );

    if !api.test_connection(&config.engine_url()).await {
        tracing::warn!(engine = %config.engine_url(), "Engine did not answer the connection test");
    }

    let connection = Arc::new(ConnectionManager::new(
        EventChannelClient::new(config.ws_url.clone()),
        config.reconnect,
    ));
    connection.connect();

    let orchestrator = Orchestrator::with_connection(
        api.clone(),
        Arc::clone(&connection),
        config.orchestrator_config(),
    );

    let result = run(&orchestrator, config.generate_request(prompt)).await;

    orchestrator.shutdown().await;
    connection.disconnect();

    let session = result?;
    match session.state {
        SessionState::Completed => {
            for image in &session.results {
                println!("{}", api.image_url(image)?);
            }
            Ok(())
        }
        SessionState::Cancelled => {
            tracing::info!("Generation cancelled");
            Ok(())
        }
        _ => bail!(
            "{}",
            session
                .error
                .unwrap_or_else(|| "Generation failed".to_string())
        ),
    }
}

/// Submit the request and wait for the session to finish, cancelling on
/// Ctrl-C.
async fn run(
    orchestrator: &Orchestrator,
    request: studio_core::generation::GenerateRequest,
) -> anyhow::Result<Session> {
    let mut handle: SessionHandle = orchestrator.submit(request).await?;
    tracing::info!(prompt_id = %handle.prompt_id(), "Generation submitted");

    let reporter = tokio::spawn(report_progress(handle.updates()));

    let session = tokio::select! {
        result = handle.wait_terminal() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, cancelling generation");
            if let Err(e) = orchestrator.cancel().await {
                tracing::warn!(error = %e, "Cancel failed");
            }
            handle.wait_terminal().await?
        }
    };

    reporter.abort();
    Ok(session)
}

/// Log state changes and progress until the reporter is aborted.
async fn report_progress(mut updates: watch::Receiver<Session>) {
    let mut last_state = SessionState::Idle;
    let mut last_percent: i32 = -1;

    while updates.changed().await.is_ok() {
        let session = updates.borrow_and_update().clone();

        if session.state != last_state {
            last_state = session.state;
            tracing::info!(
                state = session.state.as_str(),
                queue_position = ?session.queue_position,
                "Session state changed",
            );
        }

        if let Some(progress) = &session.progress {
            let percent = progress.percentage.round() as i32;
            if percent != last_percent {
                last_percent = percent;
                tracing::info!(node = %progress.label, percent, "Generating");
            }
        }
    }
}

async fn print_status(api: &HttpEngineApi) -> anyhow::Result<()> {
    let health = api.health().await.context("Backend health check failed")?;
    println!("backend: {} (engine reachable: {})", health.status, health.comfyui);

    let status = api.status().await.context("Failed to fetch status")?;
    println!(
        "engine connected: {}, running: {}, pending: {}",
        status.comfyui.connected, status.queue.running, status.queue.pending
    );
    for device in &status.comfyui.devices {
        println!(
            "  [{}] {} ({}) vram {}/{} MiB free",
            device.index,
            device.name,
            device.device_type,
            device.vram_free / (1024 * 1024),
            device.vram_total / (1024 * 1024)
        );
    }

    let queue = api.queue().await.context("Failed to fetch queue")?;
    println!(
        "queue: {} running, {} pending",
        queue.running_prompts.len(),
        queue.pending_prompts.len()
    );
    Ok(())
}
