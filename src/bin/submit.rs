//! One-shot generation from the command line: runs the same pipeline as the
//! server in the foreground and prints the outcome as JSON.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use model3d_watcher::app_state::AppState;
use model3d_watcher::config::{ApiKey, AppConfig};
use model3d_watcher::models::run::TriggerRequest;
use model3d_watcher::services::client::Model3dClient;
use model3d_watcher::services::submitter::JobSubmitter;

#[derive(Parser, Debug)]
#[command(name = "submit")]
#[command(about = "Turn an image into a 3D model and publish it", long_about = None)]
struct Cli {
    /// Image to submit
    image: PathBuf,

    /// Free-text instructions sent with the image
    #[arg(long)]
    prompt: Option<String>,

    /// API key; overrides MODEL_API_KEY
    #[arg(long, env = "MODEL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Only submit the job and print its id
    #[arg(long)]
    no_wait: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = match AppState::from_config(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.no_wait {
        return submit_only(&state, &cli).await;
    }

    let request = TriggerRequest {
        image_path: cli.image.display().to_string(),
        enabled: true,
        api_key: cli.api_key,
        prompt: cli.prompt,
    };
    let handle = match state.trigger(request).await {
        Ok(handle) => handle,
        Err(reason) => {
            eprintln!("{reason}");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            orchestrator.shutdown();
        }
    });

    let outcome = handle.wait().await;
    print_json(&outcome);
    if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn submit_only(state: &AppState, cli: &Cli) -> ExitCode {
    let Some(api_key) = cli
        .api_key
        .clone()
        .map(ApiKey::new)
        .or_else(|| state.config.model_api_key.clone())
    else {
        eprintln!("no API key configured");
        return ExitCode::FAILURE;
    };

    let http = match reqwest::Client::builder()
        .timeout(state.config.request_timeout())
        .build()
    {
        Ok(http) => http,
        Err(e) => {
            eprintln!("failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let client = Model3dClient::new(http, &state.config.model_api_base, api_key);
    let prompt = cli.prompt.as_deref().or(state.config.model_prompt.as_deref());

    match JobSubmitter::new(&client, state.config.debug_dir())
        .submit(Uuid::new_v4(), &cli.image, prompt, &CancellationToken::new())
        .await
    {
        Ok(job) => {
            print_json(&job);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("submission failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}
