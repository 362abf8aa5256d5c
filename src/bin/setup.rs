//! alert-relay setup wizard.
//!
//! Without flags: starts a local Axum HTTP server on port 8719 and opens the
//! browser-based setup form. On submission the form POSTs its fields to
//! `/api/save-config`, which renders and writes `config.toml` to the project
//! root and then shuts the server down.
//!
//! With `--cli`: runs an interactive terminal wizard instead.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{oneshot, Mutex};

// The form is embedded at compile time.
const INDEX_HTML: &str = include_str!("../../setup/index.html");

const DEFAULT_TIMEOUT: u64 = 60;
const MAX_TIMEOUT: u64 = 24 * 60 * 60;
const DEFAULT_INITIAL_MESSAGE: &str = "This is an urgent notification.";

// ── Shared state ───────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    config_path: PathBuf,
    /// Consumed once when the browser POSTs a saved config.
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ── Request / response types ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct SaveRequest {
    token: String,
    alert_channel: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    initial_message: String,
    account_sid: String,
    auth_token: String,
    numbers: String,
    number_from: String,
}

#[derive(Serialize)]
struct SaveResponse {
    ok: bool,
    path: String,
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn save_config(
    State(state): State<AppState>,
    Json(body): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, StatusCode> {
    let alert_channel: i64 = body
        .alert_channel
        .trim()
        .parse()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let timeout = body.timeout.unwrap_or(DEFAULT_TIMEOUT);
    if !valid_timeout(timeout) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let config = format_config(&ConfigParams {
        token: &body.token,
        alert_channel,
        timeout,
        initial_message: &body.initial_message,
        account_sid: &body.account_sid,
        auth_token: &body.auth_token,
        numbers: &body.numbers,
        number_from: &body.number_from,
    });

    tokio::fs::write(&state.config_path, &config)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let path = state.config_path.to_string_lossy().to_string();
    println!("\n✓  config.toml saved to {path}");
    println!("   Run the relay with:  cargo run\n");

    // Signal main to shut down after the response has been sent.
    let tx = state.shutdown_tx.lock().await.take();
    if let Some(tx) = tx {
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
            let _ = tx.send(());
        });
    }

    Ok(Json(SaveResponse { ok: true, path }))
}

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    token: &'a str,
    alert_channel: i64,
    timeout: u64,
    initial_message: &'a str,
    account_sid: &'a str,
    auth_token: &'a str,
    numbers: &'a str,
    number_from: &'a str,
}

/// The relay accepts between one second and one day.
fn valid_timeout(timeout: u64) -> bool {
    (1..=MAX_TIMEOUT).contains(&timeout)
}

/// Quote a value as a TOML basic string.
fn toml_str(value: &str) -> String {
    toml::Value::String(value.trim().to_owned()).to_string()
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let numbers: Vec<String> = p
        .numbers
        .split([',', ' ', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(toml_str)
        .collect();
    let numbers_str = numbers.join(", ");

    let initial_message = if p.initial_message.trim().is_empty() {
        DEFAULT_INITIAL_MESSAGE
    } else {
        p.initial_message
    };

    let token = toml_str(p.token);
    let alert_channel = p.alert_channel;
    let timeout = p.timeout;
    let initial_message = toml_str(initial_message);
    let account_sid = toml_str(p.account_sid);
    let auth_token = toml_str(p.auth_token);
    let number_from = toml_str(p.number_from);

    format!(
        r#"[telegram]
token = {token}
alert_channel = {alert_channel}

[alert]
timeout = {timeout}
initial_message = {initial_message}

[twilio]
account_sid = {account_sid}
auth_token = {auth_token}
numbers = [{numbers_str}]
number_from = {number_from}
"#
    )
}

// ── CLI mode ───────────────────────────────────────────────────────────────────

fn run_cli(project_root: &Path) -> Result<()> {
    use std::io::{self, Write};

    println!("=== alert-relay CLI Setup ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let token = read_line("Telegram bot token: ")?;
    let alert_channel: i64 = read_line("Alert chat id (e.g. -1001234567890): ")?
        .parse()
        .context("Alert chat id must be a number")?;
    let timeout = match read_line(&format!("Confirmation timeout in seconds [{DEFAULT_TIMEOUT}]: "))? {
        s if s.is_empty() => DEFAULT_TIMEOUT,
        s => s.parse().context("Timeout must be a whole number of seconds")?,
    };
    if !valid_timeout(timeout) {
        anyhow::bail!("Timeout must be between 1 and {MAX_TIMEOUT} seconds");
    }
    let initial_message = read_line(&format!("Spoken intro [{DEFAULT_INITIAL_MESSAGE}]: "))?;
    let account_sid = read_line("Twilio account SID: ")?;
    let auth_token = read_line("Twilio auth token: ")?;
    let numbers = read_line("Numbers to call (comma-separated): ")?;
    let number_from = read_line("Twilio number to call from: ")?;

    let config = format_config(&ConfigParams {
        token: &token,
        alert_channel,
        timeout,
        initial_message: &initial_message,
        account_sid: &account_sid,
        auth_token: &auth_token,
        numbers: &numbers,
        number_from: &number_from,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the relay with:  cargo run");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Resolve project root: prefer ALERT_RELAY_ROOT env, fall back to cwd.
    let project_root =
        PathBuf::from(std::env::var("ALERT_RELAY_ROOT").unwrap_or_else(|_| ".".to_string()));

    if args.iter().any(|a| a == "--cli") {
        return run_cli(&project_root);
    }

    // ── Web mode ──────────────────────────────────────────────────────────────
    let port: u16 = 8719;
    let config_path = project_root.join("config.toml");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = AppState {
        config_path,
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/api/save-config", post(save_config))
        .with_state(state);

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    println!("alert-relay setup → http://localhost:{port}");
    println!("Press Ctrl-C to exit without saving.\n");

    // Open the browser after a short delay.
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(400)).await;
        let url = format!("http://localhost:{port}");
        // Try xdg-open (Linux), then open (macOS).
        let _ = std::process::Command::new("xdg-open").arg(&url).status();
        let _ = std::process::Command::new("open").arg(&url).status();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
