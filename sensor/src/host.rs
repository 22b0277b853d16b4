use std::{
    io::{self, BufRead, ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bulb_common::{DeviceConfig, RuntimeConfig, Session};

use crate::{
    controller::SessionController, platform::HttpPlatform, store::FileCredentialStore,
    ticker::IntervalTicker,
};

const DEFAULT_DATA_DIR: &str = "./.bulb";
const RUNTIME_FILE: &str = "runtime.json";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = std::env::var("BULB_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

    let mut runtime = load_runtime_config(&data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime.device, |key| std::env::var(key).ok());
    runtime.sanitize();

    if runtime.device.prompt_for_identity || runtime.device.product_id.is_empty() {
        let device = runtime.device.clone();
        runtime.device = tokio::task::spawn_blocking(move || {
            prompt_for_identity(device, io::stdin().lock(), io::stdout())
        })
        .await?
        .context("failed to read device parameters")?;
        runtime.sanitize();
    }

    runtime
        .device
        .validate()
        .context("invalid device configuration")?;
    let base_url = runtime.device.base_url()?;

    info!(
        product_id = %runtime.device.product_id,
        device_id = %runtime.device.device_id,
        host = %base_url,
        "light bulb simulator booting"
    );

    let platform = HttpPlatform::new(
        base_url,
        Duration::from_millis(runtime.device.request_timeout_ms),
        runtime.device.show_http_requests,
    )
    .context("failed to create platform client")?;
    let store = FileCredentialStore::new(&data_dir);
    let ticker = IntervalTicker::new(Duration::from_millis(runtime.device.tick_interval_ms));
    let session = Session::new(runtime.device.identity(), &runtime);

    let mut controller = SessionController::new(
        session,
        platform,
        store,
        ticker,
        StdRng::from_os_rng(),
        Duration::from_millis(runtime.device.long_poll_timeout_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping");
                _ = shutdown_tx.send(true);
            }
            Err(err) => warn!("failed to listen for interrupt signal: {err}"),
        }
    });

    controller.run(shutdown_rx).await;
    info!(
        "light bulb simulator stopped, light bulb {}",
        controller.session().actuator().as_str()
    );
    Ok(())
}

async fn load_runtime_config(data_dir: &Path) -> anyhow::Result<RuntimeConfig> {
    let path = data_dir.join(RUNTIME_FILE);
    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(device: &mut DeviceConfig, lookup: impl Fn(&str) -> Option<String>) {
    let parse_u64 = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());
    let parse_bool = |key: &str| {
        lookup(key).and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
    };

    if let Some(product_id) = lookup("PRODUCT_ID") {
        device.product_id = product_id;
    }
    if let Some(device_id) = lookup("DEVICE_ID") {
        device.device_id = device_id;
    }
    if let Some(host) = lookup("PLATFORM_HOST") {
        device.host = Some(host);
    }
    if let Some(prompt) = parse_bool("PROMPT_FOR_IDENTITY") {
        device.prompt_for_identity = prompt;
    }
    if let Some(show) = parse_bool("SHOW_HTTP_REQUESTS") {
        device.show_http_requests = show;
    }
    if let Some(timeout) = parse_u64("LONG_POLL_TIMEOUT_MS") {
        device.long_poll_timeout_ms = timeout;
    }
    if let Some(timeout) = parse_u64("REQUEST_TIMEOUT_MS") {
        device.request_timeout_ms = timeout;
    }
    if let Some(interval) = parse_u64("TICK_INTERVAL_MS") {
        device.tick_interval_ms = interval;
    }
    if let Some(max_ticks) = parse_u64("MAX_TICKS") {
        device.max_ticks = max_ticks;
    }
}

/// Asks the operator for product id, host and device id. Empty answers keep
/// the value shown as default.
fn prompt_for_identity<R: BufRead, W: Write>(
    mut device: DeviceConfig,
    mut input: R,
    mut output: W,
) -> io::Result<DeviceConfig> {
    writeln!(output, "Check for device parameters (hit return after each question)")?;

    let product_id = ask(&mut input, &mut output, "Enter the product id: ")?;
    if !product_id.is_empty() {
        device.product_id = product_id;
    }

    writeln!(output, "The default host address is: {}", device.default_host())?;
    let host = ask(
        &mut input,
        &mut output,
        "If OK, hit return, if you prefer a different host address, type it here: ",
    )?;
    if !host.is_empty() {
        device.host = Some(host);
    }

    writeln!(output, "The default device identity is: {}", device.device_id)?;
    let device_id = ask(
        &mut input,
        &mut output,
        "If OK, hit return, if you prefer a different identity, type it here: ",
    )?;
    if !device_id.is_empty() {
        device.device_id = device_id;
    }

    Ok(device)
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<String> {
    write!(output, "{question}")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
