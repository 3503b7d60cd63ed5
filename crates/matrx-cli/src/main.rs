//! # MATRX Render Harness
//!
//! Sends one render request over RabbitMQ and waits for the renderer's reply.
//!
//! ## Flow
//!
//! 1. Load client configuration from the environment, apply flag overrides
//! 2. Connect to the broker
//! 3. Provision `matrx.<device id>`, publish to `renderer_requests`
//! 4. Wait for the correlated reply (Ctrl+C cancels the wait)
//! 5. Print the reply summary
//!
//! Exit codes: 0 on a successful render, 1 on timeout or error, 130 when
//! cancelled.

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use matrx_bus::AmqpBroker;
use matrx_render_client::{cancellation, ClientConfig, RenderClient, WaitOutcome};
use matrx_telemetry::{init_telemetry, TelemetryConfig};
use matrx_types::{Device, DeviceId, RenderRequest};
use tracing::{info, warn};

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let telemetry = TelemetryConfig::for_component("cli");
    init_telemetry(&telemetry).context("telemetry setup failed")?;

    let mut config = ClientConfig::from_env();
    config.amqp_url = args.amqp_url.clone();
    if let Some(matching) = args.matching {
        config.matching = matching;
    }

    let device_id = DeviceId::new(args.device_id()).context("invalid --device-id")?;
    let device = Device::new(device_id, args.width, args.height).context("invalid device size")?;
    let request = args
        .params
        .iter()
        .fold(RenderRequest::new(args.app_id.clone(), device), |request, (key, value)| {
            request.with_param(key.clone(), value.clone())
        });
    request.validate().context("invalid render request")?;

    println!("Request:");
    println!("{}", serde_json::to_string_pretty(&request)?);

    let broker = AmqpBroker::connect(&config.amqp_url)
        .await
        .with_context(|| format!("cannot connect to {}", config.amqp_url))?;
    info!(url = %config.amqp_url, matching = %config.matching, "Connected to broker");

    let (cancel, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling wait");
            cancel.cancel();
        }
    });

    let broker = Arc::new(broker);
    let client = RenderClient::new(broker.clone(), config);
    let result = client.render(request, Some(args.timeout()), signal).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    let round_trip = result.context("render failed")?;
    println!("Correlation id: {}", round_trip.receipt.correlation_id);
    println!("Reply queue:    {}", round_trip.receipt.reply_to);

    let reply = match round_trip.outcome {
        WaitOutcome::Reply(reply) => reply,
        WaitOutcome::Cancelled => {
            println!("Cancelled");
            return Ok(ExitCode::from(130));
        }
    };

    if let Some(error) = &reply.error {
        bail!("renderer reported an error: {error}");
    }
    let output = reply
        .decode_output()
        .context("render_output is not valid base64")?;
    if output.is_empty() {
        bail!("renderer returned an empty render_output");
    }

    println!("Reply:");
    println!("  app_id:       {}", reply.app_id.as_deref().unwrap_or("-"));
    println!("  device_id:    {}", reply.device_id.as_deref().unwrap_or("-"));
    if let Some(processed_at) = reply.processed_at {
        println!("  processed_at: {}", processed_at.to_rfc3339());
    }
    println!("  output:       {} bytes", output.len());
    Ok(ExitCode::SUCCESS)
}
