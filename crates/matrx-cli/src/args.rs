//! Command-line arguments.

use std::time::Duration;

use clap::Parser;
use matrx_render_client::config::DEFAULT_AMQP_URL;
use matrx_render_client::ReplyMatching;
use serde_json::Value;

/// Send one render request and wait for the reply
#[derive(Parser, Debug)]
#[command(name = "matrx-render")]
#[command(about = "Send a MATRX render request and wait for the device's reply")]
pub struct Args {
    /// Broker URL
    #[arg(long, env = "AMQP_URL", default_value = DEFAULT_AMQP_URL)]
    pub amqp_url: String,

    /// App to render
    #[arg(long, default_value = "clock")]
    pub app_id: String,

    /// Device id (default: test-device-<uuid>)
    #[arg(long)]
    pub device_id: Option<String>,

    /// Display width in pixels
    #[arg(long, default_value_t = 64)]
    pub width: u32,

    /// Display height in pixels
    #[arg(long, default_value_t = 32)]
    pub height: u32,

    /// App parameter as key=value; the value is parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Reply timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Reply correlation rules: strict, lenient or off
    #[arg(long)]
    pub matching: Option<ReplyMatching>,
}

impl Args {
    pub fn device_id(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| format!("test-device-{}", uuid::Uuid::new_v4()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// `key=value`, where `value` is JSON or else a plain string.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
