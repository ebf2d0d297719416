// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `gatekeeper check` - one synthetic connection and request through the
//! full decision path, the way a proxy worker would issue them.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gatekeeper_core::domain::fingerprint::parse_query_parameters;
use gatekeeper_core::proto::{AppGuardHttpRequest, AppGuardTcpConnection, FirewallPolicy};
use gatekeeper_core::{
    ChannelState, ClientError, ClientRegistry, ConnectionKey, FallbackPolicy, GatekeeperConfig,
};

#[derive(Args)]
pub struct CheckArgs {
    /// Request target, including any query string
    #[arg(long, default_value = "/")]
    url: String,

    #[arg(long, default_value = "GET")]
    method: String,

    /// Client address of the synthetic connection
    #[arg(long, default_value = "203.0.113.10:40000")]
    source: SocketAddr,

    /// Local address of the synthetic connection
    #[arg(long, default_value = "127.0.0.1:80")]
    destination: SocketAddr,

    #[arg(long, default_value = "gatekeeper-check")]
    user_agent: String,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Send the same request this many times
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Seconds to wait for the control channel to authenticate
    #[arg(long, default_value_t = 10)]
    wait: u64,
}

pub async fn execute(args: CheckArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = GatekeeperConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let fallback = config.default_policy;
    let registry = ClientRegistry::from_config(config).context("Failed to initialize client")?;

    let client = match registry.client().await {
        Ok(client) => client,
        Err(e) => {
            report(1, fallback, Err(e));
            return Ok(());
        }
    };

    let mut states = client.channel().subscribe_state();
    let settled = tokio::time::timeout(
        Duration::from_secs(args.wait),
        states.wait_for(|s| matches!(s, ChannelState::Streaming | ChannelState::Stopped)),
    )
    .await
    .is_ok();
    println!("{} {}", "Control channel:".bold(), client.channel().state());
    if !settled {
        println!(
            "  {}",
            format!("not authenticated after {}s", args.wait).yellow()
        );
    }

    let connection = AppGuardTcpConnection {
        source_ip: Some(args.source.ip().to_string()),
        source_port: Some(u32::from(args.source.port())),
        destination_ip: Some(args.destination.ip().to_string()),
        destination_port: Some(u32::from(args.destination.port())),
        protocol: "HTTP/1.1".to_string(),
        ..Default::default()
    };
    let key = ConnectionKey::from_connection(&connection);

    match client.handle_tcp_connection(connection).await {
        Ok(response) => {
            if let (Some(key), Some(info)) = (key, response.tcp_info) {
                println!("{} {} (tcp id {})", "Connection:".bold(), key, info.tcp_id);
                registry.connection_cache().put(key, info);
            }
        }
        Err(e) => println!("{} {}", "Connection:".bold(), e.to_string().yellow()),
    }

    let request = build_request(&args, key.and_then(|key| registry.connection_cache().get(&key)))?;
    for attempt in 1..=args.repeat.max(1) {
        let outcome = client.handle_http_request(request.clone()).await;
        report(attempt, fallback, outcome);
    }

    registry.shutdown().await;
    Ok(())
}

fn build_request(
    args: &CheckArgs,
    tcp_info: Option<gatekeeper_core::ConnectionInfo>,
) -> Result<AppGuardHttpRequest> {
    let mut headers = HashMap::from([("User-Agent".to_string(), args.user_agent.clone())]);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header {:?} is not \"Name: value\"", header))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(AppGuardHttpRequest {
        original_url: args.url.clone(),
        method: args.method.to_uppercase(),
        query: parse_query_parameters(&args.url),
        headers,
        tcp_info,
        ..Default::default()
    })
}

fn report(attempt: u32, fallback: FallbackPolicy, outcome: Result<FirewallPolicy, ClientError>) {
    let source = match &outcome {
        Ok(FirewallPolicy::Unknown) => "fallback: service answered UNKNOWN".to_string(),
        Ok(_) => "policy service".to_string(),
        Err(e) => format!("fallback: {e}"),
    };

    let verdict = match fallback.resolve(outcome) {
        FirewallPolicy::Allow => "ALLOW".green(),
        _ => "DENY".red(),
    };
    println!("Request {}: {} ({})", attempt, verdict.bold(), source.dimmed());
}
