//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Configuration-driven server launcher.
//!
//! Loads a YAML configuration (or builds a single server from flags),
//! resolves handlers against the built-in registry, and supervises the
//! servers until an interrupt.
//!
//! Exit codes: 0 clean, 1 configuration error, 2 bind failure,
//! 130 interrupted mid-drain.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wireline_server::{
    AppConfig, HandlerRegistry, MonitorBus, RunOutcome, ServerError, ServerSpec, Supervisor,
    TransportKind,
};

const EXIT_CLEAN: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_BIND: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "server-launcher",
    about = "Launch interactive servers over telnet, tcp, or websocket"
)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Bind address, overriding the configuration
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding the configuration
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Wire protocol to serve
    #[arg(long, value_name = "telnet|tcp|websocket|ws_telnet")]
    protocol: Option<TransportKind>,

    /// Handler registry identifier (when no configuration file is given)
    #[arg(long, default_value = "echo")]
    handler: String,

    /// WebSocket endpoint path
    #[arg(long)]
    ws_path: Option<String>,

    /// Enable TLS on the WebSocket listener
    #[arg(long)]
    use_ssl: bool,

    /// PEM certificate chain
    #[arg(long)]
    ssl_cert: Option<String>,

    /// PEM private key
    #[arg(long)]
    ssl_key: Option<String>,

    /// Comma-separated Origin allowlist
    #[arg(long, value_delimiter = ',')]
    allow_origins: Option<Vec<String>>,

    /// Upper bound on live sessions
    #[arg(long)]
    max_connections: Option<usize>,

    /// Idle seconds before a session is dropped
    #[arg(long)]
    connection_timeout: Option<u64>,

    /// Log level
    #[arg(long, default_value = "INFO", value_name = "DEBUG|INFO|WARNING|ERROR")]
    log_level: String,
}

impl Args {
    /// Applies command-line overrides on top of a configuration block.
    fn apply_overrides(&self, spec: &mut ServerSpec) {
        if let Some(host) = &self.host {
            spec.host = host.clone();
        }
        if let Some(port) = self.port {
            spec.port = Some(port);
        }
        if let Some(protocol) = self.protocol {
            spec.transport = protocol;
        }
        if let Some(ws_path) = &self.ws_path {
            spec.ws_path = ws_path.clone();
        }
        if self.use_ssl {
            spec.use_ssl = true;
        }
        if let Some(cert) = &self.ssl_cert {
            spec.ssl_cert = Some(cert.clone());
        }
        if let Some(key) = &self.ssl_key {
            spec.ssl_key = Some(key.clone());
        }
        if let Some(origins) = &self.allow_origins {
            spec.allow_origins = origins.clone();
        }
        if let Some(max) = self.max_connections {
            spec.max_connections = max;
        }
        if let Some(timeout) = self.connection_timeout {
            spec.connection_timeout = timeout;
        }
    }

    fn resolve_config(&self) -> Result<AppConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => {
                // No file: the flags describe one server.
                let mut spec = ServerSpec {
                    handler_class: Some(self.handler.clone()),
                    port: Some(8023),
                    ..ServerSpec::default()
                };
                self.apply_overrides(&mut spec);
                spec.validate("server")?;
                return Ok(AppConfig {
                    servers: vec![("server".to_string(), spec)],
                });
            }
        };
        for (_, spec) in &mut config.servers {
            self.apply_overrides(spec);
        }
        Ok(config)
    }
}

fn init_logging(level: &str) {
    let level = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wireline_server={level},wireline_telnetcodec={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn exit_code_for(err: &ServerError) -> u8 {
    match err {
        ServerError::Bind { .. } => EXIT_BIND,
        _ => EXIT_CONFIG,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let registry = HandlerRegistry::with_defaults();
    let server_configs = match config.build(&registry) {
        Ok(configs) => configs,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let monitor = MonitorBus::new();
    let supervisor = match Supervisor::bind(server_configs, monitor).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(exit_code_for(&err));
        }
    };

    match supervisor.run_until_signal().await {
        Ok(RunOutcome::Clean) => {
            info!("server process completed");
            ExitCode::from(EXIT_CLEAN)
        }
        Ok(RunOutcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(err) => {
            error!("{err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
