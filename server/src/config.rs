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

//! YAML configuration.
//!
//! A configuration file is either a single server at the top level or a
//! `servers:` map of named blocks, each naming its transport and handler.
//! Unknown `handler_class` identifiers resolve against the
//! [`HandlerRegistry`](crate::HandlerRegistry); there is no runtime code
//! loading.

use crate::error::{Result, ServerError};
use crate::handler::HandlerRegistry;
use crate::server::ServerConfig;
use crate::session::SessionConfig;
use crate::transport::WsEndpoint;
use crate::types::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;
use tracing::debug;

/// Default WebSocket endpoint path.
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Default monitor endpoint path.
pub const DEFAULT_MONITOR_PATH: &str = "/monitor";
/// Cap on a single WebSocket frame or message; larger frames are a
/// protocol error for the session that sent them.
pub const MAX_WS_FRAME_BYTES: usize = 1024 * 1024;

/// One server block from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSpec {
    /// Bind address
    pub host: String,
    /// Listen port; required
    pub port: Option<u16>,
    /// Wire protocol served
    pub transport: TransportKind,
    /// Handler registry identifier; required
    pub handler_class: Option<String>,
    /// Upper bound on live sessions
    pub max_connections: usize,
    /// Idle seconds before a session is dropped
    pub connection_timeout: u64,
    /// Banner sent on connect; empty sends nothing
    pub welcome_message: Option<String>,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Origin allowlist; `"*"` admits anything
    pub allow_origins: Vec<String>,
    /// Enable TLS on the WebSocket listener
    pub use_ssl: bool,
    /// PEM certificate chain path
    pub ssl_cert: Option<String>,
    /// PEM private key path
    pub ssl_key: Option<String>,
    /// WebSocket heartbeat interval, seconds
    pub ping_interval: u64,
    /// Grace period for the heartbeat pong, seconds
    pub ping_timeout: u64,
    /// Mount the monitor bus endpoint on this server
    pub enable_monitoring: bool,
    /// Monitor endpoint path
    pub monitor_path: String,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            transport: TransportKind::Telnet,
            handler_class: None,
            max_connections: 100,
            connection_timeout: 300,
            welcome_message: None,
            ws_path: DEFAULT_WS_PATH.to_string(),
            allow_origins: vec!["*".to_string()],
            use_ssl: false,
            ssl_cert: None,
            ssl_key: None,
            ping_interval: 30,
            ping_timeout: 10,
            enable_monitoring: false,
            monitor_path: DEFAULT_MONITOR_PATH.to_string(),
        }
    }
}

impl ServerSpec {
    /// Checks the block for the §6.2 requirements.
    pub fn validate(&self, name: &str) -> Result<()> {
        let fail = |reason: String| Err(ServerError::Config(format!("server '{name}': {reason}")));
        let Some(port) = self.port else {
            return fail("port is required".to_string());
        };
        if port == 0 {
            return fail("port must be between 1 and 65535".to_string());
        }
        match self.handler_class.as_deref() {
            None | Some("") => return fail("handler_class is required".to_string()),
            Some(_) => {}
        }
        if self.max_connections == 0 {
            return fail("max_connections must be positive".to_string());
        }
        if self.connection_timeout == 0 {
            return fail("connection_timeout must be positive".to_string());
        }
        if self.use_ssl {
            if !self.transport.is_websocket() {
                return fail("use_ssl is only supported on websocket transports".to_string());
            }
            if self.ssl_cert.as_deref().unwrap_or("").is_empty()
                || self.ssl_key.as_deref().unwrap_or("").is_empty()
            {
                return fail("use_ssl requires ssl_cert and ssl_key".to_string());
            }
        }
        Ok(())
    }

    /// Resolves this block into a runtime [`ServerConfig`], looking the
    /// handler up in `registry`.
    pub fn build(&self, name: &str, registry: &HandlerRegistry) -> Result<ServerConfig> {
        self.validate(name)?;
        let handler_class = self.handler_class.as_deref().expect("validated");
        let handler_factory = registry.get(handler_class).ok_or_else(|| {
            ServerError::Config(format!("server '{name}': unknown handler_class: {handler_class}"))
        })?;

        let ws = self.transport.is_websocket().then(|| WsEndpoint {
            session_path: normalize_path(&self.ws_path),
            monitor_path: self
                .enable_monitoring
                .then(|| normalize_path(&self.monitor_path)),
            allow_origins: self.allow_origins.clone(),
            ping_interval: Duration::from_secs(self.ping_interval),
            ping_timeout: Duration::from_secs(self.ping_timeout),
            binary_frames: self.transport == TransportKind::WsTelnet,
            max_frame_bytes: MAX_WS_FRAME_BYTES,
        });

        let tls = if self.use_ssl && self.transport.is_websocket() {
            Some(build_tls_acceptor(
                self.ssl_cert.as_deref().expect("validated"),
                self.ssl_key.as_deref().expect("validated"),
            )?)
        } else {
            None
        };

        let session = SessionConfig {
            welcome_message: self
                .welcome_message
                .clone()
                .filter(|message| !message.is_empty()),
            idle_timeout: Duration::from_secs(self.connection_timeout),
            ..SessionConfig::default()
        };

        Ok(ServerConfig {
            name: name.to_string(),
            transport: self.transport,
            listen: format!("{}:{}", self.host, self.port.expect("validated")),
            max_connections: self.max_connections,
            session,
            handler_factory,
            ws,
            tls,
            shutdown_timeout: Duration::from_secs(10),
        })
    }
}

/// Paths always start with a slash on the wire.
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    servers: Option<BTreeMap<String, ServerSpec>>,
    #[serde(flatten)]
    base: ServerSpec,
}

/// The loaded configuration: named server blocks in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Named server blocks
    pub servers: Vec<(String, ServerSpec)>,
}

impl AppConfig {
    /// Parses a YAML document. A top-level `servers:` map yields one block
    /// per entry; otherwise the document itself is a single block named
    /// `server`.
    pub fn parse(source: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(source)
            .map_err(|err| ServerError::Config(format!("invalid configuration: {err}")))?;
        let servers = match raw.servers {
            Some(map) => {
                if map.is_empty() {
                    return Err(ServerError::Config(
                        "'servers' must contain at least one server".to_string(),
                    ));
                }
                map.into_iter().collect()
            }
            None => vec![("server".to_string(), raw.base)],
        };
        for (name, spec) in &servers {
            spec.validate(name)?;
        }
        Ok(Self { servers })
    }

    /// Loads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            ServerError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Self::parse(&source)
    }

    /// Resolves every block into runtime server configurations.
    pub fn build(&self, registry: &HandlerRegistry) -> Result<Vec<ServerConfig>> {
        self.servers
            .iter()
            .map(|(name, spec)| spec.build(name, registry))
            .collect()
    }
}

/// Loads PEM TLS material into an acceptor for the WebSocket listener.
pub fn build_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|err| ServerError::Config(format!("cannot read ssl_cert {cert_path}: {err}")))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<std::io::Result<_>>()
        .map_err(|err| ServerError::Config(format!("invalid ssl_cert {cert_path}: {err}")))?;

    let key_file = std::fs::File::open(key_path)
        .map_err(|err| ServerError::Config(format!("cannot read ssl_key {key_path}: {err}")))?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|err| ServerError::Config(format!("invalid ssl_key {key_path}: {err}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key in {key_path}")))?;

    let tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| ServerError::Config(format!("invalid TLS material: {err}")))?;
    Ok(TlsAcceptor::from(Arc::new(tls)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_server_document() {
        let config = AppConfig::parse(
            r#"
host: 127.0.0.1
port: 8023
handler_class: echo
welcome_message: "Welcome!"
"#,
        )
        .unwrap();
        assert_eq!(config.servers.len(), 1);
        let (name, spec) = &config.servers[0];
        assert_eq!(name, "server");
        assert_eq!(spec.host, "127.0.0.1");
        assert_eq!(spec.port, Some(8023));
        assert_eq!(spec.transport, TransportKind::Telnet);
        assert_eq!(spec.handler_class.as_deref(), Some("echo"));
        assert_eq!(spec.welcome_message.as_deref(), Some("Welcome!"));
        assert_eq!(spec.max_connections, 100);
        assert_eq!(spec.connection_timeout, 300);
    }

    #[test]
    fn multi_server_document() {
        let config = AppConfig::parse(
            r#"
servers:
  telnet_main:
    port: 8023
    handler_class: echo
  web:
    port: 8025
    transport: websocket
    handler_class: echo
    ws_path: /terminal
    enable_monitoring: true
"#,
        )
        .unwrap();
        assert_eq!(config.servers.len(), 2);
        let web = &config
            .servers
            .iter()
            .find(|(name, _)| name == "web")
            .unwrap()
            .1;
        assert_eq!(web.transport, TransportKind::WebSocket);
        assert_eq!(web.ws_path, "/terminal");
        assert!(web.enable_monitoring);
        assert_eq!(web.monitor_path, DEFAULT_MONITOR_PATH);
    }

    #[test]
    fn missing_port_is_a_config_error() {
        let err = AppConfig::parse("handler_class: echo\n").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn missing_handler_is_a_config_error() {
        let err = AppConfig::parse("port: 8023\n").unwrap_err();
        assert!(err.to_string().contains("handler_class"));
    }

    #[test]
    fn unknown_transport_is_a_config_error() {
        let err = AppConfig::parse("port: 1\nhandler_class: echo\ntransport: carrier_pigeon\n")
            .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn ssl_requires_material() {
        let err = AppConfig::parse(
            "port: 1\nhandler_class: echo\ntransport: websocket\nuse_ssl: true\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("ssl_cert"));
    }

    #[test]
    fn build_resolves_handlers_against_the_registry() {
        let config = AppConfig::parse("port: 8023\nhost: 127.0.0.1\nhandler_class: echo\n").unwrap();
        let registry = HandlerRegistry::with_defaults();
        let built = config.build(&registry).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].listen, "127.0.0.1:8023");

        let empty = HandlerRegistry::new();
        assert!(config.build(&empty).is_err());
    }

    #[test]
    fn ws_paths_are_normalized() {
        let spec = ServerSpec {
            port: Some(9000),
            transport: TransportKind::WsTelnet,
            handler_class: Some("echo".to_string()),
            ws_path: "terminal".to_string(),
            enable_monitoring: true,
            ..ServerSpec::default()
        };
        let registry = HandlerRegistry::with_defaults();
        let built = spec.build("ws", &registry).unwrap();
        let ws = built.ws.expect("websocket endpoint");
        assert_eq!(ws.session_path, "/terminal");
        assert_eq!(ws.monitor_path.as_deref(), Some("/monitor"));
        assert!(ws.binary_frames);
    }
}
