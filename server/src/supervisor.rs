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

//! Multi-server supervisor.
//!
//! Runs several servers concurrently over one monitor bus. Servers are
//! started one after another and the first start failure is fatal: nothing
//! keeps running on a partial bind. On an interrupt signal every server is
//! shut down gracefully and concurrently; a second interrupt during the
//! drain aborts immediately.

use crate::error::Result;
use crate::monitor::MonitorBus;
use crate::server::{Server, ServerConfig};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of a supervised run, mapped to the process exit code by the
/// launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every server drained cleanly
    Clean,
    /// A second interrupt cut the drain short
    Interrupted,
}

/// Supervises a set of servers sharing a monitor bus.
pub struct Supervisor {
    servers: Vec<Arc<Server>>,
    monitor: MonitorBus,
}

impl Supervisor {
    /// Binds and collects servers for the given configurations. Fails on
    /// the first bind error with nothing left listening.
    pub async fn bind(configs: Vec<ServerConfig>, monitor: MonitorBus) -> Result<Self> {
        let mut servers = Vec::with_capacity(configs.len());
        for config in configs {
            let name = config.name.clone();
            match Server::bind(config, monitor.clone()).await {
                Ok(server) => servers.push(server),
                Err(err) => {
                    error!(server = %name, "failed to bind: {err}");
                    return Err(err);
                }
            }
        }
        Ok(Self { servers, monitor })
    }

    /// The supervised servers.
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// The shared monitor bus.
    pub fn monitor(&self) -> &MonitorBus {
        &self.monitor
    }

    /// Starts every server's accept loop. The first failure is fatal: any
    /// already-started server is shut down before the error is returned.
    pub async fn start(&self) -> Result<()> {
        for (index, server) in self.servers.iter().enumerate() {
            if let Err(err) = server.start().await {
                error!("server failed to start: {err}");
                for started in &self.servers[..index] {
                    let _ = started.shutdown().await;
                }
                return Err(err);
            }
        }
        info!(servers = self.servers.len(), "all servers started");
        Ok(())
    }

    /// Shuts every server down gracefully, concurrently, and waits for all
    /// to drain. Idempotent.
    pub async fn shutdown(&self) {
        let shutdowns = self.servers.iter().map(|server| {
            let server = server.clone();
            async move {
                if let Err(err) = server.shutdown().await {
                    warn!("server shutdown failed: {err}");
                }
            }
        });
        join_all(shutdowns).await;
        info!("all servers drained");
    }

    /// Runs until an interrupt signal, then drains. A second interrupt
    /// while draining returns [`RunOutcome::Interrupted`] without waiting.
    pub async fn run_until_signal(&self) -> Result<RunOutcome> {
        self.start().await?;

        wait_for_interrupt().await;
        info!("shutdown signal received");

        tokio::select! {
            () = self.shutdown() => Ok(RunOutcome::Clean),
            _ = wait_for_interrupt() => {
                warn!("second interrupt, aborting drain");
                Ok(RunOutcome::Interrupted)
            }
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("servers", &self.servers.len())
            .finish()
    }
}
