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

//! Lock-free per-server metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one server. Updated concurrently without locks;
/// `snapshot()` gives a point-in-time view.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    rejected_sessions: AtomicU64,
    idle_timeouts: AtomicU64,
    session_errors: AtomicU64,
}

/// Point-in-time view of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Sessions accepted since the server started
    pub total_sessions: u64,
    /// Sessions currently live
    pub active_sessions: u64,
    /// Connects refused at capacity
    pub rejected_sessions: u64,
    /// Sessions ended by the idle timeout
    pub idle_timeouts: u64,
    /// Sessions ended by a fault
    pub session_errors: u64,
}

impl ServerMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_opened(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn session_rejected(&self) {
        self.rejected_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_error(&self) {
        self.session_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            rejected_sessions: self.rejected_sessions.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            session_errors: self.session_errors.load(Ordering::Relaxed),
        }
    }
}
