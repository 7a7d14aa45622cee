use crate::chord::index::{ChordIndex, DEFAULT_STABILIZE_INTERVAL};
use crate::core::peer::PeerAddr;
use crate::core::time::LogicalClock;
use crate::hub::handlers::handle_rpc;
use crate::hub::service::Hub;
use crate::net_table::table::{ChunkBackend, NetTable};
use crate::table::descriptor::TableDescriptor;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{extract::Extension, Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Everything one process shares: the hub (address, clock, HTTP client),
/// the tables it serves and the ring directory node.
///
/// There are no process-wide singletons; the application builds one `Core`,
/// hands it to the router, and shuts it down explicitly.
pub struct Core {
    pub hub: Arc<Hub>,
    tables: DashMap<String, Arc<NetTable>>,
    pub directory: Arc<ChordIndex>,
}

pub struct CoreBuilder {
    local: PeerAddr,
    stabilize_interval: Duration,
}

impl CoreBuilder {
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            stabilize_interval: DEFAULT_STABILIZE_INTERVAL,
        }
    }

    pub fn stabilize_interval(mut self, interval: Duration) -> Self {
        self.stabilize_interval = interval;
        self
    }

    pub fn build(self) -> Arc<Core> {
        let clock = Arc::new(LogicalClock::new());
        let hub = Hub::new(self.local, clock);
        let directory = ChordIndex::new(hub.clone(), self.stabilize_interval);
        Arc::new(Core {
            hub,
            tables: DashMap::new(),
            directory,
        })
    }
}

#[derive(Serialize)]
struct StatusResponse {
    peer: String,
    logical_time: u64,
    tables: Vec<String>,
    ring_successor: String,
    ring_predecessor: String,
    directory_entries: usize,
}

impl Core {
    pub fn local(&self) -> &PeerAddr {
        self.hub.local()
    }

    /// Declares a table served by this process.
    pub fn create_table(
        self: &Arc<Self>,
        descriptor: TableDescriptor,
        backend: ChunkBackend,
    ) -> Arc<NetTable> {
        let name = descriptor.name.clone();
        let table = NetTable::new(
            descriptor,
            backend,
            self.hub.clone(),
            Some(self.directory.clone()),
        );
        self.tables.insert(name, table.clone());
        table
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<NetTable>> {
        self.tables.get(name).map(|entry| entry.value().clone())
    }

    /// Joins the ring directory: found a fresh ring, or stabilize-join
    /// through a known member.
    pub fn join_directory(&self, seed: Option<PeerAddr>) {
        let directory = &self.directory;
        match seed {
            Some(seed) => directory.join(seed),
            None => directory.create(),
        }
    }

    /// The HTTP surface of this node. Init requests carry whole chunk
    /// histories, so the body limit is generous and overridable.
    pub fn router(self: &Arc<Self>) -> Router {
        let max_body_bytes = std::env::var("MAX_BODY_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(20 * 1024 * 1024);

        Router::new()
            .route("/rpc", post(handle_rpc))
            .route("/status", get(handle_status))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(Extension(self.clone()))
    }

    /// Explicit shutdown: stops the ring stabilizer and every chunk's
    /// background machinery.
    pub fn shutdown(&self) {
        self.directory.leave();
        for entry in self.tables.iter() {
            entry.value().shutdown();
        }
    }
}

async fn handle_status(Extension(core): Extension<Arc<Core>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        peer: core.local().to_string(),
        logical_time: core.hub.clock.current().0,
        tables: core.tables.iter().map(|entry| entry.key().clone()).collect(),
        ring_successor: core.directory.successor().to_string(),
        ring_predecessor: core.directory.predecessor().to_string(),
        directory_entries: core.directory.local_entry_count(),
    })
}
