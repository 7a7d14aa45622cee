//! Shared harness for multi-node loopback tests: each node is a full core
//! with its own clock, ring node and RPC server on an ephemeral port.

use peermap::core::context::{Core, CoreBuilder};
use peermap::core::peer::PeerAddr;
use peermap::net_table::table::{ChunkBackend, NetTable};
use peermap::table::descriptor::TableDescriptor;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const TEST_TABLE: &str = "map";

pub struct TestNode {
    pub core: Arc<Core>,
    pub addr: PeerAddr,
    server: JoinHandle<()>,
}

impl TestNode {
    pub fn table(&self) -> Arc<NetTable> {
        self.core.get_table(TEST_TABLE).expect("test table exists")
    }

    /// Simulates a crash: the RPC endpoint goes away and all background
    /// machinery stops.
    pub fn kill(&self) {
        self.server.abort();
        self.core.shutdown();
    }
}

/// Boots a node serving the test table. With `ring_seed` it stabilize-joins
/// that peer's ring; without it the node founds a ring of its own.
pub async fn spawn_node(backend: ChunkBackend, ring_seed: Option<PeerAddr>) -> TestNode {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = PeerAddr::from(listener.local_addr().unwrap());

    let core = CoreBuilder::new(addr.clone())
        .stabilize_interval(Duration::from_millis(10))
        .build();
    core.join_directory(ring_seed);
    core.create_table(TableDescriptor::new(TEST_TABLE, 1), backend);

    let app = core.router();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestNode { core, addr, server }
}

/// Polls `probe` until it returns true or the deadline passes.
pub async fn wait_until<F>(what: &str, deadline: Duration, mut probe: F)
where
    F: FnMut() -> bool,
{
    let started = std::time::Instant::now();
    loop {
        if probe() {
            return;
        }
        if started.elapsed() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
