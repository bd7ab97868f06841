#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use slotkv_client::lock::{EXTEND_SCRIPT, UNLOCK_SCRIPT};
use slotkv_client::Options;
use slotkv_testkit::{compare_and_delete, compare_and_expire, TestCluster, TestNode};

static TRACING: Once = Once::new();

/// Routes client logs through the test writer; `RUST_LOG` filters them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Options for one test node with short timeouts.
pub fn node_options(addr: String) -> Options {
    Options {
        connect_timeout: Some(Duration::from_secs(2)),
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
        max_conns: 4,
        max_idles: 4,
        ..Options::new(addr)
    }
}

pub fn cluster_options(cluster: &TestCluster) -> Options {
    Options {
        address: cluster.seeds(),
        cluster: true,
        ..node_options(String::new())
    }
}

pub fn start_node() -> TestNode {
    init_tracing();
    let node = TestNode::start().expect("start node");
    register_lock_scripts(&node);
    node
}

pub fn start_cluster(nodes: usize) -> TestCluster {
    init_tracing();
    let cluster = TestCluster::start(nodes).expect("start cluster");
    cluster.register_script(UNLOCK_SCRIPT, compare_and_delete);
    cluster.register_script(EXTEND_SCRIPT, compare_and_expire);
    cluster
}

pub fn register_lock_scripts(node: &TestNode) {
    node.register_script(UNLOCK_SCRIPT, compare_and_delete);
    node.register_script(EXTEND_SCRIPT, compare_and_expire);
}

/// Waits for the node's server-side view to catch up with the client.
pub fn eventually(node: &TestNode, condition: impl FnMut(&TestNode) -> bool) -> bool {
    node.wait_until(Duration::from_secs(2), condition)
}
