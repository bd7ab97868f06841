//! # Test Cluster
//!
//! Purpose: Start several [`TestNode`]s over one shared [`Layout`] so the
//! driver's router can be exercised end to end, including slot migrations.

use crate::layout::{even_split, Assignment, Layout};
use crate::node::{NodeConfig, TestNode};
use crate::protocol::Reply;
use crate::store::Store;

pub struct TestCluster {
    nodes: Vec<TestNode>,
    layout: Layout,
}

impl TestCluster {
    /// Starts `count` nodes and splits the slot space evenly among them.
    pub fn start(count: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(count > 0, "a cluster needs at least one node");
        let layout = Layout::new();
        let nodes = (0..count)
            .map(|_| {
                TestNode::start_with(NodeConfig {
                    password: None,
                    layout: Some(layout.clone()),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let addrs: Vec<String> = nodes.iter().map(TestNode::addr).collect();
        layout.set(even_split(&addrs));
        Ok(TestCluster { nodes, layout })
    }

    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &TestNode {
        &self.nodes[idx]
    }

    /// Addresses of every node, usable as seed addresses.
    pub fn seeds(&self) -> Vec<String> {
        self.nodes.iter().map(TestNode::addr).collect()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Index of the node currently owning `slot`.
    pub fn owner_of(&self, slot: u16) -> Option<usize> {
        let addr = self.layout.owner(slot)?;
        self.nodes.iter().position(|node| node.addr() == addr)
    }

    /// Replaces the slot table with `(start, end, node index)` ranges.
    pub fn assign(&self, ranges: &[(u16, u16, usize)]) {
        self.layout.set(
            ranges
                .iter()
                .map(|&(start, end, idx)| Assignment {
                    start,
                    end,
                    addr: self.nodes[idx].addr(),
                })
                .collect(),
        );
    }

    /// Registers the same script handler on every node.
    pub fn register_script<F>(&self, source: &str, handler: F)
    where
        F: Fn(&mut Store, usize, &[Vec<u8>], &[Vec<u8>]) -> Reply + Clone + Send + Sync + 'static,
    {
        for node in &self.nodes {
            node.register_script(source, handler.clone());
        }
    }

    /// Sum of `name` counts across nodes.
    pub fn command_count(&self, name: &str) -> u64 {
        self.nodes.iter().map(|node| node.command_count(name)).sum()
    }
}
