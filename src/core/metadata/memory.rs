//! An in-memory reference implementation of [`MetadataStore`], used by the
//! executor when run standalone and by the crate's own tests. Mirrors the
//! teacher's `WardenState` (in-memory master/replica topology mutated
//! through explicit methods rather than raw field access).

use super::{MetadataStore, PartitionCopy};
use crate::core::errors::ShardlordError;
use crate::core::node::{NodeId, NodeInfo};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    nodes: HashMap<NodeId, NodeInfo>,
    partitions: HashMap<String, Vec<PartitionCopy>>,
    write_lsn: u64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/standalone-run hook: the real coordinator reports its own
    /// write position from its catalog session, which this store stands
    /// in for. Defaults to 0, so a precheck against it always passes
    /// unless a test raises it past a worker's reported LSN.
    pub fn set_write_lsn(&mut self, lsn: u64) {
        self.write_lsn = lsn;
    }

    pub fn add_node(&mut self, id: NodeId, connstring: impl Into<String>) {
        self.nodes.insert(
            id,
            NodeInfo {
                id,
                connstring: connstring.into(),
            },
        );
    }

    /// Seeds a partition with an explicit chain of copies. Intended for
    /// test setup; a real deployment builds this up incrementally via
    /// `apply_move_part`/`apply_create_replica`.
    pub fn seed_partition(&mut self, part_name: &str, copies: Vec<PartitionCopy>) {
        self.partitions.insert(part_name.to_string(), copies);
    }

    fn partition_mut(&mut self, part_name: &str) -> Result<&mut Vec<PartitionCopy>, ShardlordError> {
        self.partitions
            .get_mut(part_name)
            .ok_or_else(|| ShardlordError::Metadata(format!("unknown partition '{part_name}'")))
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn resolve_node(&self, id: NodeId) -> Result<NodeInfo, ShardlordError> {
        self.nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| ShardlordError::Metadata(format!("unknown node {id}")))
    }

    fn partition_copies(&self, part_name: &str) -> Result<Vec<PartitionCopy>, ShardlordError> {
        Ok(self
            .partitions
            .get(part_name)
            .cloned()
            .unwrap_or_default())
    }

    fn apply_move_part(
        &mut self,
        part_name: &str,
        src: NodeId,
        dst: NodeId,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    ) -> Result<(), ShardlordError> {
        let copies = self.partition_mut(part_name)?;
        copies.retain(|c| c.node != src);
        for c in copies.iter_mut() {
            if Some(c.node) == prev {
                c.next = Some(dst);
            }
            if Some(c.node) == next {
                c.prev = Some(dst);
            }
        }
        copies.push(PartitionCopy { node: dst, prev, next });
        Ok(())
    }

    fn apply_create_replica(
        &mut self,
        part_name: &str,
        owner: NodeId,
        new_replica: NodeId,
    ) -> Result<(), ShardlordError> {
        let copies = self.partition_mut(part_name)?;
        let owner_exists = copies.iter_mut().any(|c| {
            if c.node == owner {
                c.next = Some(new_replica);
                true
            } else {
                false
            }
        });
        if !owner_exists {
            return Err(ShardlordError::Metadata(format!(
                "node {owner} does not own '{part_name}'"
            )));
        }
        copies.push(PartitionCopy {
            node: new_replica,
            prev: Some(owner),
            next: None,
        });
        Ok(())
    }

    fn remove_node_copy(&mut self, part_name: &str, node: NodeId) -> Result<(), ShardlordError> {
        let copies = self.partition_mut(part_name)?;
        let idx = copies
            .iter()
            .position(|c| c.node == node)
            .ok_or_else(|| ShardlordError::Metadata(format!("node {node} has no copy of '{part_name}'")))?;
        let removed = copies.remove(idx);
        for c in copies.iter_mut() {
            if Some(c.node) == removed.prev {
                c.next = removed.next;
            }
            if Some(c.node) == removed.next {
                c.prev = removed.prev;
            }
        }
        Ok(())
    }

    fn current_write_lsn(&self) -> Result<u64, ShardlordError> {
        Ok(self.write_lsn)
    }
}
