//! The metadata store seam (spec §6.2): the core's only view of the
//! `nodes`/`partitions` catalog tables, consumed — never schema-managed —
//! through parameterized reads and the specific mutations described in
//! §4.5/§4.6. The real catalog is an external Postgres database (spec §1);
//! this module defines the trait the executor programs against and a
//! reference in-memory implementation used by tests and standalone runs.

pub mod memory;

use crate::core::errors::ShardlordError;
use crate::core::node::{NodeId, NodeInfo};

/// One row of the replica chain for a partition: the owning node and its
/// immediate neighbors (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCopy {
    pub node: NodeId,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

pub trait MetadataStore {
    /// Resolves a node id to the connection string the core uses to reach
    /// it.
    fn resolve_node(&self, id: NodeId) -> Result<NodeInfo, ShardlordError>;

    /// Every copy of a named partition across the cluster, in no
    /// particular order.
    fn partition_copies(&self, part_name: &str) -> Result<Vec<PartitionCopy>, ShardlordError>;

    /// The copy of `part_name` hosted on `node`, if any.
    fn find_copy(&self, part_name: &str, node: NodeId) -> Result<Option<PartitionCopy>, ShardlordError> {
        Ok(self
            .partition_copies(part_name)?
            .into_iter()
            .find(|c| c.node == node))
    }

    /// `update_metadata_sql` for a Move-Part task (spec §4.5 step 5):
    /// atomically replaces the `src` row with a `dst` row carrying the
    /// given chain links, and repoints `prev`'s/`next`'s links at `dst`.
    fn apply_move_part(
        &mut self,
        part_name: &str,
        src: NodeId,
        dst: NodeId,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    ) -> Result<(), ShardlordError>;

    /// `update_metadata_sql` for a Create-Replica task (spec §4.6 step 5):
    /// appends `new_replica` as the new tail after `owner`.
    fn apply_create_replica(
        &mut self,
        part_name: &str,
        owner: NodeId,
        new_replica: NodeId,
    ) -> Result<(), ShardlordError>;

    /// Removes a node's copy of a partition and splices its neighbors
    /// together, as happens when a replica is decommissioned (used by the
    /// replicate-remove closure law, spec §8.2).
    fn remove_node_copy(&mut self, part_name: &str, node: NodeId) -> Result<(), ShardlordError>;

    /// The coordinator's own current write position, as a parsed LSN (spec
    /// §4.4 START_TABLESYNC precheck: workers must have replicated catalog
    /// metadata at least this far before a copy may begin).
    fn current_write_lsn(&self) -> Result<u64, ShardlordError>;
}
