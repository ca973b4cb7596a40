//! Task-type handlers (spec §2 components 4-6): the CP state machine and
//! the two task kinds built on top of it.
//!
//! Polymorphic dispatch uses a tagged variant (`TaskKind`) rather than
//! inheritance, per spec §9.

pub mod copy_partition;
pub mod create_replica;
pub mod move_part;

use crate::core::clock::Clock;
use crate::core::errors::ShardlordError;
use crate::core::metadata::MetadataStore;
use crate::core::node::NodeId;
use crate::core::sql::RetryPolicy;
use create_replica::CreateReplicaTask;
use move_part::MovePartTask;
use std::time::Instant;

/// Stable arena index identifying a task for the lifetime of its run
/// (spec §9, "Cyclic references between task and multiplexer").
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    InProgress,
    Success,
    Failed,
}

/// The dispatcher directive a step function returns (spec §3.1
/// `exec_hint`, §9 "Retry control flow").
#[derive(Debug, Clone, Copy)]
pub enum StepOutcome {
    WakeAt(Instant),
    WaitOnSocket,
    Done,
}

/// The tagged variant a task arena entry holds. Each case carries its CP
/// state inline; the executor dispatches on the tag without knowing the
/// handler's internals.
pub enum TaskKind {
    MovePart(MovePartTask),
    CreateReplica(CreateReplicaTask),
}

impl TaskKind {
    pub fn step(
        &mut self,
        clock: &dyn Clock,
        retry: &RetryPolicy,
        metadata: &mut dyn MetadataStore,
    ) -> StepOutcome {
        match self {
            TaskKind::MovePart(t) => t.step(clock, retry, metadata),
            TaskKind::CreateReplica(t) => t.step(clock, retry, metadata),
        }
    }

    pub fn result(&self) -> TaskResult {
        match self {
            TaskKind::MovePart(t) => t.cp.result,
            TaskKind::CreateReplica(t) => t.cp.result,
        }
    }

    pub fn wake_time(&self) -> Instant {
        match self {
            TaskKind::MovePart(t) => t.cp.wake_time,
            TaskKind::CreateReplica(t) => t.cp.wake_time,
        }
    }

    /// Releases every remote connection this task still holds (spec
    /// §3.2: a terminal task has released all remote connections).
    pub fn release_connections(&mut self) {
        match self {
            TaskKind::MovePart(t) => t.release_connections(),
            TaskKind::CreateReplica(t) => t.release_connections(),
        }
    }

    pub fn registrable_socket(&mut self) -> Option<&mut dyn mio::event::Source> {
        match self {
            TaskKind::MovePart(t) => t.registrable_socket(),
            TaskKind::CreateReplica(t) => t.registrable_socket(),
        }
    }

    pub fn part_name(&self) -> &str {
        match self {
            TaskKind::MovePart(t) => &t.cp.part_name,
            TaskKind::CreateReplica(t) => &t.cp.part_name,
        }
    }
}

/// Precondition checks run once, at task admission, before any CP state
/// or remote connection is created (spec §3.2, §7 "precondition failure
/// at admission", §8.3 boundary behaviors). A rejection here produces no
/// side effects: the caller marks the command FAILED without this core
/// ever touching a remote node.
fn check_distinct_valid_nodes(src_node: NodeId, dst_node: NodeId) -> Result<(), ShardlordError> {
    if !src_node.is_valid() || !dst_node.is_valid() || src_node == dst_node {
        return Err(ShardlordError::AdmissionRejected(format!(
            "src_node and dst_node must be distinct, valid node ids (got {src_node}, {dst_node})"
        )));
    }
    Ok(())
}

/// Admission precondition for a Move-Part task (spec §8.3: "if
/// `src_node == dst_node`: admission fails", "if destination already
/// owns the partition: admission fails", spec §7: "source partition
/// absent").
pub fn admit_move_part(
    metadata: &dyn MetadataStore,
    part_name: &str,
    src_node: NodeId,
    dst_node: NodeId,
) -> Result<(), ShardlordError> {
    check_distinct_valid_nodes(src_node, dst_node)?;
    if metadata.find_copy(part_name, src_node)?.is_none() {
        return Err(ShardlordError::AdmissionRejected(format!(
            "source partition '{part_name}' not found on node {src_node}"
        )));
    }
    if metadata.find_copy(part_name, dst_node)?.is_some() {
        return Err(ShardlordError::AdmissionRejected(format!(
            "node {dst_node} already owns a copy of '{part_name}'"
        )));
    }
    Ok(())
}

/// Admission precondition for a Create-Replica task: same shape as
/// Move-Part's (spec §8.3), `src_node` here being the existing owner the
/// new replica is spun up from.
pub fn admit_create_replica(
    metadata: &dyn MetadataStore,
    part_name: &str,
    src_node: NodeId,
    dst_node: NodeId,
) -> Result<(), ShardlordError> {
    check_distinct_valid_nodes(src_node, dst_node)?;
    if metadata.find_copy(part_name, src_node)?.is_none() {
        return Err(ShardlordError::AdmissionRejected(format!(
            "source partition '{part_name}' not found on node {src_node}"
        )));
    }
    if metadata.find_copy(part_name, dst_node)?.is_some() {
        return Err(ShardlordError::AdmissionRejected(format!(
            "node {dst_node} already owns a copy of '{part_name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::memory::InMemoryMetadataStore;
    use crate::core::metadata::PartitionCopy;

    fn store_with_single_copy(part: &str, owner: NodeId) -> InMemoryMetadataStore {
        let mut store = InMemoryMetadataStore::new();
        store.add_node(owner, "host=owner");
        store.seed_partition(
            part,
            vec![PartitionCopy {
                node: owner,
                prev: None,
                next: None,
            }],
        );
        store
    }

    #[test]
    fn move_part_rejects_identical_src_and_dst() {
        let store = store_with_single_copy("pt_0", NodeId(2));
        let err = admit_move_part(&store, "pt_0", NodeId(2), NodeId(2)).unwrap_err();
        assert!(matches!(err, ShardlordError::AdmissionRejected(_)));
    }

    #[test]
    fn move_part_rejects_when_destination_already_owns_partition() {
        let mut store = store_with_single_copy("pt_0", NodeId(2));
        store.add_node(NodeId(3), "host=dst");
        store
            .apply_create_replica("pt_0", NodeId(2), NodeId(3))
            .unwrap();
        let err = admit_move_part(&store, "pt_0", NodeId(2), NodeId(3)).unwrap_err();
        assert!(matches!(err, ShardlordError::AdmissionRejected(_)));
    }

    #[test]
    fn move_part_rejects_when_source_partition_absent() {
        let store = InMemoryMetadataStore::new();
        let err = admit_move_part(&store, "pt_missing", NodeId(1), NodeId(2)).unwrap_err();
        assert!(matches!(err, ShardlordError::AdmissionRejected(_)));
    }

    #[test]
    fn move_part_admits_a_well_formed_request() {
        let store = store_with_single_copy("pt_0", NodeId(2));
        assert!(admit_move_part(&store, "pt_0", NodeId(2), NodeId(3)).is_ok());
    }

    #[test]
    fn create_replica_rejects_when_destination_already_owns_partition() {
        let mut store = store_with_single_copy("pt_0", NodeId(2));
        store.add_node(NodeId(3), "host=dst");
        store
            .apply_create_replica("pt_0", NodeId(2), NodeId(3))
            .unwrap();
        let err = admit_create_replica(&store, "pt_0", NodeId(2), NodeId(3)).unwrap_err();
        assert!(matches!(err, ShardlordError::AdmissionRejected(_)));
    }
}
