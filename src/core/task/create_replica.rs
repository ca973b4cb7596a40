//! Create-Replica handler (spec §4.6): once the embedded CP state
//! machine reaches `Stage::Done`, converts the one-shot copy channel
//! into a permanent data channel from src to the new replica dst, then
//! appends dst as the new tail of the replica chain.

use crate::core::clock::Clock;
use crate::core::errors::ShardlordError;
use crate::core::metadata::MetadataStore;
use crate::core::sql::{Progress, RetryPolicy, SqlOutcome, SqlSession};
use crate::core::task::copy_partition::CopyPartitionState;
use crate::core::task::{StepOutcome, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sub {
    DropCopySubscription,
    SrcPublicationAndSlot,
    DstPermanentSubscription,
    SrcSyncStandbyAndWritable,
    UpdateMetadata,
    Done,
}

impl Sub {
    fn next(self) -> Sub {
        match self {
            Sub::DropCopySubscription => Sub::SrcPublicationAndSlot,
            Sub::SrcPublicationAndSlot => Sub::DstPermanentSubscription,
            Sub::DstPermanentSubscription => Sub::SrcSyncStandbyAndWritable,
            Sub::SrcSyncStandbyAndWritable => Sub::UpdateMetadata,
            Sub::UpdateMetadata => Sub::Done,
            Sub::Done => Sub::Done,
        }
    }
}

/// Wraps a CP copy with the catalog-defined SQL needed to promote it
/// into a standing replication edge (spec §3.1 "Create-Replica Task
/// (extends CP)"). `detach_sql` and the `install_*_sql` pair are
/// precomputed by the catalog at admission time, the same way
/// `MovePartTask` is handed its reshape legs: this task only ever
/// replays them, it never derives replication SQL itself.
pub struct CreateReplicaTask {
    pub cp: CopyPartitionState,
    sync_replicas: bool,
    detach_sql: String,
    install_src_sql: String,
    install_dst_sql: String,
    sub: Sub,
    op_in_flight: bool,
}

impl CreateReplicaTask {
    pub fn new(
        cp: CopyPartitionState,
        sync_replicas: bool,
        detach_sql: impl Into<String>,
        install_src_sql: impl Into<String>,
        install_dst_sql: impl Into<String>,
    ) -> Self {
        Self {
            cp,
            sync_replicas,
            detach_sql: detach_sql.into(),
            install_src_sql: install_src_sql.into(),
            install_dst_sql: install_dst_sql.into(),
            sub: Sub::DropCopySubscription,
            op_in_flight: false,
        }
    }

    fn applicable(&self, sub: Sub) -> bool {
        match sub {
            Sub::SrcSyncStandbyAndWritable => self.sync_replicas,
            _ => true,
        }
    }

    fn session_for(&mut self, sub: Sub) -> Option<&mut dyn SqlSession> {
        match sub {
            Sub::DropCopySubscription | Sub::DstPermanentSubscription => Some(self.cp.dst_session()),
            Sub::SrcPublicationAndSlot | Sub::SrcSyncStandbyAndWritable => Some(self.cp.src_session()),
            Sub::UpdateMetadata | Sub::Done => None,
        }
    }

    fn kickoff(&mut self, sub: Sub) -> Result<(), ShardlordError> {
        let sql = match sub {
            Sub::DropCopySubscription => self.detach_sql.clone(),
            Sub::SrcPublicationAndSlot => self.install_src_sql.clone(),
            Sub::DstPermanentSubscription => self.install_dst_sql.clone(),
            Sub::SrcSyncStandbyAndWritable => format!(
                "select shardlord_add_sync_standby('{}');select shardlord_mark_writable('{}')",
                self.cp.dst_node,
                self.cp.relation()
            ),
            Sub::UpdateMetadata | Sub::Done => unreachable!("no remote call for local/terminal subs"),
        };
        self.session_for(sub)
            .expect("applicable() guarantees a session for this sub")
            .start_exec_batch(&sql)
    }

    fn advance(&mut self, metadata: &mut dyn MetadataStore) -> Result<StepOutcome, ShardlordError> {
        loop {
            if self.sub == Sub::Done {
                return Ok(StepOutcome::Done);
            }
            if !self.applicable(self.sub) {
                self.sub = self.sub.next();
                continue;
            }
            if self.sub == Sub::UpdateMetadata {
                metadata.apply_create_replica(&self.cp.part_name, self.cp.src_node, self.cp.dst_node)?;
                self.sub = Sub::Done;
                continue;
            }

            if !self.op_in_flight {
                let sub = self.sub;
                match self
                    .session_for(sub)
                    .expect("applicable() guarantees a session")
                    .ensure_connected()?
                {
                    Progress::Pending => return Ok(StepOutcome::WaitOnSocket),
                    Progress::Ready => {}
                }
                self.kickoff(sub)?;
                self.op_in_flight = true;
                return Ok(StepOutcome::WaitOnSocket);
            }

            let sub = self.sub;
            match self
                .session_for(sub)
                .expect("applicable() guarantees a session")
                .poll()?
            {
                SqlOutcome::InProgress => return Ok(StepOutcome::WaitOnSocket),
                SqlOutcome::Done | SqlOutcome::Rows(_) => {
                    self.op_in_flight = false;
                    self.sub = sub.next();
                }
            }
        }
    }

    pub fn step(
        &mut self,
        clock: &dyn Clock,
        retry: &RetryPolicy,
        metadata: &mut dyn MetadataStore,
    ) -> StepOutcome {
        if self.cp.result == TaskResult::InProgress {
            let outcome = self.cp.step(clock, retry, metadata);
            if !matches!(outcome, StepOutcome::Done) {
                return outcome;
            }
        }
        match self.advance(metadata) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    part = %self.cp.part_name,
                    sub = ?self.sub,
                    %err,
                    "create-replica step failed, closing connection and rescheduling"
                );
                self.op_in_flight = false;
                if let Some(session) = self.session_for(self.sub) {
                    session.close();
                }
                StepOutcome::WakeAt(retry.after_sql_error(clock.now()))
            }
        }
    }

    pub fn release_connections(&mut self) {
        self.cp.release_connections();
    }

    pub fn registrable_socket(&mut self) -> Option<&mut dyn mio::event::Source> {
        if self.cp.result == TaskResult::InProgress {
            return self.cp.registrable_socket();
        }
        if matches!(self.sub, Sub::Done | Sub::UpdateMetadata) {
            return None;
        }
        self.session_for(self.sub).and_then(|s| s.registrable_socket())
    }
}
