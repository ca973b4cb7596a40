//! Move-Part handler (spec §4.5): once the embedded CP state machine
//! reaches `Stage::Done`, rewires the replication topology among up to
//! four nodes (prev, the now-vacated src, the new owner dst, next) in a
//! fixed order, then commits the chain change to the metadata store.

use crate::core::clock::Clock;
use crate::core::errors::ShardlordError;
use crate::core::metadata::MetadataStore;
use crate::core::node::NodeId;
use crate::core::sql::{Progress, RetryPolicy, SqlOutcome, SqlSession};
use crate::core::task::copy_partition::CopyPartitionState;
use crate::core::task::{StepOutcome, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sub {
    PrevReshape,
    DstReshape,
    PrevSyncStandby,
    NextReshape,
    DstSyncStandbyForNext,
    UpdateMetadata,
    Done,
}

impl Sub {
    fn next(self) -> Sub {
        match self {
            Sub::PrevReshape => Sub::DstReshape,
            Sub::DstReshape => Sub::PrevSyncStandby,
            Sub::PrevSyncStandby => Sub::NextReshape,
            Sub::NextReshape => Sub::DstSyncStandbyForNext,
            Sub::DstSyncStandbyForNext => Sub::UpdateMetadata,
            Sub::UpdateMetadata => Sub::Done,
            Sub::Done => Sub::Done,
        }
    }
}

/// Wraps a CP copy with the prev/next connections and catalog-defined
/// reshape SQL needed to finish relocating a partition (spec §3.1 "Move-
/// Part Task (extends CP)").
pub struct MovePartTask {
    pub cp: CopyPartitionState,
    prev_node: Option<NodeId>,
    next_node: Option<NodeId>,
    prev: Option<Box<dyn SqlSession>>,
    next: Option<Box<dyn SqlSession>>,
    prev_sql: String,
    dst_sql: String,
    next_sql: String,
    sync_replicas: bool,
    sub: Sub,
    op_in_flight: bool,
}

impl MovePartTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cp: CopyPartitionState,
        prev_node: Option<NodeId>,
        next_node: Option<NodeId>,
        prev: Option<Box<dyn SqlSession>>,
        next: Option<Box<dyn SqlSession>>,
        prev_sql: impl Into<String>,
        dst_sql: impl Into<String>,
        next_sql: impl Into<String>,
        sync_replicas: bool,
    ) -> Self {
        debug_assert_eq!(prev_node.is_some(), prev.is_some());
        debug_assert_eq!(next_node.is_some(), next.is_some());
        Self {
            cp,
            prev_node,
            next_node,
            prev,
            next,
            prev_sql: prev_sql.into(),
            dst_sql: dst_sql.into(),
            next_sql: next_sql.into(),
            sync_replicas,
            sub: Sub::PrevReshape,
            op_in_flight: false,
        }
    }

    fn applicable(&self, sub: Sub) -> bool {
        match sub {
            Sub::PrevReshape => self.prev_node.is_some(),
            Sub::DstReshape => true,
            Sub::PrevSyncStandby => self.prev_node.is_some() && self.sync_replicas,
            Sub::NextReshape => self.next_node.is_some(),
            Sub::DstSyncStandbyForNext => self.next_node.is_some() && self.sync_replicas,
            Sub::UpdateMetadata | Sub::Done => true,
        }
    }

    fn session_for(&mut self, sub: Sub) -> Option<&mut dyn SqlSession> {
        match sub {
            Sub::PrevReshape | Sub::PrevSyncStandby => match &mut self.prev {
                Some(s) => Some(&mut **s),
                None => None,
            },
            Sub::DstReshape | Sub::DstSyncStandbyForNext => Some(self.cp.dst_session()),
            Sub::NextReshape => match &mut self.next {
                Some(s) => Some(&mut **s),
                None => None,
            },
            Sub::UpdateMetadata | Sub::Done => None,
        }
    }

    fn kickoff(&mut self, sub: Sub) -> Result<(), ShardlordError> {
        let sql = match sub {
            Sub::PrevReshape => self.prev_sql.clone(),
            Sub::DstReshape => self.dst_sql.clone(),
            Sub::PrevSyncStandby => {
                format!("select shardlord_add_sync_standby('{}')", self.cp.dst_node)
            }
            Sub::NextReshape => self.next_sql.clone(),
            Sub::DstSyncStandbyForNext => format!(
                "select shardlord_add_sync_standby('{}')",
                self.next_node.expect("applicable() checked before kickoff")
            ),
            Sub::UpdateMetadata | Sub::Done => unreachable!("no remote call for local/terminal subs"),
        };
        self.session_for(sub)
            .expect("applicable() guarantees a session for this sub")
            .start_exec_batch(&sql)
    }

    fn advance(
        &mut self,
        metadata: &mut dyn MetadataStore,
    ) -> Result<StepOutcome, ShardlordError> {
        loop {
            if self.sub == Sub::Done {
                return Ok(StepOutcome::Done);
            }
            if !self.applicable(self.sub) {
                self.sub = self.sub.next();
                continue;
            }
            if self.sub == Sub::UpdateMetadata {
                metadata.apply_move_part(
                    &self.cp.part_name,
                    self.cp.src_node,
                    self.cp.dst_node,
                    self.prev_node,
                    self.next_node,
                )?;
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
                    "move-part reshape step failed, closing connection and rescheduling"
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
        if let Some(p) = &mut self.prev {
            p.close();
        }
        if let Some(n) = &mut self.next {
            n.close();
        }
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
