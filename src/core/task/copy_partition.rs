//! The copy-partition (CP) state machine (spec §4.4): the heart of the
//! core. Drives a source and a destination node through tablesync,
//! final sync, and finalize, one non-blocking remote call at a time.
//! `MovePartTask` and `CreateReplicaTask` each embed one of these and run
//! their own topology-reshape steps once it reaches `Stage::Done`.

use crate::core::clock::Clock;
use crate::core::errors::ShardlordError;
use crate::core::metadata::MetadataStore;
use crate::core::naming::copy_channel_name;
use crate::core::node::NodeId;
use crate::core::sql::lsn::parse_lsn;
use crate::core::sql::{Progress, RetryPolicy, SqlOutcome, SqlSession};
use crate::core::task::{StepOutcome, TaskResult};
use std::time::Instant;

/// CP's own four stages, ordered so that `Stage` derives `Ord` in their
/// natural sequence; the machine never regresses across a stage
/// boundary (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    StartTablesync,
    StartFinalsync,
    Finalize,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TablesyncSub {
    CheckSrcMetadataLag,
    CheckDstMetadataLag,
    DropDstSubscription,
    SrcPublicationSlot,
    DstTableAndSubscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalsyncSub {
    PollSubscriptionState,
    LockSourceReadOnly,
    CaptureSyncPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeSub {
    PollReceivedLsn,
}

/// The CP's position within its stage, fine-grained enough that `step()`
/// only ever issues one remote call (or resumes polling one) per
/// invocation. `stage()` is the coarse view the stage-monotonicity
/// invariant (spec §3.2) is stated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    Tablesync(TablesyncSub),
    Finalsync(FinalsyncSub),
    Finalize(FinalizeSub),
    Done,
}

impl SubState {
    fn stage(self) -> Stage {
        match self {
            SubState::Tablesync(_) => Stage::StartTablesync,
            SubState::Finalsync(_) => Stage::StartFinalsync,
            SubState::Finalize(_) => Stage::Finalize,
            SubState::Done => Stage::Done,
        }
    }

    fn stage_entry(stage: Stage) -> SubState {
        match stage {
            Stage::StartTablesync => SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag),
            Stage::StartFinalsync => SubState::Finalsync(FinalsyncSub::PollSubscriptionState),
            Stage::Finalize => SubState::Finalize(FinalizeSub::PollReceivedLsn),
            Stage::Done => SubState::Done,
        }
    }
}

/// The copy-partition state machine. `part_name`/`relation` name the
/// table being copied; `dst_table_ddl` is the destination's
/// already-rendered `CREATE TABLE` text, produced by the out-of-scope
/// schema-reconstruction helper named in spec §1 — this core never
/// derives table shape itself.
pub struct CopyPartitionState {
    pub part_name: String,
    relation: String,
    pub src_node: NodeId,
    pub dst_node: NodeId,
    logname: String,
    dst_table_ddl: String,
    src_connstring: String,
    src: Box<dyn SqlSession>,
    dst: Box<dyn SqlSession>,
    sub: SubState,
    op_in_flight: bool,
    sync_point: Option<u64>,
    pub result: TaskResult,
    pub wake_time: Instant,
}

impl CopyPartitionState {
    pub fn new(
        part_name: impl Into<String>,
        relation: impl Into<String>,
        src_node: NodeId,
        dst_node: NodeId,
        src_connstring: impl Into<String>,
        dst_table_ddl: impl Into<String>,
        src: Box<dyn SqlSession>,
        dst: Box<dyn SqlSession>,
        now: Instant,
    ) -> Self {
        let part_name = part_name.into();
        let logname = copy_channel_name(&part_name, src_node, dst_node);
        Self {
            part_name,
            relation: relation.into(),
            src_node,
            dst_node,
            logname,
            dst_table_ddl: dst_table_ddl.into(),
            src_connstring: src_connstring.into(),
            src,
            dst,
            sub: SubState::stage_entry(Stage::StartTablesync),
            op_in_flight: false,
            sync_point: None,
            result: TaskResult::InProgress,
            wake_time: now,
        }
    }

    pub fn stage(&self) -> Stage {
        self.sub.stage()
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn src_connstring(&self) -> &str {
        &self.src_connstring
    }

    /// The one-shot copy channel's name (publication/slot/subscription)
    /// this partition copy was carried out on.
    pub fn copy_channel_name(&self) -> &str {
        &self.logname
    }

    /// Hands the still-live `src` session to a task handler that keeps
    /// operating on this node after the copy itself is done (spec §4.6
    /// steps 2/4).
    pub fn src_session(&mut self) -> &mut dyn SqlSession {
        self.src.as_mut()
    }

    /// Hands the still-live `dst` session to a task handler that keeps
    /// operating on this node after the copy itself is done (spec
    /// §4.5 step 2, §4.6 steps 1/3).
    pub fn dst_session(&mut self) -> &mut dyn SqlSession {
        self.dst.as_mut()
    }

    fn session_for(&mut self, sub: SubState) -> &mut dyn SqlSession {
        match sub {
            SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag) => self.src.as_mut(),
            SubState::Tablesync(TablesyncSub::CheckDstMetadataLag) => self.dst.as_mut(),
            SubState::Tablesync(TablesyncSub::DropDstSubscription) => self.dst.as_mut(),
            SubState::Tablesync(TablesyncSub::SrcPublicationSlot) => self.src.as_mut(),
            SubState::Tablesync(TablesyncSub::DstTableAndSubscription) => self.dst.as_mut(),
            SubState::Finalsync(FinalsyncSub::PollSubscriptionState) => self.dst.as_mut(),
            SubState::Finalsync(FinalsyncSub::LockSourceReadOnly) => self.src.as_mut(),
            SubState::Finalsync(FinalsyncSub::CaptureSyncPoint) => self.src.as_mut(),
            SubState::Finalize(FinalizeSub::PollReceivedLsn) => self.dst.as_mut(),
            SubState::Done => unreachable!("no session for the terminal sub-state"),
        }
    }

    fn kickoff(&mut self, sub: SubState) -> Result<(), ShardlordError> {
        let logname = self.logname.clone();
        let relation = self.relation.clone();
        match sub {
            SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag)
            | SubState::Tablesync(TablesyncSub::CheckDstMetadataLag) => {
                let session = self.session_for(sub);
                session.start_query(
                    "select received_lsn from pg_stat_subscription where subname = 'shardlord_metadata'",
                )
            }
            SubState::Tablesync(TablesyncSub::DropDstSubscription) => {
                let session = self.session_for(sub);
                session.start_exec_batch(&format!("drop subscription if exists {logname} cascade"))
            }
            SubState::Tablesync(TablesyncSub::SrcPublicationSlot) => {
                let session = self.session_for(sub);
                session.start_exec_batch(&format!(
                    "drop publication if exists {logname};\
                     create publication {logname} for table {relation};\
                     select pg_drop_replication_slot('{logname}') where exists \
                        (select 1 from pg_replication_slots where slot_name = '{logname}');\
                     select pg_create_logical_replication_slot('{logname}', 'pgoutput')"
                ))
            }
            SubState::Tablesync(TablesyncSub::DstTableAndSubscription) => {
                let ddl = self.dst_table_ddl.clone();
                let src_connstring = self.src_connstring.clone();
                let session = self.session_for(sub);
                session.start_exec_batch(&format!(
                    "drop table if exists {relation};\
                     {ddl};\
                     drop subscription if exists {logname};\
                     create subscription {logname} connection '{src_connstring}' \
                        publication {logname} with \
                        (create_slot = false, slot_name = '{logname}', copy_data = true, synchronous_commit = local)"
                ))
            }
            SubState::Finalsync(FinalsyncSub::PollSubscriptionState) => {
                let session = self.session_for(sub);
                session.start_query(&format!(
                    "select srsubstate from pg_subscription_rel r \
                     join pg_subscription s on s.oid = r.srsubid \
                     where s.subname = '{logname}'"
                ))
            }
            SubState::Finalsync(FinalsyncSub::LockSourceReadOnly) => {
                let session = self.session_for(sub);
                session.start_exec_batch(&format!("select shardlord_mark_readonly('{relation}')"))
            }
            SubState::Finalsync(FinalsyncSub::CaptureSyncPoint) => {
                let session = self.session_for(sub);
                session.start_query("select pg_current_wal_lsn()")
            }
            SubState::Finalize(FinalizeSub::PollReceivedLsn) => {
                let session = self.session_for(sub);
                session.start_query(&format!(
                    "select received_lsn from pg_stat_subscription where subname = '{logname}'"
                ))
            }
            SubState::Done => unreachable!("no kickoff for the terminal sub-state"),
        }
    }

    fn expect_one_lsn(&self, node: NodeId, outcome: SqlOutcome) -> Result<u64, ShardlordError> {
        let rows = match outcome {
            SqlOutcome::Rows(rows) => rows,
            _ => unreachable!("this sub-state only ever issues a query"),
        };
        if rows.len() != 1 {
            return Err(ShardlordError::UnexpectedRowCount { node, got: rows.len() });
        }
        let raw = rows[0]
            .first()
            .ok_or_else(|| ShardlordError::UnexpectedRowCount { node, got: 0 })?;
        parse_lsn(raw)
    }

    /// Applies the effect of a completed sub-state, advancing `self.sub`.
    /// `Ok(None)` means the caller should immediately kick off the next
    /// sub-state (a same-stage transition with no reason to wait);
    /// `Ok(Some(outcome))` means a "not yet" or lagging condition was
    /// found and the caller should stop and return that outcome as-is.
    fn complete(
        &mut self,
        sub: SubState,
        outcome: SqlOutcome,
        clock: &dyn Clock,
        retry: &RetryPolicy,
        metadata: &mut dyn MetadataStore,
    ) -> Result<Option<StepOutcome>, ShardlordError> {
        match sub {
            SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag) => {
                let worker_lsn = self.expect_one_lsn(self.src_node, outcome)?;
                if worker_lsn < metadata.current_write_lsn()? {
                    self.sub = SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag);
                    self.wake_time = retry.after_sql_error(clock.now());
                    return Ok(Some(StepOutcome::WakeAt(self.wake_time)));
                }
                self.sub = SubState::Tablesync(TablesyncSub::CheckDstMetadataLag);
                Ok(None)
            }
            SubState::Tablesync(TablesyncSub::CheckDstMetadataLag) => {
                let worker_lsn = self.expect_one_lsn(self.dst_node, outcome)?;
                if worker_lsn < metadata.current_write_lsn()? {
                    self.sub = SubState::Tablesync(TablesyncSub::CheckSrcMetadataLag);
                    self.wake_time = retry.after_sql_error(clock.now());
                    return Ok(Some(StepOutcome::WakeAt(self.wake_time)));
                }
                self.sub = SubState::Tablesync(TablesyncSub::DropDstSubscription);
                Ok(None)
            }
            SubState::Tablesync(TablesyncSub::DropDstSubscription) => {
                self.sub = SubState::Tablesync(TablesyncSub::SrcPublicationSlot);
                Ok(None)
            }
            SubState::Tablesync(TablesyncSub::SrcPublicationSlot) => {
                self.sub = SubState::Tablesync(TablesyncSub::DstTableAndSubscription);
                Ok(None)
            }
            SubState::Tablesync(TablesyncSub::DstTableAndSubscription) => {
                self.sub = SubState::stage_entry(Stage::StartFinalsync);
                Ok(None)
            }
            SubState::Finalsync(FinalsyncSub::PollSubscriptionState) => {
                let rows = match outcome {
                    SqlOutcome::Rows(rows) => rows,
                    _ => unreachable!("this sub-state only ever issues a query"),
                };
                let ready = rows.len() == 1 && rows[0].first().map(String::as_str) == Some("ready");
                if !ready {
                    self.wake_time = retry.after_not_yet(clock.now());
                    return Ok(Some(StepOutcome::WakeAt(self.wake_time)));
                }
                self.sub = SubState::Finalsync(FinalsyncSub::LockSourceReadOnly);
                Ok(None)
            }
            SubState::Finalsync(FinalsyncSub::LockSourceReadOnly) => {
                self.sub = SubState::Finalsync(FinalsyncSub::CaptureSyncPoint);
                Ok(None)
            }
            SubState::Finalsync(FinalsyncSub::CaptureSyncPoint) => {
                let lsn = self.expect_one_lsn(self.src_node, outcome)?;
                self.sync_point = Some(lsn);
                self.sub = SubState::stage_entry(Stage::Finalize);
                Ok(None)
            }
            SubState::Finalize(FinalizeSub::PollReceivedLsn) => {
                let received = self.expect_one_lsn(self.dst_node, outcome)?;
                let sync_point = self.sync_point.expect("captured during START_FINALSYNC");
                if received < sync_point {
                    self.wake_time = retry.after_not_yet(clock.now());
                    return Ok(Some(StepOutcome::WakeAt(self.wake_time)));
                }
                self.sub = SubState::Done;
                Ok(None)
            }
            SubState::Done => unreachable!("the top of advance() intercepts Done before dispatch"),
        }
    }

    fn advance(
        &mut self,
        clock: &dyn Clock,
        retry: &RetryPolicy,
        metadata: &mut dyn MetadataStore,
    ) -> Result<StepOutcome, ShardlordError> {
        loop {
            if self.sub == SubState::Done {
                self.result = TaskResult::Success;
                return Ok(StepOutcome::Done);
            }

            if !self.op_in_flight {
                let sub = self.sub;
                match self.session_for(sub).ensure_connected()? {
                    Progress::Pending => return Ok(StepOutcome::WaitOnSocket),
                    Progress::Ready => {}
                }
                self.kickoff(sub)?;
                self.op_in_flight = true;
                return Ok(StepOutcome::WaitOnSocket);
            }

            let sub = self.sub;
            let outcome = self.session_for(sub).poll()?;
            match outcome {
                SqlOutcome::InProgress => return Ok(StepOutcome::WaitOnSocket),
                done => {
                    self.op_in_flight = false;
                    if let Some(outcome) = self.complete(sub, done, clock, retry, metadata)? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// Advances the state machine by at most one remote call's worth of
    /// progress. On any SQL failure, both connections are dropped (the
    /// real implementation of [`SqlSession::close`] on the unaffected
    /// side is a cheap no-op reconnect next stage entry) and the whole
    /// current stage restarts from its first sub-state, per the
    /// idempotent-entry rule in spec §3.3.
    pub fn step(
        &mut self,
        clock: &dyn Clock,
        retry: &RetryPolicy,
        metadata: &mut dyn MetadataStore,
    ) -> StepOutcome {
        if self.result != TaskResult::InProgress {
            return StepOutcome::Done;
        }
        match self.advance(clock, retry, metadata) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    part = %self.part_name,
                    src = %self.src_node,
                    dst = %self.dst_node,
                    stage = ?self.sub.stage(),
                    %err,
                    "cp task hit a transient sql failure, restarting stage from entry"
                );
                self.op_in_flight = false;
                self.src.close();
                self.dst.close();
                self.sub = SubState::stage_entry(self.sub.stage());
                self.wake_time = retry.after_sql_error(clock.now());
                StepOutcome::WakeAt(self.wake_time)
            }
        }
    }

    pub fn release_connections(&mut self) {
        self.src.close();
        self.dst.close();
    }

    pub fn registrable_socket(&mut self) -> Option<&mut dyn mio::event::Source> {
        let sub = self.sub;
        if sub == SubState::Done {
            return None;
        }
        self.session_for(sub).registrable_socket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::test_support::FakeClock;
    use crate::core::metadata::memory::InMemoryMetadataStore;
    use crate::core::sql::client::fake::{ScriptedSession, Step};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(200))
    }

    fn lag_free_store() -> InMemoryMetadataStore {
        InMemoryMetadataStore::new()
    }

    /// One (connect, issue statement, poll its terminal result) leg.
    /// `ensure_connected` is polled once per sub-state (not once per
    /// task), so every remote call a script models needs its own
    /// `Connect` entry.
    fn leg(start: Step, poll: Step) -> Vec<Step> {
        vec![Step::Connect(Ok(Progress::Ready)), start, poll]
    }

    fn connected(legs: Vec<Vec<Step>>) -> Box<dyn SqlSession> {
        Box::new(ScriptedSession::new(legs.into_iter().flatten().collect()))
    }

    #[test]
    fn runs_the_full_happy_path_to_done() {
        let clock = FakeClock::new();
        let retry = policy();
        let mut metadata = lag_free_store();

        let src = connected(vec![
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
            ),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/20".into()]]))),
            ),
        ]);
        let dst = connected(vec![
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
            ),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["ready".into()]]))),
            ),
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/20".into()]]))),
            ),
        ]);

        let mut cp = CopyPartitionState::new(
            "pt_0",
            "pt_0",
            NodeId(1),
            NodeId(2),
            "host=src",
            "create table pt_0 (id int)",
            src,
            dst,
            clock.now(),
        );

        let mut outcome = cp.step(&clock, &retry, &mut metadata);
        let mut guard = 0;
        while !matches!(outcome, StepOutcome::Done) {
            guard += 1;
            assert!(guard < 64, "cp task did not reach Done: stuck at {:?}", cp.stage());
            outcome = cp.step(&clock, &retry, &mut metadata);
        }

        assert_eq!(cp.stage(), Stage::Done);
        assert_eq!(cp.result, TaskResult::Success);
    }

    #[test]
    fn metadata_lag_retries_whole_tablesync_stage_after_cmd_retry_naptime() {
        let clock = FakeClock::new();
        let retry = policy();
        let mut metadata = lag_free_store();
        metadata.set_write_lsn(parse_lsn("0/100").unwrap());

        let src = connected(vec![leg(
            Step::StartQuery(Ok(())),
            Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
        )]);
        let dst: Box<dyn SqlSession> = Box::new(ScriptedSession::new(vec![]));

        let mut cp = CopyPartitionState::new(
            "pt_0",
            "pt_0",
            NodeId(1),
            NodeId(2),
            "host=src",
            "create table pt_0 (id int)",
            src,
            dst,
            clock.now(),
        );

        let _ = cp.step(&clock, &retry, &mut metadata);
        let outcome = cp.step(&clock, &retry, &mut metadata);
        match outcome {
            StepOutcome::WakeAt(at) => assert_eq!(at, clock.now() + Duration::from_millis(50)),
            other => panic!("expected a scheduled retry, got {other:?}"),
        }
        assert_eq!(cp.stage(), Stage::StartTablesync);
    }

    #[test]
    fn sql_failure_closes_connections_and_restarts_stage_entry() {
        let clock = FakeClock::new();
        let retry = policy();
        let mut metadata = lag_free_store();

        let src = connected(vec![leg(
            Step::StartQuery(Ok(())),
            Step::Poll(Err(ShardlordError::Sql {
                node: NodeId(1),
                message: "connection reset".into(),
            })),
        )]);
        let dst: Box<dyn SqlSession> = Box::new(ScriptedSession::new(vec![]));

        let mut cp = CopyPartitionState::new(
            "pt_0",
            "pt_0",
            NodeId(1),
            NodeId(2),
            "host=src",
            "create table pt_0 (id int)",
            src,
            dst,
            clock.now(),
        );

        cp.step(&clock, &retry, &mut metadata);
        let outcome = cp.step(&clock, &retry, &mut metadata);
        assert!(matches!(outcome, StepOutcome::WakeAt(_)));
        assert_eq!(cp.stage(), Stage::StartTablesync);
        assert!(!cp.src.is_connected());
    }

    #[test]
    fn transient_destination_outage_during_initial_sync_recovers_on_retry() {
        let clock = FakeClock::new();
        let retry = policy();
        let mut metadata = lag_free_store();

        // src re-issues CheckSrcMetadataLag twice: once for the attempt
        // that dies on the destination's connect, once for the stage
        // restart that follows.
        let src = connected(vec![
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
            ),
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
            ),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))),
            leg(
                Step::StartQuery(Ok(())),
                Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/20".into()]]))),
            ),
        ]);

        let mut dst_steps = vec![Step::Connect(Err(ShardlordError::Io {
            node: NodeId(2),
            source: std::sync::Arc::new(std::io::Error::other("connection refused")),
        }))];
        dst_steps.extend(leg(
            Step::StartQuery(Ok(())),
            Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/10".into()]]))),
        ));
        dst_steps.extend(leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))));
        dst_steps.extend(leg(Step::StartBatch(Ok(())), Step::Poll(Ok(SqlOutcome::Done))));
        dst_steps.extend(leg(
            Step::StartQuery(Ok(())),
            Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["ready".into()]]))),
        ));
        dst_steps.extend(leg(
            Step::StartQuery(Ok(())),
            Step::Poll(Ok(SqlOutcome::Rows(vec![vec!["0/20".into()]]))),
        ));
        let dst: Box<dyn SqlSession> = Box::new(ScriptedSession::new(dst_steps));

        let mut cp = CopyPartitionState::new(
            "pt_0",
            "pt_0",
            NodeId(1),
            NodeId(2),
            "host=src",
            "create table pt_0 (id int)",
            src,
            dst,
            clock.now(),
        );

        let mut outcome = cp.step(&clock, &retry, &mut metadata);
        let mut guard = 0;
        while !matches!(outcome, StepOutcome::Done) {
            guard += 1;
            assert!(guard < 64, "cp task did not recover: stuck at {:?}", cp.stage());
            outcome = cp.step(&clock, &retry, &mut metadata);
        }
        assert_eq!(cp.result, TaskResult::Success);
    }

    #[test]
    fn coordinator_restart_mid_move_reruns_from_start_tablesync() {
        // Spec: killing the coordinator between START_FINALSYNC and
        // FINALIZE and re-submitting the move runs the whole state
        // machine again from START_TABLESYNC — there is no durable
        // per-task checkpoint to resume from. A "restarted" task is
        // just a fresh `CopyPartitionState`, so the happy path it runs
        // is the same one `runs_the_full_happy_path_to_done` exercises;
        // this test only pins the entry point a restart actually lands
        // on.
        let clock = FakeClock::new();
        let src: Box<dyn SqlSession> = Box::new(ScriptedSession::new(vec![]));
        let dst: Box<dyn SqlSession> = Box::new(ScriptedSession::new(vec![]));
        let cp = CopyPartitionState::new(
            "pt_0",
            "pt_0",
            NodeId(1),
            NodeId(2),
            "host=src",
            "create table pt_0 (id int)",
            src,
            dst,
            clock.now(),
        );
        assert_eq!(cp.stage(), Stage::StartTablesync);
    }
}
