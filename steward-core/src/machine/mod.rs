//! The apply pipeline
//!
//! [`ReplicatedStateMachine`] turns the committed entry stream into session
//! transitions, callback dispatches, and deliveries. One apply step runs per
//! entry:
//!
//! 1. Reject the entry if its index does not advance the log (fatal).
//! 2. Run deferred tasks that are due.
//! 3. Apply the entry itself, dispatching lifecycle callbacks. If the entry
//!    fails, everything it did to the registry, the message queues, and the
//!    task schedule is undone.
//! 4. Optionally run expiration.
//! 5. Flush messages queued in earlier steps to sessions still `Open` and
//!    hand them to the transport.
//!
//! Unregisters requested by callbacks run after the dispatch that asked for
//! them, inside the same step. Illegal state access from a deferred task or
//! an expiration pass outside a `Tick` is logged and dropped, since no entry
//! asked for it.

pub mod entry;
pub mod snapshot;

pub use entry::{ApplyOutput, Committed, Entry};
pub use snapshot::StateMachineSnapshot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::Index;
use crate::config::SessionConfig;
use crate::error::{ApplyError, SessionError, SnapshotError};
use crate::events::{EventPublisher, PublisherStats};
use crate::executor::{DeferredExecutor, Task};
use crate::listener::context::StepEffects;
use crate::listener::{ListenerDispatcher, SessionContext, SessionListener};
use crate::session::{
    ExpirationScheduler, Metadata, SessionHandle, SessionId, SessionRegistry, SessionStats,
    SessionStateMachine, Step, Transition,
};
use crate::transport::{NullTransport, Transport};

/// Handler for `Command` entries, supplied by the state machine author
pub trait CommandHandler: Send {
    /// Apply `payload` on behalf of `session`
    ///
    /// The session is live (`Pending` or `Open`) when this is called.
    fn apply(
        &mut self,
        session: &SessionHandle,
        payload: &Value,
        ctx: &mut SessionContext<'_>,
    ) -> Result<Value, SessionError>;
}

/// Handler that accepts every command and returns `null`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl CommandHandler for NoopHandler {
    fn apply(
        &mut self,
        _session: &SessionHandle,
        _payload: &Value,
        _ctx: &mut SessionContext<'_>,
    ) -> Result<Value, SessionError> {
        Ok(Value::Null)
    }
}

/// Point-in-time counters, read between apply steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStats {
    pub last_applied: Index,
    pub sessions: SessionStats,
    pub messages: PublisherStats,
    pub deferred_tasks: usize,
}

/// Builder for [`ReplicatedStateMachine`]
///
/// Observers are fixed once the machine is built.
pub struct StateMachineBuilder {
    config: SessionConfig,
    dispatcher: ListenerDispatcher,
    handler: Box<dyn CommandHandler>,
    transport: Arc<dyn Transport>,
}

impl StateMachineBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            dispatcher: ListenerDispatcher::new(),
            handler: Box::new(NoopHandler),
            transport: Arc::new(NullTransport),
        }
    }

    /// Add an observer; observers are called in the order they are added
    pub fn listener(mut self, listener: impl SessionListener + 'static) -> Self {
        self.dispatcher.add(Box::new(listener));
        self
    }

    pub fn handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn build(self) -> ReplicatedStateMachine {
        ReplicatedStateMachine {
            expiration: ExpirationScheduler::new(self.config.session_timeout),
            config: self.config,
            registry: SessionRegistry::new(),
            publisher: EventPublisher::new(),
            executor: DeferredExecutor::new(),
            dispatcher: self.dispatcher,
            handler: self.handler,
            transport: self.transport,
            last_applied: 0,
            halted: false,
        }
    }
}

/// Session subsystem of one replica
pub struct ReplicatedStateMachine {
    config: SessionConfig,
    registry: SessionRegistry,
    publisher: EventPublisher,
    expiration: ExpirationScheduler,
    executor: DeferredExecutor,
    dispatcher: ListenerDispatcher,
    handler: Box<dyn CommandHandler>,
    transport: Arc<dyn Transport>,
    last_applied: Index,
    halted: bool,
}

impl ReplicatedStateMachine {
    pub fn builder(config: SessionConfig) -> StateMachineBuilder {
        StateMachineBuilder::new(config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registry contents as of the last completed apply step
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.registry.lookup(id)
    }

    pub fn last_applied(&self) -> Index {
        self.last_applied
    }

    /// Whether an ordering violation stopped the machine
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn stats(&self) -> MachineStats {
        MachineStats {
            last_applied: self.last_applied,
            sessions: self.registry.stats(),
            messages: self.publisher.stats(),
            deferred_tasks: self.executor.len(),
        }
    }

    pub fn apply_committed(&mut self, committed: Committed) -> Result<ApplyOutput, ApplyError> {
        self.apply(committed.index, committed.entry)
    }

    /// Apply one committed entry
    ///
    /// Per-entry failures come back as `ApplyError::Session` and leave the
    /// machine usable. An index that does not advance the log halts the
    /// machine for good.
    pub fn apply(&mut self, index: Index, entry: Entry) -> Result<ApplyOutput, ApplyError> {
        if self.halted {
            return Err(ApplyError::Halted {
                last_applied: self.last_applied,
            });
        }
        if index <= self.last_applied {
            error!(
                index,
                last_applied = self.last_applied,
                "entry applied out of log order; halting"
            );
            self.halted = true;
            return Err(ApplyError::OutOfOrder {
                index,
                last_applied: self.last_applied,
            });
        }

        self.last_applied = index;
        self.publisher.begin(index);

        self.run_deferred(index);

        let kind = entry.kind();
        let is_tick = matches!(entry, Entry::Tick);
        let stats = self.publisher.stats();
        let mut effects = StepEffects::default();
        self.registry.begin();
        let mut result = self.apply_entry(index, entry, &mut effects);
        if let Some(violation) = effects.violation.take()
            && result.is_ok()
        {
            result = Err(violation);
        }

        match &result {
            Ok(_) => {
                self.registry.commit();
                self.schedule(effects.tasks);
            }
            Err(err) => {
                self.registry.rollback();
                self.publisher.restore_stats(stats);
                warn!(
                    index,
                    entry = kind,
                    error = %err,
                    discarded_tasks = effects.tasks.len(),
                    "entry rejected"
                );
            }
        }

        if self.config.check_expiration_on_apply && !is_tick {
            let mut effects = StepEffects::default();
            self.expire_sessions(index, &mut effects);
            self.settle(index, effects, "expiration");
        }

        for delivery in self.publisher.flush_all(&mut self.registry) {
            debug!(
                session = %delivery.session,
                index,
                messages = delivery.messages.len(),
                "delivering"
            );
            self.transport.deliver(delivery);
        }

        result.map_err(ApplyError::from)
    }

    /// Capture the registry between apply steps
    pub fn snapshot(&self) -> StateMachineSnapshot {
        StateMachineSnapshot {
            last_applied: self.last_applied,
            registry: self.registry.snapshot(),
        }
    }

    /// Replace all session state with `snapshot`
    ///
    /// Pending deferred tasks are discarded and message counters restart
    /// from zero.
    pub fn restore(&mut self, snapshot: StateMachineSnapshot) -> Result<(), SnapshotError> {
        self.registry = SessionRegistry::restore(snapshot.registry)?;
        self.last_applied = snapshot.last_applied;
        self.publisher = EventPublisher::new();
        self.publisher.begin(snapshot.last_applied);
        self.executor.clear();
        self.halted = false;
        info!(
            last_applied = self.last_applied,
            sessions = self.registry.len(),
            "restored from snapshot"
        );
        Ok(())
    }

    fn apply_entry(
        &mut self,
        index: Index,
        entry: Entry,
        effects: &mut StepEffects,
    ) -> Result<ApplyOutput, SessionError> {
        match entry {
            Entry::RegisterSession { session, metadata } => {
                self.register(index, session, metadata, effects)
            }
            Entry::KeepAlive { session } => {
                self.registry.keep_alive(session, index)?;
                Ok(ApplyOutput::KeptAlive { session })
            }
            Entry::UnregisterSession { session } => {
                let steps = self.registry.unregister(session)?;
                info!(session = %session, index, "session unregistering");
                self.walk(index, session, steps, effects);
                self.drain_unregisters(index, effects);
                Ok(ApplyOutput::Unregistered { session })
            }
            Entry::Command { session, payload } => {
                let result = self.command(index, session, &payload, effects)?;
                self.drain_unregisters(index, effects);
                Ok(ApplyOutput::Command { result })
            }
            Entry::Tick => {
                let expired = self.expire_sessions(index, effects);
                let reclaimed = self.registry.reclaim(index, self.config.closed_retention);
                if !reclaimed.is_empty() {
                    debug!(index, count = reclaimed.len(), "reclaimed closed sessions");
                }
                Ok(ApplyOutput::Tick { expired, reclaimed })
            }
        }
    }

    fn register(
        &mut self,
        index: Index,
        session: SessionId,
        metadata: Metadata,
        effects: &mut StepEffects,
    ) -> Result<ApplyOutput, SessionError> {
        self.registry.register(session, metadata, index)?;
        info!(session = %session, index, "session registered");

        // The record already sits in the first step's state
        let steps = SessionStateMachine::register();
        self.walk(index, session, steps, effects);

        match self.registry.plan(session, Transition::Activate) {
            Ok(steps) => self.walk(index, session, steps, effects),
            Err(err) => {
                debug!(session = %session, index, error = %err, "discarding activation");
            }
        }
        self.drain_unregisters(index, effects);

        let session = self
            .registry
            .lookup(session)
            .ok_or(SessionError::UnknownSession(session))?;
        Ok(ApplyOutput::Registered { session })
    }

    fn command(
        &mut self,
        index: Index,
        session: SessionId,
        payload: &Value,
        effects: &mut StepEffects,
    ) -> Result<Value, SessionError> {
        let handle = self
            .registry
            .lookup(session)
            .filter(|s| s.state.is_live())
            .ok_or(SessionError::UnknownSession(session))?;

        let Self {
            registry,
            publisher,
            handler,
            ..
        } = self;
        let mut ctx = SessionContext::new(index, registry, publisher, effects);
        handler.apply(&handle, payload, &mut ctx)
    }

    /// Expire every starved session, in identifier order
    ///
    /// A session closed earlier in the same pass, by an unregister a
    /// callback requested, loses the race and is skipped.
    fn expire_sessions(&mut self, index: Index, effects: &mut StepEffects) -> Vec<SessionId> {
        let candidates = self.expiration.tick(&self.registry, index);
        let mut expired = Vec::with_capacity(candidates.len());

        for session in candidates {
            match self.registry.plan(session, Transition::Expire) {
                Ok(steps) => {
                    info!(session = %session, index, "session expired");
                    self.walk(index, session, steps, effects);
                    expired.push(session);
                    self.drain_unregisters(index, effects);
                }
                Err(err) => {
                    debug!(session = %session, index, error = %err, "discarding expiration");
                }
            }
        }
        expired
    }

    fn run_deferred(&mut self, index: Index) {
        let tasks = self.executor.take_due(index);
        if tasks.is_empty() {
            return;
        }

        let mut effects = StepEffects::default();
        for task in tasks {
            let Self {
                registry,
                publisher,
                ..
            } = self;
            let mut ctx = SessionContext::new(index, registry, publisher, &mut effects);
            task(&mut ctx);
        }
        self.drain_unregisters(index, &mut effects);
        self.settle(index, effects, "deferred task");
    }

    /// Finish effects that belong to no entry
    ///
    /// Tasks are kept; a rejected state access is logged and dropped so it
    /// never becomes the result of the entry being applied.
    fn settle(&mut self, index: Index, effects: StepEffects, source: &'static str) {
        if let Some(violation) = effects.violation {
            warn!(index, source, error = %violation, "discarding rejected state access");
        }
        self.schedule(effects.tasks);
    }

    fn schedule(&mut self, tasks: Vec<(Index, Task)>) {
        for (due, task) in tasks {
            self.executor.schedule(due, task);
        }
    }

    /// Apply unregisters requested by callbacks until none are left
    fn drain_unregisters(&mut self, index: Index, effects: &mut StepEffects) {
        while let Some(session) = effects.unregisters.pop_front() {
            match self.registry.unregister(session) {
                Ok(steps) => {
                    info!(session = %session, index, "session unregistering on request");
                    self.walk(index, session, steps, effects);
                }
                Err(err) => {
                    debug!(session = %session, index, error = %err, "discarding unregister request");
                }
            }
        }
    }

    /// Enter each step's state and fire its callback
    fn walk(
        &mut self,
        index: Index,
        session: SessionId,
        steps: &'static [Step],
        effects: &mut StepEffects,
    ) {
        for step in steps {
            let dropped = self.registry.enter(session, step.state, index);
            if dropped > 0 {
                debug!(session = %session, index, dropped, "discarded queued messages");
                self.publisher.record_dropped(dropped);
            }

            let Some(callback) = step.callback else {
                continue;
            };
            let Some(handle) = self.registry.lookup(session) else {
                continue;
            };

            let Self {
                registry,
                publisher,
                dispatcher,
                ..
            } = self;
            let mut ctx = SessionContext::new(index, registry, publisher, effects);
            dispatcher.dispatch(&[callback], &handle, &mut ctx);
        }
    }
}

impl std::fmt::Debug for ReplicatedStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStateMachine")
            .field("config", &self.config)
            .field("last_applied", &self.last_applied)
            .field("halted", &self.halted)
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use serde_json::json;

    fn sid(id: u64) -> SessionId {
        SessionId::new(id)
    }

    fn register(id: u64) -> Entry {
        Entry::RegisterSession {
            session: sid(id),
            metadata: Metadata::new(),
        }
    }

    fn machine() -> ReplicatedStateMachine {
        ReplicatedStateMachine::builder(SessionConfig::with_timeout(10)).build()
    }

    /// Greets every new session on the step after it registers
    struct Greeter;

    impl SessionListener for Greeter {
        fn register(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
            let id = session.id;
            ctx.execute(move |ctx| {
                ctx.publish(id, "welcome", Value::Null);
            });
        }
    }

    fn greeting_machine() -> ReplicatedStateMachine {
        ReplicatedStateMachine::builder(SessionConfig::with_timeout(10))
            .listener(Greeter)
            .build()
    }

    // ==================== Ordering Tests ====================

    #[test]
    fn reapplying_an_index_halts() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();

        let result = machine.apply(1, register(2));

        assert_eq!(
            result,
            Err(ApplyError::OutOfOrder {
                index: 1,
                last_applied: 1
            })
        );
        assert!(machine.is_halted());
        assert!(matches!(
            machine.apply(2, Entry::Tick),
            Err(ApplyError::Halted { last_applied: 1 })
        ));
    }

    #[test]
    fn index_zero_is_out_of_order() {
        let mut machine = machine();
        assert!(machine.apply(0, Entry::Tick).unwrap_err().is_fatal());
    }

    #[test]
    fn callbacks_can_schedule_at_the_last_index() {
        let mut machine = greeting_machine();

        machine.apply(Index::MAX, register(1)).unwrap();

        assert_eq!(machine.stats().deferred_tasks, 1);
        assert_eq!(machine.session(sid(1)).unwrap().state, SessionState::Open);
    }

    #[test]
    fn gaps_in_the_log_are_allowed() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();
        machine.apply(5, Entry::Tick).unwrap();
        assert_eq!(machine.last_applied(), 5);
    }

    // ==================== Entry Tests ====================

    #[test]
    fn register_leaves_session_open() {
        let mut machine = machine();

        let output = machine.apply(1, register(1)).unwrap();

        let ApplyOutput::Registered { session } = output else {
            panic!("expected registration output");
        };
        assert_eq!(session.state, SessionState::Open);
        assert_eq!(session.created_at, 1);
    }

    #[test]
    fn per_entry_errors_do_not_halt() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();

        let duplicate = machine.apply(2, register(1));
        let unknown = machine.apply(3, Entry::KeepAlive { session: sid(9) });

        assert_eq!(
            duplicate,
            Err(ApplyError::Session(SessionError::DuplicateSession(sid(1))))
        );
        assert_eq!(
            unknown,
            Err(ApplyError::Session(SessionError::UnknownSession(sid(9))))
        );
        assert!(!machine.is_halted());
        assert!(machine.apply(4, Entry::Tick).is_ok());
    }

    #[test]
    fn command_for_closed_session_is_unknown() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();
        machine
            .apply(2, Entry::UnregisterSession { session: sid(1) })
            .unwrap();

        let result = machine.apply(
            3,
            Entry::Command {
                session: sid(1),
                payload: json!("op"),
            },
        );

        assert_eq!(
            result,
            Err(ApplyError::Session(SessionError::UnknownSession(sid(1))))
        );
    }

    #[test]
    fn unregister_twice_is_illegal() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();
        machine
            .apply(2, Entry::UnregisterSession { session: sid(1) })
            .unwrap();

        let result = machine.apply(3, Entry::UnregisterSession { session: sid(1) });

        assert!(matches!(
            result,
            Err(ApplyError::Session(SessionError::IllegalTransition { .. }))
        ));
    }

    #[test]
    fn tick_expires_and_later_reclaims() {
        let config = SessionConfig {
            session_timeout: 10,
            closed_retention: 5,
            check_expiration_on_apply: false,
        };
        let mut machine = ReplicatedStateMachine::builder(config).build();
        machine.apply(1, register(1)).unwrap();

        let first = machine.apply(11, Entry::Tick).unwrap();
        let second = machine.apply(16, Entry::Tick).unwrap();

        assert_eq!(
            first,
            ApplyOutput::Tick {
                expired: vec![sid(1)],
                reclaimed: vec![]
            }
        );
        assert_eq!(
            second,
            ApplyOutput::Tick {
                expired: vec![],
                reclaimed: vec![sid(1)]
            }
        );
        assert!(machine.session(sid(1)).is_none());
        assert_eq!(
            machine.apply(17, register(1)),
            Err(ApplyError::Session(SessionError::DuplicateSession(sid(1))))
        );
    }

    #[test]
    fn expiration_on_apply_runs_after_the_entry() {
        let config = SessionConfig {
            check_expiration_on_apply: true,
            ..SessionConfig::with_timeout(10)
        };
        let mut machine = ReplicatedStateMachine::builder(config).build();
        machine.apply(1, register(1)).unwrap();
        machine.apply(2, register(2)).unwrap();

        machine.apply(11, Entry::KeepAlive { session: sid(2) }).unwrap();

        assert_eq!(machine.session(sid(1)).unwrap().state, SessionState::Closed);
        assert_eq!(machine.session(sid(2)).unwrap().state, SessionState::Open);
    }

    // ==================== Snapshot Tests ====================

    #[test]
    fn restore_resumes_after_snapshot_index() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();
        machine.apply(2, register(2)).unwrap();
        let snapshot = machine.snapshot();

        let mut restored = ReplicatedStateMachine::builder(SessionConfig::with_timeout(10)).build();
        restored.restore(snapshot).unwrap();

        assert_eq!(restored.last_applied(), 2);
        assert_eq!(restored.registry(), machine.registry());
        assert!(restored.apply(2, Entry::Tick).unwrap_err().is_fatal());
    }

    #[test]
    fn restore_restarts_message_counters() {
        let mut machine = greeting_machine();
        machine.apply(1, register(1)).unwrap();
        machine.apply(2, Entry::Tick).unwrap();
        machine.apply(3, Entry::Tick).unwrap();
        assert_eq!(machine.stats().messages.delivered, 1);

        let snapshot = machine.snapshot();
        machine.restore(snapshot).unwrap();

        assert_eq!(machine.stats().messages, PublisherStats::default());
        assert_eq!(machine.stats().sessions.open, 1);
    }

    #[test]
    fn stats_reflect_registry() {
        let mut machine = machine();
        machine.apply(1, register(1)).unwrap();
        machine.apply(2, register(2)).unwrap();
        machine
            .apply(3, Entry::UnregisterSession { session: sid(2) })
            .unwrap();

        let stats = machine.stats();

        assert_eq!(stats.last_applied, 3);
        assert_eq!(stats.sessions.open, 1);
        assert_eq!(stats.sessions.closed, 1);
    }
}
