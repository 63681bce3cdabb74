//! Shared test utilities for steward-core integration tests

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use steward_core::{
    Callback, CommandHandler, Delivery, Entry, Metadata, ReplicatedStateMachine, SessionConfig,
    SessionContext, SessionError, SessionHandle, SessionId, SessionListener, SessionRequest,
    SessionState, Transport,
};

/// One observed callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub callback: Callback,
    pub session: SessionId,
    /// Session state while the callback ran
    pub state: SessionState,
    pub index: u64,
}

pub type CallbackLog = Arc<Mutex<Vec<Observed>>>;

/// Listener that records every callback it receives
#[derive(Clone, Default)]
pub struct Recorder {
    pub log: CallbackLog,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.log.lock().unwrap().clone()
    }

    /// Callbacks received for one session, in order
    #[allow(dead_code)]
    pub fn callbacks_for(&self, session: u64) -> Vec<Callback> {
        self.observed()
            .into_iter()
            .filter(|o| o.session == SessionId::new(session))
            .map(|o| o.callback)
            .collect()
    }

    fn record(&self, callback: Callback, session: &SessionHandle, ctx: &SessionContext<'_>) {
        self.log.lock().unwrap().push(Observed {
            callback,
            session: session.id,
            state: session.state,
            index: ctx.index(),
        });
    }
}

impl SessionListener for Recorder {
    fn register(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Register, session, ctx);
    }

    fn unregister(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Unregister, session, ctx);
    }

    fn expire(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Expire, session, ctx);
    }

    fn close(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Close, session, ctx);
    }
}

/// Transport that keeps every delivery in memory
#[derive(Clone, Default)]
pub struct RecordingTransport {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Event names delivered to one session, across all deliveries
    #[allow(dead_code)]
    pub fn events_for(&self, session: u64) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.session == SessionId::new(session))
            .flat_map(|d| d.messages.into_iter().map(|m| m.event))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn deliver(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }
}

/// Command handler driven by the payload
///
/// Keys are acted on in this order, so one payload can combine them:
/// - `{"publish": {"to": 1, "event": "m1"}}` publishes now; an array of
///   targets publishes each in order
/// - `{"keep_alive": 1}` refreshes session 1
/// - `{"defer": {"to": 1, "event": "m1"}}` publishes on the next step
/// - `{"defer_expire": 1}` tries an illegal mutation on the next step
/// - `{"unregister": 1}` asks for a close of session 1
/// - `{"expire": 1}` tries an illegal lifecycle mutation
/// - `{"fail": "reason"}` rejects the command after everything above
#[derive(Clone, Copy, Default)]
pub struct ScriptHandler;

fn target(spec: &Value) -> (SessionId, String) {
    let to = spec["to"].as_u64().unwrap_or_default();
    let event = spec["event"].as_str().unwrap_or_default().to_string();
    (SessionId::new(to), event)
}

impl CommandHandler for ScriptHandler {
    fn apply(
        &mut self,
        session: &SessionHandle,
        payload: &Value,
        ctx: &mut SessionContext<'_>,
    ) -> Result<Value, SessionError> {
        let mut result = payload.clone();
        if let Some(spec) = payload.get("publish") {
            let targets: Vec<(SessionId, String)> = match spec {
                Value::Array(items) => items.iter().map(target).collect(),
                single => vec![target(single)],
            };
            let queued: Vec<bool> = targets
                .into_iter()
                .map(|(to, event)| ctx.publish(to, event, json!({"from": session.id})))
                .collect();
            result = json!({ "queued": queued });
        }
        if let Some(id) = payload.get("keep_alive").and_then(Value::as_u64) {
            ctx.keep_alive(SessionId::new(id))?;
        }
        if let Some(spec) = payload.get("defer") {
            let (to, event) = target(spec);
            let from = session.id;
            ctx.execute(move |ctx| {
                ctx.publish(to, event, json!({"from": from}));
            });
            result = json!({ "deferred": true });
        }
        if let Some(id) = payload.get("defer_expire").and_then(Value::as_u64) {
            ctx.execute(move |ctx| {
                let _ = ctx.request(SessionRequest::Expire(SessionId::new(id)));
            });
            result = json!({ "deferred": true });
        }
        if let Some(id) = payload.get("unregister").and_then(Value::as_u64) {
            ctx.unregister(SessionId::new(id))?;
            result = Value::Null;
        }
        if let Some(id) = payload.get("expire").and_then(Value::as_u64) {
            ctx.request(SessionRequest::Expire(SessionId::new(id)))?;
        }
        if let Some(reason) = payload.get("fail").and_then(Value::as_str) {
            return Err(SessionError::IllegalStateAccess(reason.to_string()));
        }
        Ok(result)
    }
}

/// Machine wired to a recorder, a recording transport and the script handler
pub struct Harness {
    pub machine: ReplicatedStateMachine,
    pub recorder: Recorder,
    pub transport: RecordingTransport,
}

impl Harness {
    pub fn new(session_timeout: u64) -> Self {
        Self::with_config(SessionConfig::with_timeout(session_timeout))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let recorder = Recorder::new();
        let transport = RecordingTransport::new();
        let machine = ReplicatedStateMachine::builder(config)
            .listener(recorder.clone())
            .handler(ScriptHandler)
            .transport(Arc::new(transport.clone()))
            .build();
        Self {
            machine,
            recorder,
            transport,
        }
    }
}

pub fn sid(id: u64) -> SessionId {
    SessionId::new(id)
}

pub fn register(id: u64) -> Entry {
    Entry::RegisterSession {
        session: sid(id),
        metadata: Metadata::new(),
    }
}

#[allow(dead_code)]
pub fn keep_alive(id: u64) -> Entry {
    Entry::KeepAlive { session: sid(id) }
}

#[allow(dead_code)]
pub fn unregister(id: u64) -> Entry {
    Entry::UnregisterSession { session: sid(id) }
}

#[allow(dead_code)]
pub fn command(id: u64, payload: Value) -> Entry {
    Entry::Command {
        session: sid(id),
        payload,
    }
}

#[allow(dead_code)]
pub fn publish(id: u64, to: u64, event: &str) -> Entry {
    command(id, json!({"publish": {"to": to, "event": event}}))
}
