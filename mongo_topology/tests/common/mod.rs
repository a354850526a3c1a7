#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, Once},
};

use async_trait::async_trait;
use mongo_topology::{
    Connection, ConnectionPool, Document, HeartbeatError, HeartbeatRequest, Heartbeater,
    OperationError, ServerAddress, Topology, TopologyBuilder, TopologyEvent,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static TRACING: Once = Once::new();

/// Installs a bunyan subscriber when `TEST_LOG` is set; silent otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var("TEST_LOG").is_err() {
            return;
        }
        LogTracer::init().expect("Failed to set logger");
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let formatting_layer =
            BunyanFormattingLayer::new("mongo_topology_tests".into(), std::io::stdout);
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonStorageLayer)
            .with(formatting_layer);
        set_global_default(subscriber).expect("Failed to set subscriber");
    });
}

pub fn address(host: &str) -> ServerAddress {
    ServerAddress::parse(host).unwrap()
}

pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

pub fn oid(n: u8) -> Value {
    json!({ "$oid": format!("{:024x}", n) })
}

pub fn primary_reply(me: &str, hosts: &[&str], set_version: i32, election: u8) -> Document {
    document(json!({
        "ok": 1,
        "isWritablePrimary": true,
        "setName": "rs0",
        "setVersion": set_version,
        "electionId": oid(election),
        "hosts": hosts,
        "me": me,
        "minWireVersion": 0,
        "maxWireVersion": 17,
        "logicalSessionTimeoutMinutes": 30
    }))
}

pub fn secondary_reply(me: &str, hosts: &[&str], primary: Option<&str>) -> Document {
    let mut reply = document(json!({
        "ok": 1,
        "isWritablePrimary": false,
        "secondary": true,
        "setName": "rs0",
        "hosts": hosts,
        "me": me,
        "minWireVersion": 0,
        "maxWireVersion": 17,
        "logicalSessionTimeoutMinutes": 30
    }));
    if let Some(primary) = primary {
        reply.insert("primary".to_string(), json!(primary));
    }
    reply
}

pub fn standalone_reply() -> Document {
    document(json!({
        "ok": 1,
        "isWritablePrimary": true,
        "minWireVersion": 0,
        "maxWireVersion": 17,
        "logicalSessionTimeoutMinutes": 30
    }))
}

pub fn mongos_reply() -> Document {
    document(json!({
        "ok": 1,
        "isWritablePrimary": true,
        "msg": "isdbgrid",
        "minWireVersion": 0,
        "maxWireVersion": 17,
        "logicalSessionTimeoutMinutes": 30
    }))
}

#[derive(Clone)]
enum Script {
    Reply(Document),
    Fail(String),
}

/// Answers heartbeats from a per-address script. Unscripted addresses refuse connections.
#[derive(Default)]
pub struct ScriptedHeartbeater {
    scripts: Mutex<HashMap<ServerAddress, Script>>,
    checks: Mutex<HashMap<ServerAddress, usize>>,
}

impl ScriptedHeartbeater {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, host: &str, reply: Document) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address(host), Script::Reply(reply));
    }

    pub fn fail(&self, host: &str, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address(host), Script::Fail(message.to_string()));
    }

    pub fn checks(&self, host: &str) -> usize {
        self.checks
            .lock()
            .unwrap()
            .get(&address(host))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Heartbeater for ScriptedHeartbeater {
    async fn check(
        &self,
        address: &ServerAddress,
        _request: HeartbeatRequest,
    ) -> Result<Document, HeartbeatError> {
        *self
            .checks
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default() += 1;
        let script = self.scripts.lock().unwrap().get(address).cloned();
        match script {
            Some(Script::Reply(reply)) => Ok(reply),
            Some(Script::Fail(message)) => Err(HeartbeatError::Network(message)),
            None => Err(HeartbeatError::Network("connection refused".to_string())),
        }
    }
}

/// What a scripted connection answers for one command.
#[derive(Clone, Debug)]
pub enum Outcome {
    Reply(Document),
    NetworkError,
    CommandError { code: i32, labels: Vec<String> },
}

#[derive(Default)]
struct PoolState {
    outcomes: HashMap<ServerAddress, VecDeque<Outcome>>,
    sent: Vec<(ServerAddress, Document)>,
    cleared: Vec<ServerAddress>,
}

/// Connection pool whose connections answer from a per-address queue. An empty queue answers
/// `{ok: 1}`.
#[derive(Clone, Default)]
pub struct ScriptedPool {
    state: Arc<Mutex<PoolState>>,
}

impl ScriptedPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, host: &str, outcome: Outcome) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .entry(address(host))
            .or_default()
            .push_back(outcome);
    }

    /// Every command sent so far, in order, with the server it went to.
    pub fn sent(&self) -> Vec<(ServerAddress, Document)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn cleared(&self) -> Vec<ServerAddress> {
        self.state.lock().unwrap().cleared.clone()
    }
}

#[async_trait]
impl ConnectionPool for ScriptedPool {
    async fn checkout(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn Connection>, OperationError> {
        Ok(Box::new(ScriptedConnection {
            address: address.clone(),
            state: self.state.clone(),
        }))
    }

    fn clear(&self, address: &ServerAddress) {
        self.state.lock().unwrap().cleared.push(address.clone());
    }
}

struct ScriptedConnection {
    address: ServerAddress,
    state: Arc<Mutex<PoolState>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    async fn send_command(&mut self, command: Document) -> Result<Document, OperationError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.sent.push((self.address.clone(), command));
            state
                .outcomes
                .get_mut(&self.address)
                .and_then(VecDeque::pop_front)
        };
        match outcome {
            None => Ok(document(json!({ "ok": 1 }))),
            Some(Outcome::Reply(reply)) => Ok(reply),
            Some(Outcome::NetworkError) => Err(OperationError::Network {
                address: self.address.clone(),
                message: "connection reset by peer".to_string(),
            }),
            Some(Outcome::CommandError { code, labels }) => Ok(document(json!({
                "ok": 0,
                "code": code,
                "codeName": "Scripted",
                "errmsg": "scripted failure",
                "errorLabels": labels
            }))),
        }
    }
}

pub fn builder(
    hosts: &[&str],
    heartbeater: Arc<ScriptedHeartbeater>,
    pool: Arc<ScriptedPool>,
) -> TopologyBuilder {
    init_tracing();
    Topology::builder()
        .set_hosts(hosts)
        .set_heartbeater(heartbeater)
        .set_connection_pool(pool)
}

/// Waits until a published description satisfies `predicate`, or panics after `timeout`.
pub async fn wait_for<F>(topology: &Topology, timeout: std::time::Duration, predicate: F)
where
    F: Fn(&mongo_topology::TopologyDescription) -> bool,
{
    let mut watcher = topology.watch();
    let result = tokio::time::timeout(timeout, async {
        loop {
            if predicate(&watcher.borrow_and_update()) {
                return;
            }
            if watcher.changed().await.is_err() {
                panic!("topology stopped while waiting");
            }
        }
    })
    .await;
    if result.is_err() {
        panic!(
            "condition not reached in {:?}. Topology: {}",
            timeout,
            topology.description()
        );
    }
}

/// Drains everything currently buffered on an event receiver.
pub fn drain_events(receiver: &mut broadcast::Receiver<TopologyEvent>) -> Vec<TopologyEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
