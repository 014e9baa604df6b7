use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::config::EngineConfig;
use crate::core::event_bus::{EventEmitter, GraphEngineEvent};
use crate::core::pause::FormRepository;
use crate::core::sub_graph_runner::SubGraphRunner;
use crate::dsl::schema::NodeType;
use crate::nodes::executor::NodeExecutorRegistry;

/// Services shared by every node of one run (and, with a deeper
/// `call_depth`, by nested container runs).
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub config: EngineConfig,
    pub workflow_execution_id: String,
    pub call_depth: u32,
    pub cancel_token: CancellationToken,
    pub registry: Arc<NodeExecutorRegistry>,
    pub sub_graph_runner: Option<Arc<dyn SubGraphRunner>>,
    pub form_repository: Option<Arc<dyn FormRepository>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider::default()),
            id_generator: Arc::new(RealIdGenerator::default()),
            config: EngineConfig::default(),
            workflow_execution_id: String::new(),
            call_depth: 0,
            cancel_token: CancellationToken::new(),
            registry: Arc::new(NodeExecutorRegistry::new()),
            sub_graph_runner: None,
            form_repository: None,
        }
    }
}

impl RuntimeContext {
    /// Context for a nested run one level deeper, sharing cancellation.
    pub fn nested(&self) -> Self {
        let mut child = self.clone();
        child.call_depth = self.call_depth + 1;
        child.cancel_token = self.cancel_token.child_token();
        child
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

#[derive(Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Default)]
pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    pub fixed_timestamp: i64,
}

impl FakeTimeProvider {
    pub fn new(fixed_timestamp: i64) -> Self {
        Self { fixed_timestamp }
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.fixed_timestamp, 0)
            .single()
            .unwrap_or_default()
    }
}

pub struct FakeIdGenerator {
    pub prefix: String,
    pub counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}

/// Per-invocation context handed to a [`NodeExecutor`](crate::nodes::NodeExecutor).
#[derive(Clone)]
pub struct NodeContext {
    pub runtime: Arc<RuntimeContext>,
    pub runtime_node_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    pub node_title: String,
    emitter: EventEmitter,
}

impl NodeContext {
    pub fn new(
        runtime: Arc<RuntimeContext>,
        runtime_node_id: impl Into<String>,
        node_id: impl Into<String>,
        node_type: NodeType,
        node_title: impl Into<String>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            runtime,
            runtime_node_id: runtime_node_id.into(),
            node_id: node_id.into(),
            node_type,
            node_title: node_title.into(),
            emitter,
        }
    }

    /// Push an intermediate text chunk to the run's event queue.
    pub fn emit_chunk(&self, chunk: impl Into<String>, is_final: bool) {
        self.emitter.emit(GraphEngineEvent::NodeRunStreamChunk {
            id: self.runtime_node_id.clone(),
            node_id: self.node_id.clone(),
            node_type: self.node_type,
            chunk: chunk.into(),
            is_final,
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.runtime.is_cancelled()
    }
}
