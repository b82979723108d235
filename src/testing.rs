//! In-memory doubles for models, extensions and warehouses used by unit tests.

use crate::error::{PilotError, Result};
use crate::extension::Extension;
use crate::llm::{
    CallDirective, ChatMessage, ChatModel, FunctionDeclaration, GenerationOptions, LanguageModel,
    ModelTurn,
};
use crate::warehouse::{TableInfo, Warehouse};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;

/// Language model that replays canned completions in order.
pub(crate) struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<GenerationOptions>>,
}

impl ScriptedModel {
    pub(crate) fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn options(&self) -> Vec<GenerationOptions> {
        self.options.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(*options);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PilotError::Model("script exhausted".to_string()))
    }
}

/// Extension serving a fixed document and recording every execution.
pub(crate) struct RecordingExtension {
    document: Value,
    result: Value,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingExtension {
    pub(crate) fn new(document: Value, result: Value) -> Self {
        Self {
            document,
            result,
            failure: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extension for RecordingExtension {
    fn id(&self) -> &str {
        "recording"
    }

    async fn api_spec(&self) -> Result<Value> {
        Ok(self.document.clone())
    }

    async fn execute(&self, operation_id: &str, params: &Map<String, Value>) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((operation_id.to_string(), params.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(PilotError::ToolInvocation(message.clone())),
            None => Ok(self.result.clone()),
        }
    }
}

/// Chat model that replays canned turns, assigning call ids as it goes.
pub(crate) struct ScriptedChatModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    repeat: Option<ModelTurn>,
    delay: Option<Duration>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    taken: AtomicUsize,
}

impl ScriptedChatModel {
    pub(crate) fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            delay: None,
            transcripts: Mutex::new(Vec::new()),
            taken: AtomicUsize::new(0),
        }
    }

    /// Answer every turn with the same response.
    pub(crate) fn always(turn: ModelTurn) -> Self {
        let mut model = Self::new(Vec::new());
        model.repeat = Some(turn);
        model
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn call(name: &str, arguments: &str) -> ModelTurn {
        ModelTurn::Call(CallDirective {
            id: String::new(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
    }

    pub(crate) fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts.lock().unwrap().clone()
    }

    pub(crate) fn turns_taken(&self) -> usize {
        self.taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn respond(
        &self,
        messages: &[ChatMessage],
        _functions: &[FunctionDeclaration],
    ) -> Result<ModelTurn> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.transcripts.lock().unwrap().push(messages.to_vec());
        let taken = self.taken.fetch_add(1, Ordering::SeqCst) + 1;

        let next = self.turns.lock().unwrap().pop_front();
        let turn = next
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| PilotError::Model("script exhausted".to_string()))?;

        Ok(match turn {
            ModelTurn::Call(mut call) => {
                call.id = format!("call_{}", taken);
                ModelTurn::Call(call)
            }
            text => text,
        })
    }
}

/// Warehouse with one dataset holding one table.
pub(crate) struct MemoryWarehouse {
    datasets: Vec<String>,
    tables: Vec<TableInfo>,
    rows: Vec<Value>,
    query_cost: u64,
    query_delay: Option<Duration>,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
    last_max_bytes: Mutex<Option<u64>>,
}

impl MemoryWarehouse {
    pub(crate) fn sample() -> Self {
        Self {
            datasets: vec!["thelook".to_string()],
            tables: vec![TableInfo {
                table_id: "thelook.orders".to_string(),
                description: Some("Customer orders".to_string()),
                column_names: vec!["order_id".to_string(), "status".to_string()],
                num_rows: Some(12),
            }],
            rows: vec![json!({"n": 1})],
            query_cost: 0,
            query_delay: None,
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            last_max_bytes: Mutex::new(None),
        }
    }

    /// Fail the first `n` calls with a timeout.
    pub(crate) fn failing_transiently(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Bytes every query would bill.
    pub(crate) fn with_query_cost(mut self, bytes: u64) -> Self {
        self.query_cost = bytes;
        self
    }

    /// Hold every query this long before answering.
    pub(crate) fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_max_bytes(&self) -> Option<u64> {
        *self.last_max_bytes.lock().unwrap()
    }

    fn enter(&self, what: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PilotError::Timeout {
                what: what.to_string(),
                after: Duration::from_millis(1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn list_datasets(&self) -> Result<Vec<String>> {
        self.enter("list_datasets")?;
        Ok(self.datasets.clone())
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<String>> {
        self.enter("list_tables")?;
        if !self.datasets.iter().any(|d| d == dataset_id) {
            return Err(PilotError::Warehouse(format!("Dataset {} not found", dataset_id)));
        }
        let prefix = format!("{}.", dataset_id);
        Ok(self
            .tables
            .iter()
            .filter(|t| t.table_id.starts_with(&prefix))
            .map(|t| t.table_id.clone())
            .collect())
    }

    async fn get_table(&self, table_id: &str) -> Result<TableInfo> {
        self.enter("get_table")?;
        self.tables
            .iter()
            .find(|t| t.table_id == table_id)
            .cloned()
            .ok_or_else(|| PilotError::Warehouse(format!("Table {} not found", table_id)))
    }

    async fn run_query(&self, _sql: &str, max_bytes_billed: u64) -> Result<Vec<Value>> {
        self.enter("run_query")?;
        *self.last_max_bytes.lock().unwrap() = Some(max_bytes_billed);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if self.query_cost > max_bytes_billed {
            return Err(PilotError::Warehouse(format!(
                "Query exceeded limit for bytes billed: {}. {} or higher required.",
                max_bytes_billed, self.query_cost
            )));
        }
        Ok(self.rows.clone())
    }
}

/// Serve `router` on an ephemeral local port.
pub(crate) async fn serve_locally(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A local server that accepts connections and never answers them.
pub(crate) async fn stalled_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });
    addr
}
