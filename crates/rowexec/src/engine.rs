use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ast::Statement;
use crate::config::{ExecutionConfig, QueryOptions};
use crate::context::QueryContext;
use crate::errors::Result;
use crate::exec::{QueryResult, StatementEvaluator};
use crate::store::{ChangeBatch, ChangeSink, MemoryStore, MutationOptions, RowStore};
use crate::value::ScalarValue;

/// Executes statements against a store, and publishes the changes made by
/// each call as one [`ChangeBatch`].
#[derive(Debug)]
pub struct Engine {
    store: Arc<dyn RowStore>,
    config: RwLock<ExecutionConfig>,
    changes: broadcast::Sender<ChangeBatch>,
}

impl Engine {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self::with_config(store, ExecutionConfig::default())
    }

    pub fn with_config(store: Arc<dyn RowStore>, config: ExecutionConfig) -> Self {
        let (changes, _) = broadcast::channel(config.changefeed_capacity.max(1) as usize);
        Engine {
            store,
            config: RwLock::new(config),
            changes,
        }
    }

    /// Engine over a fresh [`MemoryStore`] whose change feed is sized from
    /// `config`.
    pub fn in_memory(config: ExecutionConfig) -> Self {
        let store = MemoryStore::with_changefeed_capacity(config.changefeed_capacity as usize);
        Self::with_config(Arc::new(store), config)
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn config(&self) -> ExecutionConfig {
        self.config.read().clone()
    }

    /// Update a named setting. `changefeed_capacity` only applies to
    /// engines created afterwards.
    pub fn set_setting(&self, name: &str, value: ScalarValue) -> Result<()> {
        self.config.write().set_from_scalar(name, value)
    }

    pub fn get_setting(&self, name: &str) -> Result<ScalarValue> {
        self.config.read().get_as_scalar(name)
    }

    pub fn reset_setting(&self, name: &str) -> Result<()> {
        self.config.write().reset(name)
    }

    /// Every setting as name, description and current value, sorted by name.
    pub fn settings(&self) -> Result<Vec<(&'static str, &'static str, ScalarValue)>> {
        let config = self.config.read();
        ExecutionConfig::settings()
            .into_iter()
            .map(|(name, description)| Ok((name, description, config.get_as_scalar(name)?)))
            .collect()
    }

    /// Subscribe to change batches. Only calls that mutated something
    /// publish a batch.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.changes.subscribe()
    }

    /// Execute a single statement.
    ///
    /// Mutations applied before a failure stay applied, and are still
    /// published.
    pub async fn query(&self, statement: &Statement, opts: QueryOptions) -> Result<QueryResult> {
        let tx_id = Uuid::new_v4();
        let sink = ChangeSink::default();

        let config = self.config();
        let ctx = QueryContext::new(&config, &opts, tx_id);
        debug!(kind = statement.kind(), dialect = %ctx.dialect, %tx_id, "executing statement");

        let evaluator = StatementEvaluator::new(
            self.store.as_ref(),
            MutationOptions {
                tx_id: Some(tx_id),
                sink: Some(sink.clone()),
            },
        );
        let result = evaluator.execute(statement, ctx).await;

        self.publish(tx_id, &sink);
        result
    }

    fn publish(&self, tx_id: Uuid, sink: &ChangeSink) {
        let events = sink.take();
        if events.is_empty() {
            return;
        }
        trace!(%tx_id, events = events.len(), "publishing change batch");
        // No subscribers is fine.
        let _ = self.changes.send(ChangeBatch { tx_id, events });
    }
}
