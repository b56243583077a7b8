//! Registry of the executors making up one application.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use rivulet_core::{Error, EventLike, Query, QueryValue, Result, StoreDef};
use serde_json::Value;
use tracing::{debug, info};

use crate::bus::{EventSource, LoopbackEventSource};
use crate::config::EngineConfig;
use crate::executor::{ExecutorOptions, StoreExecutor};
use crate::listener::{ListenerId, StoreValue};

/// Every store of an application, wired to one shared bus.
///
/// Stores named at construction get executors right away; any other store
/// gets one the first time it is used, named `{prefix}_{n}`.
pub struct MainStore {
    source: Arc<LoopbackEventSource>,
    config: EngineConfig,
    executors: Mutex<Vec<StoreExecutor>>,
    counter: AtomicUsize,
}

impl MainStore {
    pub fn new<I, S>(stores: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Arc<StoreDef>)>,
        S: Into<String>,
    {
        Self::with_config(stores, EngineConfig::default())
    }

    pub fn with_config<I, S>(stores: I, config: EngineConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Arc<StoreDef>)>,
        S: Into<String>,
    {
        let main = Self {
            source: Arc::new(LoopbackEventSource::new()),
            config,
            executors: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        };
        for (name, store) in stores {
            main.register(name.into(), store)?;
        }
        Ok(main)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoreExecutor>>> {
        self.executors
            .lock()
            .map_err(|_| Error::Panicked("executor registry poisoned".into()))
    }

    fn spawn(&self, name: String, store: Arc<StoreDef>) -> Result<StoreExecutor> {
        let executor = StoreExecutor::with_options(
            store,
            ExecutorOptions::builder()
                .name(name)
                .source(self.source.clone() as Arc<dyn EventSource>)
                .config(self.config.clone())
                .build(),
        )?;
        info!(executor = %executor.name(), "Registered store");
        Ok(executor)
    }

    fn register(&self, name: String, store: Arc<StoreDef>) -> Result<StoreExecutor> {
        let executor = self.spawn(name, store)?;
        self.lock()?.push(executor.clone());
        Ok(executor)
    }

    /// The executor of `store`, registering one if none exists yet.
    pub fn get_executor(&self, store: &Arc<StoreDef>) -> Result<StoreExecutor> {
        let mut executors = self.lock()?;
        if let Some(existing) = executors.iter().find(|e| e.store().id() == store.id()) {
            return Ok(existing.clone());
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}_{n}", self.config.executor_prefix);
        debug!(executor = %name, "Lazily registering store");
        let executor = self.spawn(name, store.clone())?;
        executors.push(executor.clone());
        Ok(executor)
    }

    /// The executor owning `query`'s store.
    pub fn executor_for(&self, query: &Query) -> Result<StoreExecutor> {
        let store = query
            .store()
            .ok_or_else(|| Error::NotInStore(format!("{query:?}")))?;
        self.get_executor(&store)
    }

    pub fn executors(&self) -> Vec<StoreExecutor> {
        self.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Hand `event` to every registered executor and wait until each has
    /// processed it, internal cascades included. Forwards between stores
    /// run in the background; use [`settled`](Self::settled) to wait for them.
    pub async fn publish(&self, event: impl EventLike) -> Result<()> {
        let event = event.to_event()?;
        let executors = self.executors();
        let results = join_all(
            executors
                .iter()
                .map(|executor| executor.process_local(vec![event.clone()], 0)),
        )
        .await;
        results.into_iter().collect()
    }

    pub fn publish_detached(&self, event: impl EventLike) -> Result<()> {
        let event = event.to_event()?;
        self.source.publish(&[event], 0, None);
        Ok(())
    }

    pub async fn read_query(&self, query: &Query) -> Result<QueryValue> {
        self.executor_for(query)?.read_query(query).await
    }

    pub async fn read_keys(&self, query: &Query) -> Result<Vec<String>> {
        self.executor_for(query)?.read_keys(query).await
    }

    pub async fn read_store(&self, store: &Arc<StoreDef>) -> Result<StoreValue> {
        self.get_executor(store)?.read_store().await
    }

    pub async fn listen_query<F>(&self, query: &Query, callback: F) -> Result<ListenerId>
    where
        F: Fn(&QueryValue) + Send + Sync + 'static,
    {
        self.executor_for(query)?.listen_query(query, callback).await
    }

    pub fn unlisten(&self, query: &Query, id: ListenerId) -> Result<bool> {
        Ok(self.executor_for(query)?.unlisten(id))
    }

    pub async fn listen_store<F>(&self, store: &Arc<StoreDef>, callback: F) -> Result<ListenerId>
    where
        F: Fn(&StoreValue) + Send + Sync + 'static,
    {
        self.get_executor(store)?.listen_store(callback).await
    }

    pub fn unlisten_store(&self, store: &Arc<StoreDef>, id: ListenerId) -> Result<bool> {
        Ok(self.get_executor(store)?.unlisten_store(id))
    }

    pub async fn action(&self, query: &Query, args: Value) -> Result<QueryValue> {
        self.executor_for(query)?.action(query, args).await
    }

    pub async fn call(&self, store: &Arc<StoreDef>, name: &str, args: Value) -> Result<QueryValue> {
        self.get_executor(store)?.call(name, args).await
    }

    pub fn action_names(&self, store: &Arc<StoreDef>) -> Result<Vec<String>> {
        Ok(self.get_executor(store)?.action_names())
    }

    /// Wait for one store to go idle.
    pub async fn store_settled(&self, store: &Arc<StoreDef>) -> Result<()> {
        self.get_executor(store)?.settled().await;
        Ok(())
    }

    /// Wait until every executor is idle at the same moment, so bus
    /// forwards in flight have landed too.
    pub async fn settled(&self) {
        loop {
            let executors = self.executors();
            for executor in &executors {
                executor.settled().await;
            }
            if executors.iter().all(StoreExecutor::is_idle) {
                return;
            }
        }
    }
}

/// Start an application from its named stores. Must be called inside a
/// Tokio runtime.
pub fn run_main<I, S>(stores: I) -> Result<MainStore>
where
    I: IntoIterator<Item = (S, Arc<StoreDef>)>,
    S: Into<String>,
{
    MainStore::with_config(stores, EngineConfig::from_env())
}
