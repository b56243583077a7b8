//! Runs the slots of one store against a shared storage.
//!
//! Every slot owns a FIFO lane: a channel drained by one worker task, so
//! batches for a slot are strictly serialized while different slots proceed
//! independently. Internally routed events are stamped with a fresh version
//! and fed back to every lane of this store; externally routed events go to
//! the bus for the other stores.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::FutureExt;
use rivulet_core::event::{action_event, is_refresh};
use rivulet_core::{
    AsyncOutlet, Context, Error, Event, EventLike, InMemoryStorage, Pack, Query, QueryValue,
    Result, Storage, StoreDef, Teardowns,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::bus::{EventSource, LoopbackEventSource, Subscriber, SubscriberId};
use crate::config::EngineConfig;
use crate::listener::{ListenerId, Listeners, StoreCallback, StoreValue, Watch};
use crate::tracker::{Batch, Pending};

/// Construction options for a [`StoreExecutor`].
#[derive(TypedBuilder)]
pub struct ExecutorOptions {
    #[builder(default, setter(into))]
    pub name: String,
    #[builder(default = Arc::new(InMemoryStorage::new()) as Arc<dyn Storage>)]
    pub storage: Arc<dyn Storage>,
    /// Bus shared with other executors. A private one by default.
    #[builder(default = Arc::new(LoopbackEventSource::new()) as Arc<dyn EventSource>)]
    pub source: Arc<dyn EventSource>,
    #[builder(default)]
    pub config: EngineConfig,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

// ---------------------------------------------------------------------------
// Jobs and lanes
// ---------------------------------------------------------------------------

enum Job {
    Process {
        pack: Pack,
        depth: usize,
        batch: Arc<Batch>,
        reply: Option<oneshot::Sender<Pack>>,
    },
    /// Drop the slot's storage and teardowns after its pending work.
    Clear { batch: Arc<Batch> },
}

struct Lane {
    name: String,
    query: Query,
    tx: mpsc::UnboundedSender<Job>,
}

async fn run_lane(inner: Weak<ExecutorInner>, index: usize, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.run_job(index, job).await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a listener callback, containing any panic it raises. Storage is
/// already committed when listeners fire, so a failing listener is logged
/// rather than reported as a failed batch.
fn guard_listener(executor: &str, slot: &str, f: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(executor = %executor, slot = %slot, error = %panic_message(panic), "Listener panicked");
    }
}

/// Patch one slot into a store snapshot and hand the result over. The lock
/// is held through the callback so listeners see snapshots in order.
fn patch_snapshot(
    executor: &str,
    snapshot: &Mutex<StoreValue>,
    slot: String,
    value: QueryValue,
    callback: &StoreCallback,
) {
    let mut values = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
    values.insert(slot.clone(), value);
    guard_listener(executor, &slot, || callback(&values));
}

// ---------------------------------------------------------------------------
// ExecutorInner
// ---------------------------------------------------------------------------

struct ExecutorInner {
    name: String,
    store: Arc<StoreDef>,
    storage: Arc<dyn Storage>,
    teardowns: Arc<Teardowns>,
    source: Arc<dyn EventSource>,
    subscriber_id: SubscriberId,
    config: EngineConfig,
    version: AtomicU64,
    lanes: Vec<Lane>,
    activity: Pending,
    listeners: Listeners,
    this: Weak<ExecutorInner>,
}

impl ExecutorInner {
    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enqueue(&self, index: usize, job: Job) -> Result<()> {
        let lane = self
            .lanes
            .get(index)
            .ok_or_else(|| Error::UnknownSlot(index.to_string()))?;
        let batch = match &job {
            Job::Process { batch, .. } | Job::Clear { batch } => batch.clone(),
        };
        self.activity.enter();
        batch.enter();
        if lane.tx.send(job).is_err() {
            batch.leave(&self.name, Ok(()));
            self.activity.leave();
            return Err(Error::ExecutorClosed(self.name.clone()));
        }
        Ok(())
    }

    /// Stamp `events` as one batch and queue it on every lane.
    fn schedule(&self, events: Vec<Event>, depth: usize, batch: &Arc<Batch>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if depth > self.config.max_cascade_depth {
            return Err(Error::CascadeLimit {
                depth,
                limit: self.config.max_cascade_depth,
            });
        }
        let pack = Pack::from_events("", events, self.next_version(), false);
        debug!(executor = %self.name, entries = pack.len(), version = pack.max_version(), depth, "Scheduling batch");
        for index in 0..self.lanes.len() {
            self.enqueue(
                index,
                Job::Process {
                    pack: pack.clone(),
                    depth,
                    batch: batch.clone(),
                    reply: None,
                },
            )?;
        }
        Ok(())
    }

    fn schedule_refresh(&self, batch: &Arc<Batch>) -> Result<()> {
        info!(executor = %self.name, "Refresh requested");
        for index in 0..self.lanes.len() {
            self.enqueue(
                index,
                Job::Clear {
                    batch: batch.clone(),
                },
            )?;
        }
        Ok(())
    }

    /// Process locally, forward to the rest of the bus, don't wait.
    fn publish_detached(&self, event: Event) {
        let batch = Batch::detached();
        if let Err(e) = self.schedule(vec![event.clone()], 0, &batch) {
            warn!(executor = %self.name, error = %e, "Dropped published event");
            return;
        }
        self.source.publish(&[event], 1, Some(self.subscriber_id));
    }

    fn async_outlet(&self) -> AsyncOutlet {
        let this = self.this.clone();
        Arc::new(move |event: Event| {
            if let Some(inner) = this.upgrade() {
                inner.publish_detached(event);
            }
        })
    }

    fn context(&self) -> Context {
        Context::new(self.storage.clone()).with_teardowns(self.teardowns.clone())
    }

    async fn run_job(&self, index: usize, job: Job) {
        match job {
            Job::Process {
                pack,
                depth,
                batch,
                reply,
            } => {
                let result = AssertUnwindSafe(self.process(index, pack, depth, &batch))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic))));
                let result = result.map(|out| {
                    if let Some(reply) = reply {
                        let _ = reply.send(out);
                    }
                });
                batch.leave(&self.name, result);
            }
            Job::Clear { batch } => {
                let result = AssertUnwindSafe(self.clear(index))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic))));
                batch.leave(&self.name, result);
            }
        }
        self.activity.leave();
    }

    async fn process(&self, index: usize, pack: Pack, depth: usize, batch: &Arc<Batch>) -> Result<Pack> {
        let lane = &self.lanes[index];
        let mut ctx = self
            .context()
            .with_inlet(pack)
            .with_outlet_async(self.async_outlet());
        let out = lane.query.exec(&mut ctx).await?;

        let (markers, internal): (Vec<Event>, Vec<Event>) = ctx
            .take_outlet_in()
            .into_iter()
            .filter(|e| e.is_active())
            .map(|e| e.value)
            .partition(is_refresh);
        let external: Vec<Event> = ctx
            .take_outlet_out()
            .into_iter()
            .filter(|e| e.is_active())
            .map(|e| e.value)
            .collect();

        if !markers.is_empty() {
            self.schedule_refresh(batch)?;
        }
        self.schedule(internal, depth + 1, batch)?;
        if !external.is_empty() {
            if depth + 1 > self.config.max_cascade_depth {
                return Err(Error::CascadeLimit {
                    depth: depth + 1,
                    limit: self.config.max_cascade_depth,
                });
            }
            self.source
                .publish(&external, depth + 1, Some(self.subscriber_id));
        }

        if !out.is_empty() {
            self.notify(index).await;
        }
        Ok(out)
    }

    async fn clear(&self, index: usize) -> Result<()> {
        let lane = &self.lanes[index];
        self.storage.drop_by_prefix(&lane.name).await?;
        self.teardowns.run_by_prefix(&lane.name);
        debug!(executor = %self.name, slot = %lane.name, "Slot cleared");
        self.notify(index).await;
        Ok(())
    }

    /// Re-read and hand over the value of everything watching slot `index`.
    async fn notify(&self, index: usize) {
        let lane = &self.lanes[index];
        let ctx = self.context();
        for watch in self.listeners.watching(&lane.name, &lane.query) {
            match watch {
                Watch::Query { query, callback } => match query.read_query(&ctx).await {
                    Ok(value) => guard_listener(&self.name, &lane.name, || callback(&value)),
                    Err(e) => warn!(executor = %self.name, slot = %lane.name, error = %e, "Listener read failed"),
                },
                Watch::Store {
                    slot,
                    query,
                    snapshot,
                    callback,
                } => match query.read_query(&ctx).await {
                    Ok(value) => patch_snapshot(&self.name, &snapshot, slot, value, &callback),
                    Err(e) => warn!(executor = %self.name, slot = %slot, error = %e, "Store listener read failed"),
                },
            }
        }
    }

    fn lane_of(&self, query: &Query) -> Result<usize> {
        if !self.store.owns(query) {
            return Err(Error::NotInStore(format!("{query:?}")));
        }
        let storekey = query.storekey().unwrap_or_default();
        self.lanes
            .iter()
            .position(|l| l.name == storekey)
            .ok_or_else(|| Error::UnknownSlot(storekey.to_string()))
    }
}

impl Subscriber for ExecutorInner {
    fn receive(&self, events: &[Event], depth: usize) {
        let batch = Batch::detached();
        if let Err(e) = self.schedule(events.to_vec(), depth, &batch) {
            warn!(executor = %self.name, error = %e, "Dropped bus events");
        }
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscriber_id);
    }
}

// ---------------------------------------------------------------------------
// StoreExecutor
// ---------------------------------------------------------------------------

/// Runtime for one store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StoreExecutor {
    inner: Arc<ExecutorInner>,
}

impl StoreExecutor {
    /// Executor with in-memory storage and a private bus. Must be called
    /// inside a Tokio runtime.
    pub fn new(store: Arc<StoreDef>) -> Result<Self> {
        Self::with_options(store, ExecutorOptions::default())
    }

    pub fn with_options(store: Arc<StoreDef>, options: ExecutorOptions) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let ExecutorOptions {
            name,
            storage,
            source,
            config,
        } = options;

        let mut receivers = Vec::with_capacity(store.len());
        let inner = Arc::new_cyclic(|this: &Weak<ExecutorInner>| {
            let lanes = store
                .slots()
                .map(|(slot, query)| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    receivers.push(rx);
                    Lane {
                        name: slot.to_string(),
                        query: query.clone(),
                        tx,
                    }
                })
                .collect();
            let subscriber: Weak<dyn Subscriber> = this.clone();
            let subscriber_id = source.subscribe(subscriber);
            ExecutorInner {
                name,
                store: store.clone(),
                storage,
                teardowns: Arc::new(Teardowns::new()),
                source: source.clone(),
                subscriber_id,
                config,
                version: AtomicU64::new(0),
                lanes,
                activity: Pending::default(),
                listeners: Listeners::default(),
                this: this.clone(),
            }
        });

        for (index, rx) in receivers.into_iter().enumerate() {
            handle.spawn(run_lane(Arc::downgrade(&inner), index, rx));
        }
        info!(executor = %inner.name, slots = inner.lanes.len(), "Store executor started");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn store(&self) -> &Arc<StoreDef> {
        &self.inner.store
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.inner.storage.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Process `event` on every slot of this store and forward it to the
    /// other stores on the bus. Resolves once this store, internal cascades
    /// included, is done with it; the first failure is returned.
    pub async fn publish(&self, event: impl EventLike) -> Result<()> {
        let event = event.to_event()?;
        self.process_local(vec![event.clone()], 0).await?;
        self.inner
            .source
            .publish(&[event], 1, Some(self.inner.subscriber_id));
        Ok(())
    }

    /// Fire and forget; failures are logged.
    pub fn publish_detached(&self, event: impl EventLike) {
        match event.to_event() {
            Ok(event) => self.inner.publish_detached(event),
            Err(e) => warn!(executor = %self.inner.name, error = %e, "Rejected event"),
        }
    }

    /// Process `events` as one batch on this store only.
    pub(crate) async fn process_local(&self, events: Vec<Event>, depth: usize) -> Result<()> {
        let batch = Batch::awaited();
        let scheduled = self.inner.schedule(events, depth, &batch);
        let finished = batch.wait().await;
        scheduled.and(finished)
    }

    /// Invoke an action slot with `args` and return what it produced.
    pub async fn action(&self, query: &Query, args: Value) -> Result<QueryValue> {
        let index = self.inner.lane_of(query)?;
        let pack = Pack::from_events("", vec![action_event(args)], self.inner.next_version(), false);
        let batch = Batch::awaited();
        let (tx, rx) = oneshot::channel();
        self.inner.enqueue(
            index,
            Job::Process {
                pack,
                depth: 0,
                batch: batch.clone(),
                reply: Some(tx),
            },
        )?;
        batch.wait().await?;
        let out = rx
            .await
            .map_err(|_| Error::ExecutorClosed(self.inner.name.clone()))?;
        Ok(QueryValue::from_pack(&out))
    }

    /// Invoke the action in slot `name`.
    pub async fn call(&self, name: &str, args: Value) -> Result<QueryValue> {
        let query = self.inner.store.get(name)?.clone();
        self.action(&query, args).await
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.store.action_names()
    }

    pub async fn read_query(&self, query: &Query) -> Result<QueryValue> {
        self.inner.lane_of(query)?;
        query.read_query(&self.inner.context()).await
    }

    pub async fn read_keys(&self, query: &Query) -> Result<Vec<String>> {
        self.inner.lane_of(query)?;
        query.read_keys(&self.inner.context()).await
    }

    /// Current value of every slot.
    pub async fn read_store(&self) -> Result<StoreValue> {
        let ctx = self.inner.context();
        let mut values = StoreValue::new();
        for lane in &self.inner.lanes {
            values.insert(lane.name.clone(), lane.query.read_query(&ctx).await?);
        }
        Ok(values)
    }

    /// Call `callback` with the current value now and after every change of
    /// the query's slot.
    pub async fn listen_query<F>(&self, query: &Query, callback: F) -> Result<ListenerId>
    where
        F: Fn(&QueryValue) + Send + Sync + 'static,
    {
        let index = self.inner.lane_of(query)?;
        let callback = Arc::new(callback);
        let current = query.read_query(&self.inner.context()).await?;
        callback(&current);
        Ok(self
            .inner
            .listeners
            .add_query(&self.inner.lanes[index].name, query.clone(), callback))
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Like [`listen_query`](Self::listen_query) for every slot at once; the
    /// callback receives the whole store.
    pub async fn listen_store<F>(&self, callback: F) -> Result<ListenerId>
    where
        F: Fn(&StoreValue) + Send + Sync + 'static,
    {
        let current = self.read_store().await?;
        callback(&current);
        let snapshot = Arc::new(Mutex::new(current));
        Ok(self.inner.listeners.add_store(snapshot, Arc::new(callback)))
    }

    pub fn unlisten_store(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Wait until no lane has queued or running work.
    pub async fn settled(&self) {
        self.inner.activity.wait_idle().await;
    }

    pub fn is_idle(&self) -> bool {
        self.inner.activity.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::extract;
    use serde_json::json;

    fn counter_store() -> Arc<StoreDef> {
        let count = extract(["HIT"])
            .as_value(json!(1))
            .reduce(|acc, v| json!(acc.as_i64().unwrap_or(0) + v.as_i64().unwrap_or(0)));
        StoreDef::builder().slot("count", count).build()
    }

    #[test]
    fn construction_needs_a_runtime() {
        let result = StoreExecutor::new(counter_store());
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }

    #[tokio::test]
    async fn dropping_the_executor_leaves_the_bus() {
        let bus = Arc::new(LoopbackEventSource::new());
        let executor = StoreExecutor::with_options(
            counter_store(),
            ExecutorOptions::builder()
                .name("counter")
                .source(bus.clone() as Arc<dyn EventSource>)
                .build(),
        )
        .unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(executor.name(), "counter");

        drop(executor);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
