//! Tiered dispatch of block events to registered handlers.
//!
//! Handlers register for `(contract, table)` deltas or `(contract, action)`
//! traces at a [`Tier`]. For each block the [`DataProcessor`] walks the tiers
//! present among current registrations in ascending order. Within a tier it
//! runs every matching delta handler over the deltas in block order, then
//! every matching trace handler over the traces in block order, then every
//! tier-complete hook at that tier. The next tier starts only after all of
//! that finished. Any error aborts the block.
//!
//! Registrations live in an immutable snapshot that is replaced on every
//! change, so revoking a handler while a block is in flight only affects the
//! next block.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::buffer::{BlockBuffers, BufferHandle, RowBuffer};
use crate::destructor::Destructor;
use crate::error::FillerError;
use crate::notifier::Outbox;
use crate::transaction::ContractDBTransaction;
use crate::types::{ActionTrace, Block, ContractRow, EventKind, Tier};

// ─── Block scope ──────────────────────────────────────────────────────────────

/// Everything a handler may touch while a block is processed.
pub struct BlockScope<'a> {
    pub db: &'a mut ContractDBTransaction,
    pub buffers: &'a mut BlockBuffers,
    pub outbox: &'a mut Outbox,
}

impl BlockScope<'_> {
    pub fn block(&self) -> &Block {
        self.db.block()
    }

    pub fn buffer(&mut self, handle: BufferHandle) -> &mut RowBuffer {
        self.buffers.get(handle)
    }

    /// Queue a trace notification, published once the block commits.
    pub fn send(&mut self, category: impl Into<String>, trace: &ActionTrace) {
        self.outbox.send(category, trace);
    }
}

// ─── Handler traits ───────────────────────────────────────────────────────────

#[async_trait]
pub trait DeltaHandler: Send + Sync {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow)
        -> Result<(), FillerError>;
}

#[async_trait]
pub trait TraceHandler: Send + Sync {
    async fn on_trace(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace)
        -> Result<(), FillerError>;
}

/// Runs once per block after every handler of its tier ran.
#[async_trait]
pub trait TierCompleteHook: Send + Sync {
    async fn on_tier_complete(&self, scope: &mut BlockScope<'_>) -> Result<(), FillerError>;
}

/// A handler of either kind; the kind decides what it is dispatched for.
#[derive(Clone)]
pub enum Callback {
    Delta(Arc<dyn DeltaHandler>),
    Trace(Arc<dyn TraceHandler>),
}

impl Callback {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Delta(_) => EventKind::Delta,
            Self::Trace(_) => EventKind::Trace,
        }
    }
}

impl From<Arc<dyn DeltaHandler>> for Callback {
    fn from(handler: Arc<dyn DeltaHandler>) -> Self {
        Self::Delta(handler)
    }
}

impl From<Arc<dyn TraceHandler>> for Callback {
    fn from(handler: Arc<dyn TraceHandler>) -> Self {
        Self::Trace(handler)
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

type Lookup<H> = HashMap<String, HashMap<String, Vec<(u64, Arc<H>)>>>;

#[derive(Clone)]
struct TierSlot {
    deltas: Lookup<dyn DeltaHandler>,
    traces: Lookup<dyn TraceHandler>,
    hooks: Vec<(u64, String, Arc<dyn TierCompleteHook>)>,
}

impl TierSlot {
    fn new() -> Self {
        Self {
            deltas: HashMap::new(),
            traces: HashMap::new(),
            hooks: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.traces.is_empty() && self.hooks.is_empty()
    }

    fn remove(&mut self, id: u64) {
        fn prune<H: ?Sized>(lookup: &mut Lookup<H>, id: u64) {
            for keys in lookup.values_mut() {
                for handlers in keys.values_mut() {
                    handlers.retain(|(h, _)| *h != id);
                }
                keys.retain(|_, handlers| !handlers.is_empty());
            }
            lookup.retain(|_, keys| !keys.is_empty());
        }
        prune(&mut self.deltas, id);
        prune(&mut self.traces, id);
        self.hooks.retain(|(h, _, _)| *h != id);
    }
}

#[derive(Clone, Default)]
struct Registry {
    tiers: BTreeMap<Tier, TierSlot>,
}

struct Inner {
    registry: RwLock<Arc<Registry>>,
    next_id: AtomicU64,
}

impl Inner {
    fn snapshot(&self) -> Arc<Registry> {
        let guard = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    fn modify(&self, f: impl FnOnce(&mut Registry)) {
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Registry::clone(&**guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn revoke(inner: Weak<Inner>, tier: Tier, id: u64) -> Destructor {
    Destructor::new(move || {
        if let Some(inner) = inner.upgrade() {
            inner.modify(|registry| {
                if let Some(slot) = registry.tiers.get_mut(&tier) {
                    slot.remove(id);
                    if slot.is_empty() {
                        registry.tiers.remove(&tier);
                    }
                }
            });
        }
    })
}

// ─── DataProcessor ────────────────────────────────────────────────────────────

/// Handler registry and per-block dispatcher. Cheap to clone; clones share
/// the same registrations.
#[derive(Clone)]
pub struct DataProcessor {
    inner: Arc<Inner>,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProcessor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Arc::new(Registry::default())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for events of `contract` with the given key (table
    /// name for deltas, action name for traces).
    pub fn register(
        &self,
        contract: &str,
        key: &str,
        callback: impl Into<Callback>,
        tier: Tier,
    ) -> Destructor {
        let id = self.inner.next_id();
        let callback = callback.into();
        debug!(contract, key, %tier, kind = ?callback.kind(), "registering handler");
        self.inner.modify(|registry| {
            let slot = registry.tiers.entry(tier).or_insert_with(TierSlot::new);
            match callback {
                Callback::Delta(h) => slot
                    .deltas
                    .entry(contract.to_string())
                    .or_default()
                    .entry(key.to_string())
                    .or_default()
                    .push((id, h)),
                Callback::Trace(h) => slot
                    .traces
                    .entry(contract.to_string())
                    .or_default()
                    .entry(key.to_string())
                    .or_default()
                    .push((id, h)),
            }
        });
        revoke(Arc::downgrade(&self.inner), tier, id)
    }

    pub fn on_delta(
        &self,
        contract: &str,
        table: &str,
        handler: Arc<dyn DeltaHandler>,
        tier: Tier,
    ) -> Destructor {
        self.register(contract, table, Callback::Delta(handler), tier)
    }

    pub fn on_trace(
        &self,
        contract: &str,
        action: &str,
        handler: Arc<dyn TraceHandler>,
        tier: Tier,
    ) -> Destructor {
        self.register(contract, action, Callback::Trace(handler), tier)
    }

    /// Register a hook fired once per block after every handler at `tier`,
    /// whether or not any event matched.
    pub fn on_priority_complete(
        &self,
        tier: Tier,
        contract: &str,
        hook: Arc<dyn TierCompleteHook>,
    ) -> Destructor {
        let id = self.inner.next_id();
        self.inner.modify(|registry| {
            registry
                .tiers
                .entry(tier)
                .or_insert_with(TierSlot::new)
                .hooks
                .push((id, contract.to_string(), hook));
        });
        revoke(Arc::downgrade(&self.inner), tier, id)
    }

    /// Allocate a row buffer address for a batching processor.
    pub fn buffer(&self) -> BufferHandle {
        BufferHandle(self.inner.next_id())
    }

    /// Tiers currently holding at least one registration, ascending.
    pub fn tiers(&self) -> Vec<Tier> {
        self.inner.snapshot().tiers.keys().copied().collect()
    }

    /// Number of live registrations (handlers and hooks).
    pub fn registrations(&self) -> usize {
        fn count<H: ?Sized>(lookup: &Lookup<H>) -> usize {
            lookup
                .values()
                .flat_map(|keys| keys.values())
                .map(Vec::len)
                .sum()
        }
        self.inner
            .snapshot()
            .tiers
            .values()
            .map(|slot| count(&slot.deltas) + count(&slot.traces) + slot.hooks.len())
            .sum()
    }

    /// Dispatch one block's events. Returns the notifications queued by the
    /// handlers; the caller publishes them after committing `db`.
    pub async fn process(
        &self,
        db: &mut ContractDBTransaction,
        deltas: &[ContractRow],
        traces: &[ActionTrace],
    ) -> Result<Outbox, FillerError> {
        let registry = self.inner.snapshot();
        let block = db.block().clone();
        let mut buffers = BlockBuffers::new();
        let mut outbox = Outbox::new(block.reference());
        let mut scope = BlockScope {
            db,
            buffers: &mut buffers,
            outbox: &mut outbox,
        };

        for (tier, slot) in &registry.tiers {
            let mut dispatched = 0usize;
            for delta in deltas {
                let handlers = slot
                    .deltas
                    .get(&delta.contract)
                    .and_then(|keys| keys.get(&delta.table));
                for (_, handler) in handlers.into_iter().flatten() {
                    handler.on_delta(&mut scope, delta).await?;
                    dispatched += 1;
                }
            }
            for trace in traces {
                let handlers = slot
                    .traces
                    .get(&trace.contract)
                    .and_then(|keys| keys.get(&trace.action_name));
                for (_, handler) in handlers.into_iter().flatten() {
                    handler.on_trace(&mut scope, trace).await?;
                    dispatched += 1;
                }
            }
            for (_, _, hook) in &slot.hooks {
                hook.on_tier_complete(&mut scope).await?;
            }
            debug!(
                block = block.block_num,
                %tier,
                dispatched,
                hooks = slot.hooks.len(),
                "tier complete"
            );
        }

        if buffers.pending() > 0 {
            warn!(
                block = block.block_num,
                rows = buffers.pending(),
                "row buffers not flushed by their tier hooks"
            );
        }
        Ok(outbox)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::MemoryDatabase;
    use crate::row::{row_from, TableDef};
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl DeltaHandler for Recorder {
        async fn on_delta(
            &self,
            _scope: &mut BlockScope<'_>,
            delta: &ContractRow,
        ) -> Result<(), FillerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:delta:{}", self.name, delta.primary_key));
            Ok(())
        }
    }

    #[async_trait]
    impl TraceHandler for Recorder {
        async fn on_trace(
            &self,
            scope: &mut BlockScope<'_>,
            trace: &ActionTrace,
        ) -> Result<(), FillerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:trace:{}", self.name, trace.global_sequence));
            scope.send("test", trace);
            Ok(())
        }
    }

    #[async_trait]
    impl TierCompleteHook for Recorder {
        async fn on_tier_complete(&self, _scope: &mut BlockScope<'_>) -> Result<(), FillerError> {
            self.log.lock().unwrap().push(format!("{}:complete", self.name));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl TraceHandler for Failing {
        async fn on_trace(&self, scope: &mut BlockScope<'_>, _t: &ActionTrace) -> Result<(), FillerError> {
            let row = row_from(json!({ "id": 1 }))?;
            scope.db.insert("t", vec![row], &["id"]).await?;
            Err(FillerError::integrity("c", "boom"))
        }
    }

    /// Revokes another registration the first time it runs.
    struct Revoker {
        target: Mutex<Option<Destructor>>,
        log: Log,
    }

    #[async_trait]
    impl TraceHandler for Revoker {
        async fn on_trace(
            &self,
            _scope: &mut BlockScope<'_>,
            trace: &ActionTrace,
        ) -> Result<(), FillerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("revoker:{}", trace.global_sequence));
            let target = self.target.lock().unwrap().take();
            if let Some(destructor) = target {
                destructor.run();
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Log) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    fn delta(table: &str, pk: &str) -> ContractRow {
        ContractRow {
            contract: "c".into(),
            scope: "c".into(),
            table: table.into(),
            primary_key: pk.into(),
            present: true,
            value: json!({}),
        }
    }

    fn trace(action: &str, seq: u64) -> ActionTrace {
        ActionTrace {
            contract: "c".into(),
            action_name: action.into(),
            global_sequence: seq,
            block_num: 1,
            tx_id: "aa".into(),
            data: json!({}),
        }
    }

    async fn block_tx(db: &MemoryDatabase) -> ContractDBTransaction {
        let inner = db.begin().await.unwrap();
        ContractDBTransaction::new(inner, "r", Block::new(1, 0, false))
    }

    #[tokio::test]
    async fn tiers_run_in_order_with_hooks_between() {
        let log: Log = Arc::default();
        let p = DataProcessor::new();
        let low = Tier::new(0, 0);
        let high = Tier::new(0, 1);

        let _d1 = p.on_trace("c", "act", recorder("B", &log), high);
        let _d2 = p.on_delta("c", "rows", recorder("A", &log), low);
        let _d3 = p.on_trace("c", "act", recorder("A", &log), low);
        let _d4 = p.on_priority_complete(low, "c", recorder("A", &log));
        let _d5 = p.on_priority_complete(high, "c", recorder("B", &log));
        // Hook at a tier with no matching events still fires.
        let _d6 = p.on_priority_complete(Tier::new(5, 0), "c", recorder("C", &log));

        let db = MemoryDatabase::new();
        let mut tx = block_tx(&db).await;
        let outbox = p
            .process(&mut tx, &[delta("rows", "1"), delta("other", "2")], &[trace("act", 7)])
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "A:delta:1",
                "A:trace:7",
                "A:complete",
                "B:trace:7",
                "B:complete",
                "C:complete"
            ]
        );
        assert_eq!(outbox.len(), 2);
    }

    #[tokio::test]
    async fn revoked_handlers_are_not_dispatched() {
        let log: Log = Arc::default();
        let p = DataProcessor::new();
        let d = p.on_trace("c", "act", recorder("A", &log), Tier::new(0, 0));
        let keep = p.on_trace("c", "act", recorder("B", &log), Tier::new(0, 1));
        assert_eq!(p.registrations(), 2);

        d.run();
        assert_eq!(p.tiers(), vec![Tier::new(0, 1)]);

        let db = MemoryDatabase::new();
        let mut tx = block_tx(&db).await;
        p.process(&mut tx, &[], &[trace("act", 1)]).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["B:trace:1"]);

        Destructor::combine([keep]).run();
        assert_eq!(p.registrations(), 0);
    }

    #[tokio::test]
    async fn revocation_mid_block_applies_from_the_next_block() {
        let log: Log = Arc::default();
        let p = DataProcessor::new();
        let target = p.on_trace("c", "act", recorder("B", &log), Tier::new(0, 1));
        let revoker = Arc::new(Revoker {
            target: Mutex::new(Some(target)),
            log: Arc::clone(&log),
        });
        let _keep = p.on_trace("c", "act", revoker, Tier::new(0, 0));

        let db = MemoryDatabase::new();
        for seq in [1, 2] {
            let mut tx = block_tx(&db).await;
            p.process(&mut tx, &[], &[trace("act", seq)]).await.unwrap();
            tx.rollback().await.unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec!["revoker:1", "B:trace:1", "revoker:2"]
        );
        assert_eq!(p.registrations(), 1);
    }

    #[tokio::test]
    async fn handler_error_aborts_block() {
        let p = DataProcessor::new();
        let _d = p.on_trace("c", "act", Arc::new(Failing), Tier::new(0, 0));

        let db = MemoryDatabase::new();
        let mut setup = db.begin().await.unwrap();
        setup.create_table(&TableDef::new("t", &["id"])).await.unwrap();
        setup.commit().await.unwrap();

        let mut tx = block_tx(&db).await;
        let err = p.process(&mut tx, &[], &[trace("act", 1)]).await.unwrap_err();
        assert!(err.is_fatal());
        tx.rollback().await.unwrap();
        assert!(db.rows("t").await.is_empty());
    }
}
