//! Keyed pool implementation.
//!
//! One [`QueuePool`] per key, created on first use ("compute-if-absent"),
//! each holding a blocking idle queue and an atomic `size_hint` counting
//! idle + active instances. A process-wide active map records which key a
//! borrowed instance belongs to; disposable overflow instances are never
//! entered there and are destroyed on return.
//!
//! Accounting invariants:
//!
//! - `size_hint >= idle_count` at all times; the active readout clamps the
//!   difference to zero since the hint may trail briefly under races.
//! - `peak_hint` records the largest observed `size_hint` per key. The
//!   update is a plain read-then-store; concurrent borrows may undercount
//!   the peak slightly.
//! - Disposable instances never touch the hint.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::PoolError;
use crate::pool::{PoolConfig, PoolObject, PoolableObjectFactory, UNBOUNDED};

/// Retry budget when borrow validation keeps rejecting instances.
const MAX_VALIDATION_RETRY_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// IdleQueue
// ---------------------------------------------------------------------------

struct IdleState<V> {
    items: VecDeque<V>,
    closed: bool,
}

/// Blocking idle queue, bounded by the pool's `max` (or unbounded).
///
/// Closing the queue wakes every blocked waiter; a closed queue hands out
/// nothing and accepts nothing.
struct IdleQueue<V> {
    state: Mutex<IdleState<V>>,
    available: Condvar,
    capacity: usize,
}

impl<V> IdleQueue<V> {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(IdleState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn poll(&self) -> Option<V> {
        self.state.lock().items.pop_front()
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<V> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Blocks until an item is available or the queue is closed.
    fn take(&self) -> Option<V> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn offer(&self, item: V) -> Result<(), V> {
        let mut state = self.state.lock();
        if state.closed || state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

// ---------------------------------------------------------------------------
// QueuePool
// ---------------------------------------------------------------------------

/// Per-key pool record.
struct QueuePool<V> {
    /// Idle + active instance count. Signed: transient races may push it
    /// below zero, readouts clamp.
    size_hint: AtomicI64,
    /// High-water mark of `size_hint`.
    peak_hint: AtomicI64,
    idle: IdleQueue<V>,
    destroyed: AtomicBool,
}

impl<V> QueuePool<V> {
    fn new(max: usize) -> Self {
        Self {
            size_hint: AtomicI64::new(0),
            peak_hint: AtomicI64::new(0),
            idle: IdleQueue::new(if max == UNBOUNDED { usize::MAX } else { max }),
            destroyed: AtomicBool::new(false),
        }
    }

    fn record_peak(&self) {
        let current = self.size_hint.load(Ordering::Relaxed);
        if current > self.peak_hint.load(Ordering::Relaxed) {
            self.peak_hint.store(current, Ordering::Relaxed);
        }
    }

    fn pool_size(&self) -> i64 {
        self.size_hint.load(Ordering::Relaxed)
    }

    fn idle_count(&self) -> i64 {
        self.idle.len() as i64
    }

    fn active_count(&self) -> i64 {
        (self.pool_size() - self.idle_count()).max(0)
    }

    fn peak_count(&self) -> i64 {
        self.peak_hint.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// KeyedObjectPool
// ---------------------------------------------------------------------------

struct PoolShared<K, V, F> {
    factory: F,
    config: PoolConfig,
    pools: Mutex<FxHashMap<K, Arc<QueuePool<V>>>>,
    /// instance id → owning key, for managed (non-disposable) borrows.
    active: Mutex<FxHashMap<u64, K>>,
    destroyed: AtomicBool,
    /// Eviction-task reentrancy guard: overlapping ticks coalesce.
    evicting: AtomicBool,
    reaper_shutdown: Mutex<bool>,
    reaper_signal: Condvar,
}

/// Keyed object pool.
///
/// Thread-safe; all operations may be called concurrently. See the module
/// docs for the accounting invariants and
/// [`PoolConfig`](crate::pool::PoolConfig) for tuning.
pub struct KeyedObjectPool<K, V, F>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: PoolObject + Send + 'static,
    F: PoolableObjectFactory<K, V> + 'static,
{
    shared: Arc<PoolShared<K, V, F>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V, F> KeyedObjectPool<K, V, F>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: PoolObject + Send + 'static,
    F: PoolableObjectFactory<K, V> + 'static,
{
    /// Creates a pool; spawns the idle-eviction task if `keep_alive` is
    /// set.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let config = config.normalized();
        let shared = Arc::new(PoolShared {
            factory,
            config,
            pools: Mutex::new(FxHashMap::default()),
            active: Mutex::new(FxHashMap::default()),
            destroyed: AtomicBool::new(false),
            evicting: AtomicBool::new(false),
            reaper_shutdown: Mutex::new(false),
            reaper_signal: Condvar::new(),
        });
        let reaper = config.keep_alive.filter(|d| !d.is_zero()).map(|interval| {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("memkit-pool-evictor".into())
                .spawn(move || run_evictor(shared, interval))
                .expect("spawn pool eviction thread")
        });
        Self {
            shared,
            reaper: Mutex::new(reaper),
        }
    }

    /// Borrows an instance for `key`, creating one when the pool is under
    /// its bounds.
    ///
    /// `timeout` bounds the wait for an idle instance once the pool is at
    /// `max`; `None` blocks indefinitely for non-disposable pools. With
    /// `disposable` set, an exhausted pool hands out an untracked one-shot
    /// instance instead of failing.
    pub fn borrow(&self, key: &K, timeout: Option<Duration>) -> Result<V, PoolError> {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.pool_for(key);
        if pool.destroyed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let config = &self.shared.config;
        let mut retry_count = 0;
        loop {
            let mut disposable_creation = false;
            let mut candidate = self.create_if_under(config.min, &pool, key, false)?;
            if candidate.is_none() {
                candidate = pool.idle.poll();
            }
            if candidate.is_none() {
                candidate = self.create_if_under(config.max, &pool, key, false)?;
            }
            if candidate.is_none() {
                candidate = match timeout {
                    None if !config.disposable => pool.idle.take(),
                    Some(wait) => pool.idle.poll_timeout(wait),
                    None => None,
                };
            }
            if candidate.is_none() && config.disposable {
                let created = self
                    .shared
                    .factory
                    .create(key)
                    .map_err(|e| PoolError::NoValidObject(Some(Box::new(e))))?;
                candidate = Some(created);
                disposable_creation = true;
            }
            let instance = match candidate {
                Some(instance) => instance,
                None => return Err(PoolError::Exhausted),
            };
            if config.borrow_validation && !self.shared.factory.validate(key, &instance) {
                debug!(key = %key, "borrowed instance failed validation");
                self.shared.factory.destroy(key, instance);
                if !disposable_creation {
                    pool.size_hint.fetch_sub(1, Ordering::AcqRel);
                }
                retry_count += 1;
                if retry_count > MAX_VALIDATION_RETRY_COUNT {
                    return Err(PoolError::NoValidObject(None));
                }
                continue;
            }
            // The pool may have been torn down while we were creating or
            // waiting; the instance must not escape.
            if pool.destroyed.load(Ordering::Acquire) {
                self.shared.factory.destroy(key, instance);
                if !disposable_creation {
                    pool.size_hint.fetch_sub(1, Ordering::AcqRel);
                }
                return Err(PoolError::Closed);
            }
            if !disposable_creation {
                self.shared
                    .active
                    .lock()
                    .insert(instance.instance_id(), key.clone());
            }
            return Ok(instance);
        }
    }

    /// Returns a borrowed instance to its pool.
    ///
    /// Unmanaged (disposable) instances and instances whose pool is gone
    /// are destroyed. With return validation, invalid instances are
    /// destroyed and the size hint adjusted.
    pub fn return_object(&self, key: &K, value: V) {
        let managed = self.shared.active.lock().remove(&value.instance_id());
        let pool = self.shared.pools.lock().get(key).cloned();
        let pool = match (pool, managed) {
            (Some(pool), Some(_)) => pool,
            _ => {
                trace!(key = %key, "returned instance is untracked; destroying");
                self.shared.factory.destroy(key, value);
                return;
            },
        };
        if self.shared.config.return_validation && !self.shared.factory.validate(key, &value) {
            debug!(key = %key, "returned instance failed validation");
            self.shared.factory.destroy(key, value);
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        if pool.destroyed.load(Ordering::Acquire) {
            self.shared.factory.destroy(key, value);
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        if let Err(rejected) = pool.idle.offer(value) {
            self.shared.factory.destroy(key, rejected);
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Destroys a borrowed instance instead of returning it.
    pub fn invalidate(&self, key: &K, value: V) {
        let managed = self.shared.active.lock().remove(&value.instance_id());
        let pool = self.shared.pools.lock().get(key).cloned();
        self.shared.factory.destroy(key, value);
        if managed.is_some() {
            if let Some(pool) = pool {
                pool.size_hint.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Fills the idle queue for `key` up to `min`.
    pub fn preload_min(&self, key: &K) -> Result<(), PoolError> {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.pool_for(key);
        if pool.destroyed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let validation = self.shared.config.borrow_validation;
        loop {
            let instance = match self.create_if_under(self.shared.config.min, &pool, key, validation)? {
                Some(instance) => instance,
                None => break,
            };
            if let Err(rejected) = pool.idle.offer(instance) {
                self.shared.factory.destroy(key, rejected);
                pool.size_hint.fetch_sub(1, Ordering::AcqRel);
                break;
            }
        }
        Ok(())
    }

    /// Destroys every idle instance for `key`, leaving the key usable.
    pub fn remove_all(&self, key: &K) {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return;
        }
        let pool = self.shared.pools.lock().get(key).cloned();
        if let Some(pool) = pool {
            if !pool.destroyed.load(Ordering::Acquire) {
                self.drain_idle(&pool, key);
            }
        }
    }

    /// Destroys the per-key pool entirely; blocked borrowers are woken.
    pub fn destroy_key(&self, key: &K) {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return;
        }
        let pool = self.shared.pools.lock().remove(key);
        if let Some(pool) = pool {
            pool.destroyed.store(true, Ordering::Release);
            pool.idle.close();
            self.drain_idle(&pool, key);
            debug!(key = %key, "destroyed per-key pool");
        }
    }

    /// Destroys the whole pool: stops eviction, drains every key, clears
    /// the active map. Instances still borrowed are destroyed when their
    /// borrower returns them.
    pub fn destroy(&self) {
        if self
            .shared
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.shared.reaper_shutdown.lock() = true;
        self.shared.reaper_signal.notify_all();
        if let Some(handle) = self.reaper.lock().take() {
            let _ = handle.join();
        }
        let drained: Vec<(K, Arc<QueuePool<V>>)> = self.shared.pools.lock().drain().collect();
        for (key, pool) in drained {
            pool.destroyed.store(true, Ordering::Release);
            pool.idle.close();
            self.drain_idle(&pool, &key);
        }
        self.shared.active.lock().clear();
        debug!("keyed pool destroyed");
    }

    /// True once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    // -- readouts ---------------------------------------------------------

    /// Idle + active count for `key`; `-1` once the pool is destroyed.
    pub fn pool_size(&self, key: &K) -> i64 {
        self.read_pool(key, QueuePool::pool_size)
    }

    /// High-water mark for `key`; `-1` once the pool is destroyed.
    pub fn peak_count(&self, key: &K) -> i64 {
        self.read_pool(key, QueuePool::peak_count)
    }

    /// Borrowed-instance count for `key`, clamped at zero.
    pub fn active_count(&self, key: &K) -> i64 {
        self.read_pool(key, QueuePool::active_count)
    }

    /// Idle-instance count for `key`.
    pub fn idle_count(&self, key: &K) -> i64 {
        self.read_pool(key, QueuePool::idle_count)
    }

    /// Sum of per-key pool sizes.
    pub fn total_pool_size(&self) -> i64 {
        self.sum_pools(QueuePool::pool_size)
    }

    /// Sum of per-key active counts.
    pub fn total_active_count(&self) -> i64 {
        self.sum_pools(QueuePool::active_count)
    }

    /// Sum of per-key idle counts.
    pub fn total_idle_count(&self) -> i64 {
        self.sum_pools(QueuePool::idle_count)
    }

    /// Largest per-key high-water mark, `-1` when nothing qualifies.
    pub fn highest_peak_count(&self) -> i64 {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return -1;
        }
        self.shared
            .pools
            .lock()
            .values()
            .map(|pool| pool.peak_count())
            .filter(|count| *count > 0)
            .max()
            .unwrap_or(-1)
    }

    // -- internals --------------------------------------------------------

    fn pool_for(&self, key: &K) -> Arc<QueuePool<V>> {
        let mut pools = self.shared.pools.lock();
        pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(QueuePool::new(self.shared.config.max)))
            .clone()
    }

    /// Reserves a slot and creates an instance if the pool size is under
    /// `limit`; backs the reservation out on failure.
    fn create_if_under(
        &self,
        limit: usize,
        pool: &QueuePool<V>,
        key: &K,
        validation: bool,
    ) -> Result<Option<V>, PoolError> {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let reserved = pool.size_hint.fetch_add(1, Ordering::AcqRel) + 1;
        if reserved < 0 || limit < reserved as usize {
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
            return Ok(None);
        }
        let instance = match self.shared.factory.create(key) {
            Ok(instance) => instance,
            Err(err) => {
                pool.size_hint.fetch_sub(1, Ordering::AcqRel);
                return Err(err.into());
            },
        };
        if validation && !self.shared.factory.validate(key, &instance) {
            self.shared.factory.destroy(key, instance);
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
            return Ok(None);
        }
        pool.record_peak();
        Ok(Some(instance))
    }

    fn drain_idle(&self, pool: &QueuePool<V>, key: &K) {
        while let Some(instance) = pool.idle.poll() {
            self.shared.factory.destroy(key, instance);
            pool.size_hint.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn read_pool(&self, key: &K, read: impl Fn(&QueuePool<V>) -> i64) -> i64 {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return -1;
        }
        self.shared
            .pools
            .lock()
            .get(key)
            .map(|pool| read(pool))
            .unwrap_or(0)
    }

    fn sum_pools(&self, read: impl Fn(&QueuePool<V>) -> i64) -> i64 {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return -1;
        }
        self.shared
            .pools
            .lock()
            .values()
            .map(|pool| read(pool))
            .filter(|count| *count > 0)
            .sum()
    }
}

impl<K, V, F> Drop for KeyedObjectPool<K, V, F>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: PoolObject + Send + 'static,
    F: PoolableObjectFactory<K, V> + 'static,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Eviction loop: every `interval`, shrink each per-key pool down toward
/// `min` by destroying idle instances.
fn run_evictor<K, V, F>(shared: Arc<PoolShared<K, V, F>>, interval: Duration)
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: PoolObject + Send + 'static,
    F: PoolableObjectFactory<K, V> + 'static,
{
    let mut shutdown = shared.reaper_shutdown.lock();
    loop {
        if *shutdown {
            return;
        }
        let timed_out = shared
            .reaper_signal
            .wait_for(&mut shutdown, interval)
            .timed_out();
        if *shutdown {
            return;
        }
        if timed_out {
            drop(shutdown);
            evict_once(&shared);
            shutdown = shared.reaper_shutdown.lock();
        }
    }
}

fn evict_once<K, V, F>(shared: &PoolShared<K, V, F>)
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: PoolObject + Send + 'static,
    F: PoolableObjectFactory<K, V> + 'static,
{
    // Overlapping ticks coalesce.
    if shared
        .evicting
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let snapshot: Vec<(K, Arc<QueuePool<V>>)> = shared
        .pools
        .lock()
        .iter()
        .map(|(key, pool)| (key.clone(), Arc::clone(pool)))
        .collect();
    let min = shared.config.min as i64;
    for (key, pool) in snapshot {
        if pool.destroyed.load(Ordering::Acquire) {
            continue;
        }
        let mut evicted = 0u32;
        while !pool.destroyed.load(Ordering::Acquire)
            && pool.size_hint.load(Ordering::Acquire) > min
        {
            match pool.idle.poll() {
                Some(instance) => {
                    shared.factory.destroy(&key, instance);
                    pool.size_hint.fetch_sub(1, Ordering::AcqRel);
                    evicted += 1;
                },
                None => break,
            }
        }
        if evicted > 0 {
            trace!(key = %key, evicted, "evicted idle instances");
        }
    }
    shared.evicting.store(false, Ordering::Release);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
