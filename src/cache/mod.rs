pub mod expiry;
pub mod sweeper;

pub use expiry::ExpiryQueue;
pub use sweeper::Sweeper;

use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agents::Agent;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::AgentResult;
use crate::registry::AgentTypeRegistry;
use crate::storage::PersistenceGateway;
use crate::types::AgentId;

/// Heap entries allowed beyond two per live agent before the heap is rebuilt.
const COMPACTION_SLACK: usize = 1024;

struct CacheEntry {
    agent: Arc<Agent>,
    expires_at: DateTime<Utc>,
}

/// Turn lock shared by every caller loading the same id.
#[derive(Default)]
struct Inflight {
    turn: Arc<tokio::sync::Mutex<()>>,
    holders: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<AgentId, CacheEntry>,
    expiry: ExpiryQueue,
    inflight: HashMap<AgentId, Inflight>,
}

/// A caller's claim on an id's in-flight slot. The last claim to go, whether
/// the load succeeded, failed or was cancelled, removes the slot.
struct InflightClaim<'a> {
    cache: &'a AgentCache,
    id: AgentId,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.lock();
        if let Entry::Occupied(mut slot) = state.inflight.entry(self.id) {
            if Arc::ptr_eq(&slot.get().turn, &self.turn) {
                slot.get_mut().holders -= 1;
                if slot.get().holders == 0 {
                    slot.remove();
                }
            }
        }
    }
}

/// Outcome of one pass over the due part of the expiry queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<AgentId>,
    /// Due but mid-operation, left in place.
    pub skipped_busy: Vec<AgentId>,
    /// Queue entries superseded by a later deadline or by removal.
    pub stale: usize,
}

/// Owner of every live [`Agent`]: one shared instance per id, dropped once
/// idle past its deadline. A hit pushes a new deadline into the
/// [`ExpiryQueue`] and leaves the old one for the sweep to skip as stale.
pub struct AgentCache {
    registry: Arc<AgentTypeRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    timeout: Duration,
    state: Mutex<CacheState>,
    constructions: AtomicUsize,
}

impl AgentCache {
    pub fn new(
        registry: Arc<AgentTypeRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        config: CacheConfig,
    ) -> Self {
        Self::with_clock(registry, gateway, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: Arc<AgentTypeRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = Duration::from_std(config.agent_timeout).unwrap_or(Duration::MAX);
        Self {
            registry,
            gateway,
            clock,
            config,
            timeout,
            state: Mutex::new(CacheState::default()),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Return the live agent for `id` with a refreshed deadline, if any.
    fn hit(&self, state: &mut CacheState, id: AgentId) -> Option<Arc<Agent>> {
        let deadline = self.deadline_from(self.clock.now());
        let entry = state.entries.get_mut(&id)?;
        entry.expires_at = deadline;
        state.expiry.push(deadline, id);
        Some(entry.agent.clone())
    }

    /// Return the live agent for `id`, reconstructing it from storage if needed.
    ///
    /// Construction runs outside the cache lock. Concurrent callers for the
    /// same id take turns on one slot, so the first builds and the rest find
    /// its result. A failed construction leaves nothing behind; the next
    /// caller in line retries.
    pub async fn get_or_load(&self, id: AgentId) -> AgentResult<Arc<Agent>> {
        let claim = {
            let mut state = self.lock();
            if let Some(agent) = self.hit(&mut state, id) {
                log::debug!("agent {} served from cache", id);
                return Ok(agent);
            }
            let slot = state.inflight.entry(id).or_default();
            slot.holders += 1;
            InflightClaim {
                cache: self,
                id,
                turn: slot.turn.clone(),
            }
        };

        let _turn = claim.turn.lock().await;

        let cached = {
            let mut state = self.lock();
            self.hit(&mut state, id)
        };
        if let Some(agent) = cached {
            return Ok(agent);
        }

        let agent = match Agent::load(&self.registry, id, self.gateway.clone()).await {
            Ok(agent) => Arc::new(agent),
            Err(e) => {
                log::warn!("failed to load agent {}: {}", id, e);
                return Err(e);
            }
        };
        self.constructions.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(id, agent))
    }

    fn insert(&self, id: AgentId, agent: Arc<Agent>) -> Arc<Agent> {
        let deadline = self.deadline_from(self.clock.now());
        let mut state = self.lock();
        let live = match state.entries.entry(id) {
            Entry::Occupied(mut occupied) => {
                log::debug!("agent {} inserted concurrently, discarding duplicate", id);
                let entry = occupied.get_mut();
                entry.expires_at = deadline;
                entry.agent.clone()
            }
            Entry::Vacant(vacant) => {
                log::debug!("agent {} ({}) loaded into cache", id, agent.type_name());
                vacant
                    .insert(CacheEntry {
                        agent,
                        expires_at: deadline,
                    })
                    .agent
                    .clone()
            }
        };
        state.expiry.push(deadline, id);
        live
    }

    fn evict_locked(state: &mut CacheState, id: AgentId) -> bool {
        match state.entries.get(&id) {
            Some(entry) if !entry.agent.is_busy() => {
                state.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Drop the entry for `id` unless it is absent or its agent is busy.
    pub fn evict_if_idle(&self, id: AgentId) -> bool {
        let evicted = Self::evict_locked(&mut self.lock(), id);
        if evicted {
            log::info!("evicted agent {}", id);
        }
        evicted
    }

    /// Evict every idle agent whose deadline has passed.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut state = self.lock();

        while let Some((_, id)) = state.expiry.pop_due(now) {
            let current = match state.entries.get(&id) {
                Some(entry) => entry.expires_at,
                None => {
                    report.stale += 1;
                    continue;
                }
            };
            if current > now {
                report.stale += 1;
                continue;
            }

            if Self::evict_locked(&mut state, id) {
                report.evicted.push(id);
            } else {
                report.skipped_busy.push(id);
            }
        }

        if self.config.retry_busy {
            // Due again on the next sweep; the loop above has already finished.
            for id in &report.skipped_busy {
                state.expiry.push(now, *id);
            }
        }

        self.compact_if_bloated(&mut state, now);
        drop(state);

        for id in &report.skipped_busy {
            log::warn!("agent {} is past its deadline but busy, keeping it", id);
        }
        if !report.evicted.is_empty() {
            log::info!("evicted {} idle agent(s): {:?}", report.evicted.len(), report.evicted);
        }
        report
    }

    /// Rebuild the heap from the live entries once stale entries dominate it.
    /// Without `retry_busy`, overdue agents stay unqueued until their next hit.
    fn compact_if_bloated(&self, state: &mut CacheState, now: DateTime<Utc>) {
        let limit = state.entries.len() * 2 + COMPACTION_SLACK;
        if state.expiry.len() <= limit {
            return;
        }

        let mut expiry = ExpiryQueue::new();
        for (id, entry) in &state.entries {
            if !self.config.retry_busy && entry.expires_at <= now {
                continue;
            }
            expiry.push(entry.expires_at, *id);
        }
        log::debug!(
            "compacted expiry queue from {} to {} entries",
            state.expiry.len(),
            expiry.len()
        );
        state.expiry = expiry;
    }

    /// Drop every entry regardless of busy state. Only safe when no request
    /// is in flight.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.expiry.clear();
        state.inflight.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Current deadline of a live agent.
    pub fn deadline(&self, id: AgentId) -> Option<DateTime<Utc>> {
        self.lock().entries.get(&id).map(|entry| entry.expires_at)
    }

    /// Expiry queue size, stale entries included.
    pub fn queued(&self) -> usize {
        self.lock().expiry.len()
    }

    /// Ids with a load in progress or waiting for one.
    pub fn loading(&self) -> usize {
        self.lock().inflight.len()
    }

    /// Successful constructions since this cache was created.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
