//! Subscription Registry
//!
//! Domain state for caller subscriptions to streamed market data.
//!
//! # Design
//!
//! The registry is the source of truth for what the stream session must be
//! subscribed to; the wire session is reconstructed from it after every
//! reconnect. It tracks:
//!
//! - Each subscription's symbols and lifecycle state
//! - Reference counting per symbol, so one upstream stream serves any
//!   number of overlapping subscriptions
//!
//! Only the stream session manager mutates this state. Cancelling a
//! subscription removes it here immediately, even mid-reconnect, which is
//! what keeps a cancelled subscription out of the post-reconnect replay
//! set.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::{DataType, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a caller subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a caller subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Registered but not yet acknowledged by the wire session.
    Pending,
    /// Acknowledged; data is flowing.
    Active,
    /// The underlying connection dropped; the subscription will be
    /// replayed once the session reconnects.
    Reconnecting,
    /// Cancelled by the caller or by session shutdown.
    Cancelled,
}

impl SubscriptionState {
    /// Whether this subscription still participates in the replay set.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// A caller's registered interest in a continuous stream.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Symbols this subscription covers.
    pub symbols: BTreeSet<Symbol>,
    /// Data type being streamed.
    pub data_type: DataType,
    /// When the caller registered it.
    pub requested_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: SubscriptionState,
}

/// Wire-level changes produced by a registry mutation.
///
/// `subscribe` holds symbols whose reference count went 0 to 1 and so need
/// an upstream subscribe; `unsubscribe` holds symbols that went 1 to 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChanges {
    /// Symbols to subscribe upstream.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols to unsubscribe upstream.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl StreamChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Tracks caller subscriptions and per-symbol reference counts.
///
/// # Example
///
/// ```rust
/// use market_gateway::domain::market::{DataType, Symbol};
/// use market_gateway::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let btc = Symbol::parse("BTCUSDT").unwrap();
///
/// let (first, changes) = registry.register([btc.clone()].into(), DataType::Ticker);
/// assert!(changes.subscribe.contains(&btc));
///
/// // A second overlapping subscription needs no upstream change.
/// let (_second, changes) = registry.register([btc.clone()].into(), DataType::Ticker);
/// assert!(changes.is_empty());
///
/// // Cancelling the first keeps the shared symbol subscribed.
/// let changes = registry.cancel(first);
/// assert!(changes.unsubscribe.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<SubscriptionId, SubscriptionRecord>,
    symbol_refcount: HashMap<Symbol, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription in `Pending` state.
    ///
    /// Returns the new id together with the wire changes it requires.
    pub fn register(
        &self,
        symbols: BTreeSet<Symbol>,
        data_type: DataType,
    ) -> (SubscriptionId, StreamChanges) {
        let id = SubscriptionId::new();
        let mut state = self.inner.write();
        let mut changes = StreamChanges::default();

        for symbol in &symbols {
            let refcount = state.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                changes.subscribe.insert(symbol.clone());
            }
        }

        state.records.insert(
            id,
            SubscriptionRecord {
                id,
                symbols,
                data_type,
                requested_at: Utc::now(),
                state: SubscriptionState::Pending,
            },
        );

        (id, changes)
    }

    /// Cancel a subscription and release its symbol references.
    ///
    /// Unknown or already-cancelled ids produce no changes, so cancelling
    /// is idempotent and safe to call from handle drops.
    pub fn cancel(&self, id: SubscriptionId) -> StreamChanges {
        let mut state = self.inner.write();
        let Some(record) = state.records.remove(&id) else {
            return StreamChanges::default();
        };

        let mut changes = StreamChanges::default();
        for symbol in &record.symbols {
            if let Some(refcount) = state.symbol_refcount.get_mut(symbol) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    state.symbol_refcount.remove(symbol);
                    changes.unsubscribe.insert(symbol.clone());
                }
            }
        }

        changes
    }

    /// Mark every registered subscription with the given state.
    ///
    /// Used on disconnect (`Reconnecting`) and on replay acknowledgement
    /// (`Active`). Cancelled subscriptions are already removed, so they
    /// are never resurrected.
    pub fn mark_all(&self, new_state: SubscriptionState) {
        let mut state = self.inner.write();
        for record in state.records.values_mut() {
            record.state = new_state;
        }
    }

    /// Mark a single subscription with the given state.
    pub fn mark(&self, id: SubscriptionId, new_state: SubscriptionState) {
        let mut state = self.inner.write();
        if let Some(record) = state.records.get_mut(&id) {
            record.state = new_state;
        }
    }

    /// The union of symbols every live subscription needs.
    ///
    /// This is what the session replays after a reconnect.
    #[must_use]
    pub fn replay_set(&self) -> BTreeSet<Symbol> {
        self.inner.read().symbol_refcount.keys().cloned().collect()
    }

    /// Snapshot of a single subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Ids of all live subscriptions.
    #[must_use]
    pub fn live_ids(&self) -> Vec<SubscriptionId> {
        self.inner.read().records.keys().copied().collect()
    }

    /// Whether any live subscription covers the given symbol.
    #[must_use]
    pub fn covers(&self, symbol: &Symbol) -> bool {
        self.inner.read().symbol_refcount.contains_key(symbol)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Number of distinct subscribed symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.inner.read().symbol_refcount.len()
    }

    /// Cancel everything, returning the ids that were still live.
    ///
    /// Called on session shutdown.
    pub fn cancel_all(&self) -> Vec<SubscriptionId> {
        let mut state = self.inner.write();
        let ids: Vec<_> = state.records.keys().copied().collect();
        state.records.clear();
        state.symbol_refcount.clear();
        ids
    }
}

// =============================================================================
// Tests
// =============================================================================
