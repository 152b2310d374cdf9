//! Process-wide registry of live observers
//!
//! Every streaming connection registers a bounded channel tagged with a
//! tenant scope. Producers fan a serialized record out with a non-blocking
//! send per channel: a full channel means that observer misses the update,
//! the producer never waits.
//!
//! Structural changes (register/unregister) take the write side of one
//! `RwLock`; broadcasts only take the read side, so concurrent producers do
//! not serialize behind each other.

use fleetpulse_core::{metrics, models::TenantId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Serialized canonical record shared by every observer of one broadcast
pub type Payload = Arc<str>;

/// Which broadcasts an observer may see
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantScope {
    /// Unscoped observer; receives only untenanted broadcasts
    All,
    Tenant(TenantId),
}

impl TenantScope {
    #[must_use]
    pub fn from_tenant(tenant: Option<TenantId>) -> Self {
        tenant.map_or(Self::All, Self::Tenant)
    }

    fn is_tenant(&self, tenant: &TenantId) -> bool {
        matches!(self, Self::Tenant(t) if t == tenant)
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Tenant(t) => write!(f, "{t}"),
        }
    }
}

/// Registry key for one observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// Outcome of one broadcast; never an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Observers whose buffer was full (or already closing)
    pub dropped: usize,
}

struct Observer {
    scope: TenantScope,
    sender: mpsc::Sender<Payload>,
}

struct Registry {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Registry {
    fn remove(&self, id: ObserverId) -> bool {
        let removed = self.observers.write().remove(&id);
        match removed {
            Some(observer) => {
                info!(observer_id = %id, tenant = %observer.scope, "Observer unregistered");
                true
            }
            None => {
                debug!(observer_id = %id, "Observer already unregistered");
                false
            }
        }
    }
}

/// Cheap to clone; all clones share one registry
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<Registry>,
}

impl BroadcastHub {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` is the per-observer buffer size; zero is raised to one
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Registry {
                observers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    #[must_use]
    pub fn channel_capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register a new observer.
    ///
    /// The entry is in the registry before this returns, so any broadcast
    /// that starts afterwards sees it.
    pub fn register(&self, scope: TenantScope) -> ObserverRegistration {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner.observers.write().insert(
            id,
            Observer {
                scope: scope.clone(),
                sender,
            },
        );

        info!(observer_id = %id, tenant = %scope, "Observer registered");

        ObserverRegistration {
            id,
            scope,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration. Idempotent; returns whether an entry was removed.
    ///
    /// Dropping the registration has the same effect.
    pub fn unregister(&self, registration: &ObserverRegistration) -> bool {
        self.inner.remove(registration.id)
    }

    /// Offer `payload` to every observer regardless of tenant
    pub fn broadcast(&self, payload: &Payload) -> DeliveryReport {
        self.deliver(payload, |_| true)
    }

    /// Offer `payload` only to observers registered for `tenant`
    pub fn broadcast_to_tenant(&self, tenant: &TenantId, payload: &Payload) -> DeliveryReport {
        self.deliver(payload, |scope| scope.is_tenant(tenant))
    }

    fn deliver(&self, payload: &Payload, wants: impl Fn(&TenantScope) -> bool) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let observers = self.inner.observers.read();
        for (id, observer) in observers.iter().filter(|(_, o)| wants(&o.scope)) {
            match observer.sender.try_send(Arc::clone(payload)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    debug!(observer_id = %id, tenant = %observer.scope, "Observer buffer full, update dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver is mid-teardown; its Drop removes the entry
                    report.dropped += 1;
                }
            }
        }
        drop(observers);

        metrics::record_deliveries(report.delivered, report.dropped);
        report
    }

    /// Number of registered observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    #[must_use]
    pub fn observer_count_for(&self, scope: &TenantScope) -> usize {
        self.inner
            .observers
            .read()
            .values()
            .filter(|o| &o.scope == scope)
            .count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One live observer: the receiving half of its channel plus its registry
/// entry. Dropping it unregisters, so every exit path of a transport task
/// releases the entry exactly once.
pub struct ObserverRegistration {
    id: ObserverId,
    scope: TenantScope,
    receiver: mpsc::Receiver<Payload>,
    registry: Weak<Registry>,
}

impl ObserverRegistration {
    #[must_use]
    pub const fn id(&self) -> ObserverId {
        self.id
    }

    #[must_use]
    pub const fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// Next payload; `None` once unregistered and drained
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.receiver.try_recv().ok()
    }
}

impl fmt::Debug for ObserverRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistration")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Drop for ObserverRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
