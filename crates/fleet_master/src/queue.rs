//! # Queue Controller
//!
//! Keeps the number of STARTING/ONLINE services of every group inside
//! `[min_online, max_online]`.
//!
//! ## Triggers
//!
//! The controller reacts to group changes, to service removals (except
//! launch failures, which would otherwise spin) and to worker handshakes.
//! Event-bus handlers only enqueue a trigger; a background worker drains
//! whatever accumulated and runs one reconciliation for the batch.
//!
//! ## Single flight
//!
//! [`QueueController::reconcile`] never runs two passes at once. A caller
//! that finds a pass in flight raises the rerun flag and returns; the caller
//! holding the in-flight token keeps running passes until no rerun is
//! pending.

use crate::error::ServiceError;
use crate::groups::GroupRegistry;
use crate::ports::PortAllocator;
use crate::services::{ServiceRegistry, ServiceSpec};
use fleet_protocol::{
    DomainEvent, EventBus, EventKind, ProtocolEngine, RemovalReason, Service, ServiceGroup,
};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one or more passes changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: usize,
    pub retired: usize,
}

impl AddAssign for ReconcileSummary {
    fn add_assign(&mut self, other: Self) {
        self.started += other.started;
        self.retired += other.retired;
    }
}

pub struct QueueController {
    groups: Arc<GroupRegistry>,
    services: Arc<ServiceRegistry>,
    engine: Arc<ProtocolEngine>,
    ports: Arc<dyn PortAllocator>,
    default_host: String,
    enabled: bool,
    in_flight: AtomicBool,
    rerun: AtomicBool,
    triggers: mpsc::UnboundedSender<()>,
    pending: std::sync::Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl std::fmt::Debug for QueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueController")
            .field("enabled", &self.enabled)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl QueueController {
    pub fn new(
        groups: Arc<GroupRegistry>,
        services: Arc<ServiceRegistry>,
        engine: Arc<ProtocolEngine>,
        ports: Arc<dyn PortAllocator>,
        default_host: impl Into<String>,
        enabled: bool,
    ) -> Self {
        let (triggers, pending) = mpsc::unbounded_channel();
        Self {
            groups,
            services,
            engine,
            ports,
            default_host: default_host.into(),
            enabled,
            in_flight: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            triggers,
            pending: std::sync::Mutex::new(Some(pending)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribes the controller to the events that call for a reconciliation.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let controller = Arc::downgrade(self);
        bus.subscribe(EventKind::GroupChanged, move |_| {
            if let Some(controller) = controller.upgrade() {
                controller.trigger();
            }
            Ok(())
        });

        let controller = Arc::downgrade(self);
        bus.subscribe(EventKind::ServiceRemoved, move |event| {
            if let DomainEvent::ServiceRemoved { reason, .. } = event {
                if *reason == RemovalReason::LaunchFailed {
                    return Ok(());
                }
            }
            if let Some(controller) = controller.upgrade() {
                controller.trigger();
            }
            Ok(())
        });
    }

    /// Spawns the worker that turns triggers into reconciliations.
    ///
    /// Returns `None` if the worker was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut triggers = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let controller = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while triggers.recv().await.is_some() {
                // One pass covers everything queued so far.
                while triggers.try_recv().is_ok() {}
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.reconcile().await;
            }
            debug!("Queue worker stopped");
        }))
    }

    /// Requests a reconciliation without waiting for it.
    pub fn trigger(&self) {
        if self.enabled {
            let _ = self.triggers.send(());
        }
    }

    /// Runs reconciliation passes until the fleet matches every group's policy.
    pub async fn reconcile(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if !self.enabled {
            return summary;
        }

        self.rerun.store(true, Ordering::Release);
        loop {
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // The holder will see the rerun flag.
                return summary;
            }

            while self.rerun.swap(false, Ordering::AcqRel) {
                summary += self.pass().await;
            }
            self.in_flight.store(false, Ordering::Release);

            // A rerun raised between the last swap and the release is ours to run.
            if !self.rerun.load(Ordering::Acquire) {
                return summary;
            }
        }
    }

    async fn pass(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for group in self.groups.get_all() {
            if group.maintenance {
                debug!("🔧 Skipping '{}' (maintenance)", group.name);
                continue;
            }
            summary += self.balance(&group).await;
        }
        if summary != ReconcileSummary::default() {
            info!(
                "⚖️ Queue pass: {} started, {} retired",
                summary.started, summary.retired
            );
        }
        summary
    }

    async fn balance(&self, group: &ServiceGroup) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let min = usize::try_from(group.min_online).unwrap_or(0);
        let max = usize::try_from(group.max_online).unwrap_or(0);
        let online = self.services.online_count(&group.name);

        if online < min {
            let wanted = min.min(max).saturating_sub(online);
            for _ in 0..wanted {
                // Removed while this pass was running.
                if !self.groups.contains(&group.name) {
                    break;
                }
                match self.launch(group).await {
                    Ok(_) => summary.started += 1,
                    Err(ServiceError::NoFreePort(name)) => {
                        warn!("❌ No free port left for group '{}'", name);
                        break;
                    }
                    // Already removed as LaunchFailed; the next trigger retries.
                    Err(e) => {
                        warn!("⚠️ Group '{}' below minimum: {}", group.name, e);
                        break;
                    }
                }
            }
        } else if online > max {
            let mut live: Vec<_> = self
                .services
                .get_by_group(&group.name)
                .into_iter()
                .filter(|service| service.state.counts_as_online())
                .collect();
            live.sort_by(|a, b| b.id.cmp(&a.id));
            for service in live.into_iter().take(online - max) {
                match self.services.stop(&service.name).await {
                    Ok(()) => summary.retired += 1,
                    Err(e) => warn!("⚠️ Could not retire '{}': {}", service.name, e),
                }
            }
        }
        summary
    }

    /// Registers one more instance of `group` and asks its node to start it.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NoFreePort`] if the group's port range is used up on its node
    /// - [`ServiceError::Launch`] if the node refused; the instance is already unregistered
    pub async fn launch(&self, group: &ServiceGroup) -> Result<Service, ServiceError> {
        let in_use = self.services.ports_in_use(&group.node);
        let port = self
            .ports
            .allocate(group, &in_use)
            .ok_or_else(|| ServiceError::NoFreePort(group.name.clone()))?;
        let host = self.host_of(&group.node);
        let service = self
            .services
            .register(ServiceSpec::for_group(group, host, port));
        self.services.start(&service.name).await
    }

    /// Host announced by `node` in its handshake, or the configured default.
    fn host_of(&self, node: &str) -> String {
        self.engine
            .connection_for_node(node)
            .and_then(|connection| self.engine.node(connection))
            .map(|info| info.host)
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| self.default_host.clone())
    }
}
