//! The event loop: watched-object events in, snapshot installs out.
//!
//! Rebuilds are serialized through this single task and debounced: after an
//! event lands, the loop waits out a short holdoff for more events, but never
//! defers past the maximum holdoff, so a steady trickle of churn cannot
//! starve convergence. Events that leave the store byte-identical trigger no
//! rebuild at all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::XdsConfig;
use crate::graph::{self, Finding, Verdict};
use crate::k8s::object::{Object, ObjectRef};
use crate::k8s::ResourceStore;
use crate::xds::{self, SnapshotCache};

/// One watch event: the latest copy of an object, or its removal.
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Upsert(Object),
    Delete(ObjectRef),
}

/// Receives per-object findings after every rebuild.
///
/// Writing status back to the cluster is out of scope here; the default sink
/// logs verdicts instead.
pub trait StatusSink: Send + Sync {
    fn report(&self, findings: &[Finding]);
}

/// Logs each finding, invalid ones at warn level.
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn report(&self, findings: &[Finding]) {
        for finding in findings {
            match finding.verdict {
                Verdict::Valid => {
                    debug!(object = %finding.object, reason = %finding.reason, "Object accepted")
                }
                Verdict::Invalid => {
                    warn!(object = %finding.object, reason = %finding.reason, "Object rejected")
                }
            }
        }
    }
}

/// Owns the store and drives rebuild cycles from an event channel.
pub struct Reconciler {
    store: Arc<ResourceStore>,
    cache: Arc<SnapshotCache>,
    holdoff: Duration,
    max_holdoff: Duration,
    status: Box<dyn StatusSink>,
}

impl Reconciler {
    pub fn new(store: Arc<ResourceStore>, cache: Arc<SnapshotCache>, config: &XdsConfig) -> Self {
        Self::with_status_sink(store, cache, config, Box::new(LogStatusSink))
    }

    pub fn with_status_sink(
        store: Arc<ResourceStore>,
        cache: Arc<SnapshotCache>,
        config: &XdsConfig,
        status: Box<dyn StatusSink>,
    ) -> Self {
        Self {
            store,
            cache,
            holdoff: config.holdoff(),
            max_holdoff: config.max_holdoff(),
            status,
        }
    }

    /// Run until the event channel closes.
    ///
    /// An initial rebuild runs before any event so connected clients get a
    /// coherent (possibly empty) snapshot rather than nothing.
    pub async fn run(self, mut events: mpsc::Receiver<ObjectEvent>) {
        self.rebuild();

        'outer: loop {
            let Some(event) = events.recv().await else { break };
            let mut dirty = self.apply(event);

            let deadline = Instant::now() + self.max_holdoff;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let wait = self.holdoff.min(deadline - now);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => break,
                    next = events.recv() => match next {
                        Some(event) => dirty |= self.apply(event),
                        None => {
                            if dirty {
                                self.rebuild();
                            }
                            break 'outer;
                        }
                    }
                }
            }

            if dirty {
                self.rebuild();
            }
        }

        info!("Reconciler event channel closed, stopping");
    }

    /// Apply one event to the store. Returns false for no-ops.
    fn apply(&self, event: ObjectEvent) -> bool {
        match event {
            ObjectEvent::Upsert(object) => {
                let key = object.object_ref();
                let changed = self.store.upsert(object);
                if !changed {
                    debug!(object = %key, "Upsert left object unchanged, skipping rebuild");
                }
                changed
            }
            ObjectEvent::Delete(key) => {
                let removed = self.store.delete(&key);
                if !removed {
                    debug!(object = %key, "Delete for unknown object, skipping rebuild");
                }
                removed
            }
        }
    }

    /// One full cycle: snapshot, build, render, install.
    pub(crate) fn rebuild(&self) {
        let snapshot = self.store.snapshot();
        let (routing_graph, findings) = graph::build(&snapshot);
        self.status.report(&findings);

        let mut installed = 0;
        for (resource_type, resources) in xds::render(&routing_graph) {
            if self.cache.install(resource_type, resources).is_some() {
                installed += 1;
            }
        }

        info!(
            objects = snapshot.len(),
            findings = findings.len(),
            installed_types = installed,
            "Rebuild complete"
        );
    }
}
