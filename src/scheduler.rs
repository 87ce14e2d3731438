//! Reporting service: per-facility scheduling, domain-event triggers, and
//! the assembled slot series.
//!
//! The original dashboard kept its timers and once-per-facility guards in
//! module-level globals torn down by component unmount side effects. Here
//! that state is owned by one [`Reporting`] object with an explicit
//! `start`/`stop` lifecycle per facility and a `shutdown` for the session.
//! Patient mutations reach the aggregator through a message channel, not
//! from UI handlers directly.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::Aggregator;
use crate::backfill::{BackfillEngine, BackfillOutcome};
use crate::config::ReportingPolicy;
use crate::error::StoreError;
use crate::models::report::decode_report;
use crate::models::SlotReport;
use crate::slots::{next_slot_boundary, SlotId};
use crate::store::{validate_facility_id, CensusProvider, ReportStore, REPORTS_COLLECTION};

/// Patient-care events that request an aggregation of the current slot.
/// The mutation's own success never depends on the aggregation.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    PatientAdmitted { facility_id: String },
    PatientUpdated { facility_id: String },
    PatientDischarged { facility_id: String },
}

impl DomainEvent {
    pub fn facility_id(&self) -> &str {
        match self {
            DomainEvent::PatientAdmitted { facility_id }
            | DomainEvent::PatientUpdated { facility_id }
            | DomainEvent::PatientDischarged { facility_id } => facility_id,
        }
    }
}

struct FacilityScheduler {
    shutdown: watch::Sender<bool>,
    timer: JoinHandle<()>,
}

/// Session-scoped reporting service. Owns the aggregator, the backfill
/// engine, and one slot-boundary timer per started facility.
pub struct Reporting {
    aggregator: Arc<Aggregator>,
    backfill: BackfillEngine,
    store: Arc<dyn ReportStore>,
    policy: ReportingPolicy,
    schedulers: DashMap<String, FacilityScheduler>,
    /// Facilities already backfilled this session.
    backfilled: DashMap<String, ()>,
    events_tx: mpsc::UnboundedSender<DomainEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Reporting {
    pub fn new(
        store: Arc<dyn ReportStore>,
        census: Arc<dyn CensusProvider>,
        policy: ReportingPolicy,
    ) -> Self {
        let aggregator = Arc::new(Aggregator::new(store.clone(), census, policy.clone()));
        let backfill = BackfillEngine::new(store.clone(), aggregator.clone(), policy.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_events(events_rx, aggregator.clone()));
        Self {
            aggregator,
            backfill,
            store,
            policy,
            schedulers: DashMap::new(),
            backfilled: DashMap::new(),
            events_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Channel end for collaborators (admission forms, HL7 feed adapters)
    /// that emit patient mutations.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<DomainEvent> {
        self.events_tx.clone()
    }

    /// Queue a domain event. Fire-and-forget: the caller's own flow is
    /// never blocked or failed by reporting.
    pub fn notify(&self, event: DomainEvent) {
        if self.events_tx.send(event).is_err() {
            warn!("reporting service is shut down, dropping domain event");
        }
    }

    /// Begin covering a facility: one backfill pass (at most once per
    /// session), then a timer that re-aggregates at every slot boundary.
    /// Starting an already started facility is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self, facility_id: &str) -> Result<(), StoreError> {
        validate_facility_id(facility_id)?;
        if self.schedulers.contains_key(facility_id) {
            debug!("facility already scheduled");
            return Ok(());
        }

        if self.backfilled.insert(facility_id.to_string(), ()).is_none() {
            // Backfill is best-effort on mount; failures are retried by the
            // boundary timer's aggregations, not surfaced to the caller.
            if let Err(err) = self.backfill.run(facility_id, local_now()).await {
                warn!(error = %err, "initial backfill failed");
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = tokio::spawn(run_slot_timer(
            facility_id.to_string(),
            self.aggregator.clone(),
            shutdown_rx,
        ));
        self.schedulers.insert(
            facility_id.to_string(),
            FacilityScheduler { shutdown: shutdown_tx, timer },
        );
        info!("facility scheduling started");
        Ok(())
    }

    /// Tear down a facility's timer. No pending trigger survives this.
    pub fn stop(&self, facility_id: &str) {
        if let Some((_, scheduler)) = self.schedulers.remove(facility_id) {
            let _ = scheduler.shutdown.send(true);
            scheduler.timer.abort();
            info!(facility = facility_id, "facility scheduling stopped");
        }
    }

    pub fn is_running(&self, facility_id: &str) -> bool {
        self.schedulers.contains_key(facility_id)
    }

    /// Stop every facility timer and the event dispatcher.
    pub async fn shutdown(&self) {
        let facilities: Vec<String> =
            self.schedulers.iter().map(|e| e.key().clone()).collect();
        for facility_id in facilities {
            self.stop(&facility_id);
        }
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            dispatcher.abort();
        }
    }

    /// Force a fresh aggregation of the current slot.
    pub async fn force_refresh(&self, facility_id: &str) -> Result<Option<SlotReport>, StoreError> {
        let slot = SlotId::at(local_now());
        self.aggregator.aggregate_slot(facility_id, &slot, false).await
    }

    /// Run the backfill engine now, regardless of the session guard.
    pub async fn run_backfill(&self, facility_id: &str) -> Result<BackfillOutcome, StoreError> {
        self.backfill.run(facility_id, local_now()).await
    }

    /// The full persisted slot series, chronologically sorted, normalized to
    /// the current schema. Documents under opaque keys are included (sorted
    /// after nothing in particular beyond their raw key order); exporters
    /// decide whether to keep them.
    pub async fn series(&self, facility_id: &str) -> Result<Vec<SlotReport>, StoreError> {
        let documents = self.store.list(facility_id, REPORTS_COLLECTION).await?;
        Ok(documents
            .into_iter()
            .filter_map(|(key, value)| {
                let report = decode_report(value, &self.policy)?;
                // Trust the store key over whatever the document claims.
                Some(SlotReport { slot_id: SlotId::from_raw(key), ..report })
            })
            .collect())
    }
}

/// Consume domain events and kick off fire-and-forget aggregations of the
/// current slot. Ends when the service (the only long-lived sender) drops
/// or aborts it.
async fn dispatch_events(
    mut events_rx: mpsc::UnboundedReceiver<DomainEvent>,
    aggregator: Arc<Aggregator>,
) {
    while let Some(event) = events_rx.recv().await {
        debug!(?event, "aggregation requested");
        let aggregator = aggregator.clone();
        tokio::spawn(async move {
            let slot = SlotId::at(local_now());
            aggregator
                .aggregate_slot_logged(event.facility_id(), &slot, false)
                .await;
        });
    }
}

/// Sleep until the next slot boundary, aggregate the new slot, repeat.
/// Correct when started at any point inside a window; checks the liveness
/// flag before every aggregation and reschedule.
async fn run_slot_timer(
    facility_id: String,
    aggregator: Arc<Aggregator>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let now = local_now();
        let boundary = next_slot_boundary(now);
        let delay = (boundary - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if *shutdown_rx.borrow() {
                    break;
                }
                let slot = SlotId::at(local_now());
                aggregator.aggregate_slot_logged(&facility_id, &slot, true).await;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!(facility = %facility_id, "slot timer stopped");
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
