//! The sync coordinator: drains the queue into a destination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::{DefaultsConfig, SyncConfig};
use crate::queue::QueueStore;
use crate::record::FlightEventRecord;
use crate::settings::SettingsStore;

use super::{
    Delivery, DeliveryError, DeliveryPolicy, Destination, ProbeOutcome, Submission, SyncOutcome,
    Transport, TransportMode,
};

/// Reads the queue, delivers it and removes what was accepted.
///
/// Only one `sync_all` runs at a time per queue: coordinators built over
/// clones of the same [`QueueStore`] share one in-flight flag, and an
/// overlapping call returns [`SyncOutcome::Busy`] without touching anything.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    transport: Arc<dyn Transport>,
    queue: QueueStore,
    settings: SettingsStore,
    sync: SyncConfig,
    defaults: DefaultsConfig,
    policy: DeliveryPolicy,
    mode: TransportMode,
}

impl SyncCoordinator {
    /// Create a coordinator using the policy and transport mode from `sync`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: QueueStore,
        settings: SettingsStore,
        sync: SyncConfig,
        defaults: DefaultsConfig,
    ) -> Self {
        Self {
            transport,
            queue,
            settings,
            policy: sync.policy,
            mode: sync.transport,
            sync,
            defaults,
        }
    }

    /// Use `policy` instead of the configured one.
    #[must_use]
    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `mode` instead of the configured one (Apps Script only).
    #[must_use]
    pub fn with_transport_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attempt to deliver every queued record.
    ///
    /// Never fails: every problem is described by the returned outcome and
    /// leaves the coordinator ready for another attempt. An empty queue
    /// returns [`SyncOutcome::Empty`] without loading settings or touching
    /// the network.
    #[instrument(skip(self), fields(policy = %self.policy))]
    pub async fn sync_all(&self) -> SyncOutcome {
        let Some(_guard) = InFlight::acquire(self.queue.sync_flag()) else {
            info!("Sync already in progress");
            return SyncOutcome::Busy;
        };

        let snapshot = self.queue.read_all();
        if snapshot.is_empty() {
            info!("Nothing to sync");
            return SyncOutcome::Empty;
        }

        let settings = self.settings.load();
        let destination = match settings.destination(self.mode, &self.sync, &self.defaults) {
            Ok(destination) => destination,
            Err(reason) => {
                warn!(reason = %reason, "Sync not attempted");
                return SyncOutcome::ConfigError(reason);
            }
        };

        info!(pending = snapshot.len(), destination = %destination, "Starting sync");
        let user_email = settings.user_email();
        let outcome = match self.policy {
            DeliveryPolicy::PerRecord => self.send_each(&destination, &snapshot, user_email).await,
            DeliveryPolicy::WholeBatch => {
                self.send_batch(&destination, &snapshot, user_email).await
            }
        };

        if outcome.is_success() {
            info!("{outcome}");
        } else {
            warn!("{outcome}");
        }
        outcome
    }

    /// Check that the configured destination is reachable.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> ProbeOutcome {
        let settings = self.settings.load();
        let destination = match settings.destination(self.mode, &self.sync, &self.defaults) {
            Ok(destination) => destination,
            Err(reason) => return ProbeOutcome::ConfigError(reason),
        };

        let outcome = match self.transport.probe(&destination).await {
            Ok(Delivery::Confirmed) => ProbeOutcome::Reachable,
            Ok(Delivery::Assumed) => ProbeOutcome::Assumed,
            Err(DeliveryError::Rejected { reason, .. }) => ProbeOutcome::Rejected(reason),
            Err(DeliveryError::Network(reason)) => ProbeOutcome::Unreachable(reason),
            Err(DeliveryError::Encode(reason)) => ProbeOutcome::ConfigError(reason),
        };
        info!(destination = %destination, "{outcome}");
        outcome
    }

    async fn send_each(
        &self,
        destination: &Destination,
        snapshot: &[FlightEventRecord],
        user_email: Option<&str>,
    ) -> SyncOutcome {
        let mut confirmed = true;

        for (index, record) in snapshot.iter().enumerate() {
            match self
                .transport
                .deliver(destination, Submission::Record(record), user_email)
                .await
            {
                Ok(delivery) => {
                    confirmed &= delivery.is_confirmed();
                    self.reconcile(std::slice::from_ref(record));
                }
                Err(err) => {
                    warn!(index, flight = %record.flight_name, error = %err, "Delivery failed");
                    if index == 0 {
                        return SyncOutcome::from_first_failure(err);
                    }
                    return SyncOutcome::Partial {
                        sent: index,
                        failed_at: index,
                        reason: err.to_string(),
                    };
                }
            }
        }

        SyncOutcome::Ok {
            sent: snapshot.len(),
            confirmed,
        }
    }

    async fn send_batch(
        &self,
        destination: &Destination,
        snapshot: &[FlightEventRecord],
        user_email: Option<&str>,
    ) -> SyncOutcome {
        match self
            .transport
            .deliver(destination, Submission::Batch(snapshot), user_email)
            .await
        {
            Ok(delivery) => {
                self.reconcile(snapshot);
                SyncOutcome::Ok {
                    sent: snapshot.len(),
                    confirmed: delivery.is_confirmed(),
                }
            }
            Err(err) => SyncOutcome::from_first_failure(err),
        }
    }

    /// Remove delivered records from the queue.
    ///
    /// The destination already has them, so a storage failure here is logged
    /// rather than turned into a sync failure; the records will be sent again
    /// next time.
    fn reconcile(&self, delivered: &[FlightEventRecord]) {
        if let Err(e) = self.queue.acknowledge(delivered) {
            error!(error = %e, delivered = delivered.len(), "Failed to remove delivered records from queue");
        }
    }
}

/// Holds the in-flight flag for the duration of one sync.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;
    use crate::settings::Settings;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    type Reply = std::result::Result<Delivery, DeliveryError>;

    /// Replays scripted replies and records what it was asked to send.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<Vec<String>>>,
        delay: Option<Duration>,
        append_during_send: Option<QueueStore>,
    }

    impl ScriptedTransport {
        fn replying(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(
            &self,
            _destination: &Destination,
            submission: Submission<'_>,
            _user_email: Option<&str>,
        ) -> Reply {
            self.sent.lock().unwrap().push(
                submission
                    .records()
                    .iter()
                    .map(|r| r.flight_name.clone())
                    .collect(),
            );
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(queue) = &self.append_during_send {
                queue.append(record("Late")).unwrap();
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Delivery::Confirmed))
        }

        async fn probe(&self, _destination: &Destination) -> Reply {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Delivery::Confirmed))
        }
    }

    fn record(name: &str) -> FlightEventRecord {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        FlightEventRecord::new(EventKind::Start, name, at)
    }

    fn stores(configured: bool) -> (QueueStore, SettingsStore) {
        let storage = Storage::open_in_memory().unwrap().shared();
        let settings = SettingsStore::new(storage.clone());
        if configured {
            settings
                .save(&Settings {
                    google_endpoint: "https://script.google.com/macros/s/abc/exec".to_string(),
                    ..Settings::default()
                })
                .unwrap();
        }
        (QueueStore::new(storage), settings)
    }

    fn coordinator(
        transport: ScriptedTransport,
        queue: &QueueStore,
        settings: &SettingsStore,
    ) -> (SyncCoordinator, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let coordinator = SyncCoordinator::new(
            transport.clone(),
            queue.clone(),
            settings.clone(),
            SyncConfig::default(),
            DefaultsConfig::default(),
        );
        (coordinator, transport)
    }

    fn fill(queue: &QueueStore, names: &[&str]) {
        for name in names {
            queue.append(record(name)).unwrap();
        }
    }

    fn names(queue: &QueueStore) -> Vec<String> {
        queue.read_all().into_iter().map(|r| r.flight_name).collect()
    }

    fn network(reason: &str) -> Reply {
        Err(DeliveryError::Network(reason.to_string()))
    }

    fn rejected(status: u16) -> Reply {
        Err(DeliveryError::Rejected {
            status: Some(status),
            reason: format!("Apps Script HTTP {status}"),
        })
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let (queue, settings) = stores(false);
        let (coordinator, transport) = coordinator(ScriptedTransport::default(), &queue, &settings);

        assert_eq!(coordinator.sync_all().await, SyncOutcome::Empty);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_destination_is_config_error() {
        let (queue, settings) = stores(false);
        fill(&queue, &["A"]);
        let (coordinator, transport) = coordinator(ScriptedTransport::default(), &queue, &settings);

        assert!(matches!(
            coordinator.sync_all().await,
            SyncOutcome::ConfigError(_)
        ));
        assert!(transport.calls().is_empty());
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test]
    async fn test_single_record_success() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A"]);
        let (coordinator, _) = coordinator(ScriptedTransport::default(), &queue, &settings);

        assert_eq!(
            coordinator.sync_all().await,
            SyncOutcome::Ok {
                sent: 1,
                confirmed: true
            }
        );
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_keeps_queue() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B"]);
        let (coordinator, _) =
            coordinator(ScriptedTransport::replying([network("offline")]), &queue, &settings);

        assert_eq!(
            coordinator.sync_all().await,
            SyncOutcome::NetworkError("offline".to_string())
        );
        assert_eq!(names(&queue), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_per_record_partial_failure() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B", "C"]);
        let (coordinator, transport) = coordinator(
            ScriptedTransport::replying([Ok(Delivery::Confirmed), rejected(500)]),
            &queue,
            &settings,
        );

        match coordinator.sync_all().await {
            SyncOutcome::Partial {
                sent, failed_at, ..
            } => {
                assert_eq!(sent, 1);
                assert_eq!(failed_at, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(names(&queue), vec!["B", "C"]);
        assert_eq!(transport.calls(), vec![vec!["A"], vec!["B"]]);
    }

    #[tokio::test]
    async fn test_per_record_first_rejection() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B"]);
        let (coordinator, _) =
            coordinator(ScriptedTransport::replying([rejected(403)]), &queue, &settings);

        assert_eq!(
            coordinator.sync_all().await,
            SyncOutcome::Rejected("Apps Script HTTP 403".to_string())
        );
        assert_eq!(queue.count(), 2);
    }

    #[tokio::test]
    async fn test_whole_batch_success() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B", "C"]);
        let (coordinator, transport) = coordinator(ScriptedTransport::default(), &queue, &settings);
        let coordinator = coordinator.with_policy(DeliveryPolicy::WholeBatch);

        assert_eq!(coordinator.sync_all().await.sent(), 3);
        assert_eq!(transport.calls(), vec![vec!["A", "B", "C"]]);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_whole_batch_rejection_keeps_everything() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B", "C"]);
        let (coordinator, _) =
            coordinator(ScriptedTransport::replying([rejected(500)]), &queue, &settings);
        let coordinator = coordinator.with_policy(DeliveryPolicy::WholeBatch);

        assert!(matches!(
            coordinator.sync_all().await,
            SyncOutcome::Rejected(_)
        ));
        assert_eq!(names(&queue), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_assumed_delivery_is_unconfirmed() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B"]);
        let (coordinator, _) = coordinator(
            ScriptedTransport::replying([Ok(Delivery::Assumed), Ok(Delivery::Assumed)]),
            &queue,
            &settings,
        );
        let coordinator = coordinator.with_transport_mode(TransportMode::Opaque);

        assert_eq!(
            coordinator.sync_all().await,
            SyncOutcome::Ok {
                sent: 2,
                confirmed: false
            }
        );
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_records_appended_during_sync_survive() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A"]);
        let transport = ScriptedTransport {
            append_during_send: Some(queue.clone()),
            ..ScriptedTransport::default()
        };
        let (coordinator, _) = coordinator(transport, &queue, &settings);
        let coordinator = coordinator.with_policy(DeliveryPolicy::WholeBatch);

        assert_eq!(coordinator.sync_all().await.sent(), 1);
        assert_eq!(names(&queue), vec!["Late"]);
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_busy() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A"]);
        let transport = ScriptedTransport {
            delay: Some(Duration::from_millis(50)),
            ..ScriptedTransport::default()
        };
        let (coordinator, transport) = coordinator(transport, &queue, &settings);

        let (first, second) = tokio::join!(coordinator.sync_all(), coordinator.sync_all());
        assert_eq!(first.sent(), 1);
        assert_eq!(second, SyncOutcome::Busy);
        assert_eq!(transport.calls().len(), 1);

        // The flag is released once the first attempt finishes.
        assert_eq!(coordinator.sync_all().await, SyncOutcome::Empty);
    }

    #[tokio::test]
    async fn test_coordinators_over_one_queue_share_the_flag() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A"]);
        let transport = ScriptedTransport {
            delay: Some(Duration::from_millis(50)),
            ..ScriptedTransport::default()
        };
        let (first, transport) = coordinator(transport, &queue, &settings);
        let second = SyncCoordinator::new(
            transport.clone(),
            queue.clone(),
            settings.clone(),
            SyncConfig::default(),
            DefaultsConfig::default(),
        );

        let (a, b) = tokio::join!(first.sync_all(), second.sync_all());
        assert_eq!(a.sent(), 1);
        assert_eq!(b, SyncOutcome::Busy);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_failure_resumes() {
        let (queue, settings) = stores(true);
        fill(&queue, &["A", "B"]);
        let (coordinator, transport) = coordinator(
            ScriptedTransport::replying([Ok(Delivery::Confirmed), network("timeout")]),
            &queue,
            &settings,
        );

        assert!(!coordinator.sync_all().await.is_success());
        assert_eq!(
            coordinator.sync_all().await,
            SyncOutcome::Ok {
                sent: 1,
                confirmed: true
            }
        );
        assert_eq!(transport.calls(), vec![vec!["A"], vec!["B"], vec!["B"]]);
    }

    #[tokio::test]
    async fn test_probe_outcomes() {
        let (queue, settings) = stores(true);
        let (coordinator, _) = coordinator(
            ScriptedTransport::replying([
                Ok(Delivery::Confirmed),
                Ok(Delivery::Assumed),
                rejected(404),
                network("dns"),
            ]),
            &queue,
            &settings,
        );

        assert_eq!(coordinator.probe().await, ProbeOutcome::Reachable);
        assert_eq!(coordinator.probe().await, ProbeOutcome::Assumed);
        assert!(matches!(coordinator.probe().await, ProbeOutcome::Rejected(_)));
        assert_eq!(
            coordinator.probe().await,
            ProbeOutcome::Unreachable("dns".to_string())
        );
    }

    #[tokio::test]
    async fn test_probe_without_destination() {
        let (queue, settings) = stores(false);
        let (coordinator, _) = coordinator(ScriptedTransport::default(), &queue, &settings);
        assert!(matches!(
            coordinator.probe().await,
            ProbeOutcome::ConfigError(_)
        ));
    }
}
