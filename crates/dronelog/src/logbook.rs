//! The logbook: one handle over storage, queue, settings and sync.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::form::RecordForm;
use crate::queue::QueueStore;
use crate::record::{EventKind, FlightEventRecord};
use crate::settings::SettingsStore;
use crate::storage::{SharedStorage, Storage};
use crate::sync::{HttpTransport, SyncCoordinator, Transport};
use crate::weather::{WindLookup, WindReading};

/// Everything a front end needs to record and sync flights.
#[derive(Debug, Clone)]
pub struct Logbook {
    config: Config,
    storage: SharedStorage,
    queue: QueueStore,
    settings: SettingsStore,
}

impl Logbook {
    /// Open the logbook database named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: Config) -> Result<Self> {
        let storage = Storage::open(config.database_path())?;
        Ok(Self::with_storage(config, storage.shared()))
    }

    /// Build a logbook over an already-open storage handle.
    #[must_use]
    pub fn with_storage(config: Config, storage: SharedStorage) -> Self {
        Self {
            queue: QueueStore::new(storage.clone()),
            settings: SettingsStore::new(storage.clone()),
            storage,
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared storage handle.
    #[must_use]
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// The pending-record queue.
    #[must_use]
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// The settings store.
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Validate `form` and append the resulting record to the queue.
    ///
    /// Returns the queued record and the new pending count.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] if the form is invalid (nothing is
    /// queued), or a storage error if the queue cannot be written.
    pub fn queue_event(&self, kind: EventKind, form: RecordForm) -> Result<(FlightEventRecord, usize)> {
        let settings = self.settings.load();
        let record = form.into_record(kind, &settings, &self.config.defaults, Utc::now())?;
        let pending = self.queue.append(record.clone())?;

        match kind {
            EventKind::Start => info!(flight = %record.flight_name, pending, "Queued START"),
            EventKind::End => info!(flight = %record.flight_name, pending, "Queued END"),
        }
        Ok((record, pending))
    }

    /// Fill the wind fields of `form` from `lookup` when it has a position
    /// and no wind entered yet.
    ///
    /// A failed lookup is logged and leaves the form as it was.
    pub async fn fill_wind(&self, form: &mut RecordForm, lookup: &dyn WindLookup) {
        if form.wind_speed.is_some() && form.wind_dir.is_some() {
            return;
        }
        let (Some(lat), Some(lon)) = (parse_coord(form.lat.as_deref()), parse_coord(form.lon.as_deref()))
        else {
            warn!("Wind lookup skipped: takeoff position not entered");
            return;
        };

        match lookup.current_wind(lat, lon).await {
            Ok(WindReading {
                speed_ms,
                direction_deg,
            }) => {
                info!(speed_ms, direction_deg, "Wind lookup succeeded");
                form.wind_speed.get_or_insert_with(|| format!("{speed_ms:.1}"));
                form.wind_dir.get_or_insert_with(|| format!("{direction_deg:.0}"));
            }
            Err(e) => warn!(error = %e, "Wind lookup failed; leaving wind empty"),
        }
    }

    /// A sync coordinator delivering through `transport`.
    #[must_use]
    pub fn coordinator(&self, transport: Arc<dyn Transport>) -> SyncCoordinator {
        SyncCoordinator::new(
            transport,
            self.queue.clone(),
            self.settings.clone(),
            self.config.sync.clone(),
            self.config.defaults.clone(),
        )
    }

    /// A sync coordinator delivering over HTTP with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn http_coordinator(&self) -> Result<SyncCoordinator> {
        let transport = HttpTransport::new(self.config.request_timeout())?;
        Ok(self.coordinator(Arc::new(transport)))
    }
}

fn parse_coord(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}
