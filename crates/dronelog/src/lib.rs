//! `dronelog` - An offline-first drone flight logbook
//!
//! This library records flight start and end events into a durable local queue
//! and delivers them to a spreadsheet (Google Sheets through an Apps Script web
//! app, or an Excel table through Microsoft Graph) when connectivity allows.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod form;
pub mod logbook;
pub mod logging;
pub mod queue;
pub mod record;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod weather;

pub use config::Config;
pub use error::{Error, Result};
pub use form::RecordForm;
pub use logbook::Logbook;
pub use logging::init_logging;
pub use queue::QueueStore;
pub use record::{EventKind, FlightEventRecord, Provider};
pub use settings::{Settings, SettingsStore};
pub use storage::{Storage, StorageStats};
pub use sync::{SyncCoordinator, SyncOutcome};
