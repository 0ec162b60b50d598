//! Delivering the queue to a remote destination.
//!
//! A [`SyncCoordinator`] reads the whole queue, hands it to a [`Transport`]
//! according to a [`DeliveryPolicy`], and removes from the queue exactly the
//! records the destination accepted. Every failure is reported as a
//! [`SyncOutcome`]; nothing here returns an error to the caller.
//!
//! # Delivery guarantees
//!
//! - The queue is emptied only when every record in it was accepted during
//!   the attempt. A failed attempt never removes an unsent record.
//! - There is no automatic retry. The next `sync_all` call resumes from
//!   whatever is still queued.
//! - Under [`TransportMode::Opaque`] the response is never read, so a
//!   destination-side rejection is indistinguishable from success. Records
//!   are removed as soon as the request completes without a transport error.
//!   Outcomes produced in this mode carry `confirmed: false`.

mod coordinator;
mod http;
mod payload;

use std::fmt;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::FlightEventRecord;
use crate::settings::AccessToken;

pub use coordinator::SyncCoordinator;
pub use http::HttpTransport;
pub use payload::{apps_script_body, graph_body, graph_row, probe_body};

/// How the queue is handed to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// One request per record, in queue order, stopping at the first failure.
    #[default]
    PerRecord,
    /// The whole queue as one request; all-or-nothing.
    WholeBatch,
}

/// Whether destination responses are inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Send JSON and read the JSON response.
    #[default]
    Json,
    /// Fire and forget: completion of the request counts as success.
    Opaque,
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerRecord => write!(f, "per-record"),
            Self::WholeBatch => write!(f, "whole-batch"),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Opaque => write!(f, "opaque"),
        }
    }
}

/// Where records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A Google Apps Script web app that appends posted records to a sheet.
    AppsScript {
        /// Web app URL.
        endpoint: reqwest::Url,
        /// Whether the script's response is read.
        mode: TransportMode,
        /// Spreadsheet routing hint passed to the script.
        spreadsheet_id: String,
        /// Sheet routing hint passed to the script.
        sheet_name: String,
    },
    /// An Excel table on OneDrive, via Microsoft Graph.
    Graph {
        /// Graph API root, e.g. `https://graph.microsoft.com/v1.0`.
        base_url: reqwest::Url,
        /// OneDrive item id of the workbook.
        drive_item_id: String,
        /// Table receiving rows.
        table_name: String,
        /// Bearer token for the signed-in user.
        access_token: AccessToken,
    },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppsScript { endpoint, mode, .. } => {
                write!(f, "apps-script {} ({mode})", endpoint.host_str().unwrap_or("?"))
            }
            Self::Graph {
                drive_item_id,
                table_name,
                ..
            } => write!(f, "graph item {drive_item_id} table {table_name}"),
        }
    }
}

/// What is being sent in one request.
#[derive(Debug, Clone, Copy)]
pub enum Submission<'a> {
    /// A single record (per-record policy).
    Record(&'a FlightEventRecord),
    /// The whole queue (whole-batch policy).
    Batch(&'a [FlightEventRecord]),
}

impl<'a> Submission<'a> {
    /// The records carried by this submission.
    #[must_use]
    pub fn records(&self) -> &'a [FlightEventRecord] {
        match *self {
            Self::Record(record) => std::slice::from_ref(record),
            Self::Batch(records) => records,
        }
    }
}

/// How sure we are that a request was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The destination acknowledged the request.
    Confirmed,
    /// The request completed but the response was not read.
    Assumed,
}

impl Delivery {
    /// Whether the destination explicitly acknowledged the request.
    #[must_use]
    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Why a request was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The request never completed (offline, DNS, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The destination answered and refused the submission.
    #[error("destination rejected submission: {reason}")]
    Rejected {
        /// HTTP status, when the refusal came as one.
        status: Option<u16>,
        /// Human-readable reason.
        reason: String,
    },

    /// The request could not be built.
    #[error("could not build request: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Encode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// A way of getting submissions to a destination.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `submission` to `destination`.
    ///
    /// `user_email` is stamped on records that do not carry one.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the submission was not accepted.
    async fn deliver(
        &self,
        destination: &Destination,
        submission: Submission<'_>,
        user_email: Option<&str>,
    ) -> Result<Delivery, DeliveryError>;

    /// Check that `destination` is reachable and accepts submissions.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the destination is unreachable or
    /// refuses the probe.
    async fn probe(&self, destination: &Destination) -> Result<Delivery, DeliveryError>;
}

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every queued record was accepted and the queue is empty.
    Ok {
        /// Number of records sent.
        sent: usize,
        /// `false` when delivery was assumed under the opaque transport.
        confirmed: bool,
    },
    /// Some records were accepted before one failed (per-record policy).
    Partial {
        /// Number of records accepted and removed from the queue.
        sent: usize,
        /// Index (0-based, in the queue as read) of the record that failed.
        failed_at: usize,
        /// Why that record failed.
        reason: String,
    },
    /// No destination (or an incomplete one) is configured. Nothing was sent.
    ConfigError(String),
    /// The first request failed at the transport level. Queue unchanged.
    NetworkError(String),
    /// The destination refused the first submission. Queue unchanged.
    Rejected(String),
    /// The queue was empty. Nothing was sent.
    Empty,
    /// Another sync is in flight. Nothing was done.
    Busy,
}

impl SyncOutcome {
    /// Whether the attempt left nothing behind that needs a retry.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok { .. } | Self::Empty)
    }

    /// Number of records removed from the queue by this attempt.
    #[must_use]
    pub fn sent(&self) -> usize {
        match self {
            Self::Ok { sent, .. } | Self::Partial { sent, .. } => *sent,
            _ => 0,
        }
    }

    fn from_first_failure(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Network(reason) => Self::NetworkError(reason),
            DeliveryError::Rejected { reason, .. } => Self::Rejected(reason),
            DeliveryError::Encode(reason) => Self::ConfigError(reason),
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { sent, confirmed } => {
                write!(f, "Sync complete. Sent={sent}, failed=0")?;
                if !confirmed {
                    write!(f, " (delivery assumed: responses not read)")?;
                }
                Ok(())
            }
            Self::Partial {
                sent,
                failed_at,
                reason,
            } => write!(
                f,
                "Sync incomplete. Sent={sent}, failed at record {failed_at}: {reason}"
            ),
            Self::ConfigError(reason) => write!(f, "Sync not attempted: {reason}"),
            Self::NetworkError(reason) => write!(f, "Sync error (network): {reason}"),
            Self::Rejected(reason) => write!(f, "Sync error (rejected): {reason}"),
            Self::Empty => write!(f, "Nothing to sync"),
            Self::Busy => write!(f, "Sync already in progress"),
        }
    }
}

/// Result of a destination probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The destination answered and accepted the probe.
    Reachable,
    /// The probe was sent but the response was not read (opaque transport).
    Assumed,
    /// The destination answered and refused the probe.
    Rejected(String),
    /// The destination could not be reached.
    Unreachable(String),
    /// No usable destination is configured.
    ConfigError(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => write!(f, "Destination reachable"),
            Self::Assumed => write!(f, "Probe sent (response not read)"),
            Self::Rejected(reason) => write!(f, "Destination rejected probe: {reason}"),
            Self::Unreachable(reason) => write!(f, "Destination unreachable: {reason}"),
            Self::ConfigError(reason) => write!(f, "Probe not attempted: {reason}"),
        }
    }
}
