//! Flight event records.
//!
//! A [`FlightEventRecord`] is one "start" or "end" observation of a flight. It
//! is the single schema shared by the queue (what gets persisted) and the
//! outbound payload builders (what gets sent), so the JSON keys follow the
//! column headers of the destination spreadsheet.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Which end of a flight a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Takeoff / start of the flight.
    Start,
    /// Landing / end of the flight.
    End,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

/// The spreadsheet backend a record is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Sheets through an Apps Script web app.
    Google,
    /// Excel on OneDrive through Microsoft Graph.
    Microsoft,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Microsoft => write!(f, "microsoft"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Column order of the destination table.
///
/// Row-oriented destinations (Microsoft Graph) receive cells in exactly this
/// order; keyed destinations match on the names.
pub const SHEET_HEADERS: [&str; 26] = [
    "Timestamp",
    "Date",
    "User Email",
    "Flight Name",
    "Pilot Name",
    "Observer / VO",
    "Project / Job",
    "Takeoff Lat",
    "Takeoff Lon",
    "Start Time (Local)",
    "Start Wind (m/s)",
    "Start Wind Dir (°)",
    "End Time (Local)",
    "RTK Mode",
    "Base Method",
    "Drone Model",
    "Aircraft ID / S/N",
    "Payload",
    "Mission Type",
    "Altitude AGL (m)",
    "Speed (m/s)",
    "Photos (#)",
    "Max Height (m)",
    "Incidents / Anomalies",
    "Notes",
    "Storage Path",
];

/// One queued observation of a flight.
///
/// Records are immutable once queued. Optional text fields are empty strings
/// when unset; optional numeric fields serialize as a JSON number or `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEventRecord {
    /// Start or end of the flight.
    pub kind: EventKind,

    /// Provider selected when the record was queued (routing hint).
    #[serde(default, deserialize_with = "lenient_provider")]
    pub provider: Option<Provider>,

    /// When the record was queued.
    #[serde(rename = "Timestamp")]
    pub captured_at: DateTime<Utc>,

    /// IANA timezone the pilot was working in.
    #[serde(rename = "Timezone", default)]
    pub timezone: String,

    /// Human-entered flight name. Never empty.
    #[serde(rename = "Flight Name")]
    pub flight_name: String,

    /// Project or job label.
    #[serde(rename = "Project / Job", default)]
    pub project: String,

    /// Remote pilot in command.
    #[serde(rename = "Pilot Name", default)]
    pub pilot_name: String,

    /// Visual observer.
    #[serde(rename = "Observer / VO", default)]
    pub observer: String,

    /// Takeoff time as ISO-8601 UTC (start records).
    #[serde(rename = "Start Time (Local)", default)]
    pub start_time: String,

    /// Landing time as ISO-8601 UTC (end records).
    #[serde(rename = "End Time (Local)", default)]
    pub end_time: String,

    /// Takeoff latitude in decimal degrees.
    #[serde(rename = "Takeoff Lat", default, with = "number_or_empty")]
    pub takeoff_lat: Option<f64>,

    /// Takeoff longitude in decimal degrees.
    #[serde(rename = "Takeoff Lon", default, with = "number_or_empty")]
    pub takeoff_lon: Option<f64>,

    /// Wind speed at takeoff in metres per second.
    #[serde(rename = "Start Wind (m/s)", default, with = "number_or_empty")]
    pub wind_speed: Option<f64>,

    /// Wind direction at takeoff in degrees.
    #[serde(rename = "Start Wind Dir (°)", default, with = "number_or_empty")]
    pub wind_direction: Option<f64>,

    /// RTK correction mode.
    #[serde(rename = "RTK Mode", default)]
    pub rtk_mode: String,

    /// How the RTK base was established.
    #[serde(rename = "Base Method", default)]
    pub base_method: String,

    /// Aircraft model.
    #[serde(rename = "Drone Model", default)]
    pub drone_model: String,

    /// Aircraft registration or serial number.
    #[serde(rename = "Aircraft ID / S/N", default)]
    pub aircraft_id: String,

    /// Sensor or payload carried.
    #[serde(rename = "Payload", default)]
    pub payload: String,

    /// Mission classification.
    #[serde(rename = "Mission Type", default)]
    pub mission_type: String,

    /// Planned altitude above ground in metres.
    #[serde(rename = "Altitude AGL (m)", default, with = "number_or_empty")]
    pub altitude_agl: Option<f64>,

    /// Planned speed in metres per second.
    #[serde(rename = "Speed (m/s)", default, with = "number_or_empty")]
    pub speed: Option<f64>,

    /// Number of photos captured.
    #[serde(rename = "Photos (#)", default, with = "number_or_empty")]
    pub photos: Option<u32>,

    /// Maximum height reached in metres.
    #[serde(rename = "Max Height (m)", default, with = "number_or_empty")]
    pub max_height: Option<f64>,

    /// Incidents or anomalies observed.
    #[serde(rename = "Incidents / Anomalies", default)]
    pub incidents: String,

    /// Free-text notes.
    #[serde(rename = "Notes", default)]
    pub notes: String,

    /// Where the flight's data was stored.
    #[serde(rename = "Storage Path", default)]
    pub storage_path: String,

    /// Identity of the signed-in user, if known when queued.
    #[serde(rename = "User Email", default)]
    pub user_email: String,

    /// Spreadsheet the record should be written into.
    #[serde(rename = "Target Spreadsheet", default)]
    pub target_spreadsheet: String,

    /// Sheet (tab) within the target spreadsheet.
    #[serde(rename = "Target Sheet", default)]
    pub target_sheet: String,
}

impl FlightEventRecord {
    /// Create a bare record with only the required fields set.
    #[must_use]
    pub fn new(kind: EventKind, flight_name: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            provider: None,
            captured_at,
            timezone: String::new(),
            flight_name: flight_name.into(),
            project: String::new(),
            pilot_name: String::new(),
            observer: String::new(),
            start_time: String::new(),
            end_time: String::new(),
            takeoff_lat: None,
            takeoff_lon: None,
            wind_speed: None,
            wind_direction: None,
            rtk_mode: String::new(),
            base_method: String::new(),
            drone_model: String::new(),
            aircraft_id: String::new(),
            payload: String::new(),
            mission_type: String::new(),
            altitude_agl: None,
            speed: None,
            photos: None,
            max_height: None,
            incidents: String::new(),
            notes: String::new(),
            storage_path: String::new(),
            user_email: String::new(),
            target_spreadsheet: String::new(),
            target_sheet: String::new(),
        }
    }

    /// The time of the observed event: takeoff for starts, landing for ends.
    #[must_use]
    pub fn event_time(&self) -> &str {
        match self.kind {
            EventKind::Start => &self.start_time,
            EventKind::End => &self.end_time,
        }
    }

    /// Render this record as a JSON object keyed by sheet header.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn to_object(&self) -> serde_json::Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(serde::ser::Error::custom(
                "flight record did not serialize to a JSON object",
            )),
        }
    }
}

/// Treat anything that is not a known provider (`""`, `null`, typos) as unset.
pub(crate) fn lenient_provider<'de, D>(deserializer: D) -> Result<Option<Provider>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}

/// Serde adapter for numeric fields that are `""` when unset.
///
/// Reading is lenient: numbers, numeric strings, `""` and `null` are
/// accepted, and anything else reads as unset rather than failing the whole
/// queue.
pub(crate) mod number_or_empty {
    use std::str::FromStr;

    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        #[allow(dead_code)]
        enum Raw<T> {
            Number(T),
            Text(String),
            Other(IgnoredAny),
        }

        Ok(match Option::<Raw<T>>::deserialize(deserializer)? {
            Some(Raw::Number(v)) => Some(v),
            Some(Raw::Text(s)) => s.trim().parse().ok(),
            Some(Raw::Other(_)) | None => None,
        })
    }
}
