//! Mapping raw form input to a [`FlightEventRecord`].
//!
//! [`RecordForm::into_record`] is the one place where user input is trimmed,
//! validated and defaulted. A form that fails here never reaches the queue.

use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use chrono_tz::Tz;
use clap::Args;

use crate::config::DefaultsConfig;
use crate::error::{Error, Result};
use crate::record::{EventKind, FlightEventRecord};
use crate::settings::Settings;

/// Local date-time layouts accepted for event times, besides RFC 3339.
const LOCAL_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Raw values of the flight form, exactly as entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct RecordForm {
    /// Flight name (required)
    #[arg(short = 'n', long)]
    pub flight_name: Option<String>,

    /// Project or job label
    #[arg(long)]
    pub project: Option<String>,

    /// Remote pilot name
    #[arg(long)]
    pub pilot: Option<String>,

    /// Visual observer name
    #[arg(long)]
    pub observer: Option<String>,

    /// Event time: RFC 3339, or "YYYY-MM-DDTHH:MM" in the logbook timezone (defaults to now)
    #[arg(short = 't', long)]
    pub time: Option<String>,

    /// Takeoff latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<String>,

    /// Takeoff longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<String>,

    /// Wind speed in m/s
    #[arg(long)]
    pub wind_speed: Option<String>,

    /// Wind direction in degrees
    #[arg(long)]
    pub wind_dir: Option<String>,

    /// RTK correction mode
    #[arg(long)]
    pub rtk_mode: Option<String>,

    /// How the RTK base was set up
    #[arg(long)]
    pub base_method: Option<String>,

    /// Drone model
    #[arg(long)]
    pub drone_model: Option<String>,

    /// Aircraft ID or serial number
    #[arg(long)]
    pub aircraft_id: Option<String>,

    /// Payload carried
    #[arg(long)]
    pub payload: Option<String>,

    /// Mission type
    #[arg(long)]
    pub mission_type: Option<String>,

    /// Altitude above ground in metres
    #[arg(long)]
    pub altitude_agl: Option<String>,

    /// Speed in m/s
    #[arg(long)]
    pub speed: Option<String>,

    /// Number of photos taken
    #[arg(long)]
    pub photos: Option<String>,

    /// Maximum height reached in metres
    #[arg(long)]
    pub max_height: Option<String>,

    /// Incidents or anomalies
    #[arg(long)]
    pub incidents: Option<String>,

    /// Free-text notes
    #[arg(long)]
    pub notes: Option<String>,

    /// Where the flight data was stored
    #[arg(long)]
    pub storage_path: Option<String>,
}

impl RecordForm {
    /// Build a record from this form.
    ///
    /// Every text field is trimmed. The flight name is required; the event
    /// time defaults to `now`; provider, timezone, identity and routing hints
    /// come from `settings`, falling back to `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn into_record(
        self,
        kind: EventKind,
        settings: &Settings,
        defaults: &DefaultsConfig,
        now: DateTime<Utc>,
    ) -> Result<FlightEventRecord> {
        let flight_name = text(self.flight_name);
        if flight_name.is_empty() {
            return Err(Error::validation("Flight Name", "enter a flight name"));
        }

        let now = now.trunc_subsecs(3);
        let timezone = settings.effective_timezone(defaults);
        let event_time = parse_event_time(&text(self.time), timezone, now)?;

        let mut record = FlightEventRecord::new(kind, flight_name, now);
        record.provider = settings.provider;
        record.timezone = timezone.to_string();
        record.user_email = settings.user_email().unwrap_or_default().to_string();
        record.target_spreadsheet = settings.spreadsheet_id.trim().to_string();
        record.target_sheet = settings.sheet_name.trim().to_string();

        match kind {
            EventKind::Start => record.start_time = event_time,
            EventKind::End => record.end_time = event_time,
        }

        record.project = text(self.project);
        record.pilot_name = text(self.pilot);
        record.observer = text(self.observer);
        record.takeoff_lat = number("Takeoff Lat", self.lat, Some(-90.0..=90.0))?;
        record.takeoff_lon = number("Takeoff Lon", self.lon, Some(-180.0..=180.0))?;
        record.wind_speed = number("Start Wind (m/s)", self.wind_speed, Some(0.0..=f64::MAX))?;
        record.wind_direction = number("Start Wind Dir (°)", self.wind_dir, Some(0.0..=360.0))?;
        record.rtk_mode = text(self.rtk_mode);
        record.base_method = text(self.base_method);
        record.drone_model = text(self.drone_model);
        record.aircraft_id = text(self.aircraft_id);
        record.payload = text(self.payload);
        record.mission_type = text(self.mission_type);
        record.altitude_agl = number("Altitude AGL (m)", self.altitude_agl, None)?;
        record.speed = number("Speed (m/s)", self.speed, Some(0.0..=f64::MAX))?;
        record.photos = number("Photos (#)", self.photos, None)?;
        record.max_height = number("Max Height (m)", self.max_height, None)?;
        record.incidents = text(self.incidents);
        record.notes = text(self.notes);
        record.storage_path = text(self.storage_path);

        Ok(record)
    }
}

fn text(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Parse an optional numeric field; blank means unset.
fn number<T>(
    field: &'static str,
    value: Option<String>,
    range: Option<RangeInclusive<f64>>,
) -> Result<Option<T>>
where
    T: FromStr + Copy + Into<f64>,
{
    let raw = text(value);
    if raw.is_empty() {
        return Ok(None);
    }

    let parsed: T = raw
        .parse()
        .map_err(|_| Error::validation(field, format!("not a number: {raw}")))?;

    let as_f64: f64 = parsed.into();
    if !as_f64.is_finite() {
        return Err(Error::validation(field, format!("not a finite number: {raw}")));
    }
    if let Some(range) = range {
        if !range.contains(&as_f64) {
            return Err(Error::validation(
                field,
                format!("{raw} is outside {}..={}", range.start(), range.end()),
            ));
        }
    }

    Ok(Some(parsed))
}

/// Normalize an event time to ISO-8601 UTC with millisecond precision.
///
/// Blank input means `now`. Layouts without an offset are wall-clock time in
/// `timezone`, the zone stamped on the record.
fn parse_event_time(raw: &str, timezone: &str, now: DateTime<Utc>) -> Result<String> {
    if raw.is_empty() {
        return Ok(iso(now));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(iso(dt.with_timezone(&Utc)));
    }

    let naive = LOCAL_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| Error::validation("Event Time", format!("unrecognized time: {raw}")))?;

    let zone: Tz = timezone
        .parse()
        .map_err(|_| Error::validation("Timezone", format!("unknown timezone: {timezone}")))?;

    let local = zone
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| Error::validation("Event Time", format!("{raw} does not exist in {timezone}")))?;

    Ok(iso(local.with_timezone(&Utc)))
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
