//! Request bodies for each destination.

use serde_json::{json, Map, Value};

use crate::record::{FlightEventRecord, SHEET_HEADERS};

use super::{Destination, Submission};

const USER_EMAIL: &str = "User Email";

/// Body for an Apps Script submission.
///
/// A single record is sent as an object, a batch as an array of objects.
/// `user_email` fills in `User Email` on records that do not carry one.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn apps_script_body(
    submission: Submission<'_>,
    user_email: Option<&str>,
) -> serde_json::Result<Value> {
    match submission {
        Submission::Record(record) => stamped_object(record, user_email).map(Value::Object),
        Submission::Batch(records) => records
            .iter()
            .map(|r| stamped_object(r, user_email).map(Value::Object))
            .collect::<serde_json::Result<Vec<_>>>()
            .map(Value::Array),
    }
}

fn stamped_object(
    record: &FlightEventRecord,
    user_email: Option<&str>,
) -> serde_json::Result<Map<String, Value>> {
    let mut object = record.to_object()?;
    if let Some(email) = user_email {
        let missing = object
            .get(USER_EMAIL)
            .and_then(Value::as_str)
            .map_or(true, |s| s.trim().is_empty());
        if missing {
            object.insert(USER_EMAIL.to_string(), Value::String(email.to_string()));
        }
    }
    Ok(object)
}

/// One table row for `record`, cells in [`SHEET_HEADERS`] order.
///
/// Numbers stay numbers; unset cells are `""`. `Date` is the UTC calendar
/// date the record was captured.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn graph_row(
    record: &FlightEventRecord,
    user_email: Option<&str>,
) -> serde_json::Result<Vec<Value>> {
    let object = stamped_object(record, user_email)?;
    Ok(SHEET_HEADERS
        .iter()
        .map(|header| match *header {
            "Date" => Value::String(record.captured_at.format("%Y-%m-%d").to_string()),
            other => object
                .get(other)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::String(String::new())),
        })
        .collect())
}

/// Body for a Graph `rows/add` call: `{"values": [[...], ...]}`.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn graph_body(
    submission: Submission<'_>,
    user_email: Option<&str>,
) -> serde_json::Result<Value> {
    let rows = submission
        .records()
        .iter()
        .map(|r| graph_row(r, user_email).map(Value::Array))
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(json!({ "values": rows }))
}

/// Body for an Apps Script reachability probe.
///
/// A single-element list flagged as a probe, carrying the routing targets so
/// the script can check it can open them. Graph destinations are probed with
/// a plain `GET` and need no body.
#[must_use]
pub fn probe_body(destination: &Destination) -> Value {
    match destination {
        Destination::AppsScript {
            spreadsheet_id,
            sheet_name,
            ..
        } => json!([{
            "probe": true,
            "provider": "google",
            "targetSpreadsheet": spreadsheet_id,
            "targetSheet": sheet_name,
        }]),
        Destination::Graph {
            drive_item_id,
            table_name,
            ..
        } => json!([{
            "probe": true,
            "provider": "microsoft",
            "targetSpreadsheet": drive_item_id,
            "table": table_name,
        }]),
    }
}
