//! HTTP transport for Apps Script and Microsoft Graph destinations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

use super::payload::{apps_script_body, graph_body, probe_body};
use super::{Delivery, DeliveryError, Destination, Submission, Transport, TransportMode};

/// [`Transport`] over HTTPS using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (e.g. the TLS
    /// backend fails to initialize).
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(concat!("dronelog/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::HttpClient)?;
        Ok(Self { client })
    }

    async fn post_apps_script(
        &self,
        endpoint: &Url,
        mode: TransportMode,
        body: &Value,
    ) -> std::result::Result<Delivery, DeliveryError> {
        match mode {
            TransportMode::Json => {
                let response = self.client.post(endpoint.clone()).json(body).send().await?;
                check_apps_script(response).await
            }
            TransportMode::Opaque => {
                let text = serde_json::to_string(body)?;
                self.client
                    .post(endpoint.clone())
                    .header(CONTENT_TYPE, "text/plain;charset=utf-8")
                    .body(text)
                    .send()
                    .await?;
                Ok(Delivery::Assumed)
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(destination = %destination, records = submission.records().len()))]
    async fn deliver(
        &self,
        destination: &Destination,
        submission: Submission<'_>,
        user_email: Option<&str>,
    ) -> std::result::Result<Delivery, DeliveryError> {
        match destination {
            Destination::AppsScript { endpoint, mode, .. } => {
                let body = apps_script_body(submission, user_email)?;
                self.post_apps_script(endpoint, *mode, &body).await
            }
            Destination::Graph {
                base_url,
                drive_item_id,
                table_name,
                access_token,
            } => {
                let url = graph_table_url(base_url, drive_item_id, table_name, &["rows", "add"])?;
                let body = graph_body(submission, user_email)?;
                debug!(url = %url, "Adding rows to Excel table");
                let response = self
                    .client
                    .post(url)
                    .bearer_auth(access_token.expose())
                    .json(&body)
                    .send()
                    .await?;
                check_graph(response).await
            }
        }
    }

    #[instrument(skip_all, fields(destination = %destination))]
    async fn probe(&self, destination: &Destination) -> std::result::Result<Delivery, DeliveryError> {
        match destination {
            Destination::AppsScript { endpoint, mode, .. } => {
                self.post_apps_script(endpoint, *mode, &probe_body(destination))
                    .await
            }
            Destination::Graph {
                base_url,
                drive_item_id,
                table_name,
                access_token,
            } => {
                let url = graph_table_url(base_url, drive_item_id, table_name, &[])?;
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(access_token.expose())
                    .send()
                    .await?;
                check_graph(response).await
            }
        }
    }
}

/// `{base}/me/drive/items/{item}/workbook/tables('{table}')[/extra...]`
fn graph_table_url(
    base_url: &Url,
    drive_item_id: &str,
    table_name: &str,
    extra: &[&str],
) -> std::result::Result<Url, DeliveryError> {
    let mut url = base_url.clone();
    let table = format!("tables('{table_name}')");
    url.path_segments_mut()
        .map_err(|()| DeliveryError::Encode(format!("Graph base URL cannot be a base: {base_url}")))?
        .pop_if_empty()
        .extend(["me", "drive", "items", drive_item_id, "workbook", table.as_str()])
        .extend(extra);
    Ok(url)
}

/// Interpret an Apps Script response.
///
/// Non-2xx is a rejection, and so is a 2xx HTML page (a sign-in or error
/// page served instead of the script). A JSON body with `ok: false` or an
/// `error` field is a rejection; any other JSON body confirms delivery. A
/// 2xx body that is neither is accepted unconfirmed.
async fn check_apps_script(response: Response) -> std::result::Result<Delivery, DeliveryError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DeliveryError::Rejected {
            status: Some(status.as_u16()),
            reason: format!("Apps Script HTTP {}", status.as_u16()),
        });
    }

    let html = is_html(response.headers());
    let text = response.text().await?;
    let Ok(body) = serde_json::from_str::<Value>(&text) else {
        if html || text.trim_start().starts_with('<') {
            return Err(DeliveryError::Rejected {
                status: Some(status.as_u16()),
                reason: "Apps Script returned an HTML page instead of a result; check the web app's access setting".to_string(),
            });
        }
        debug!("Apps Script response is not JSON; delivery unconfirmed");
        return Ok(Delivery::Assumed);
    };

    if body.get("ok").and_then(Value::as_bool) == Some(false) || has_error(&body) {
        let reason = body
            .get("error")
            .filter(|e| !e.is_null())
            .map_or_else(|| "Apps Script reported ok=false".to_string(), describe);
        return Err(DeliveryError::Rejected {
            status: Some(status.as_u16()),
            reason,
        });
    }

    Ok(Delivery::Confirmed)
}

/// Interpret a Graph response; errors carry `{"error": {"message": ...}}`.
async fn check_graph(response: Response) -> std::result::Result<Delivery, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(Delivery::Confirmed);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string));

    let reason = match message {
        Some(message) => format!("Graph request failed {}: {message}", status.as_u16()),
        None => format!("Graph request failed {}", status.as_u16()),
    };
    Err(DeliveryError::Rejected {
        status: Some(status.as_u16()),
        reason,
    })
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

fn has_error(body: &Value) -> bool {
    body.get("error").is_some_and(|e| !e.is_null() && e != &Value::Bool(false))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_string),
        other => other.to_string(),
    }
}
