//! Current wind at the takeoff point.
//!
//! Used to pre-fill the wind fields of a start record. A failed lookup never
//! prevents a record from being queued.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Wind observed at 10 m above ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindReading {
    /// Speed in metres per second.
    pub speed_ms: f64,
    /// Direction the wind blows from, in degrees.
    pub direction_deg: f64,
}

/// A source of current wind conditions.
#[async_trait]
pub trait WindLookup: Send + Sync + fmt::Debug {
    /// Current wind at the given position.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unreachable or answers with
    /// something unusable.
    async fn current_wind(&self, lat: f64, lon: f64) -> Result<WindReading>;
}

/// Open-Meteo forecast API client.
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentWind,
}

#[derive(Deserialize)]
struct CurrentWind {
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

impl OpenMeteo {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid weather URL {base_url}: {e}")))?;
        let mut builder =
            Client::builder().user_agent(concat!("dronelog/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build().map_err(Error::HttpClient)?,
            base_url,
        })
    }

    fn forecast_url(&self, lat: f64, lon: f64) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::config(format!("weather URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "forecast"]);
        url.query_pairs_mut()
            .append_pair("latitude", &lat.to_string())
            .append_pair("longitude", &lon.to_string())
            .append_pair("current", "wind_speed_10m,wind_direction_10m")
            .append_pair("wind_speed_unit", "ms");
        Ok(url)
    }
}

#[async_trait]
impl WindLookup for OpenMeteo {
    async fn current_wind(&self, lat: f64, lon: f64) -> Result<WindReading> {
        let url = self.forecast_url(lat, lon)?;
        debug!(url = %url, "Looking up current wind");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::lookup(format!("weather service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::lookup(format!("weather service returned HTTP {status}")));
        }

        let forecast: ForecastResponse = response
            .json()
            .await
            .map_err(|e| Error::lookup(format!("unexpected weather response: {e}")))?;

        Ok(WindReading {
            speed_ms: forecast.current.wind_speed_10m,
            direction_deg: forecast.current.wind_direction_10m,
        })
    }
}
