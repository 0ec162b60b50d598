//! User settings.
//!
//! Settings are the pilot's own preferences (which provider, which
//! destination, which timezone) and are persisted in the local store next to
//! the queue, independently of it. They are read on every operation that
//! needs them and written only on an explicit save.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{DefaultsConfig, SyncConfig};
use crate::error::Result;
use crate::record::Provider;
use crate::storage::{lock, SharedStorage};
use crate::sync::{Destination, TransportMode};

/// Storage key for the serialized settings document.
pub const SETTINGS_KEY: &str = "dlb_settings_v1";

/// A bearer token obtained out of band from the identity provider.
///
/// The token never appears in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no token is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("AccessToken(<unset>)")
        } else {
            f.write_str("AccessToken(***)")
        }
    }
}

/// The pilot's persisted preferences.
///
/// Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Selected backend.
    #[serde(deserialize_with = "crate::record::lenient_provider")]
    pub provider: Option<Provider>,
    /// Apps Script web app URL (Google path).
    pub google_endpoint: String,
    /// OneDrive item id of the workbook (Microsoft path).
    pub ms_drive_item_id: String,
    /// Excel table receiving rows (Microsoft path).
    pub ms_table_name: String,
    /// IANA timezone stamped on new records.
    pub timezone: String,
    /// Email of the signed-in user, stamped on outgoing records.
    pub user_email: String,
    /// Microsoft Graph access token.
    pub ms_access_token: AccessToken,
    /// Spreadsheet id routing hint for the Apps Script.
    pub spreadsheet_id: String,
    /// Sheet (tab) routing hint for the Apps Script.
    pub sheet_name: String,
}

impl Settings {
    /// The timezone to stamp on records, falling back to the configured default.
    #[must_use]
    pub fn effective_timezone<'a>(&'a self, defaults: &'a DefaultsConfig) -> &'a str {
        non_empty(&self.timezone).unwrap_or(&defaults.timezone)
    }

    /// The Excel table name, falling back to the configured default.
    #[must_use]
    pub fn effective_table_name<'a>(&'a self, defaults: &'a DefaultsConfig) -> &'a str {
        non_empty(&self.ms_table_name).unwrap_or(&defaults.table_name)
    }

    /// The signed-in user's email, if any.
    #[must_use]
    pub fn user_email(&self) -> Option<&str> {
        non_empty(&self.user_email)
    }

    /// Resolve the destination records should be delivered to.
    ///
    /// With no provider selected, a configured Apps Script endpoint is used.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the destination is missing or
    /// incomplete. No network access happens here.
    pub fn destination(
        &self,
        mode: TransportMode,
        sync: &SyncConfig,
        defaults: &DefaultsConfig,
    ) -> std::result::Result<Destination, String> {
        match self.provider {
            Some(Provider::Microsoft) => self.graph_destination(sync, defaults),
            Some(Provider::Google) => self.apps_script_destination(mode),
            None if non_empty(&self.google_endpoint).is_some() => {
                self.apps_script_destination(mode)
            }
            None => Err("no destination configured: choose a provider and set its endpoint".into()),
        }
    }

    fn apps_script_destination(&self, mode: TransportMode) -> std::result::Result<Destination, String> {
        let raw = non_empty(&self.google_endpoint)
            .ok_or_else(|| "missing Google endpoint (Apps Script web app URL)".to_string())?;
        let endpoint = reqwest::Url::parse(raw)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| format!("Google endpoint is not an http(s) URL: {raw}"))?;

        if !apps_script_pattern().is_match(raw) {
            warn!(endpoint = %raw, "Endpoint does not look like an Apps Script web app URL");
        }

        Ok(Destination::AppsScript {
            endpoint,
            mode,
            spreadsheet_id: self.spreadsheet_id.trim().to_string(),
            sheet_name: self.sheet_name.trim().to_string(),
        })
    }

    fn graph_destination(
        &self,
        sync: &SyncConfig,
        defaults: &DefaultsConfig,
    ) -> std::result::Result<Destination, String> {
        let drive_item_id = non_empty(&self.ms_drive_item_id)
            .ok_or_else(|| "missing OneDrive drive item id".to_string())?;
        if !drive_item_pattern().is_match(drive_item_id) {
            return Err(format!("invalid OneDrive drive item id: {drive_item_id}"));
        }

        let table_name = self.effective_table_name(defaults).trim();
        if table_name.len() > 255 || !table_name_pattern().is_match(table_name) {
            return Err(format!("invalid Excel table name: {table_name}"));
        }

        if self.ms_access_token.is_empty() {
            return Err("not signed in to Microsoft (no access token)".to_string());
        }

        let base_url = reqwest::Url::parse(&sync.graph_base_url)
            .map_err(|e| format!("invalid Graph base URL {}: {e}", sync.graph_base_url))?;

        Ok(Destination::Graph {
            base_url,
            drive_item_id: drive_item_id.to_string(),
            table_name: table_name.to_string(),
            access_token: self.ms_access_token.clone(),
        })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn apps_script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://script\.google(usercontent)?\.com/(a/[^/]+/)?macros/s/[A-Za-z0-9_-]+/(exec|dev)")
            .expect("valid Apps Script pattern")
    })
}

fn drive_item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9!_-]+$").expect("valid drive item pattern"))
}

/// Excel table names start with a letter, underscore or backslash and
/// continue with letters, digits, underscores, periods or backslashes.
fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_\\][A-Za-z0-9_.\\]*$").expect("valid table name pattern")
    })
}

/// Persistent store for [`Settings`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    storage: SharedStorage,
}

impl SettingsStore {
    /// Create a settings store over a shared storage handle.
    #[must_use]
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Load the saved settings.
    ///
    /// A missing or unreadable document yields default settings.
    #[must_use]
    pub fn load(&self) -> Settings {
        let raw = match lock(&self.storage).get(SETTINGS_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read settings; using defaults");
                return Settings::default();
            }
        };

        raw.map_or_else(Settings::default, |raw| {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Stored settings are unreadable; using defaults");
                Settings::default()
            })
        })
    }

    /// Save `settings`, replacing whatever was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be serialized or written.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        lock(&self.storage).set(SETTINGS_KEY, &json)?;
        info!("Settings saved");
        Ok(())
    }

    /// Load, modify and save the settings in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated settings cannot be written.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let mut settings = self.load();
        change(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }

    /// Forget the signed-in identity (email and access token).
    ///
    /// # Errors
    ///
    /// Returns an error if the updated settings cannot be written.
    pub fn sign_out(&self) -> Result<Settings> {
        self.update(|s| {
            s.user_email.clear();
            s.ms_access_token = AccessToken::default();
        })
    }
}
