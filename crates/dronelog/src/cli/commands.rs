//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::form::RecordForm;
use crate::record::Provider;
use crate::settings::{AccessToken, Settings};
use crate::sync::{DeliveryPolicy, TransportMode};

/// Queue commands.
#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Queue the start of a flight
    Start {
        /// Flight details
        #[command(flatten)]
        form: RecordForm,

        /// Fill in wind speed and direction from the takeoff position
        #[arg(long)]
        lookup_wind: bool,
    },

    /// Queue the end of a flight
    End {
        /// Flight details
        #[command(flatten)]
        form: RecordForm,
    },

    /// List pending records
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the number of pending records
    Count,

    /// Discard every pending record
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Delivery policy (defaults to the configured one)
    #[arg(long, value_enum)]
    pub policy: Option<DeliveryPolicy>,

    /// Apps Script transport mode (defaults to the configured one)
    #[arg(long, value_enum)]
    pub transport: Option<TransportMode>,
}

/// Settings commands.
#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Show saved settings
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Change saved settings
    Set(SettingsArgs),

    /// Forget the signed-in email and access token
    SignOut,
}

/// Values for `settings set`. Omitted flags leave the setting unchanged;
/// an empty string clears it.
#[derive(Debug, Clone, Default, Args)]
pub struct SettingsArgs {
    /// Destination provider (google or microsoft)
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Apps Script web app URL
    #[arg(long, value_name = "URL")]
    pub google_endpoint: Option<String>,

    /// Spreadsheet id passed to the Apps Script
    #[arg(long)]
    pub spreadsheet_id: Option<String>,

    /// Sheet name passed to the Apps Script
    #[arg(long)]
    pub sheet_name: Option<String>,

    /// OneDrive item id of the workbook
    #[arg(long, value_name = "ID")]
    pub drive_item_id: Option<String>,

    /// Excel table receiving rows
    #[arg(long, value_name = "NAME")]
    pub table_name: Option<String>,

    /// Microsoft Graph access token
    #[arg(long, value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// IANA timezone stamped on new records
    #[arg(long, value_name = "TZ")]
    pub timezone: Option<String>,

    /// Email stamped on outgoing records
    #[arg(long, value_name = "EMAIL")]
    pub user_email: Option<String>,
}

impl SettingsArgs {
    /// Whether no flag was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.google_endpoint.is_none()
            && self.spreadsheet_id.is_none()
            && self.sheet_name.is_none()
            && self.drive_item_id.is_none()
            && self.table_name.is_none()
            && self.access_token.is_none()
            && self.timezone.is_none()
            && self.user_email.is_none()
    }

    /// Copy every given value into `settings`.
    pub fn apply(self, settings: &mut Settings) {
        if let Some(provider) = self.provider {
            settings.provider = Some(provider);
        }
        let fields = [
            (self.google_endpoint, &mut settings.google_endpoint),
            (self.spreadsheet_id, &mut settings.spreadsheet_id),
            (self.sheet_name, &mut settings.sheet_name),
            (self.drive_item_id, &mut settings.ms_drive_item_id),
            (self.table_name, &mut settings.ms_table_name),
            (self.timezone, &mut settings.timezone),
            (self.user_email, &mut settings.user_email),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value.trim().to_string();
            }
        }
        if let Some(token) = self.access_token {
            settings.ms_access_token = AccessToken::new(token.trim());
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_args_empty() {
        assert!(SettingsArgs::default().is_empty());
        let args = SettingsArgs {
            timezone: Some("UTC".to_string()),
            ..SettingsArgs::default()
        };
        assert!(!args.is_empty());
    }

    #[test]
    fn test_settings_args_apply() {
        let mut settings = Settings {
            sheet_name: "Old".to_string(),
            user_email: "pilot@example.com".to_string(),
            ..Settings::default()
        };
        let args = SettingsArgs {
            provider: Some(Provider::Microsoft),
            drive_item_id: Some(" 01ABC ".to_string()),
            access_token: Some("tok".to_string()),
            user_email: Some(String::new()),
            ..SettingsArgs::default()
        };

        args.apply(&mut settings);
        assert_eq!(settings.provider, Some(Provider::Microsoft));
        assert_eq!(settings.ms_drive_item_id, "01ABC");
        assert_eq!(settings.ms_access_token.expose(), "tok");
        assert_eq!(settings.sheet_name, "Old");
        assert!(settings.user_email.is_empty());
    }
}
