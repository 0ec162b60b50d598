//! `dronelog` - CLI for the offline flight logbook
//!
//! This binary records flight events into the local queue and syncs them to
//! the configured spreadsheet destination.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use dronelog::cli::{
    Cli, Command, ConfigCommand, QueueCommand, SettingsCommand, SyncCommand,
};
use dronelog::settings::AccessToken;
use dronelog::storage::lock;
use dronelog::sync::ProbeOutcome;
use dronelog::weather::OpenMeteo;
use dronelog::{init_logging, Config, EventKind, Logbook, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Queue(cmd) => handle_queue(&open_logbook(config)?, cmd).await,
        Command::Sync(cmd) => handle_sync(&open_logbook(config)?, &cmd).await,
        Command::Probe => handle_probe(&open_logbook(config)?).await,
        Command::Settings(cmd) => handle_settings(&open_logbook(config)?, cmd),
        Command::Status(cmd) => handle_status(&open_logbook(config)?, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_logbook(config: Config) -> anyhow::Result<Logbook> {
    config.validate()?;
    let path = config.database_path();
    Logbook::open(config).with_context(|| format!("failed to open logbook at {}", path.display()))
}

async fn handle_queue(logbook: &Logbook, cmd: QueueCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        QueueCommand::Start {
            mut form,
            lookup_wind,
        } => {
            if lookup_wind {
                let config = logbook.config();
                let lookup = OpenMeteo::new(&config.weather.base_url, config.request_timeout())?;
                logbook.fill_wind(&mut form, &lookup).await;
            }
            queue_event(logbook, EventKind::Start, form)
        }
        QueueCommand::End { form } => queue_event(logbook, EventKind::End, form),
        QueueCommand::List { json } => {
            let records = logbook.queue().read_all();
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No pending records.");
            } else {
                for (index, record) in records.iter().enumerate() {
                    println!(
                        "{index:>3}  {:<5}  {}  {}",
                        record.kind,
                        record.event_time(),
                        record.flight_name
                    );
                }
                println!();
                println!("{} pending", records.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        QueueCommand::Count => {
            println!("{}", logbook.queue().count());
            Ok(ExitCode::SUCCESS)
        }
        QueueCommand::Clear { yes } => {
            let pending = logbook.queue().count();
            if yes {
                logbook.queue().clear()?;
                println!("Discarded {pending} pending records.");
            } else {
                println!("This will discard {pending} pending records without syncing them.");
                println!("Use --yes to confirm.");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn queue_event(
    logbook: &Logbook,
    kind: EventKind,
    form: dronelog::RecordForm,
) -> anyhow::Result<ExitCode> {
    match logbook.queue_event(kind, form) {
        Ok((record, pending)) => {
            println!(
                "Queued {} for \"{}\". {pending} pending.",
                kind.to_string().to_uppercase(),
                record.flight_name
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_validation() => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_sync(logbook: &Logbook, cmd: &SyncCommand) -> anyhow::Result<ExitCode> {
    let mut coordinator = logbook.http_coordinator()?;
    if let Some(policy) = cmd.policy {
        coordinator = coordinator.with_policy(policy);
    }
    if let Some(mode) = cmd.transport {
        coordinator = coordinator.with_transport_mode(mode);
    }

    let outcome = coordinator.sync_all().await;
    println!("{outcome}");

    let pending = logbook.queue().count();
    if pending > 0 {
        println!("{pending} still pending.");
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn handle_probe(logbook: &Logbook) -> anyhow::Result<ExitCode> {
    let outcome = logbook.http_coordinator()?.probe().await;
    println!("{outcome}");
    Ok(match outcome {
        ProbeOutcome::Reachable | ProbeOutcome::Assumed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn handle_settings(logbook: &Logbook, cmd: SettingsCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        SettingsCommand::Show { json } => {
            let settings = masked(logbook.settings().load());
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print_settings(&settings);
            }
        }
        SettingsCommand::Set(args) => {
            if args.is_empty() {
                eprintln!("Nothing to change. See `dronelog settings set --help`.");
                return Ok(ExitCode::FAILURE);
            }
            let settings = logbook.settings().update(|s| args.apply(s))?;
            println!("Settings saved.");
            print_readiness(logbook, &settings);
        }
        SettingsCommand::SignOut => {
            logbook.settings().sign_out()?;
            println!("Signed out.");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn masked(mut settings: Settings) -> Settings {
    if !settings.ms_access_token.is_empty() {
        settings.ms_access_token = AccessToken::new("***");
    }
    settings
}

fn print_settings(settings: &Settings) {
    let provider = settings
        .provider
        .map_or_else(|| "(none)".to_string(), |p| p.to_string());
    println!("Settings");
    println!("========");
    println!();
    println!("  Provider:           {provider}");
    println!("  Timezone:           {}", settings.timezone);
    println!("  User email:         {}", settings.user_email);
    println!();
    println!("[Google]");
    println!("  Endpoint:           {}", settings.google_endpoint);
    println!("  Spreadsheet id:     {}", settings.spreadsheet_id);
    println!("  Sheet name:         {}", settings.sheet_name);
    println!();
    println!("[Microsoft]");
    println!("  Drive item id:      {}", settings.ms_drive_item_id);
    println!("  Table name:         {}", settings.ms_table_name);
    println!("  Access token:       {}", settings.ms_access_token.expose());
}

fn print_readiness(logbook: &Logbook, settings: &Settings) {
    let config = logbook.config();
    match settings.destination(config.sync.transport, &config.sync, &config.defaults) {
        Ok(destination) => println!("Destination: {destination}"),
        Err(reason) => println!("Destination not ready: {reason}"),
    }
}

fn handle_status(logbook: &Logbook, json: bool) -> anyhow::Result<ExitCode> {
    let config = logbook.config();
    let settings = logbook.settings().load();
    let pending = logbook.queue().count();
    let stats = lock(logbook.storage()).stats()?;
    let destination = settings.destination(config.sync.transport, &config.sync, &config.defaults);

    if json {
        let status = serde_json::json!({
            "pending": pending,
            "provider": settings.provider,
            "destination_ready": destination.is_ok(),
            "destination": destination.as_ref().map(ToString::to_string).ok(),
            "destination_error": destination.as_ref().err(),
            "policy": config.sync.policy,
            "transport": config.sync.transport,
            "database_path": config.database_path(),
            "database_size_bytes": stats.db_size_bytes,
            "last_write": stats.last_write,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("dronelog status");
        println!("---------------");
        println!("Pending:       {pending}");
        println!(
            "Provider:      {}",
            settings
                .provider
                .map_or_else(|| "(none)".to_string(), |p| p.to_string())
        );
        match &destination {
            Ok(destination) => println!("Destination:   {destination}"),
            Err(reason) => println!("Destination:   not ready ({reason})"),
        }
        println!("Policy:        {}", config.sync.policy);
        println!("Database:      {}", config.database_path().display());
        if let Some(last_write) = stats.last_write {
            println!("Last write:    {last_write}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Sync]");
                println!("  Policy:             {}", config.sync.policy);
                println!("  Transport:          {}", config.sync.transport);
                println!("  Timeout (secs):     {}", config.sync.request_timeout_secs);
                println!("  Graph base URL:     {}", config.sync.graph_base_url);
                println!();
                println!("[Defaults]");
                println!("  Timezone:           {}", config.defaults.timezone);
                println!("  Table name:         {}", config.defaults.table_name);
                println!();
                println!("[Weather]");
                println!("  Base URL:           {}", config.weather.base_url);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)).and_then(|c| c.validate()) {
                Ok(()) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
