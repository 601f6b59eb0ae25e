//! CLI smoke entry point.
//!
//! # Responsibility
//! - Load configuration from the environment and open the database.
//! - Print record counts so store wiring can be checked without a frontend.

use finvault_core::db::open_from_config;
use finvault_core::{
    init_logging, Bill, RecordRepository, RecordStore, StoreConfig, Subscription,
};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("finvault: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = StoreConfig::from_env().map_err(|err| err.to_string())?;

    if let Some(log_dir) = &config.log_dir {
        let log_dir = log_dir
            .to_str()
            .ok_or_else(|| format!("log dir `{}` is not valid UTF-8", log_dir.display()))?;
        init_logging(config.log_level, log_dir)?;
    }

    let conn = open_from_config(&config).map_err(|err| err.to_string())?;
    let bills = RecordStore::<Bill>::try_with_options(&conn, config.transactions.clone())
        .map_err(|err| err.to_string())?;
    let subscriptions =
        RecordStore::<Subscription>::try_with_options(&conn, config.transactions.clone())
            .map_err(|err| err.to_string())?;

    let live_bills = bills.count(false).map_err(|err| err.to_string())?;
    let all_bills = bills.count(true).map_err(|err| err.to_string())?;
    let live_subscriptions = subscriptions.count(false).map_err(|err| err.to_string())?;
    let all_subscriptions = subscriptions.count(true).map_err(|err| err.to_string())?;

    info!(
        "event=cli_summary module=cli status=ok bills_live={} subscriptions_live={}",
        live_bills, live_subscriptions
    );
    println!("finvault_core version={}", finvault_core::core_version());
    println!("bills live={live_bills} total={all_bills}");
    println!("subscriptions live={live_subscriptions} total={all_subscriptions}");
    Ok(())
}
