//! habitdeck: load the person/habit/event hierarchy and print the dashboard.
//!
//! `--watch` keeps running and reprints after every periodic refresh
//! (requires `refreshIntervalSecs` or `--refresh-interval-secs`).

use std::sync::Arc;

use clap::Parser;

use habitdeck::cli::Cli;
use habitdeck::config::{load_config, load_config_from};
use habitdeck::error::SyncError;
use habitdeck::poller::run_refresh_poller;
use habitdeck::session::Session;

fn print_dashboard(session: &Session) {
    println!("== Persons ==");
    for line in session.dashboard_lines() {
        println!("{}", line);
    }
    for scope in session.analytics().visible_scopes() {
        if let Some(view) = session.analytics().view(&scope) {
            print!("\n{}", view);
        }
    }
    println!("\n== Log ==");
    for entry in session.log().entries() {
        println!("{}", entry.formatted());
    }
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    cli.apply_to(&mut config);
    if cli.watch && config.refresh_interval_secs.is_none() {
        return Err(SyncError::Config(
            "--watch needs a refresh interval (HABITDECK_REFRESH_INTERVAL_SECS)".to_string(),
        ));
    }

    let session = Arc::new(Session::from_config(config)?);

    println!("== Services ==");
    for (name, up) in session.service_status().await.rows() {
        println!("{}: {}", name, if up { "up" } else { "down" });
    }

    if let Err(e) = session.init().await {
        log::warn!("Initial load failed: {}", e);
    }
    for scope in cli.scopes() {
        session.show_analytics(scope).await;
    }

    print_dashboard(&session);

    if cli.watch {
        run_refresh_poller(session, |session, _| print_dashboard(session)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("habitdeck: {}\n{}", e, e.recovery_suggestion());
        std::process::exit(1);
    }
}
