mod app;
mod cli;
mod config;
mod core;
mod widgets;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;

use app::App;
use cli::parse_args;
use config::Settings;
use crate::core::discovery::{available_sources, select_source};
use crate::core::monitor::ConnectionMonitor;
use crate::core::ping::TcpProber;

fn print_sources() {
    println!("Connection sources:");
    for source in available_sources() {
        let status = if source.available { "available" } else { "unavailable" };
        println!("  {:<10} {:<12} {}", source.name, status, source.description);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging only when asked for; the TUI owns the terminal otherwise
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let args = parse_args();

    if args.list_sources {
        print_sources();
        return Ok(());
    }

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            eprintln!("Warning: {:#}, using defaults", e);
            Settings::default()
        }
    };
    let settings = args.apply(settings);

    let source = select_source(settings.source.as_deref())
        .context("Failed to select a connection source")?;

    let monitor = Arc::new(ConnectionMonitor::new(
        settings.monitor_config(),
        Arc::from(source),
        Arc::new(TcpProber::new()),
    ));
    monitor.start().await;
    if monitor.is_empty() {
        log::warn!("initial scan found no connections");
    } else {
        log::info!("initial scan found {} connections", monitor.len());
    }

    let mut terminal = ratatui::init();

    let app_result = App::new(Arc::clone(&monitor), Handle::current())
        .with_filter(settings.filter.clone())
        .with_tick_rate(settings.refresh())
        .run(&mut terminal);

    ratatui::restore();
    monitor.stop();

    app_result.context("Terminal UI failed")?;

    Ok(())
}
