use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::config::Settings;

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub interval: Option<Duration>,
    pub no_ping: bool,
    pub filter: Option<String>,
    pub source: Option<String>,
    pub list_sources: bool,
    pub config: Option<PathBuf>,
}

impl CliArgs {
    /// Command line flags win over the settings file.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(interval) = self.interval {
            settings.interval_ms = interval.as_millis().max(1) as u64;
        }
        if self.no_ping {
            settings.ping_enabled = false;
        }
        if let Some(ref filter) = self.filter {
            settings.filter = Some(filter.clone());
        }
        if let Some(ref source) = self.source {
            settings.source = Some(source.clone());
        }
        settings
    }
}

fn build_command() -> Command {
    Command::new("pingtrack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live per-process view of network connections with latency and bandwidth")
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .help("Scan interval, e.g. 500ms, 3s, 1m (default 3s)")
                .value_name("DURATION")
                .num_args(1)
        )
        .arg(
            Arg::new("no-ping")
                .long("no-ping")
                .help("Disable latency probes (faster, no TCP connects)")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("filter")
                .short('f')
                .long("filter")
                .help("Initial app name filter (case-insensitive substring match)")
                .value_name("NAME")
                .num_args(1)
        )
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .help("Connection source to use (see --list-sources)")
                .value_name("SOURCE")
                .num_args(1)
        )
        .arg(
            Arg::new("list-sources")
                .long("list-sources")
                .help("List connection sources and exit")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Settings file (default: <config dir>/pingtrack/config.json)")
                .value_name("PATH")
                .num_args(1)
        )
}

fn args_from(matches: &ArgMatches) -> CliArgs {
    let mut args = CliArgs::default();

    if let Some(interval_str) = matches.get_one::<String>("interval") {
        match parse_duration(interval_str) {
            Some(interval) => args.interval = Some(interval),
            None => eprintln!("Warning: Invalid interval '{}', ignoring", interval_str),
        }
    }

    args.no_ping = matches.get_flag("no-ping");
    args.list_sources = matches.get_flag("list-sources");
    args.filter = matches.get_one::<String>("filter").cloned();
    args.source = matches.get_one::<String>("source").cloned();
    args.config = matches.get_one::<String>("config").map(PathBuf::from);

    args
}

pub fn parse_args() -> CliArgs {
    args_from(&build_command().get_matches())
}

/// Parses "500ms", "3s", "1.5s", "2m" or a bare number of seconds.
/// Zero and negative durations are rejected.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();

    let (number, scale) = if let Some(ms) = input.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(s) = input.strip_suffix('s') {
        (s, 1.0)
    } else if let Some(m) = input.strip_suffix('m') {
        (m, 60.0)
    } else {
        (input.as_str(), 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value * scale))
}
