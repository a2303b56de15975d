//! Command-line arguments and environment overrides.

use std::path::PathBuf;

use clap::Parser;

use crate::analytics::AnalyticsScope;
use crate::config::Config;

/// habitdeck - admin dashboard for persons, habits and habit events
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "habitdeck")]
#[command(about = "Load the person/habit/event hierarchy and print the dashboard")]
pub struct Cli {
    /// Config file (default: ~/.habitdeck/config.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Show analytics for a person; repeat for several persons
    #[arg(long = "person", value_name = "PERSON_ID")]
    pub persons: Vec<String>,

    /// Show global analytics
    #[arg(long)]
    pub global: bool,

    /// Keep running and reprint after every periodic refresh
    #[arg(long)]
    pub watch: bool,

    /// Backend base URL (overrides the config file)
    #[arg(long, env = "HABITDECK_API_URL")]
    pub api_url: Option<String>,

    /// Seconds between full refreshes, 0 disables (overrides the config file)
    #[arg(long, env = "HABITDECK_REFRESH_INTERVAL_SECS")]
    pub refresh_interval_secs: Option<u64>,
}

impl Cli {
    /// Apply the overrides given on the command line or in the environment.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(url) = self
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            config.api_url = url.to_string();
        }
        if let Some(secs) = self.refresh_interval_secs {
            config.refresh_interval_secs = (secs > 0).then_some(secs);
        }
    }

    /// Analytics scopes requested on the command line, global first.
    pub fn scopes(&self) -> Vec<AnalyticsScope> {
        let global = self.global.then_some(AnalyticsScope::Global);
        global
            .into_iter()
            .chain(self.persons.iter().cloned().map(AnalyticsScope::Person))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("habitdeck").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_and_repeated_persons() {
        let cli = parse(&["--person", "p1", "--global", "--person", "p2", "--watch"]).unwrap();
        assert_eq!(cli.persons, vec!["p1", "p2"]);
        assert!(cli.global && cli.watch);
        assert_eq!(
            cli.scopes(),
            vec![
                AnalyticsScope::Global,
                AnalyticsScope::Person("p1".into()),
                AnalyticsScope::Person("p2".into()),
            ]
        );
    }

    #[test]
    fn test_unknown_or_incomplete_args_rejected() {
        assert!(parse(&["--person"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["--refresh-interval-secs", "soon"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = parse(&[
            "--api-url",
            " http://10.0.0.2:5000 ",
            "--refresh-interval-secs",
            "90",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config.api_url, "http://10.0.0.2:5000");
        assert_eq!(config.refresh_interval_secs, Some(90));

        let off = parse(&["--refresh-interval-secs", "0", "--api-url", "  "]).unwrap();
        off.apply_to(&mut config);
        assert_eq!(config.refresh_interval_secs, None);
        assert_eq!(config.api_url, "http://10.0.0.2:5000");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli {
            config: None,
            persons: Vec::new(),
            global: false,
            watch: false,
            api_url: None,
            refresh_interval_secs: None,
        };
        let mut config = Config {
            refresh_interval_secs: Some(30),
            ..Config::default()
        };
        cli.apply_to(&mut config);
        assert_eq!(config.refresh_interval_secs, Some(30));
        assert_eq!(config.api_url, Config::default().api_url);
    }
}
