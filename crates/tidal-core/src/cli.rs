use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use tidal_shared::datetime::parse_wire_datetime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::ViewMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("empty key in override: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

fn parse_expiry(s: &str) -> Result<DateTime<Utc>, String> {
    parse_wire_datetime(s).ok_or_else(|| format!("unrecognized date: {s}"))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tidal",
    version,
    about = "Tidal: live task list client",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Config file; defaults to $TIDAL_CONFIG or the user config dir.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Override a config key, e.g. `--set page.size=50`.
    #[arg(
        long = "set",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub set: Vec<KeyVal>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Live view kept current by the push channel.
    Watch {
        #[arg(long, value_enum)]
        mode: Option<ViewMode>,
    },
    /// Create a task.
    Add {
        title: String,
        #[arg(long, short = 'd')]
        description: Option<String>,
        #[arg(long, value_parser = parse_expiry)]
        expires: Option<DateTime<Utc>>,
    },
    /// Print one page of tasks.
    Ls {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print analytics counters.
    Stats,
}

impl GlobalCli {
    /// `watch` when no subcommand was given.
    pub fn command_or_default(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Watch { mode: None })
    }

    pub fn overrides(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.set
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Command, GlobalCli, KeyVal};
    use crate::config::ViewMode;

    #[test]
    fn key_val_requires_equals_and_key() {
        let kv: KeyVal = "page.size = 50".parse().expect("parse");
        assert_eq!(kv.key, "page.size");
        assert_eq!(kv.value, "50");
        assert!("page.size".parse::<KeyVal>().is_err());
        assert!("=50".parse::<KeyVal>().is_err());
    }

    #[test]
    fn defaults_to_watch() {
        let cli = GlobalCli::parse_from(["tidal", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command_or_default(), Command::Watch { mode: None });
    }

    #[test]
    fn parses_subcommands_and_overrides() {
        let cli = GlobalCli::parse_from([
            "tidal",
            "--set",
            "color=off",
            "--set",
            "view.mode=paged",
            "watch",
            "--mode",
            "scroll",
        ]);
        assert_eq!(
            cli.overrides().collect::<Vec<_>>(),
            vec![
                ("color".to_string(), "off".to_string()),
                ("view.mode".to_string(), "paged".to_string()),
            ]
        );
        assert_eq!(
            cli.command_or_default(),
            Command::Watch {
                mode: Some(ViewMode::Scroll)
            }
        );

        let add = GlobalCli::parse_from([
            "tidal",
            "add",
            "write report",
            "--expires",
            "2026-03-01",
        ]);
        let Some(Command::Add { title, expires, .. }) = add.command else {
            panic!("expected add");
        };
        assert_eq!(title, "write report");
        assert!(expires.is_some());
    }

    #[test]
    fn rejects_bad_expiry() {
        assert!(
            GlobalCli::try_parse_from(["tidal", "add", "x", "--expires", "someday"]).is_err()
        );
    }
}
