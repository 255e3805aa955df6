use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow,
  bail
};
use chrono_tz::Tz;
use clap::ValueEnum;
use tracing::{
  debug,
  info,
  trace,
  warn
};
use url::Url;

use crate::channel::ChannelConfig;
use crate::store::WindowPolicy;

pub const CONFIG_ENV: &str =
  "TIDAL_CONFIG";
pub const API_URL_ENV: &str =
  "TIDAL_API_URL";
pub const CHANNEL_URL_ENV: &str =
  "TIDAL_CHANNEL_URL";

const DEFAULTS: [(&str, &str); 10] = [
  ("api.url", "http://localhost:8001"),
  (
    "channel.url",
    "ws://localhost:8001/ws/"
  ),
  ("view.mode", "scroll"),
  ("window.size", "60"),
  ("window.cleanup_threshold", "80"),
  ("page.size", "20"),
  ("http.timeout_secs", "30"),
  ("channel.backoff_max_secs", "30"),
  ("display.timezone", "UTC"),
  ("color", "on")
];

/// Flat dotted-key view of every
/// configuration layer.
#[derive(Debug, Clone)]
pub struct Config {
  map: BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  pub fn defaults() -> Self {
    Config {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }

  /// Defaults, then the config file,
  /// then environment URLs. `env` is
  /// the variable lookup, normally
  /// [`process_env`].
  #[tracing::instrument(skip(env))]
  pub fn load(
    config_override: Option<&Path>,
    env: impl Fn(&str) -> Option<String>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    match resolve_config_path(
      config_override,
      &env
    ) {
      | Some(path) => {
        info!(config = %path.display(), "loading config file");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no config file found; using \
           defaults"
        );
      }
    }

    for (var, key) in [
      (API_URL_ENV, "api.url"),
      (CHANNEL_URL_ENV, "channel.url")
    ] {
      match env(var) {
        | Some(value)
          if !value.trim().is_empty() =>
        {
          debug!(var, key, "url taken from environment");
          cfg.map.insert(
            key.to_string(),
            value.trim().to_string()
          );
        }
        | _ => {
          warn!(
            var,
            fallback = ?cfg.get(key),
            "environment variable not \
             set; using configured url"
          );
        }
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      debug!(key = %key, value = %value, "applying override");
      self.map.insert(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  fn require(
    &self,
    key: &str
  ) -> anyhow::Result<String> {
    self.get(key).ok_or_else(|| {
      anyhow!(
        "missing config key {key}"
      )
    })
  }

  fn parse_number<T>(
    &self,
    key: &str
  ) -> anyhow::Result<T>
  where
    T: std::str::FromStr,
    T::Err: std::fmt::Display
  {
    let raw = self.require(key)?;
    raw.trim().parse::<T>().map_err(
      |err| {
        anyhow!(
          "invalid value for {key}: \
           {raw:?} ({err})"
        )
      }
    )
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    let table = toml::from_str::<
      toml::Table
    >(&text)
    .with_context(|| {
      format!(
        "invalid TOML in {}",
        path.display()
      )
    })?;

    let mut flat = BTreeMap::new();
    flatten_table("", &table, &mut flat)
      .with_context(|| {
        format!(
          "unsupported value in {}",
          path.display()
        )
      })?;
    for (key, value) in flat {
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    self.loaded_files.push(path);
    Ok(())
  }
}

/// Reads a real process environment
/// variable.
pub fn process_env(
  name: &str
) -> Option<String> {
  std::env::var(name).ok()
}

fn resolve_config_path(
  config_override: Option<&Path>,
  env: &impl Fn(&str) -> Option<String>
) -> Option<PathBuf> {
  if let Some(path) = config_override
  {
    return Some(path.to_path_buf());
  }

  if let Some(from_env) =
    env(CONFIG_ENV)
  {
    if from_env == "/dev/null" {
      return None;
    }
    return Some(PathBuf::from(
      from_env
    ));
  }

  let candidate = dirs::config_dir()?
    .join("tidal")
    .join("config.toml");
  candidate
    .exists()
    .then_some(candidate)
}

fn flatten_table(
  prefix: &str,
  table: &toml::Table,
  out: &mut BTreeMap<String, String>
) -> anyhow::Result<()> {
  for (name, value) in table {
    let key = if prefix.is_empty() {
      name.clone()
    } else {
      format!("{prefix}.{name}")
    };
    let text = match value {
      | toml::Value::Table(inner) => {
        flatten_table(&key, inner, out)?;
        continue;
      }
      | toml::Value::String(s) => {
        s.clone()
      }
      | toml::Value::Integer(n) => {
        n.to_string()
      }
      | toml::Value::Float(n) => {
        n.to_string()
      }
      | toml::Value::Boolean(b) => {
        b.to_string()
      }
      | other => {
        bail!(
          "key {key} has unsupported \
           type {}",
          other.type_str()
        )
      }
    };
    out.insert(key, text);
  }
  Ok(())
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  ValueEnum,
)]
pub enum ViewMode {
  /// Infinite scroll with a bounded
  /// window.
  Scroll,
  /// One page at a time.
  Paged
}

/// Validated, typed configuration.
#[derive(Debug, Clone)]
pub struct Settings {
  pub api_url:      Url,
  pub channel_url:  Url,
  pub mode:         ViewMode,
  pub window:       WindowPolicy,
  pub page_size:    usize,
  pub http_timeout: Duration,
  pub backoff_max:  Duration,
  pub timezone:     Tz,
  pub color:        bool
}

impl Settings {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let api_url =
      parse_url(cfg, "api.url")?;
    if !matches!(
      api_url.scheme(),
      "http" | "https"
    ) {
      bail!(
        "api.url must use http or \
         https, got {api_url}"
      );
    }

    let channel_url =
      parse_url(cfg, "channel.url")?;
    if !matches!(
      channel_url.scheme(),
      "ws" | "wss"
    ) {
      bail!(
        "channel.url must use ws or \
         wss, got {channel_url}"
      );
    }

    let raw_mode =
      cfg.require("view.mode")?;
    let mode = ViewMode::from_str(
      raw_mode.trim(),
      true
    )
    .map_err(|_| {
      anyhow!(
        "view.mode must be scroll or \
         paged, got {raw_mode:?}"
      )
    })?;

    let window = WindowPolicy::new(
      cfg.parse_number("window.size")?,
      cfg.parse_number(
        "window.cleanup_threshold"
      )?
    )
    .context("invalid window settings")?;

    let page_size: usize =
      cfg.parse_number("page.size")?;
    if page_size == 0 {
      bail!(
        "page.size must be greater \
         than zero"
      );
    }

    let http_timeout =
      Duration::from_secs(
        cfg.parse_number(
          "http.timeout_secs"
        )?
      );
    let backoff_max =
      Duration::from_secs(
        cfg.parse_number(
          "channel.backoff_max_secs"
        )?
      );

    let raw_tz =
      cfg.require("display.timezone")?;
    let timezone = raw_tz
      .trim()
      .parse::<Tz>()
      .map_err(|err| {
        anyhow!(
          "invalid display.timezone \
           {raw_tz:?}: {err}"
        )
      })?;

    let color = cfg
      .get_bool("color")
      .unwrap_or(true);

    Ok(Self {
      api_url,
      channel_url,
      mode,
      window,
      page_size,
      http_timeout,
      backoff_max,
      timezone,
      color
    })
  }

  pub fn channel_config(
    &self
  ) -> ChannelConfig {
    let mut config = ChannelConfig::new(
      self.channel_url.clone()
    );
    config.backoff_max = self
      .backoff_max
      .max(config.backoff_initial);
    config
  }
}

fn parse_url(
  cfg: &Config,
  key: &str
) -> anyhow::Result<Url> {
  let raw = cfg.require(key)?;
  Url::parse(raw.trim()).with_context(
    || {
      format!(
        "invalid {key}: {raw:?}"
      )
    }
  )
}
