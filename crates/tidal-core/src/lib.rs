pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod render;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tidal"
  );
  debug!(overrides = ?cli.set, "cli config overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref(),
    config::process_env
  )?;
  cfg.apply_overrides(cli.overrides());

  let settings =
    config::Settings::from_config(&cfg)
      .context(
        "invalid configuration"
      )?;
  debug!(
    files = ?cfg.loaded_files,
    mode = ?settings.mode,
    "resolved settings"
  );

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;
  let local = tokio::task::LocalSet::new();
  local.block_on(
    &runtime,
    commands::dispatch(
      &settings,
      cli.command_or_default()
    )
  )?;

  info!("done");
  Ok(())
}
