pub mod aggregate;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod entity;
pub mod interval;
pub mod preferences;
pub mod reminder;
pub mod render;
pub mod window;

use std::ffi::OsString;

use anyhow::Context;
use clap::{
  CommandFactory,
  Parser
};
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting cadence CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let Some(command) = cli.command
  else {
    cli::GlobalCli::command()
      .print_help()?;
    return Ok(());
  };

  let mut cfg = config::Config::load(
    cli.cadencerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let mut session =
    commands::Session::new(
      cfg, data_dir
    );

  commands::dispatch(
    &mut session,
    &mut renderer,
    command
  )?;

  info!("done");
  Ok(())
}
