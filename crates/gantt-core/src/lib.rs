pub mod buckets;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod edit;
pub mod lanes;
pub mod layout;
pub mod normalize;
pub mod render;
pub mod schedule;
pub mod source;
pub mod task;
pub mod viewport;
pub mod window;

use std::ffi::OsString;

use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use crate::layout::{
  Layout,
  LayoutEngine,
  ViewState
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
    "starting gantt CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.ganttrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let settings =
    config::TimelineSettings::from_config(
      &cfg
    );
  let timezone =
    datetime::resolve_timezone(
      settings.timezone.as_deref()
    );

  let renderer =
    render::Renderer::new(&cfg, timezone)?;
  let inv =
    cli::Invocation::parse(cli.rest)?;

  let mut session =
    commands::Session::new(
      cfg,
      settings,
      timezone,
      Utc::now()
    )
    .with_view_overrides(
      cli.scale, cli.offset
    );

  commands::dispatch(
    &mut session,
    &renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
