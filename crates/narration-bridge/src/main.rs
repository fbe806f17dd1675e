//! Narration bridge: generates a narrated episode on the remote service and plays it while
//! it streams in.
//!
//! ## Modes
//! - `stream`: request a generation and play chunks as they arrive, with a filler loop
//!   covering the wait (or, with `--legacy`, fetch the finished file and play it).
//! - `play`: fetch an existing episode and play its chapters in order.

use anyhow::Result;
use clap::Parser;
use narration_bridge::cli::{Args, Command};
use narration_bridge::legacy::EpisodeRef;
use narration_bridge::runtime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,narration_bridge=info,narration_player=info")
        }))
        .init();

    if let Command::ListDevices = args.cmd {
        return runtime::list_devices();
    }

    let cfg = runtime::resolve_config(&args)?;
    match args.cmd {
        Command::ListDevices => Ok(()),
        Command::Stream {
            kind,
            payload,
            token,
            endpoint,
        } => runtime::run_stream(cfg, kind.into(), &payload, &token, &endpoint, true),
        Command::Play {
            id,
            share_id,
            child,
            base,
            token,
        } => {
            let reference = match (id, share_id) {
                (Some(id), _) => EpisodeRef::Id(id),
                (None, Some(share)) => EpisodeRef::Share(share),
                (None, None) => anyhow::bail!("either --id or --share-id is required"),
            };
            runtime::run_play(cfg, reference, child, &token, &base, true)
        }
    }
}
