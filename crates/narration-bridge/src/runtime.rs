//! CLI runtime helpers.
//!
//! Builds a controller on the real collaborators (CPAL output, WebSocket stream,
//! HTTP episode API) and drives one session to its end.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, select, unbounded};
use narration_player::device;
use narration_player::playback::CpalBackend;
use narration_types::{PlaybackEndReason, PlaybackState};
use serde_json::Value;

use crate::cli::Args;
use crate::config::{Mode, NarrationConfig, load_config, normalize_device_name};
use crate::controller::{Collaborators, NarrationController};
use crate::events::NarrationEvent;
use crate::legacy::{EpisodeRef, HttpEpisodeSource};
use crate::now_playing::{LogNowPlaying, RemoteCommands};
use crate::request::GenerationKind;
use crate::transport::WsConnector;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Config file first, then command-line overrides.
pub fn resolve_config(args: &Args) -> Result<NarrationConfig> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(device) = normalize_device_name(args.device.clone()) {
        cfg.device = Some(device);
    }
    if args.legacy {
        cfg.mode = Mode::Legacy;
    }
    if let Some(ms) = args.stall_timeout_ms {
        cfg.stall_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    Ok(cfg)
}

fn build_controller(cfg: NarrationConfig) -> Result<NarrationController> {
    let parts = Collaborators {
        backend: Arc::new(CpalBackend::new(cfg.device.clone(), cfg.playback.clone())),
        connector: Arc::new(WsConnector {
            read_poll: cfg.read_poll,
            max_message_bytes: cfg.max_message_bytes,
        }),
        episodes: Arc::new(HttpEpisodeSource {
            timeout: cfg.http_timeout,
        }),
        now_playing: Box::new(LogNowPlaying),
    };
    NarrationController::new(cfg, parts).context("start narration engine")
}

/// Generate and play one narration.
pub fn run_stream(
    cfg: NarrationConfig,
    kind: GenerationKind,
    payload: &str,
    token: &str,
    endpoint: &str,
    install_ctrlc: bool,
) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("parse --payload")?;
    let controller = build_controller(cfg)?;
    let events = controller.subscribe();
    let interrupts = interrupt_channel(install_ctrlc);
    spawn_key_reader(controller.remote_commands());

    controller.start(kind, payload, token, endpoint)?;
    wait_for_end(&controller, &events, &interrupts, false)
}

/// Play an existing episode from chapter `child` onwards.
pub fn run_play(
    cfg: NarrationConfig,
    reference: EpisodeRef,
    child: usize,
    token: &str,
    base: &str,
    install_ctrlc: bool,
) -> Result<()> {
    let controller = build_controller(cfg)?;
    let events = controller.subscribe();
    let interrupts = interrupt_channel(install_ctrlc);
    spawn_key_reader(controller.remote_commands());

    controller.play_episode(reference, child, token, base)?;
    wait_for_end(&controller, &events, &interrupts, true)
}

fn interrupt_channel(install: bool) -> Receiver<()> {
    let (tx, rx) = unbounded();
    if install {
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = tx.send(());
        }) {
            tracing::warn!("ctrl-c handler not installed: {e}");
        }
    }
    rx
}

/// `p` pauses, `r` resumes. Lines are read from stdin until it closes.
fn spawn_key_reader(remote: RemoteCommands) {
    let spawned = std::thread::Builder::new()
        .name("narration-keys".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match line.trim() {
                    "p" => {
                        remote.on_pause_requested();
                    }
                    "r" => {
                        remote.on_play_requested();
                    }
                    "" => {}
                    other => tracing::info!(key = other, "unknown key (p = pause, r = resume)"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("key reader not started: {e}");
    }
}

fn wait_for_end(
    controller: &NarrationController,
    events: &Receiver<NarrationEvent>,
    interrupts: &Receiver<()>,
    chapters: bool,
) -> Result<()> {
    loop {
        select! {
            recv(interrupts) -> _ => {
                controller.cancel("interrupted");
                return Ok(());
            }
            recv(events) -> event => match event {
                Ok(NarrationEvent::TranscriptDelta(delta)) => print!("{delta}"),
                Ok(NarrationEvent::Header { title, level }) => {
                    println!("\n== {title} (level {level}) ==");
                }
                Ok(NarrationEvent::FollowUps(prompts)) => {
                    println!();
                    for prompt in prompts {
                        println!("  [{}] {}", prompt.id, prompt.content);
                    }
                }
                Ok(NarrationEvent::Ended { reason, error }) => {
                    if chapters && reason == PlaybackEndReason::Eof && next_chapter_started(events) {
                        continue;
                    }
                    println!();
                    return match error {
                        Some(error) => Err(anyhow!(error)),
                        None => Ok(()),
                    };
                }
                Ok(NarrationEvent::Cancelled { .. }) => return Ok(()),
                Ok(_) => {}
                Err(_) => return Err(anyhow!("narration engine stopped")),
            }
        }
    }
}

/// A following chapter re-enters `Loading` right after the previous one ends.
fn next_chapter_started(events: &Receiver<NarrationEvent>) -> bool {
    loop {
        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(NarrationEvent::StateChanged {
                to: Some(PlaybackState::Loading),
                ..
            }) => return true,
            Ok(NarrationEvent::StateChanged { to: None, .. }) => continue,
            _ => return false,
        }
    }
}
