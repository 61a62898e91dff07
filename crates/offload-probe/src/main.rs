//! Offload probe: drives a compressed-offload session against in-memory
//! collaborators.
//!
//! ## Flow
//! 1. **Open**: reserve a front-end and open the session graph for the stream's devices.
//! 2. **Start**: open the loopback compress device and push per-device module parameters.
//! 3. **Write**: feed each file in chunks; short writes wait for `WriteReady`.
//! 4. **Drain**: a partial drain between tracks, a full drain after the last one.
//!
//! A renderer thread plays the part of the DSP and empties the driver buffer at
//! `--render-rate` bytes per second.

mod cli;
mod config;
mod runtime;

use anyhow::{Result, anyhow};
use clap::Parser;
use compress_session::SessionConfig;
use compress_session::platform::GaplessMetadata;
use compress_offload_types::AudioFormat;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,offload_probe=info,compress_session=info")
        }))
        .init();

    let session = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match args.cmd {
        cli::Command::Formats => runtime::list_formats(),
        cli::Command::Play {
            paths,
            format,
            sample_rate,
            channels,
            chunk_bytes,
            fragment_size,
            fragments,
            render_rate,
            encoder_delay,
            encoder_padding,
            json,
        } => {
            let format = match format {
                Some(name) => AudioFormat::from_name(&name)
                    .ok_or_else(|| anyhow!("unknown format `{name}`"))?,
                None => paths
                    .first()
                    .and_then(|p| config::infer_format(p))
                    .ok_or_else(|| anyhow!("cannot infer format, pass --format"))?,
            };
            let gapless = encoder_delay.map(|encoder_delay| GaplessMetadata {
                encoder_delay,
                encoder_padding,
            });
            tracing::info!(?format, tracks = paths.len(), "offload probe");
            runtime::run_play(
                config::ProbePlayConfig {
                    paths,
                    format,
                    sample_rate,
                    channels,
                    chunk_bytes,
                    fragment_size,
                    fragments,
                    render_rate,
                    gapless,
                    json,
                    session,
                },
                true,
            )?;
        }
    }

    Ok(())
}
