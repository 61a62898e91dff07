//! Probe runtime.
//!
//! Wires a [`CompressSession`] to the loopback collaborators, feeds it files and
//! follows the offload events the way a playback client would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use compress_offload_types::{AudioFormat, DrainType, OffloadEvent};
use compress_session::codec;
use compress_session::loopback::{
    LoopbackDriver, LoopbackGraph, LoopbackPopulator, LoopbackResourceManager, LoopbackStream,
};
use compress_session::{CompressSession, SessionDeps, SessionParam};
use crossbeam_channel::Receiver;

use crate::config::ProbePlayConfig;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const RENDER_TICK: Duration = Duration::from_millis(10);

const LISTED_FORMATS: &[AudioFormat] = &[
    AudioFormat::Mp3,
    AudioFormat::Aac,
    AudioFormat::AacAdts,
    AudioFormat::AacAdif,
    AudioFormat::AacLatm,
    AudioFormat::WmaStd,
    AudioFormat::WmaPro,
    AudioFormat::Alac,
    AudioFormat::Ape,
    AudioFormat::Flac,
    AudioFormat::FlacOgg,
    AudioFormat::Vorbis,
    AudioFormat::Opus,
];

/// Print stream formats with their codec ids and gapless capability.
pub fn list_formats() {
    for format in LISTED_FORMATS {
        let id = codec::codec_id_for(*format);
        let gapless = codec::is_gapless_format(true, *format);
        println!("{format:?}\tcodec={id:#x}\tgapless={gapless}");
    }
}

/// Background thread standing in for the DSP: drains the loopback driver at a fixed rate.
struct Renderer {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Renderer {
    fn spawn(driver: LoopbackDriver, bytes_per_sec: usize) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let per_tick = (bytes_per_sec / 100).max(1);
        let join = std::thread::Builder::new()
            .name("loopback-render".into())
            .spawn(move || {
                let mut rendered = 0u64;
                while !stop_flag.load(Ordering::Relaxed) {
                    rendered += driver.consume(per_tick) as u64;
                    std::thread::sleep(RENDER_TICK);
                }
                tracing::debug!(rendered, "renderer stopped");
            })
            .context("spawn renderer thread")?;
        Ok(Self {
            stop,
            join: Some(join),
        })
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Play every configured file through one session, with partial drains between tracks.
pub fn run_play(config: ProbePlayConfig, install_ctrlc: bool) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    if install_ctrlc {
        let cancel = cancel.clone();
        let _ = ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        });
    }

    let rm = Arc::new(LoopbackResourceManager::new());
    let driver = LoopbackDriver::default();
    let graph = LoopbackGraph::default();
    let mut session = CompressSession::new(
        SessionDeps {
            rm: rm.clone(),
            driver: Arc::new(driver.clone()),
            graph: Arc::new(graph.clone()),
            populator: Arc::new(LoopbackPopulator::with_defaults()),
        },
        config.session.clone(),
    );

    let (event_tx, events) = crossbeam_channel::unbounded();
    session.register_callback(
        Arc::new(move |_cookie: u64, event: OffloadEvent| {
            let _ = event_tx.send(event);
        }),
        0,
    );

    let stream = LoopbackStream::new(config.format, config.sample_rate, config.channels)
        .with_buffer(config.fragment_size, config.fragments);
    session.open(&stream).context("open offload session")?;
    let _renderer = Renderer::spawn(driver.clone(), config.render_rate)?;

    let played = start_and_play(&mut session, &stream, &config, &events, &cancel);
    if played.is_err() || cancel.load(Ordering::Relaxed) {
        if let Err(err) = session.flush() {
            tracing::debug!(error = %err, "flush on abort");
        }
    }
    let status = session.status();
    let closed = session.close(&stream).context("close offload session");

    tracing::info!(
        %status,
        params_sent = graph.params().len(),
        driver_bytes = driver.total_written(),
        "probe finished"
    );
    if config.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    played?;
    closed
}

fn start_and_play(
    session: &mut CompressSession,
    stream: &LoopbackStream,
    config: &ProbePlayConfig,
    events: &Receiver<OffloadEvent>,
    cancel: &AtomicBool,
) -> Result<()> {
    session.start(stream).context("start offload session")?;
    tracing::info!(
        format = ?config.format,
        codec_id = session.codec().id,
        gapless = session.is_gapless(),
        "session started"
    );

    let last = config.paths.len().saturating_sub(1);
    for (index, path) in config.paths.iter().enumerate() {
        let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        tracing::info!(track = index, path = %path.display(), bytes = data.len(), "track");

        if let Some(meta) = config.gapless {
            if session.is_gapless() {
                session.set_parameters(SessionParam::GaplessMetadata(meta))?;
            }
        }

        for chunk in data.chunks(config.chunk_bytes.max(1)) {
            if cancel.load(Ordering::Relaxed) {
                tracing::warn!("interrupted");
                return Ok(());
            }
            write_all(session, chunk, events)?;
        }

        if index < last {
            session.drain(DrainType::Partial)?;
            let event = wait_for(
                events,
                &[OffloadEvent::PartialDrainReady, OffloadEvent::DrainReady],
            )?;
            tracing::info!(track = index, ?event, "track transition");
        } else {
            session.drain(DrainType::Full)?;
            wait_for(events, &[OffloadEvent::DrainReady])?;
            tracing::info!(track = index, "drained");
        }
    }
    Ok(())
}

fn write_all(
    session: &mut CompressSession,
    mut chunk: &[u8],
    events: &Receiver<OffloadEvent>,
) -> Result<()> {
    while !chunk.is_empty() {
        let written = session.write(chunk)?;
        chunk = &chunk[written..];
        if !chunk.is_empty() {
            wait_for(events, &[OffloadEvent::WriteReady])?;
        }
    }
    Ok(())
}

fn wait_for(events: &Receiver<OffloadEvent>, wanted: &[OffloadEvent]) -> Result<OffloadEvent> {
    loop {
        let event = events
            .recv_timeout(EVENT_TIMEOUT)
            .map_err(|_| anyhow!("no {wanted:?} within {EVENT_TIMEOUT:?}"))?;
        if event == OffloadEvent::Error {
            bail!("session reported an offload error");
        }
        if wanted.contains(&event) {
            return Ok(event);
        }
        tracing::debug!(?event, "event skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compress_session::SessionConfig;
    use std::path::PathBuf;

    fn temp_track(name: &str, len: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "offload-probe-{}-{name}",
            std::process::id()
        ));
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn play_config(paths: Vec<PathBuf>) -> ProbePlayConfig {
        ProbePlayConfig {
            paths,
            format: AudioFormat::Mp3,
            sample_rate: 44_100,
            channels: 2,
            chunk_bytes: 3000,
            fragment_size: 1024,
            fragments: 2,
            render_rate: 4_000_000,
            gapless: None,
            json: false,
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn plays_tracks_back_to_back() {
        let a = temp_track("a.mp3", 20_000);
        let b = temp_track("b.mp3", 7_000);
        let result = run_play(play_config(vec![a.clone(), b.clone()]), false);
        let _ = std::fs::remove_file(&a);
        let _ = std::fs::remove_file(&b);
        result.unwrap();
    }

    #[test]
    fn missing_file_still_closes_session() {
        let err = run_play(
            play_config(vec![PathBuf::from("/nonexistent/offload-probe.mp3")]),
            false,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("read /nonexistent"));
    }
}
