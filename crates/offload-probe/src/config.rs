use std::path::{Path, PathBuf};

use compress_offload_types::AudioFormat;
use compress_session::SessionConfig;
use compress_session::platform::GaplessMetadata;

#[derive(Clone, Debug)]
pub struct ProbePlayConfig {
    pub paths: Vec<PathBuf>,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u32,
    pub chunk_bytes: usize,
    pub fragment_size: usize,
    pub fragments: usize,
    /// Bytes per second the renderer thread drains from the driver.
    pub render_rate: usize,
    pub gapless: Option<GaplessMetadata>,
    pub json: bool,
    pub session: SessionConfig,
}

/// Guess the stream format from a file extension.
pub fn infer_format(path: &Path) -> Option<AudioFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "aac" => Some(AudioFormat::AacAdts),
        "m4a" | "mp4" => Some(AudioFormat::Aac),
        "oga" => Some(AudioFormat::FlacOgg),
        other => AudioFormat::from_name(other),
    }
}
