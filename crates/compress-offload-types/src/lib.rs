use serde::{Deserialize, Serialize};

/// Audio format carried by a stream, as reported in its output media config.
///
/// `Mp3` doubles as the platform's default compressed format.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Plain PCM (the descriptor default before a stream is started).
    DefaultPcm,
    Mp3,
    Aac,
    AacAdts,
    AacAdif,
    AacLatm,
    WmaStd,
    WmaPro,
    Alac,
    Ape,
    Flac,
    FlacOgg,
    Vorbis,
    Opus,
    AmrNb,
    AmrWb,
    /// Raw format value the session has no mapping for.
    Other(u32),
}

impl AudioFormat {
    /// Parse a short format name (`"aac_adts"`, `"flac"`, ...), case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let fmt = match name.trim().to_ascii_lowercase().as_str() {
            "pcm" | "default_pcm" => AudioFormat::DefaultPcm,
            "mp3" => AudioFormat::Mp3,
            "aac" => AudioFormat::Aac,
            "aac_adts" | "adts" => AudioFormat::AacAdts,
            "aac_adif" | "adif" => AudioFormat::AacAdif,
            "aac_latm" | "latm" => AudioFormat::AacLatm,
            "wma" | "wma_std" => AudioFormat::WmaStd,
            "wma_pro" => AudioFormat::WmaPro,
            "alac" => AudioFormat::Alac,
            "ape" => AudioFormat::Ape,
            "flac" => AudioFormat::Flac,
            "flac_ogg" => AudioFormat::FlacOgg,
            "vorbis" | "ogg" => AudioFormat::Vorbis,
            "opus" => AudioFormat::Opus,
            "amr_nb" => AudioFormat::AmrNb,
            "amr_wb" => AudioFormat::AmrWb,
            _ => return None,
        };
        Some(fmt)
    }

    /// `true` for the AAC family (raw, ADTS, ADIF, LATM).
    pub fn is_aac(self) -> bool {
        matches!(
            self,
            AudioFormat::Aac | AudioFormat::AacAdts | AudioFormat::AacAdif | AudioFormat::AacLatm
        )
    }
}

/// Event delivered to the session callback by the offload dispatcher.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OffloadEvent {
    /// Driver has room for more data after a short write.
    WriteReady,
    /// A full drain (or a non-gapless partial drain) completed.
    DrainReady,
    /// A gapless partial drain completed; the next track may be queued.
    PartialDrainReady,
    /// Unrecoverable error, typically the sound card going offline.
    Error,
}

impl OffloadEvent {
    /// Stable numeric id passed alongside the cookie to C-style callers.
    pub fn id(self) -> u32 {
        match self {
            OffloadEvent::WriteReady => 0,
            OffloadEvent::DrainReady => 1,
            OffloadEvent::PartialDrainReady => 2,
            OffloadEvent::Error => 3,
        }
    }
}

/// Drain flavour requested by the stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainType {
    Full,
    Partial,
}

impl DrainType {
    /// Map a raw drain type (`0` full, `1` partial). Anything else is rejected.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(DrainType::Full),
            1 => Some(DrainType::Partial),
            _ => None,
        }
    }
}

/// Sound card availability as tracked by the resource manager.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    Online,
    Offline,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Output,
    Input,
    InputOutput,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    LowLatency,
    DeepBuffer,
    CompressedOffload,
    VoiceCall,
}

/// Stream flag bits; only the I/O mode bits matter to a compressed session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFlags(pub u32);

impl StreamFlags {
    pub const NON_BLOCKING: u32 = 0x0000_0010;
    pub const MMAP: u32 = 0x0000_0001;
    pub const NON_BLOCKING_MASK: u32 = Self::NON_BLOCKING;

    /// I/O mode bits (zero means plain blocking I/O).
    pub fn io_mode(self) -> u32 {
        self.0 & Self::NON_BLOCKING_MASK
    }
}

/// Media configuration of the stream's compressed output.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaConfig {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub bit_width: u32,
    pub channels: u32,
}

/// Stream attributes queried on open/start/close.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamAttributes {
    pub stream_type: StreamType,
    pub direction: Direction,
    pub flags: StreamFlags,
    pub out_media_config: MediaConfig,
}

/// Buffer sizing negotiated by the stream (sizes in bytes).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferInfo {
    pub in_buf_size: usize,
    pub in_buf_count: usize,
    pub out_buf_size: usize,
    pub out_buf_count: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    OutSpeaker,
    OutHandset,
    OutWiredHeadset,
    OutWiredHeadphone,
    OutLineOut,
    OutBluetoothA2dp,
    OutUsbHeadset,
    OutHdmi,
    Other(u32),
}

/// Hardware configuration of one device.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub bit_width: u32,
    pub channels: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub id: DeviceId,
    pub config: DeviceConfig,
}

/// Stereo speaker orientation. `RightLeft` swaps the two speaker channels.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRotation {
    #[default]
    LeftRight,
    RightLeft,
}

/// One hardware backend route: `(backend id, backend name)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendRoute {
    pub id: i32,
    pub name: String,
}

impl BackendRoute {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Rendered-position report from the stream's timestamp module.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTime {
    /// Rendered media time in microseconds.
    pub session_time_us: u64,
    /// Wall-clock time of the measurement in microseconds.
    pub absolute_time_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_type_rejects_unknown_raw_values() {
        assert_eq!(DrainType::from_raw(0), Some(DrainType::Full));
        assert_eq!(DrainType::from_raw(1), Some(DrainType::Partial));
        assert_eq!(DrainType::from_raw(7), None);
    }

    #[test]
    fn io_mode_masks_non_blocking_bit() {
        assert_eq!(StreamFlags(0).io_mode(), 0);
        assert_eq!(StreamFlags(StreamFlags::MMAP).io_mode(), 0);
        assert_ne!(
            StreamFlags(StreamFlags::NON_BLOCKING | StreamFlags::MMAP).io_mode(),
            0
        );
    }

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!(AudioFormat::from_name("FLAC"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::from_name(" aac_adts "), Some(AudioFormat::AacAdts));
        assert_eq!(AudioFormat::from_name("mod"), None);
    }

    #[test]
    fn aac_family_is_detected() {
        assert!(AudioFormat::AacLatm.is_aac());
        assert!(!AudioFormat::Mp3.is_aac());
    }

    #[test]
    fn event_ids_are_distinct() {
        let ids = [
            OffloadEvent::WriteReady.id(),
            OffloadEvent::DrainReady.id(),
            OffloadEvent::PartialDrainReady.id(),
            OffloadEvent::Error.id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
