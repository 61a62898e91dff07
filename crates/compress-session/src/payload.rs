//! Module parameter payloads accumulated and sent through the session graph.

use std::io;

use compress_offload_proto::{
    encode_custom_param, encode_early_eos_delay, encode_media_format,
    encode_mfc_output_config, encode_mono_mode, media_format, param_id,
};
use compress_offload_types::{DeviceAttributes, DeviceId, SpeakerRotation};

/// Pending concatenation of module parameter records, sent in one mixer write.
#[derive(Debug, Default)]
pub struct CustomPayload {
    buf: Vec<u8>,
}

impl CustomPayload {
    /// Append one encoded record.
    pub fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.buf
            .try_reserve_exact(record.len())
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "custom payload grow failed"))?;
        self.buf.extend_from_slice(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand the accumulated bytes over, leaving the payload empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn clear(&mut self) {
        self.buf = Vec::new();
    }
}

/// Codec used on a true-wireless-stereo link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TwsCodec {
    AptxDualMono,
    AptxAdaptive,
    Other(u32),
}

/// Stream input media format record announcing a Vorbis bitstream.
pub fn vorbis_media_format(miid: u32, bit_stream_fmt: u32) -> io::Result<Vec<u8>> {
    let header = encode_media_format(
        media_format::DATA_FORMAT_RAW_COMPRESSED,
        media_format::FMT_ID_VORBIS,
        &bit_stream_fmt.to_le_bytes(),
    )?;
    encode_custom_param(miid, param_id::MEDIA_FORMAT, &header)
}

/// Default channel positions for `channels` outputs. Stereo with
/// [`SpeakerRotation::RightLeft`] has its two channels swapped.
pub fn channel_map(channels: u32, rotation: SpeakerRotation) -> io::Result<Vec<u16>> {
    use compress_offload_proto::channel::*;
    let map: &[u16] = match channels {
        1 => &[C],
        2 if rotation == SpeakerRotation::RightLeft => &[R, L],
        2 => &[L, R],
        3 => &[L, R, C],
        4 => &[L, R, LB, RB],
        5 => &[L, R, C, LB, RB],
        6 => &[L, R, C, LFE, LB, RB],
        7 => &[L, R, C, LS, RS, LB, RB],
        8 => &[L, R, C, LS, RS, LFE, LB, RB],
        n => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no channel map for {n} channels"),
            ));
        }
    };
    Ok(map.to_vec())
}

/// Effective rotation for a device: only stereo speakers follow the platform setting.
pub fn rotation_for(device: &DeviceAttributes, platform: SpeakerRotation) -> SpeakerRotation {
    if device.id == DeviceId::OutSpeaker && device.config.channels == 2 {
        platform
    } else {
        SpeakerRotation::LeftRight
    }
}

/// MFC record matching the device's hardware configuration.
pub fn mfc_config(
    miid: u32,
    device: &DeviceAttributes,
    rotation: SpeakerRotation,
) -> io::Result<Vec<u8>> {
    let map = channel_map(device.config.channels, rotation)?;
    let payload = encode_mfc_output_config(device.config.sample_rate, device.config.bit_width, &map)?;
    encode_custom_param(miid, param_id::MFC_OUTPUT_MEDIA_FORMAT, &payload)
}

pub fn early_eos_delay(miid: u32, delay_ms: u32) -> io::Result<Vec<u8>> {
    encode_custom_param(miid, param_id::EARLY_EOS_DELAY, &encode_early_eos_delay(delay_ms))
}

/// Mono-mode switch for an aptX TWS link. `None` for codecs without one.
pub fn tws_config(miid: u32, mono: bool, codec: TwsCodec) -> io::Result<Option<Vec<u8>>> {
    let id = match codec {
        TwsCodec::AptxDualMono => param_id::APTX_CLASSIC_SET_MONO_MODE,
        TwsCodec::AptxAdaptive => param_id::APTX_ADAPTIVE_ENC_SWITCH_TO_MONO,
        TwsCodec::Other(raw) => {
            tracing::debug!(codec = raw, "no tws mono mode parameter for codec");
            return Ok(None);
        }
    };
    encode_custom_param(miid, id, &encode_mono_mode(mono)).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compress_offload_proto::{channel, decode_param_records};
    use compress_offload_types::DeviceConfig;

    fn speaker(channels: u32) -> DeviceAttributes {
        DeviceAttributes {
            id: DeviceId::OutSpeaker,
            config: DeviceConfig {
                sample_rate: 48_000,
                bit_width: 16,
                channels,
            },
        }
    }

    #[test]
    fn payload_accumulates_and_takes() {
        let mut payload = CustomPayload::default();
        payload.append(&early_eos_delay(1, 150).unwrap()).unwrap();
        payload.append(&early_eos_delay(2, 150).unwrap()).unwrap();
        assert_eq!(payload.len(), 48);
        let bytes = payload.take();
        assert!(payload.is_empty());
        assert_eq!(decode_param_records(&bytes).unwrap().len(), 2);
    }

    #[test]
    fn vorbis_record_wraps_media_format() {
        let blob = vorbis_media_format(0x44, 1).unwrap();
        let records = decode_param_records(&blob).unwrap();
        assert_eq!(records[0].miid, 0x44);
        assert_eq!(records[0].param_id, param_id::MEDIA_FORMAT);
        let p = &records[0].payload;
        assert_eq!(p.len(), 16);
        assert_eq!(&p[0..4], &media_format::DATA_FORMAT_RAW_COMPRESSED.to_le_bytes());
        assert_eq!(&p[4..8], &media_format::FMT_ID_VORBIS.to_le_bytes());
        assert_eq!(&p[12..16], &1u32.to_le_bytes());
    }

    #[test]
    fn rotation_only_applies_to_stereo_speakers() {
        assert_eq!(
            rotation_for(&speaker(2), SpeakerRotation::RightLeft),
            SpeakerRotation::RightLeft
        );
        assert_eq!(
            rotation_for(&speaker(1), SpeakerRotation::RightLeft),
            SpeakerRotation::LeftRight
        );
        let mut headset = speaker(2);
        headset.id = DeviceId::OutWiredHeadset;
        assert_eq!(
            rotation_for(&headset, SpeakerRotation::RightLeft),
            SpeakerRotation::LeftRight
        );
    }

    #[test]
    fn rotated_mfc_swaps_stereo_channels() {
        let blob = mfc_config(7, &speaker(2), SpeakerRotation::RightLeft).unwrap();
        let records = decode_param_records(&blob).unwrap();
        let p = &records[0].payload;
        assert_eq!(records[0].param_id, param_id::MFC_OUTPUT_MEDIA_FORMAT);
        assert_eq!(&p[8..10], &channel::R.to_le_bytes());
        assert_eq!(&p[10..12], &channel::L.to_le_bytes());
    }

    #[test]
    fn unusual_channel_counts_are_rejected() {
        assert_eq!(
            channel_map(0, SpeakerRotation::LeftRight).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(channel_map(6, SpeakerRotation::RightLeft).unwrap().len(), 6);
    }

    #[test]
    fn tws_config_depends_on_codec() {
        let blob = tws_config(3, true, TwsCodec::AptxAdaptive).unwrap().unwrap();
        let records = decode_param_records(&blob).unwrap();
        assert_eq!(records[0].param_id, param_id::APTX_ADAPTIVE_ENC_SWITCH_TO_MONO);
        assert_eq!(records[0].payload, 1u32.to_le_bytes().to_vec());
        assert!(tws_config(3, true, TwsCodec::Other(0x1F)).unwrap().is_none());
    }
}
