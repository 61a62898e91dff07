//! Binary layouts shared with the compressed-audio driver and its mixer controls.
//!
//! Every multi-byte field is little-endian.
//!
//! Tag config (`COMPRESS<id> setParamTag`):
//! - tag:     u32
//! - num_kvs: u32
//! - then `num_kvs` times: key u32, value u32
//!
//! Calibration config (`COMPRESS<id> setCalibration`):
//! - num_kvs: u32
//! - then `num_kvs` times: key u32, value u32
//!
//! Module parameter record (mixer parameter blobs may concatenate several):
//! - miid:        u32
//! - param_id:    u32
//! - param_size:  u32 (payload bytes, excluding padding)
//! - error_code:  u32 (always 0 on the way in)
//! - payload:     [u8; param_size]
//! - padding:     zero bytes up to the next 8-byte boundary

use std::io;

/// Codec ids understood by the compressed-audio driver.
pub mod codec_id {
    pub const PCM: u32 = 0x0000_0001;
    pub const MP3: u32 = 0x0000_0002;
    pub const AAC: u32 = 0x0000_0006;
    pub const WMA: u32 = 0x0000_0007;
    pub const VORBIS: u32 = 0x0000_0009;
    pub const FLAC: u32 = 0x0000_000A;
    pub const ALAC: u32 = 0x0000_000F;
    pub const APE: u32 = 0x0000_0010;
    pub const WMA_PRO: u32 = 0x0000_0012;
    /// Sentinel for formats the driver cannot take (`-1` in the C ABI).
    pub const UNSUPPORTED: u32 = u32::MAX;
}

/// Stream format words stored in the codec descriptor's `format` field.
pub mod stream_format {
    pub const MP4ADTS: u32 = 0x0000_0004;
    pub const MP4LATM: u32 = 0x0000_0008;
    pub const ADIF: u32 = 0x0000_0010;
    pub const RAW: u32 = 0x0000_0040;
    pub const FLAC: u32 = 0x0000_0100;
    pub const FLAC_OGG: u32 = 0x0000_0200;
}

/// Firmware parameter ids carried in module parameter records.
pub mod param_id {
    pub const MEDIA_FORMAT: u32 = 0x0800_100C;
    pub const MFC_OUTPUT_MEDIA_FORMAT: u32 = 0x0800_1024;
    pub const EARLY_EOS_DELAY: u32 = 0x0800_115D;
    pub const APTX_CLASSIC_SET_MONO_MODE: u32 = 0x0800_1224;
    pub const APTX_ADAPTIVE_ENC_SWITCH_TO_MONO: u32 = 0x0800_1225;
}

/// Graph tags identifying firmware module instances on a front-end/back-end path.
pub mod tag {
    pub const STREAM_INPUT_MEDIA_FORMAT: u32 = 0xC000_0001;
    pub const DEVICE_MFC_SR: u32 = 0xC000_000D;
    pub const STREAM_SPR: u32 = 0xC000_0013;
    pub const MODULE_GAPLESS: u32 = 0xC000_0015;
    pub const STREAM_VOLUME: u32 = 0xC000_0019;
}

/// Media format ids and data formats for the media-format header.
pub mod media_format {
    pub const DATA_FORMAT_FIXED_POINT: u32 = 1;
    pub const DATA_FORMAT_RAW_COMPRESSED: u32 = 6;
    pub const FMT_ID_VORBIS: u32 = 0x0900_101C;
}

/// PCM channel positions used in MFC channel maps.
pub mod channel {
    pub const L: u16 = 1;
    pub const R: u16 = 2;
    pub const C: u16 = 3;
    pub const LS: u16 = 4;
    pub const RS: u16 = 5;
    pub const LFE: u16 = 6;
    pub const CS: u16 = 7;
    pub const LB: u16 = 8;
    pub const RB: u16 = 9;
}

/// Size of a module parameter record header in bytes.
pub const PARAM_HEADER_LEN: usize = 16;
/// Size of one key/value entry in bytes.
pub const KV_LEN: usize = 8;

/// One (key, value) pair of a tag or calibration key vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: u32,
    pub value: u32,
}

impl KeyValue {
    pub fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// Allocate an empty buffer with exactly `len` bytes of capacity.
///
/// Allocation failure is reported as `ErrorKind::OutOfMemory` instead of aborting.
pub fn alloc_blob(len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "blob allocation failed"))?;
    Ok(out)
}

fn count_u32(n: usize, what: &str) -> io::Result<u32> {
    n.try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("too many {what}")))
}

fn push_kvs(out: &mut Vec<u8>, kvs: &[KeyValue]) {
    for kv in kvs {
        out.extend_from_slice(&kv.key.to_le_bytes());
        out.extend_from_slice(&kv.value.to_le_bytes());
    }
}

/// Encode a tag config blob. An empty key vector is rejected.
pub fn encode_tag_config(tag: u32, kvs: &[KeyValue]) -> io::Result<Vec<u8>> {
    if kvs.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tag key vector"));
    }
    let num = count_u32(kvs.len(), "tag keys")?;
    let mut out = alloc_blob(8 + kvs.len() * KV_LEN)?;
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&num.to_le_bytes());
    push_kvs(&mut out, kvs);
    Ok(out)
}

/// Encode a calibration config blob. An empty key vector is rejected.
pub fn encode_cal_config(kvs: &[KeyValue]) -> io::Result<Vec<u8>> {
    if kvs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty calibration key vector",
        ));
    }
    let num = count_u32(kvs.len(), "calibration keys")?;
    let mut out = alloc_blob(4 + kvs.len() * KV_LEN)?;
    out.extend_from_slice(&num.to_le_bytes());
    push_kvs(&mut out, kvs);
    Ok(out)
}

/// Round `len` up to the next multiple of 8.
pub fn padded_len(len: usize) -> usize {
    (len + 7) & !7
}

/// Encode one module parameter record (header + payload + padding).
pub fn encode_custom_param(miid: u32, param_id: u32, payload: &[u8]) -> io::Result<Vec<u8>> {
    let size = count_u32(payload.len(), "payload bytes")?;
    let total = padded_len(PARAM_HEADER_LEN + payload.len());
    let mut out = alloc_blob(total)?;
    out.extend_from_slice(&miid.to_le_bytes());
    out.extend_from_slice(&param_id.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(total, 0);
    Ok(out)
}

/// A module parameter record parsed back out of a mixer parameter blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamRecord {
    pub miid: u32,
    pub param_id: u32,
    pub error_code: u32,
    pub payload: Vec<u8>,
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Split a mixer parameter blob into its module parameter records.
pub fn decode_param_records(mut blob: &[u8]) -> io::Result<Vec<ParamRecord>> {
    let mut out = Vec::new();
    while !blob.is_empty() {
        if blob.len() < PARAM_HEADER_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "short param header"));
        }
        let miid = read_u32(blob, 0);
        let param_id = read_u32(blob, 4);
        let size = read_u32(blob, 8) as usize;
        let error_code = read_u32(blob, 12);
        let end = PARAM_HEADER_LEN + size;
        if end > blob.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated param payload"));
        }
        out.push(ParamRecord {
            miid,
            param_id,
            error_code,
            payload: blob[PARAM_HEADER_LEN..end].to_vec(),
        });
        blob = &blob[padded_len(end).min(blob.len())..];
    }
    Ok(out)
}

/// Decode a tag config blob into `(tag, kvs)`.
pub fn decode_tag_config(blob: &[u8]) -> io::Result<(u32, Vec<KeyValue>)> {
    if blob.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short tag config"));
    }
    let tag = read_u32(blob, 0);
    let kvs = decode_kvs(&blob[4..])?;
    Ok((tag, kvs))
}

/// Decode a calibration config blob.
pub fn decode_cal_config(blob: &[u8]) -> io::Result<Vec<KeyValue>> {
    if blob.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short calibration config"));
    }
    decode_kvs(blob)
}

fn decode_kvs(blob: &[u8]) -> io::Result<Vec<KeyValue>> {
    let num = read_u32(blob, 0) as usize;
    if blob.len() != 4 + num * KV_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "key vector length mismatch"));
    }
    Ok((0..num)
        .map(|i| {
            let off = 4 + i * KV_LEN;
            KeyValue::new(read_u32(blob, off), read_u32(blob, off + 4))
        })
        .collect())
}

/// Encode a media-format header followed by its format-specific payload.
///
/// - data_format:  u32
/// - fmt_id:       u32
/// - payload_size: u32
/// - payload
pub fn encode_media_format(data_format: u32, fmt_id: u32, payload: &[u8]) -> io::Result<Vec<u8>> {
    let size = count_u32(payload.len(), "media format bytes")?;
    let mut out = alloc_blob(12 + payload.len())?;
    out.extend_from_slice(&data_format.to_le_bytes());
    out.extend_from_slice(&fmt_id.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode the MFC output media format payload:
/// - sample_rate:  i32
/// - bit_width:    i16
/// - num_channels: i16
/// - channel_map:  u16 * num_channels
pub fn encode_mfc_output_config(
    sample_rate: u32,
    bit_width: u32,
    channel_map: &[u16],
) -> io::Result<Vec<u8>> {
    let rate: i32 = sample_rate
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "sample rate out of range"))?;
    let width: i16 = bit_width
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bit width out of range"))?;
    let channels: i16 = channel_map
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many channels"))?;
    let mut out = alloc_blob(8 + channel_map.len() * 2)?;
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    for ch in channel_map {
        out.extend_from_slice(&ch.to_le_bytes());
    }
    Ok(out)
}

/// Encode the gapless early end-of-stream delay payload: `delay_ms: u32`.
pub fn encode_early_eos_delay(delay_ms: u32) -> Vec<u8> {
    delay_ms.to_le_bytes().to_vec()
}

/// Encode an aptX mono-mode switch payload: `mono: u32 (0/1)`.
pub fn encode_mono_mode(mono: bool) -> Vec<u8> {
    u32::from(mono).to_le_bytes().to_vec()
}

/// AAC decoder options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AacDecOptions {
    pub audio_obj_type: u32,
    pub pce_bits_size: u32,
}

/// WMA (standard and pro) decoder options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WmaDecOptions {
    pub super_block_align: u32,
    pub bits_per_sample: u32,
    pub channel_mask: u32,
    pub encode_opt: u32,
    pub encode_opt1: u32,
    pub encode_opt2: u32,
    pub avg_bit_rate: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlacDecOptions {
    pub frame_length: u32,
    pub compatible_version: u8,
    pub bit_depth: u8,
    pub pb: u8,
    pub mb: u8,
    pub kb: u8,
    pub num_channels: u8,
    pub max_run: u16,
    pub max_frame_bytes: u32,
    pub avg_bit_rate: u32,
    pub sample_rate: u32,
    pub channel_layout_tag: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApeDecOptions {
    pub compatible_version: u16,
    pub compression_level: u16,
    pub format_flags: u32,
    pub blocks_per_frame: u32,
    pub final_frame_blocks: u32,
    pub total_frames: u32,
    pub bits_per_sample: u16,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub seek_table_present: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlacDecOptions {
    pub sample_size: u16,
    pub min_blk_size: u16,
    pub max_blk_size: u16,
    pub min_frame_size: u16,
    pub max_frame_size: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VorbisDecOptions {
    pub bit_stream_fmt: u32,
}

/// Per-codec option block of the codec descriptor. Only the variant matching the
/// active codec is ever populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecOptions {
    #[default]
    None,
    Aac(AacDecOptions),
    Wma(WmaDecOptions),
    Alac(AlacDecOptions),
    Ape(ApeDecOptions),
    Flac(FlacDecOptions),
    Vorbis(VorbisDecOptions),
}

/// Codec descriptor handed to the driver when the compressed device is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub id: u32,
    pub ch_in: u32,
    pub ch_out: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub format: u32,
    pub options: CodecOptions,
}

/// Encoded size of [`CodecDescriptor`]: 11 header words, 64 option bytes, 3 reserved words.
pub const CODEC_DESCRIPTOR_LEN: usize = 11 * 4 + CODEC_OPTIONS_LEN + 3 * 4;
/// Size of the option union inside the codec descriptor.
pub const CODEC_OPTIONS_LEN: usize = 64;

impl CodecDescriptor {
    /// Encode in driver layout:
    /// `id, ch_in, ch_out, sample_rate, bit_rate, rate_control, profile, level, ch_mode,
    /// format, align` (u32 each), the 64-byte option union, then 3 reserved u32.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CODEC_DESCRIPTOR_LEN);
        for word in [self.id, self.ch_in, self.ch_out, self.sample_rate, self.bit_rate] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        // rate_control, profile, level, ch_mode
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.format.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        let start = out.len();
        encode_options(&self.options, &mut out);
        out.resize(start + CODEC_OPTIONS_LEN, 0);
        out.extend_from_slice(&[0u8; 12]);
        out
    }
}

fn encode_options(options: &CodecOptions, out: &mut Vec<u8>) {
    match options {
        CodecOptions::None => {}
        CodecOptions::Aac(o) => {
            out.extend_from_slice(&o.audio_obj_type.to_le_bytes());
            out.extend_from_slice(&o.pce_bits_size.to_le_bytes());
        }
        CodecOptions::Wma(o) => {
            for word in [
                o.super_block_align,
                o.bits_per_sample,
                o.channel_mask,
                o.encode_opt,
                o.encode_opt1,
                o.encode_opt2,
                o.avg_bit_rate,
            ] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        CodecOptions::Alac(o) => {
            out.extend_from_slice(&o.frame_length.to_le_bytes());
            out.extend_from_slice(&[
                o.compatible_version,
                o.bit_depth,
                o.pb,
                o.mb,
                o.kb,
                o.num_channels,
            ]);
            out.extend_from_slice(&o.max_run.to_le_bytes());
            for word in [
                o.max_frame_bytes,
                o.avg_bit_rate,
                o.sample_rate,
                o.channel_layout_tag,
            ] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        CodecOptions::Ape(o) => {
            out.extend_from_slice(&o.compatible_version.to_le_bytes());
            out.extend_from_slice(&o.compression_level.to_le_bytes());
            for word in [
                o.format_flags,
                o.blocks_per_frame,
                o.final_frame_blocks,
                o.total_frames,
            ] {
                out.extend_from_slice(&word.to_le_bytes());
            }
            out.extend_from_slice(&o.bits_per_sample.to_le_bytes());
            out.extend_from_slice(&o.num_channels.to_le_bytes());
            out.extend_from_slice(&o.sample_rate.to_le_bytes());
            out.extend_from_slice(&o.seek_table_present.to_le_bytes());
        }
        CodecOptions::Flac(o) => {
            for half in [
                o.sample_size,
                o.min_blk_size,
                o.max_blk_size,
                o.min_frame_size,
                o.max_frame_size,
            ] {
                out.extend_from_slice(&half.to_le_bytes());
            }
        }
        CodecOptions::Vorbis(o) => {
            out.extend_from_slice(&o.bit_stream_fmt.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_config_layout() {
        let blob =
            encode_tag_config(0xC000_0001, &[KeyValue::new(1, 2), KeyValue::new(3, 4)]).unwrap();
        assert_eq!(blob.len(), 8 + 2 * KV_LEN);
        assert_eq!(&blob[0..4], &0xC000_0001u32.to_le_bytes());
        assert_eq!(&blob[4..8], &2u32.to_le_bytes());
        assert_eq!(&blob[8..12], &1u32.to_le_bytes());
        assert_eq!(&blob[20..24], &4u32.to_le_bytes());

        let (tag, kvs) = decode_tag_config(&blob).unwrap();
        assert_eq!(tag, 0xC000_0001);
        assert_eq!(kvs, vec![KeyValue::new(1, 2), KeyValue::new(3, 4)]);
    }

    #[test]
    fn cal_config_layout() {
        let blob = encode_cal_config(&[KeyValue::new(0xA1, 7)]).unwrap();
        assert_eq!(blob, [1, 0, 0, 0, 0xA1, 0, 0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn empty_key_vectors_are_rejected() {
        let err = encode_tag_config(1, &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = encode_cal_config(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn custom_param_is_padded_to_eight_bytes() {
        let blob = encode_custom_param(0x10, param_id::EARLY_EOS_DELAY, &[1, 2, 3, 4]).unwrap();
        assert_eq!(blob.len(), 24);
        assert_eq!(&blob[8..12], &4u32.to_le_bytes());
        assert_eq!(&blob[12..16], &0u32.to_le_bytes());
        assert_eq!(&blob[20..24], &[0, 0, 0, 0]);

        let aligned = encode_custom_param(0x10, 1, &[0u8; 8]).unwrap();
        assert_eq!(aligned.len(), 24);
    }

    #[test]
    fn concatenated_records_split_back_apart() {
        let mut blob = encode_custom_param(1, 10, &[9; 3]).unwrap();
        blob.extend(encode_custom_param(2, 20, &encode_early_eos_delay(150)).unwrap());
        let records = decode_param_records(&blob).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].miid, 1);
        assert_eq!(records[0].payload, vec![9, 9, 9]);
        assert_eq!(records[1].param_id, 20);
        assert_eq!(records[1].payload, 150u32.to_le_bytes().to_vec());
    }

    #[test]
    fn param_records_reject_truncation() {
        let blob = encode_custom_param(1, 10, &[9; 8]).unwrap();
        let err = decode_param_records(&blob[..20]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn media_format_header_precedes_payload() {
        let blob = encode_media_format(
            media_format::DATA_FORMAT_RAW_COMPRESSED,
            media_format::FMT_ID_VORBIS,
            &5u32.to_le_bytes(),
        )
        .unwrap();
        assert_eq!(blob.len(), 16);
        assert_eq!(&blob[0..4], &6u32.to_le_bytes());
        assert_eq!(&blob[8..12], &4u32.to_le_bytes());
        assert_eq!(&blob[12..16], &5u32.to_le_bytes());
    }

    #[test]
    fn mfc_config_layout() {
        let blob = encode_mfc_output_config(48_000, 24, &[channel::R, channel::L]).unwrap();
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[0..4], &48_000i32.to_le_bytes());
        assert_eq!(&blob[4..6], &24i16.to_le_bytes());
        assert_eq!(&blob[6..8], &2i16.to_le_bytes());
        assert_eq!(&blob[8..10], &channel::R.to_le_bytes());
        assert_eq!(&blob[10..12], &channel::L.to_le_bytes());
    }

    #[test]
    fn mfc_config_rejects_oversized_bit_width() {
        let err = encode_mfc_output_config(48_000, 1 << 20, &[channel::C]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn codec_descriptor_has_fixed_size_and_offsets() {
        let desc = CodecDescriptor {
            id: codec_id::AAC,
            ch_in: 2,
            ch_out: 2,
            sample_rate: 44_100,
            bit_rate: 16,
            format: stream_format::MP4ADTS,
            options: CodecOptions::Aac(AacDecOptions {
                audio_obj_type: 2,
                pce_bits_size: 0x40,
            }),
        };
        let blob = desc.encode();
        assert_eq!(blob.len(), CODEC_DESCRIPTOR_LEN);
        assert_eq!(&blob[0..4], &codec_id::AAC.to_le_bytes());
        assert_eq!(&blob[12..16], &44_100u32.to_le_bytes());
        assert_eq!(&blob[36..40], &stream_format::MP4ADTS.to_le_bytes());
        assert_eq!(&blob[44..48], &2u32.to_le_bytes());
        assert_eq!(&blob[48..52], &0x40u32.to_le_bytes());
        assert!(blob[52..].iter().all(|b| *b == 0));
    }

    #[test]
    fn alac_options_pack_byte_fields() {
        let desc = CodecDescriptor {
            id: codec_id::ALAC,
            ch_in: 2,
            ch_out: 2,
            sample_rate: 44_100,
            bit_rate: 16,
            format: 0,
            options: CodecOptions::Alac(AlacDecOptions {
                frame_length: 4096,
                compatible_version: 0,
                bit_depth: 16,
                pb: 40,
                mb: 10,
                kb: 14,
                num_channels: 2,
                max_run: 255,
                ..AlacDecOptions::default()
            }),
        };
        let blob = desc.encode();
        let opts = &blob[44..44 + CODEC_OPTIONS_LEN];
        assert_eq!(&opts[0..4], &4096u32.to_le_bytes());
        assert_eq!(&opts[4..10], &[0, 16, 40, 10, 14, 2]);
        assert_eq!(&opts[10..12], &255u16.to_le_bytes());
    }
}
