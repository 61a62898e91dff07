//! Audio format to codec descriptor translation.

use compress_offload_proto::{
    AacDecOptions, AlacDecOptions, ApeDecOptions, CodecDescriptor, CodecOptions, FlacDecOptions,
    VorbisDecOptions, WmaDecOptions, codec_id, stream_format,
};
use compress_offload_types::{AudioFormat, MediaConfig};

use crate::config::CodecDefaults;
use crate::error::{Result, SessionError};

/// Decoder configuration supplied by the client ahead of `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderParams {
    Aac(AacDecOptions),
    Wma { fmt_tag: u32, options: WmaDecOptions },
    Alac(AlacDecOptions),
    Ape(ApeDecOptions),
    Flac(FlacDecOptions),
    Vorbis(VorbisDecOptions),
}

impl DecoderParams {
    fn kind(&self) -> &'static str {
        match self {
            DecoderParams::Aac(_) => "aac",
            DecoderParams::Wma { .. } => "wma",
            DecoderParams::Alac(_) => "alac",
            DecoderParams::Ape(_) => "ape",
            DecoderParams::Flac(_) => "flac",
            DecoderParams::Vorbis(_) => "vorbis",
        }
    }
}

/// Driver codec id for a format, or [`codec_id::UNSUPPORTED`].
pub fn codec_id_for(format: AudioFormat) -> u32 {
    match format {
        AudioFormat::Mp3 => codec_id::MP3,
        AudioFormat::Aac | AudioFormat::AacAdts | AudioFormat::AacAdif | AudioFormat::AacLatm => {
            codec_id::AAC
        }
        AudioFormat::WmaStd => codec_id::WMA,
        AudioFormat::WmaPro => codec_id::WMA_PRO,
        AudioFormat::DefaultPcm => codec_id::PCM,
        AudioFormat::Alac => codec_id::ALAC,
        AudioFormat::Ape => codec_id::APE,
        AudioFormat::Flac | AudioFormat::FlacOgg => codec_id::FLAC,
        AudioFormat::Vorbis => codec_id::VORBIS,
        other => {
            tracing::warn!(format = ?other, "no driver codec for format");
            codec_id::UNSUPPORTED
        }
    }
}

/// Whether a session for `format` uses gapless transitions.
pub fn is_gapless_format(platform_gapless: bool, format: AudioFormat) -> bool {
    let supported = platform_gapless && (format == AudioFormat::Mp3 || format.is_aac());
    tracing::debug!(?format, supported, "gapless capability");
    supported
}

/// Descriptor a session holds before its stream supplies a media config.
pub fn default_descriptor(defaults: &CodecDefaults) -> CodecDescriptor {
    CodecDescriptor {
        id: codec_id::PCM,
        ch_in: defaults.channels,
        ch_out: defaults.channels,
        sample_rate: defaults.sample_rate,
        bit_rate: defaults.bit_width,
        format: 0,
        options: CodecOptions::None,
    }
}

/// Overwrite id, channels, rate and width from the stream's output media config.
/// Stream format and decoder options set earlier are kept.
pub fn fill_from_media_config(desc: &mut CodecDescriptor, config: &MediaConfig) {
    desc.id = codec_id_for(config.format);
    desc.ch_in = config.channels;
    desc.ch_out = config.channels;
    desc.sample_rate = config.sample_rate;
    desc.bit_rate = config.bit_width;
}

/// Copy decoder options for the active `format` into the descriptor.
///
/// Formats without decoder options (MP3, PCM, ...) leave the descriptor as is.
/// Options for a different codec family than `format` are rejected.
pub fn apply_decoder_params(
    desc: &mut CodecDescriptor,
    format: AudioFormat,
    params: &DecoderParams,
) -> Result<()> {
    let stream_fmt = match format {
        AudioFormat::Aac => Some(stream_format::RAW),
        AudioFormat::AacAdts => Some(stream_format::MP4ADTS),
        AudioFormat::AacAdif => Some(stream_format::ADIF),
        AudioFormat::AacLatm => Some(stream_format::MP4LATM),
        AudioFormat::Flac => Some(stream_format::FLAC),
        AudioFormat::FlacOgg => Some(stream_format::FLAC_OGG),
        _ => None,
    };

    match (format, params) {
        (f, DecoderParams::Aac(opts)) if f.is_aac() => {
            desc.format = stream_fmt.unwrap_or(stream_format::RAW);
            desc.options = CodecOptions::Aac(*opts);
        }
        (AudioFormat::WmaStd | AudioFormat::WmaPro, DecoderParams::Wma { fmt_tag, options }) => {
            desc.format = *fmt_tag;
            desc.options = CodecOptions::Wma(*options);
        }
        (AudioFormat::Alac, DecoderParams::Alac(opts)) => {
            desc.options = CodecOptions::Alac(*opts);
        }
        (AudioFormat::Ape, DecoderParams::Ape(opts)) => {
            desc.options = CodecOptions::Ape(*opts);
        }
        (AudioFormat::Flac | AudioFormat::FlacOgg, DecoderParams::Flac(opts)) => {
            desc.format = stream_fmt.unwrap_or(stream_format::FLAC);
            desc.options = CodecOptions::Flac(*opts);
        }
        (AudioFormat::Vorbis, DecoderParams::Vorbis(opts)) => {
            desc.format = opts.bit_stream_fmt;
            desc.options = CodecOptions::Vorbis(*opts);
        }
        (AudioFormat::Mp3 | AudioFormat::DefaultPcm, _) => {
            tracing::debug!(?format, "format takes no decoder options");
            return Ok(());
        }
        (
            AudioFormat::Aac
            | AudioFormat::AacAdts
            | AudioFormat::AacAdif
            | AudioFormat::AacLatm
            | AudioFormat::WmaStd
            | AudioFormat::WmaPro
            | AudioFormat::Alac
            | AudioFormat::Ape
            | AudioFormat::Flac
            | AudioFormat::FlacOgg
            | AudioFormat::Vorbis,
            other,
        ) => {
            return Err(SessionError::invalid(format!(
                "{} decoder options do not apply to {format:?}",
                other.kind()
            )));
        }
        _ => {
            tracing::warn!(?format, "decoder options ignored for format");
            return Ok(());
        }
    }
    tracing::debug!(?format, stream_format = desc.format, "decoder options applied");
    Ok(())
}
