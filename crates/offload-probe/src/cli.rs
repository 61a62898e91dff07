use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "offload-probe", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Session config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push compressed files through a loopback offload session, one track after another
    Play {
        /// Compressed audio files; more than one exercises track transitions
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Stream format (mp3, aac_adts, flac, vorbis, ...). Inferred from the extension when omitted
        #[arg(long)]
        format: Option<String>,

        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,

        #[arg(long, default_value_t = 2)]
        channels: u32,

        /// Bytes handed to each session write
        #[arg(long, default_value_t = 8192)]
        chunk_bytes: usize,

        /// Driver fragment size in bytes
        #[arg(long, default_value_t = 4096)]
        fragment_size: usize,

        /// Driver fragment count
        #[arg(long, default_value_t = 4)]
        fragments: usize,

        /// Simulated DSP consumption rate in bytes per second
        #[arg(long, default_value_t = 256_000)]
        render_rate: usize,

        /// Encoder delay in samples, sent as gapless metadata before each track
        #[arg(long)]
        encoder_delay: Option<u32>,

        /// Encoder padding in samples, sent with --encoder-delay
        #[arg(long, default_value_t = 0)]
        encoder_padding: u32,

        /// Print the final session status as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stream formats with their driver codec ids
    Formats,
}
