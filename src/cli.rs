use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::OutputKind;

#[derive(Parser, Debug)]
#[command(
    name = "lightshow",
    version,
    about = "Music-synchronised light shows for relay-switched channels"
)]
pub struct Cli {
    /// Config file (default: ./lightshow.toml, then the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Turn an audio file into a light sequence
    Analyze {
        /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
        input: PathBuf,

        /// Output sequence file [default: <INPUT>.bin]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frames per second
        #[arg(long)]
        fps: Option<u8>,

        /// Number of light channels
        #[arg(long)]
        channels: Option<usize>,
    },

    /// Play a sequence file on a row of terminal lamps
    Preview {
        sequence: PathBuf,

        #[arg(long)]
        channels: Option<usize>,

        /// Frames between channel rotations (0 disables) [default: analysis fps]
        #[arg(long)]
        rotate_frames: Option<usize>,
    },

    /// Print frame rate, length and per-channel duty cycle of a sequence file
    Inspect {
        sequence: PathBuf,

        #[arg(long)]
        channels: Option<usize>,
    },

    /// Run the HTTP light daemon
    Serve {
        /// Listen address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Directory holding uploaded audio and sequences
        #[arg(long)]
        audio_dir: Option<PathBuf>,

        /// Where channel states go
        #[arg(long, value_enum)]
        output: Option<OutputKind>,
    },
}
