use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[clap(name = "vcz-get")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Session file in TOML, with the piece hashes and the peers.
    pub session: PathBuf,

    /// Where the downloaded file is written.
    pub output: PathBuf,

    /// Config file, defaults to `config.toml` in the user's config folder.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Max requests in flight to a single peer.
    #[clap(long)]
    pub pipeline_depth: Option<usize>,

    /// Seconds that a peer may stay silent while sending a piece.
    #[clap(long)]
    pub piece_timeout: Option<u64>,

    /// Give up after this many seconds without a new piece, 0 waits forever.
    #[clap(long)]
    pub stall_timeout: Option<u64>,

    #[clap(short, long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Write the logs to this file instead of stdout.
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}
