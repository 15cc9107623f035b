//! A download-only engine for the BitTorrent protocol V1.
//!
//! Given a [`torrent::Session`], which holds the piece hashes of a file and
//! a list of peers, the engine connects to every peer at the same time,
//! downloads the pieces that each one has, verifies their SHA-1 and
//! assembles the file in memory.
//!
//! Parsing `.torrent` files, talking to trackers and uploading are not part
//! of this crate.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), vcz_leech::error::Error> {
//! use vcz_leech::{
//!     config::Config,
//!     torrent::{Session, SessionFile, Torrent},
//! };
//!
//! let toml = std::fs::read_to_string("debian.toml")?;
//! let file = SessionFile::from_toml(&toml)?;
//! let session = Session::try_from(file)?;
//! let torrent = Torrent::new(session, Config::load(None)?);
//!
//! let bytes = torrent.download().await?;
//! # Ok(())
//! # }
//! ```
pub mod bitfield;
pub mod config;
pub mod error;
pub mod peer;
pub mod piece;
pub mod tcp_wire;
pub mod torrent;
