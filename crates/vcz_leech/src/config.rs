//! Configuration of the download engine.
//!
//! Sources, in increasing order of priority:
//!
//! Defaults --overridden by--> File --overridden by--> `VCZ_LEECH_*` env vars
//!
//! The file is either given explicitly or `config.toml` in the user's config
//! folder, which is optional.
use std::{path::Path, time::Duration};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{error::Error, tcp_wire::{BLOCK_LEN, MAX_MESSAGE_SIZE}};

/// Largest block that we are willing to request, clients drop connections
/// that ask for more than this.
pub const MAX_BLOCK_LEN: u32 = 128 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Max time to wait for the TCP connection to a peer.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,

    /// Max time to wait for the handshake of the peer.
    #[serde(with = "secs")]
    pub handshake_timeout: Duration,

    /// Max time to wait for the first message after the handshake, usually a
    /// bitfield.
    #[serde(with = "secs")]
    pub bitfield_timeout: Duration,

    /// Each read while downloading a piece must complete within this time.
    #[serde(with = "secs")]
    pub piece_timeout: Duration,

    /// How many requests may be in flight to a single peer.
    pub pipeline_depth: usize,

    /// Length of the blocks that we request.
    pub block_len: u32,

    /// Fail the download when no piece was accepted for this long.
    /// Zero in a file or env var disables it.
    #[serde(with = "opt_secs")]
    pub stall_timeout: Option<Duration>,

    /// Upper bound on the length prefix of a message.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
            pipeline_depth: 5,
            block_len: BLOCK_LEN,
            stall_timeout: Some(Duration::from_secs(300)),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Merge the defaults, the config file and the env vars.
    ///
    /// # Errors
    ///
    /// An explicit `path` that doesn't exist, a file or env var that can't be
    /// parsed, or values that fail [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                builder =
                    builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(dirs) = ProjectDirs::from("", "", "vcz_leech") {
                    let file = dirs.config_dir().join("config.toml");
                    let file = config::File::from(file).required(false);
                    builder = builder.add_source(file);
                }
            }
        }

        let config = builder
            .add_source(config::Environment::with_prefix("VCZ_LEECH"))
            .build()?
            .try_deserialize::<Config>()?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.pipeline_depth == 0 {
            return Err(Error::ConfigError(
                "pipeline_depth must not be zero".into(),
            ));
        }
        if self.block_len == 0 {
            return Err(Error::ConfigError("block_len must not be zero".into()));
        }
        if self.block_len > MAX_BLOCK_LEN {
            return Err(Error::ConfigError(format!(
                "block_len of {} is larger than the maximum of {MAX_BLOCK_LEN}",
                self.block_len
            )));
        }
        // a piece message carries 9 bytes besides the block
        if (self.block_len as usize) + 9 > self.max_message_size {
            return Err(Error::ConfigError(format!(
                "max_message_size of {} can't fit a block of {}",
                self.max_message_size, self.block_len
            )));
        }
        Ok(())
    }
}

/// Durations as integer seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Optional durations as integer seconds, zero is `None`.
mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.map(|v| v.as_secs()).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
