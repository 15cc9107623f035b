use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;
use vcz_leech::{
    config::Config,
    torrent::{Session, SessionFile, Torrent},
};

use crate::{args::Args, error::Error};

mod args;
mod error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // must live until the end, it flushes the log file on drop
    let _guard = init_logging(&args)?;

    let mut config = Config::load(args.config.as_deref())?;

    if let Some(pipeline_depth) = args.pipeline_depth {
        config.pipeline_depth = pipeline_depth;
    }
    if let Some(secs) = args.piece_timeout {
        config.piece_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.stall_timeout {
        config.stall_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config.validate()?;

    let session = tokio::fs::read_to_string(&args.session)
        .await
        .map_err(|e| {
            Error::SessionRead(args.session.display().to_string(), e)
        })?;
    let session = Session::try_from(SessionFile::from_toml(&session)?)?;

    info!(
        "{} ({} bytes, info_hash {}) as {}",
        session.name, session.length, session.info_hash, session.peer_id
    );

    let torrent = Torrent::new(session, config);
    let bytes = torrent.download().await?;

    tokio::fs::write(&args.output, &bytes)
        .await
        .map_err(|e| Error::OutputWrite(args.output.display().to_string(), e))?;

    info!("wrote {} bytes to {}", bytes.len(), args.output.display());

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>, Error> {
    let builder = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .without_time();

    let Some(path) = &args.log_file else {
        tracing::subscriber::set_global_default(builder.finish())
            .map_err(|_| Error::Subscriber)?;
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::LogFile(path.display().to_string()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => std::path::Path::new("."),
    };

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = builder.with_writer(writer).with_ansi(false).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| Error::Subscriber)?;

    Ok(Some(guard))
}
