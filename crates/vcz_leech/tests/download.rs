use std::{sync::Arc, time::Duration};

use vcz_leech::{config::Config, error::Error, torrent::Torrent};

mod common;
use common::*;

// 3 pieces, one peer has the first and the last, the other has the middle
// one.
#[tokio::test]
async fn disjoint_peers() {
    setup_logging();

    let piece_length = 40_000;
    let data = Arc::new(random_data(100_000));

    let a = seeder(data.clone(), piece_length, vec![0, 2], Mode::Honest).await;
    let b = seeder(data.clone(), piece_length, vec![1], Mode::Honest).await;

    let session = session(&data, piece_length, vec![a, b]);
    let torrent = Torrent::new(session, Config::default());
    let progress = torrent.subscribe();

    let bytes = torrent.download().await.unwrap();

    assert_eq!(bytes.len(), data.len());
    assert!(bytes == *data);

    let progress = *progress.borrow();
    assert_eq!(progress.downloaded, 3);
    assert_eq!(progress.total, 3);
    assert_eq!(progress.percent(), 100.0);
}

// a peer that corrupts every piece must not end up in the file, the
// pieces are downloaded again from the honest one.
#[tokio::test]
async fn corrupt_pieces_are_retried() {
    setup_logging();

    let piece_length = 20_000;
    let data = Arc::new(random_data(50_000));

    let all = vec![0, 1, 2];
    let corrupt =
        seeder(data.clone(), piece_length, all.clone(), Mode::Corrupt).await;
    let honest = seeder(data.clone(), piece_length, all, Mode::Honest).await;

    let session = session(&data, piece_length, vec![corrupt, honest]);
    let torrent = Torrent::new(session, Config::default());

    let bytes = torrent.download().await.unwrap();
    assert!(bytes == *data);
}

#[tokio::test]
async fn unreachable_peers_are_skipped() {
    setup_logging();

    let piece_length = 16_384;
    let data = Arc::new(random_data(16_384 * 2));

    let honest =
        seeder(data.clone(), piece_length, vec![0, 1], Mode::Honest).await;
    let peers = vec![closed_addr().await, honest, closed_addr().await];

    let session = session(&data, piece_length, peers);
    let torrent = Torrent::new(session, Config::default());

    let bytes = torrent.download().await.unwrap();
    assert!(bytes == *data);
}

#[tokio::test]
async fn no_peers() {
    setup_logging();

    let data = random_data(1000);

    let peers = vec![closed_addr().await, closed_addr().await];
    let torrent = Torrent::new(session(&data, 100, peers), Config::default());
    assert!(matches!(torrent.download().await, Err(Error::NoPeers)));

    let torrent = Torrent::new(session(&data, 100, vec![]), Config::default());
    assert!(matches!(torrent.download().await, Err(Error::NoPeers)));
}

// nobody has the second piece
#[tokio::test]
async fn missing_piece_stalls() {
    setup_logging();

    let piece_length = 1000;
    let data = Arc::new(random_data(2000));

    let peer = seeder(data.clone(), piece_length, vec![0], Mode::Honest).await;
    let config = Config {
        stall_timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    };

    let session = session(&data, piece_length, vec![peer]);
    let torrent = Torrent::new(session, config);
    let progress = torrent.subscribe();

    assert!(matches!(
        torrent.download().await,
        Err(Error::Stalled { done: 1, total: 2 })
    ));
    assert_eq!(progress.borrow().last_piece, Some(0));
}

// the only peer never sends data, its worker times out and exits
#[tokio::test]
async fn silent_peer_is_dropped() {
    setup_logging();

    let piece_length = 1000;
    let data = Arc::new(random_data(1000));

    let peer = seeder(data.clone(), piece_length, vec![0], Mode::Silent).await;
    let config = Config {
        piece_timeout: Duration::from_millis(300),
        stall_timeout: None,
        ..Default::default()
    };

    let session = session(&data, piece_length, vec![peer]);
    let torrent = Torrent::new(session, config);

    assert!(matches!(
        torrent.download().await,
        Err(Error::Stalled { done: 0, total: 1 })
    ));
}

#[tokio::test]
async fn empty_file() {
    let torrent = Torrent::new(session(&[], 100, vec![]), Config::default());
    assert!(torrent.download().await.unwrap().is_empty());
}
