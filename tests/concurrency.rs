//! Close semantics, backpressure, and fan-out under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use packet_link::buffer::BufferPool;
use packet_link::core::{ByteOrder, Protocol, ProtocolSide};
use packet_link::error::LinkError;
use packet_link::service::Server;
use packet_link::session::Session;

fn protocol() -> Protocol {
    Protocol::packet_n(4, ByteOrder::BigEndian, 0, 0)
}

/// A session whose peer never reads, with a one-byte pipe so any frame
/// blocks the dispatch task mid-write.
fn stalled_session(queue_size: usize) -> Arc<Session> {
    let (a, _b) = tokio::io::duplex(1);
    // The unread half is leaked so the pipe stays open and permanently full.
    std::mem::forget(_b);
    Session::new(
        1,
        a,
        &protocol(),
        ProtocolSide::Client,
        Arc::new(BufferPool::default()),
        queue_size,
        0,
    )
    .unwrap()
}

#[tokio::test]
async fn test_close_callbacks_run_exactly_once() {
    let (a, _b) = tokio::io::duplex(1024);
    let session = Session::new(
        1,
        a,
        &protocol(),
        ProtocolSide::Client,
        Arc::new(BufferPool::default()),
        1,
        0,
    )
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    session.add_close_callback({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move { session.close() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(session.is_closed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_callbacks_run_in_registration_order() {
    let session = stalled_session(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = order.clone();
        session.add_close_callback(move || order.lock().unwrap().push(i));
    }

    session.close();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_removed_callback_never_runs() {
    let session = stalled_session(1);
    let calls = Arc::new(AtomicUsize::new(0));

    let id = session.add_close_callback({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    });
    session.remove_close_callback(id);

    session.close();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_callback_added_after_close_is_dropped() {
    let session = stalled_session(1);
    session.close();

    let calls = Arc::new(AtomicUsize::new(0));
    session.add_close_callback({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_full_queue_zero_timeout_closes_session() {
    let session = stalled_session(1);

    // First frame occupies the dispatch task, second fills the queue.
    let first = session.async_send(vec![0u8; 64], Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = session.async_send(vec![1u8; 64], Duration::from_secs(5));
    tokio::task::yield_now().await;

    let third = session.async_send(vec![2u8; 64], Duration::ZERO);
    let err = third.wait().await.unwrap_err();
    assert!(matches!(err, LinkError::AsyncSendTimeout));
    assert!(session.is_closed());

    // Pending work fails rather than silently dropping.
    assert!(first.wait().await.is_err());
    assert!(second.wait().await.is_err());
}

#[tokio::test]
async fn test_full_queue_timeout_elapsed_closes_session() {
    let session = stalled_session(1);

    let _first = session.async_send(vec![0u8; 64], Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let _second = session.async_send(vec![1u8; 64], Duration::from_secs(5));
    tokio::task::yield_now().await;

    let third = session.async_send(vec![2u8; 64], Duration::from_millis(20));
    let err = third.wait().await.unwrap_err();
    assert!(matches!(err, LinkError::AsyncSendTimeout));
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_async_send_to_closed_session() {
    let session = stalled_session(1);
    session.close();

    let err = session
        .async_send(b"late".to_vec(), Duration::from_secs(1))
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::SendToClosed));
}

#[tokio::test]
async fn test_broadcast_reaches_every_session() {
    let protocol = protocol();
    let server = Server::bind("127.0.0.1:0", protocol.clone())
        .await
        .unwrap()
        .with_async_send_timeout(Duration::from_millis(500));
    let addr = server.local_addr().unwrap();

    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server
                .serve(|session| async move {
                    let _ = session.process(|_| Ok(())).await;
                })
                .await;
        }
    });

    let clients = vec![
        Session::dial(addr, &protocol).await.unwrap(),
        Session::dial(addr, &protocol).await.unwrap(),
        Session::dial(addr, &protocol).await.unwrap(),
    ];
    while server.session_count() < clients.len() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut visited = 0;
    server.for_each_session(|session| {
        assert!(!session.is_closed());
        visited += 1;
    });
    assert_eq!(visited, clients.len());

    let payload = b"fanout".to_vec();
    let deliveries = server.broadcast(&payload).unwrap();
    assert_eq!(deliveries.len(), clients.len());
    for delivery in deliveries {
        delivery.work.wait().await.unwrap();
    }

    for client in &clients {
        assert_eq!(client.read_packet().await.unwrap(), b"fanout");
    }

    for client in clients {
        client.close();
    }
    server.stop();
}

#[tokio::test]
async fn test_interleaved_sync_sends_keep_frames_whole() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let pool = Arc::new(BufferPool::default());
    let protocol = protocol();
    let sender = Session::new(1, a, &protocol, ProtocolSide::Client, pool.clone(), 4, 0).unwrap();
    let receiver = Session::new(2, b, &protocol, ProtocolSide::Server, pool, 4, 0).unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let sender = sender.clone();
        tasks.push(tokio::spawn(async move {
            sender.send_bytes(&[i; 128], SystemTime::now()).await
        }));
    }

    let mut seen = Vec::new();
    for _ in 0..8 {
        let body = receiver.read_packet().await.unwrap();
        // Every frame arrives intact, whatever the arrival order.
        assert_eq!(body.len(), 128);
        assert!(body.iter().all(|&b| b == body[0]));
        seen.push(body[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<u8>>());

    for task in tasks {
        task.await.unwrap().unwrap();
    }
}
