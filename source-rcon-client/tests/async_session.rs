mod common;

use common::*;
use source_rcon_client::packet::{response, PacketError};
use source_rcon_client::r#async::{dial, Session};
use source_rcon_client::{Error, Options};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn executes_a_command() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        answer(&mut stream, 1, |_| "3 players online".to_string())
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("list").await.unwrap(), "3 players online");
    session.close().await.unwrap();

    let received = stub.join();
    assert_eq!(received[0].body, "list");
    assert_eq!(received[0].id, session.last_request_id().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_fails_and_closes() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        peer_closed(&mut stream)
    });

    assert!(matches!(
        dial(stub.addr, "hunter2").await,
        Err(Error::AuthenticationFailed)
    ));
    assert!(stub.join());
}

#[tokio::test(flavor = "multi_thread")]
async fn login_skips_one_unknown_frame() {
    let stub = spawn(|mut stream| {
        let request = receive(&mut stream);
        send(&mut stream, &frame(request.id, 7, ""));
        thread::sleep(Duration::from_millis(20));
        send(&mut stream, &frame(request.id, response::LOGIN, ""));
        answer(&mut stream, 1, |body| body.to_uppercase());
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("status").await.unwrap(), "STATUS");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn login_unknown_frame_in_the_same_read() {
    let stub = spawn(|mut stream| {
        let request = receive(&mut stream);
        let mut bytes = frame(request.id, 7, "");
        bytes.extend(frame(request.id, response::LOGIN, ""));
        send(&mut stream, &bytes);
        answer(&mut stream, 1, |body| body.to_uppercase());
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("status").await.unwrap(), "STATUS");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn login_response_for_another_request() {
    let stub = spawn(|mut stream| {
        let request = receive(&mut stream);
        send(&mut stream, &frame(request.id + 1, response::LOGIN, ""));
        request.id
    });

    let result = dial(stub.addr, PASSWORD).await;
    let id = stub.join();
    assert!(matches!(
        result,
        Err(Error::IdMismatch { expected, actual }) if expected == id && actual == id + 1
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_frame_answers_the_next_command() {
    let stub = spawn(|mut stream| {
        login(&mut stream);

        let first = receive(&mut stream);
        let mut bytes = frame(first.id, response::COMMAND, "first");
        bytes.extend(frame(first.id + 1, response::COMMAND, "second"));
        send(&mut stream, &bytes);

        // Already answered by the frame above
        let second = receive(&mut stream);
        assert_eq!(second.id, first.id + 1);

        answer(&mut stream, 1, |_| "third".to_string());
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("a").await.unwrap(), "first");
    assert_eq!(session.execute("b").await.unwrap(), "second");
    assert_eq!(session.execute("c").await.unwrap(), "third");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_frame_for_another_request_is_a_mismatch() {
    let stub = spawn(|mut stream| {
        login(&mut stream);

        let first = receive(&mut stream);
        let mut bytes = frame(first.id, response::COMMAND, "first");
        bytes.extend(frame(first.id, response::COMMAND, "stale"));
        send(&mut stream, &bytes);

        receive(&mut stream);
        let again = receive(&mut stream);
        send(&mut stream, &frame(again.id, response::COMMAND, "fresh"));
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("a").await.unwrap(), "first");

    let last = session.last_request_id().await;
    assert!(matches!(
        session.execute("b").await,
        Err(Error::IdMismatch { expected, actual }) if expected == last + 1 && actual == last
    ));

    assert_eq!(session.execute("c").await.unwrap(), "fresh");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn short_read_gets_one_continuation() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        let request = receive(&mut stream);
        let bytes = frame(request.id, response::COMMAND, "split");
        send(&mut stream, &bytes[..2]);
        thread::sleep(Duration::from_millis(50));
        send(&mut stream, &bytes[2..]);
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    assert_eq!(session.execute("status").await.unwrap(), "split");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_frame_leaves_session_usable() {
    let stub = spawn(|mut stream| {
        login(&mut stream);

        let request = receive(&mut stream);
        let mut bytes = frame(request.id, response::COMMAND, "");
        bytes[0..4].copy_from_slice(&9i32.to_le_bytes());
        send(&mut stream, &bytes);

        answer(&mut stream, 1, |_| "recovered".to_string());
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    let err = session.execute("x").await.unwrap_err();
    assert!(matches!(err, Error::Packet(PacketError::LengthTooSmall(9))));
    assert!(!err.is_fatal_to_session());

    assert_eq!(session.execute("y").await.unwrap(), "recovered");
    session.close().await.unwrap();
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn read_timeout_is_recoverable() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        receive(&mut stream);
        peer_closed(&mut stream)
    });

    let options = Options::default().read_timeout(Duration::from_millis(200));
    let session = Session::dial_with(stub.addr, PASSWORD, &options).await.unwrap();

    assert!(matches!(
        session.execute("slow").await,
        Err(Error::ReadTimeout)
    ));
    assert!(!session.is_closed());

    session.close().await.unwrap();
    assert!(stub.join());
}

#[tokio::test(flavor = "multi_thread")]
async fn late_reply_is_not_taken_for_the_next_command() {
    let stub = spawn(|mut stream| {
        login(&mut stream);

        // Only answer the first command once the client has given up on it
        let slow = receive(&mut stream);
        let next = receive(&mut stream);
        send(&mut stream, &frame(slow.id, response::COMMAND, "answer to slow"));

        (slow.id, next.id, peer_closed(&mut stream))
    });

    let options = Options::default().read_timeout(Duration::from_millis(200));
    let session = Session::dial_with(stub.addr, PASSWORD, &options).await.unwrap();
    let acknowledged = session.last_request_id().await;

    assert!(matches!(session.execute("slow").await, Err(Error::ReadTimeout)));
    let err = session.execute("next").await.unwrap_err();
    session.close().await.unwrap();

    let (slow_id, next_id, closed) = stub.join();
    assert_eq!(next_id, slow_id + 1);
    assert!(matches!(
        err,
        Error::IdMismatch { expected, actual } if expected == next_id && actual == slow_id
    ));
    assert_eq!(session.last_request_id().await, acknowledged);
    assert!(closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_hanging_up_is_reported() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        receive(&mut stream);
    });

    let session = dial(stub.addr, PASSWORD).await.unwrap();
    let err = session.execute("bye").await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert!(err.is_fatal_to_session());
    stub.join();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_interrupts_a_pending_command() {
    let stub = spawn(|mut stream| {
        login(&mut stream);
        receive(&mut stream);
        peer_closed(&mut stream)
    });

    let session = Arc::new(dial(stub.addr, PASSWORD).await.unwrap());
    let worker = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.execute("never answered").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.close().await.unwrap();

    assert!(matches!(worker.await.unwrap(), Err(Error::SessionClosed)));
    assert!(matches!(
        session.execute("again").await,
        Err(Error::SessionClosed)
    ));
    session.close().await.unwrap();
    assert!(stub.join());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_commands_get_their_own_responses() {
    const WORKERS: usize = 8;

    let stub = spawn(|mut stream| {
        login(&mut stream);
        answer(&mut stream, WORKERS, |body| format!("re: {}", body))
    });

    let session = Arc::new(dial(stub.addr, PASSWORD).await.unwrap());
    let workers: Vec<_> = (0..WORKERS)
        .map(|i| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let command = format!("echo {}", i);
                let output = session.execute(&command).await.unwrap();
                assert_eq!(output, format!("re: {}", command));
            })
        })
        .collect();

    for worker in workers {
        worker.await.unwrap();
    }
    session.close().await.unwrap();
    assert_eq!(stub.join().len(), WORKERS);
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    assert!(matches!(dial(addr, PASSWORD).await, Err(Error::DialRefused)));
}
