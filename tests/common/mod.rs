//! Shared harness for the end-to-end suites: connect, subscribe, and drive
//! a connection's inbound pump until a condition holds.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use tandem::client::SubmitAck;
use tandem::{Backend, Connection, ConnectionState, OtError};

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Connect a new client and consume the handshake.
pub async fn connect(backend: &Backend) -> Connection {
    init_logging();
    let channel = backend.connect().await;
    let mut conn = Connection::new(channel, backend.registry());
    assert!(conn.process_one().await, "handshake lost");
    assert_eq!(conn.state(), ConnectionState::Connected);
    conn
}

/// Drive `conn` until `pred` holds (or a generous timeout trips).
pub async fn until<F>(conn: &mut Connection, pred: F)
where
    F: Fn(&Connection) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pred(conn) {
            assert!(conn.process_one().await, "transport closed while waiting");
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Subscribe and wait for the reply.
pub async fn subscribe(conn: &mut Connection, c: &str, d: &str) {
    conn.subscribe(c, d);
    until(conn, |conn| {
        conn.doc(c, d).map(|doc| doc.subscribed()).unwrap_or(false)
    })
    .await;
}

/// Drive `conn` until its replica of `(c, d)` reaches version `v`.
pub async fn until_version(conn: &mut Connection, c: &str, d: &str, v: u64) {
    until(conn, |conn| {
        conn.doc(c, d).map(|doc| doc.version() >= v).unwrap_or(false)
    })
    .await;
}

/// Drive `conn` until the submission resolves, returning its outcome.
pub async fn await_ack(conn: &mut Connection, mut ack: SubmitAck) -> Result<u64, OtError> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ack.try_recv() {
                Ok(outcome) => return outcome,
                Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {}
                Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                    panic!("ack channel dropped")
                }
            }
            assert!(conn.process_one().await, "transport closed awaiting ack");
        }
    })
    .await
    .expect("ack not received in time")
}
