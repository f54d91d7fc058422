//! End-to-end server tests
//!
//! Each test starts a real server on an ephemeral port with its own data
//! directory and talks to it through the blocking client (or raw frames
//! where the envelope matters).

use std::collections::HashSet;
use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel;
use elevator::config::{Config, StorageEngineConfig};
use elevator::database::Job;
use elevator::network::{read_multipart, write_multipart};
use elevator::protocol::{
    decode_response, encode_request, BatchOp, Command, ErrorKind, Identity, Request,
};
use elevator::{Client, DatabaseRegistry, ElevatorError, Result, Server};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    _temp: TempDir,
    server: Arc<Server>,
    addr: SocketAddr,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    fn start() -> Self {
        let temp = TempDir::new().unwrap();
        let config = Config::builder()
            .endpoint("tcp://127.0.0.1:0")
            .store_path(temp.path().join("store"))
            .data_root(temp.path().join("data"))
            .storage_engine(StorageEngineConfig {
                cache_size: 1024 * 1024,
                write_buffer_size: 1024 * 1024,
                ..StorageEngineConfig::default()
            })
            .build();

        let registry = Arc::new(DatabaseRegistry::from_config(&config).unwrap());
        registry.ensure_default(&config.core.default_db).unwrap();

        let server = Arc::new(Server::bind(&config, registry).unwrap());
        let addr = server.local_addr().unwrap();

        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || runner.run());

        Self {
            _temp: temp,
            server,
            addr,
            handle: Some(handle),
        }
    }

    fn client(&self) -> Client {
        Client::connect(&self.addr.to_string()).unwrap()
    }

    fn stop(mut self) {
        self.server.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

fn remote_kind(result: Result<impl std::fmt::Debug>) -> ErrorKind {
    match result {
        Err(e @ ElevatorError::Remote { .. }) => e.kind(),
        other => panic!("Expected a server error, got {:?}", other),
    }
}

// =============================================================================
// Basic Scenarios
// =============================================================================

#[test]
fn test_put_get_on_default_database() {
    let server = TestServer::start();
    let mut client = server.client();

    client.put("default", b"a", b"1").unwrap();

    assert_eq!(client.get("default", b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(client.get("default", b"b").unwrap(), None);

    server.stop();
}

#[test]
fn test_missing_database_does_not_disturb_others() {
    let server = TestServer::start();
    let mut client = server.client();

    assert_eq!(
        remote_kind(client.put("missing", b"k", b"v")),
        ErrorKind::DatabaseNotFound
    );

    client.put("default", b"k", b"v").unwrap();
    assert_eq!(client.get("default", b"k").unwrap(), Some(b"v".to_vec()));

    server.stop();
}

#[test]
fn test_data_commands_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.client();

    client
        .batch(
            "default",
            vec![
                BatchOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
                BatchOp::Put {
                    key: b"c".to_vec(),
                    value: b"3".to_vec(),
                },
            ],
        )
        .unwrap();
    client.delete("default", b"c").unwrap();

    let range = client.range("default", b"a", b"").unwrap();
    assert_eq!(
        range,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec())
        ]
    );

    let slice = client.slice("default", b"b", 5).unwrap();
    assert_eq!(slice.len(), 1);

    let values = client.mget("default", &[b"a".as_slice(), b"c".as_slice()]).unwrap();
    assert_eq!(values, vec![Some(b"1".to_vec()), None]);

    assert_eq!(client.ping("default").unwrap(), b"PONG");

    server.stop();
}

// =============================================================================
// Administrative Commands
// =============================================================================

#[test]
fn test_database_lifecycle_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.client();

    client.create_database("tenant").unwrap();
    assert_eq!(
        remote_kind(client.create_database("tenant")),
        ErrorKind::DatabaseExists
    );

    client.mount("tenant").unwrap();
    assert_eq!(
        remote_kind(client.mount("tenant")),
        ErrorKind::AlreadyMounted
    );
    assert_eq!(
        remote_kind(client.drop_database("tenant")),
        ErrorKind::DatabaseMounted
    );

    let listed = client.list_databases().unwrap();
    assert_eq!(
        listed,
        vec![
            ("default".to_string(), "unmounted".to_string()),
            ("tenant".to_string(), "mounted".to_string()),
        ]
    );

    client.unmount("tenant").unwrap();
    assert_eq!(
        remote_kind(client.unmount("tenant")),
        ErrorKind::AlreadyUnmounted
    );

    client.drop_database("tenant").unwrap();
    assert_eq!(
        remote_kind(client.ping("tenant")),
        ErrorKind::DatabaseNotFound
    );

    server.stop();
}

#[test]
fn test_invalid_database_name_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.client();

    assert_eq!(
        remote_kind(client.create_database("no/slashes")),
        ErrorKind::InvalidDatabaseName
    );

    server.stop();
}

// =============================================================================
// Concurrency and Ordering
// =============================================================================

#[test]
fn test_two_clients_two_databases_concurrently() {
    let server = TestServer::start();
    {
        let mut admin = server.client();
        admin.create_database("left").unwrap();
        admin.create_database("right").unwrap();
    }

    let workers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|db| {
            let mut client = server.client();
            thread::spawn(move || {
                // Pipeline everything, then collect the replies
                let mut ids = Vec::with_capacity(2000);
                for i in 0..1000u32 {
                    let key = format!("key{:04}", i).into_bytes();
                    let put = Command::Put {
                        key,
                        value: i.to_string().into_bytes(),
                    };
                    ids.push(client.send(&Request::new(db, put)).unwrap());

                    let last = Command::Put {
                        key: b"last".to_vec(),
                        value: i.to_string().into_bytes(),
                    };
                    ids.push(client.send(&Request::new(db, last)).unwrap());
                }
                for id in ids {
                    assert!(client.wait(id).unwrap().is_ok());
                }
                client
            })
        })
        .collect();

    let mut clients: Vec<Client> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    for (db, client) in ["left", "right"].into_iter().zip(clients.iter_mut()) {
        let pairs = client.range(db, b"key", b"kez").unwrap();
        assert_eq!(pairs.len(), 1000);

        let distinct: HashSet<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(distinct.len(), 1000);

        // Writes to one database applied in the order they were sent
        assert_eq!(client.get(db, b"last").unwrap(), Some(b"999".to_vec()));
    }

    server.stop();
}

#[test]
fn test_busy_database_does_not_hold_up_another_on_same_connection() {
    let server = TestServer::start();
    let mut client = server.client();
    client.create_database("slow").unwrap();

    // Stall slow's worker on a reply nobody reads yet
    let (stall_tx, stall_rx) = channel::bounded(0);
    server
        .server
        .registry()
        .dispatch(
            "slow",
            Job {
                identity: Identity::new(vec![Bytes::from_static(b"local")]),
                command: Command::Ping,
                reply_to: stall_tx,
            },
        )
        .unwrap();

    let put = Command::Put {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
    };
    let slow_id = client.send(&Request::new("slow", put)).unwrap();
    // The default database is not mounted yet, so this also mounts on demand
    let fast_id = client.send(&Request::new("default", Command::Ping)).unwrap();

    let (first, response) = client.recv().unwrap();
    assert_eq!(first, fast_id);
    assert_eq!(response.payload, b"PONG");

    stall_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(client.wait(slow_id).unwrap().is_ok());

    server.stop();
}

// =============================================================================
// Reply Size
// =============================================================================

#[test]
fn test_oversized_scan_gets_error_and_stream_stays_in_sync() {
    let server = TestServer::start();
    let mut client = server.client();

    let value = vec![0x5A; 1024 * 1024];
    for i in 0..17u8 {
        client
            .put("default", format!("big{:02}", i).as_bytes(), &value)
            .unwrap();
    }

    assert_eq!(
        remote_kind(client.range("default", b"", b"")),
        ErrorKind::Storage
    );
    assert_eq!(
        remote_kind(client.slice("default", b"", 1000)),
        ErrorKind::Storage
    );

    // Later replies on the same connection still decode
    assert_eq!(client.slice("default", b"big", 2).unwrap().len(), 2);
    assert_eq!(client.ping("default").unwrap(), b"PONG");

    server.stop();
}

// =============================================================================
// Malformed Input and Envelopes
// =============================================================================

#[test]
fn test_malformed_payload_gets_error_reply_and_connection_survives() {
    let server = TestServer::start();
    let mut client = server.client();

    let id = client.send_raw(Bytes::from_static(b"\x00\x00")).unwrap();
    let response = client.wait(id).unwrap();
    assert_eq!(response.error_kind(), Some(ErrorKind::MalformedRequest));

    let mut unknown = Vec::new();
    unknown.extend_from_slice(&7u32.to_be_bytes());
    unknown.extend_from_slice(b"default");
    unknown.push(0x7E);
    let id = client.send_raw(Bytes::from(unknown)).unwrap();
    let response = client.wait(id).unwrap();
    assert_eq!(response.error_kind(), Some(ErrorKind::UnknownOpcode));

    assert_eq!(client.ping("default").unwrap(), b"PONG");

    server.stop();
}

#[test]
fn test_reply_echoes_client_envelope() {
    let server = TestServer::start();
    let stream = TcpStream::connect(server.addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);

    let payload = encode_request(&Request::new("default", Command::Ping));
    let frames = vec![
        Bytes::from_static(b"route-a"),
        Bytes::new(),
        Bytes::from_static(b"correlation-42"),
        Bytes::from(payload),
    ];
    write_multipart(&mut writer, &frames).unwrap();

    let mut reply = read_multipart(&mut reader).unwrap();
    let response = decode_response(&reply.pop().unwrap()).unwrap();

    assert_eq!(reply, frames[..3].to_vec());
    assert_eq!(response.payload, b"PONG");

    server.stop();
}

#[test]
fn test_framing_violation_closes_only_that_connection() {
    let server = TestServer::start();

    {
        let stream = TcpStream::connect(server.addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = BufWriter::new(stream);

        // Zero frames is never valid
        use std::io::Write;
        writer.write_all(&[0, 0]).unwrap();
        writer.flush().unwrap();

        let mut reply = read_multipart(&mut reader).unwrap();
        assert_eq!(reply.len(), 1);
        let response = decode_response(&reply.pop().unwrap()).unwrap();
        assert_eq!(response.error_kind(), Some(ErrorKind::MalformedRequest));

        // Server hangs up afterwards
        assert!(read_multipart(&mut reader).is_err());
    }

    let mut client = server.client();
    assert_eq!(client.ping("default").unwrap(), b"PONG");

    server.stop();
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_shutdown_unmounts_databases() {
    let server = TestServer::start();
    let registry = Arc::clone(server.server.registry());
    let mut client = server.client();

    client.put("default", b"k", b"v").unwrap();
    assert!(registry.lookup("default").unwrap().is_mounted());

    server.stop();

    assert!(!registry.lookup("default").unwrap().is_mounted());
}
