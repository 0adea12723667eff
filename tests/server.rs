//! Daemon smoke test: the client handshake and a handful of verbs
//! replayed over a real loopback connection, byte for byte in the wire
//! format the interactive client speaks.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;

use minifs::disk::MemDisk;
use minifs::param::DISK_SIZE;
use minifs::protocol::{self, REPLY_TIMEOUT};
use minifs::{server, MiniFs};

fn connect_fresh_daemon() -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
    thread::spawn(move || server::serve(fs, listener));

    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(REPLY_TIMEOUT)).unwrap();
    stream
}

fn login(stream: &mut TcpStream, user: i32) {
    protocol::send_msg(stream, &user.to_string()).unwrap();
    assert!(protocol::read_status(stream).unwrap());
}

/// Sends a command and returns (status, drained payload text).
fn roundtrip(stream: &mut TcpStream, line: &str) -> (bool, String) {
    protocol::send_msg(stream, line).unwrap();
    let ok = protocol::read_status(stream).unwrap();
    let text = protocol::drain_to_string(stream).unwrap();
    (ok, text)
}

#[test]
fn session_walkthrough() {
    let mut stream = connect_fresh_daemon();
    login(&mut stream, 7);

    let (ok, _) = roundtrip(&mut stream, "mkdir /t");
    assert!(ok);

    let (ok, listing) = roundtrip(&mut stream, "ls /");
    assert!(ok);
    assert_eq!(listing, "t\n");

    let (ok, path) = roundtrip(&mut stream, "cd /t");
    assert!(ok);
    assert_eq!(path, "/t/\n");

    let (ok, path) = roundtrip(&mut stream, "pwd");
    assert!(ok);
    assert_eq!(path, "/t/\n");

    // Upload into the filesystem, then read it back two ways.
    protocol::send_msg(&mut stream, "cp --from-local local.txt /t/u").unwrap();
    assert!(protocol::read_status(&mut stream).unwrap());
    protocol::send_size(&mut stream, 5).unwrap();
    assert!(protocol::read_status(&mut stream).unwrap());
    stream.write_all(b"hello").unwrap();

    let (ok, contents) = roundtrip(&mut stream, "cat /t/u");
    assert!(ok);
    assert_eq!(contents, "hello");

    let (ok, contents) = roundtrip(&mut stream, "cp --to-local /t/u local.txt");
    assert!(ok);
    assert_eq!(contents, "hello");

    let (ok, reason) = roundtrip(&mut stream, "cat /missing");
    assert!(!ok);
    assert_eq!(reason, "invalid path or permission denied\n");

    let (ok, reason) = roundtrip(&mut stream, "frobnicate /t");
    assert!(!ok);
    assert!(reason.starts_with("unknown command"));

    let (ok, help) = roundtrip(&mut stream, "help");
    assert!(ok);
    assert!(help.contains("MiniFS commands"));
}

#[test]
fn sessions_are_isolated_but_share_the_image() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
    thread::spawn(move || server::serve(fs, listener));

    let mut alice = TcpStream::connect(addr).unwrap();
    alice.set_read_timeout(Some(REPLY_TIMEOUT)).unwrap();
    login(&mut alice, 1);

    let mut bob = TcpStream::connect(addr).unwrap();
    bob.set_read_timeout(Some(REPLY_TIMEOUT)).unwrap();
    login(&mut bob, 2);

    let (ok, _) = roundtrip(&mut alice, "mkdir /secret");
    assert!(ok);

    // Bob's session shares the disk but not the view of alice's files,
    // and keeps its own working directory.
    let (_, listing) = roundtrip(&mut bob, "ls /");
    assert!(!listing.contains("secret"));
    let (ok, _) = roundtrip(&mut bob, "cd /secret");
    assert!(!ok);

    let (ok, path) = roundtrip(&mut alice, "cd /secret");
    assert!(ok);
    assert_eq!(path, "/secret/\n");
    let (_, path) = roundtrip(&mut bob, "pwd");
    assert_eq!(path, "/\n");
}
