//! A scripted RCON server for driving sessions in tests.

#![allow(dead_code)]

use source_rcon_client::packet::{encode_frame, response, ID_INVALID};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;

pub const PASSWORD: &str = "secret";

/// A request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub id: i32,
    pub code: i32,
    pub body: String,
}

pub struct Stub<T> {
    pub addr: SocketAddr,
    handle: JoinHandle<T>,
}

impl<T> Stub<T> {
    pub fn join(self) -> T {
        self.handle.join().expect("stub server panicked")
    }
}

/// Accept a single connection and hand it to `script`.
pub fn spawn<T, F>(script: F) -> Stub<T>
where
    T: Send + 'static,
    F: FnOnce(TcpStream) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_nodelay(true).unwrap();
        script(stream)
    });

    Stub { addr, handle }
}

pub fn receive(stream: &mut TcpStream) -> Received {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();

    let mut rest = vec![0u8; i32::from_le_bytes(len) as usize];
    stream.read_exact(&mut rest).unwrap();

    let id = i32::from_le_bytes(rest[0..4].try_into().unwrap());
    let code = i32::from_le_bytes(rest[4..8].try_into().unwrap());
    let body = String::from_utf8(rest[8..rest.len() - 2].to_vec()).unwrap();
    assert_eq!(&rest[rest.len() - 2..], &[0, 0]);

    Received { id, code, body }
}

pub fn frame(id: i32, code: i32, payload: &str) -> Vec<u8> {
    encode_frame(id, code, payload.as_bytes())
}

pub fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
    stream.flush().unwrap();
}

/// Read the login request and accept it if the password matches.
pub fn login(stream: &mut TcpStream) -> i32 {
    let request = receive(stream);
    assert_eq!(request.code, 3);

    let id = if request.body == PASSWORD { request.id } else { ID_INVALID };
    send(stream, &frame(id, response::LOGIN, ""));
    request.id
}

/// Answer `count` commands with `reply(body)`.
pub fn answer(stream: &mut TcpStream, count: usize, reply: impl Fn(&str) -> String) -> Vec<Received> {
    (0..count)
        .map(|_| {
            let request = receive(stream);
            assert_eq!(request.code, 2);
            send(stream, &frame(request.id, response::COMMAND, &reply(&request.body)));
            request
        })
        .collect()
}

/// Whether the peer closed its end, waiting at most a few seconds.
pub fn peer_closed(stream: &mut TcpStream) -> bool {
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(len) => len == 0,
        Err(err) => err.kind() == std::io::ErrorKind::ConnectionReset,
    }
}
