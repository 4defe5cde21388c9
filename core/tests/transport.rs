/*
 * transport.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Socket-level integration tests: a bound transport with the HTTP chain,
 * driven by plain blocking client sockets.
 */

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use graticola_core::filter::FilterChain;
use graticola_core::http::encoding::EncodingRegistry;
use graticola_core::http::{HttpCodecFilter, HttpRequestPacket};
use graticola_core::memory::Buffer;
use graticola_core::server::{HandlerRegistry, HttpHandler, HttpHandlerFilter, Response, ServerConfig};
use graticola_core::transport::{ChainFactory, ShutdownContext, ShutdownListener, TcpTransport};
use graticola_core::EngineResult;

fn echo_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    let handler: Arc<dyn HttpHandler> = Arc::new(
        |req: &HttpRequestPacket, body: &[u8], resp: &mut Response| -> EngineResult<()> {
            if body.is_empty() {
                let uri = req.uri.clone();
                resp.write(uri.as_bytes());
            } else {
                let copy = body.to_vec();
                resp.write(&copy);
            }
            Ok(())
        },
    );
    registry.register("", "/", handler);
    Arc::new(registry)
}

fn start_http_transport(config: ServerConfig) -> (TcpTransport, SocketAddr) {
    let config = Arc::new(config);
    let encodings = Arc::new(EncodingRegistry::with_defaults(config.compression_level));
    let registry = echo_registry();
    let chain_config = config.clone();
    let factory: ChainFactory = Arc::new(move || {
        FilterChain::new(vec![
            Box::new(HttpCodecFilter::new(chain_config.clone(), encodings.clone())),
            Box::new(HttpHandlerFilter::new(registry.clone())),
        ])
    });
    let mut transport = TcpTransport::new(config, factory);
    transport
        .bind("127.0.0.1:0".parse().unwrap())
        .expect("bind failed");
    transport.start().expect("start failed");
    let addr = transport.local_addr().unwrap();
    (transport, addr)
}

fn client(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read one response: headers, then exactly Content-Length body bytes.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("read header byte");
        assert!(n > 0, "connection closed mid-headers");
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    let content_length = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).expect("read body");
    (head, body)
}

#[test]
fn http10_request_gets_response_then_eof() {
    let (mut transport, addr) = start_http_transport(ServerConfig::default());
    let mut c = client(addr);
    c.write_all(b"GET /hello HTTP/1.0\r\n\r\n").unwrap();
    let mut all = Vec::new();
    c.read_to_end(&mut all).expect("read full response");
    let text = String::from_utf8(all).unwrap();
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"), "got: {}", text);
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("/hello"));
    transport.shutdown(Duration::from_millis(200));
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let (mut transport, addr) = start_http_transport(ServerConfig::default());
    let mut c = client(addr);
    c.write_all(b"GET /one HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let (head, body) = read_response(&mut c);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"/one");

    c.write_all(b"GET /two HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let (_, body) = read_response(&mut c);
    assert_eq!(body, b"/two");
    transport.shutdown(Duration::from_millis(200));
}

#[test]
fn pipelined_requests_on_one_socket() {
    let (mut transport, addr) = start_http_transport(ServerConfig::default());
    let mut c = client(addr);
    c.write_all(b"GET /a HTTP/1.1\r\nHost: t\r\n\r\nGET /b HTTP/1.1\r\nHost: t\r\n\r\n")
        .unwrap();
    let (_, body) = read_response(&mut c);
    assert_eq!(body, b"/a");
    let (_, body) = read_response(&mut c);
    assert_eq!(body, b"/b");
    // The connection is still usable afterwards.
    c.write_all(b"GET /c HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let (_, body) = read_response(&mut c);
    assert_eq!(body, b"/c");
    transport.shutdown(Duration::from_millis(200));
}

#[test]
fn post_body_round_trips() {
    let (mut transport, addr) = start_http_transport(ServerConfig::default());
    let mut c = client(addr);
    let payload = b"payload bytes over a real socket";
    let req = format!(
        "POST /p HTTP/1.1\r\nHost: t\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    );
    c.write_all(req.as_bytes()).unwrap();
    c.write_all(payload).unwrap();
    let (head, body) = read_response(&mut c);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, payload);
    transport.shutdown(Duration::from_millis(200));
}

#[test]
fn writes_preserve_per_producer_order() {
    // Outbound transport with a pass-through (empty) chain; the peer is a
    // plain blocking listener that records the byte stream.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let peer_addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();

    const PRODUCERS: u8 = 4;
    const PER_PRODUCER: usize = 50;
    const RECORD: usize = 8;
    let total = PRODUCERS as usize * PER_PRODUCER * RECORD;

    let reader = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut buf = vec![0u8; total];
        sock.read_exact(&mut buf).unwrap();
        received2.lock().unwrap().extend_from_slice(&buf);
    });

    let factory: ChainFactory = Arc::new(|| FilterChain::new(Vec::new()));
    let mut transport = TcpTransport::new(Arc::new(ServerConfig::default()), factory);
    transport.start().expect("start failed");
    let handle = transport.connect(peer_addr).expect("connect failed");

    let mut producers = Vec::new();
    for pid in 0..PRODUCERS {
        let handle = handle.clone();
        producers.push(std::thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                let mut record = vec![pid; RECORD];
                record[1] = seq as u8;
                loop {
                    match handle.write(Buffer::from(record.clone()), None) {
                        Ok(()) => break,
                        Err(_) => std::thread::sleep(Duration::from_millis(1)),
                    }
                }
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }
    reader.join().unwrap();

    let bytes = received.lock().unwrap();
    assert_eq!(bytes.len(), total);
    // Records arrive whole (buffer-boundary interleaving) and in per-producer
    // sequence order.
    let mut next_seq = [0usize; PRODUCERS as usize];
    for record in bytes.chunks(RECORD) {
        let pid = record[0] as usize;
        let seq = record[1] as usize;
        assert!(record[2..].iter().all(|&b| b == record[0]), "torn record");
        assert_eq!(seq, next_seq[pid], "producer {} out of order", pid);
        next_seq[pid] += 1;
    }
    transport.shutdown(Duration::from_millis(200));
}

struct FlagListener {
    called: Arc<AtomicBool>,
}

impl ShutdownListener for FlagListener {
    fn shutdown_requested(&self, ctx: &Arc<ShutdownContext>) {
        self.called.store(true, Ordering::SeqCst);
        ctx.ready();
    }
}

#[test]
fn graceful_shutdown_notifies_listeners() {
    let config = ServerConfig::default();
    let config = Arc::new(config);
    let encodings = Arc::new(EncodingRegistry::with_defaults(6));
    let registry = echo_registry();
    let chain_config = config.clone();
    let factory: ChainFactory = Arc::new(move || {
        FilterChain::new(vec![
            Box::new(HttpCodecFilter::new(chain_config.clone(), encodings.clone())),
            Box::new(HttpHandlerFilter::new(registry.clone())),
        ])
    });
    let mut transport = TcpTransport::new(config, factory);
    let called = Arc::new(AtomicBool::new(false));
    transport.add_shutdown_listener(Arc::new(FlagListener {
        called: called.clone(),
    }));
    transport
        .bind("127.0.0.1:0".parse().unwrap())
        .expect("bind failed");
    transport.start().expect("start failed");
    transport.shutdown(Duration::from_secs(1));
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn idle_connection_times_out_and_closes() {
    let config = ServerConfig::default().keep_alive_timeout(Duration::from_millis(300));
    let (mut transport, addr) = start_http_transport(config);
    let mut c = client(addr);
    // Send nothing; the reactor's idle sweep must close the socket.
    let mut buf = [0u8; 16];
    let start = std::time::Instant::now();
    let n = c.read(&mut buf).expect("expected orderly EOF");
    assert_eq!(n, 0, "connection should be closed by the idle sweep");
    assert!(start.elapsed() < Duration::from_secs(4));
    transport.shutdown(Duration::from_millis(200));
}
