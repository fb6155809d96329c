mod common;

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use common::{closed_within, read_response};
use http_ingest::{Config, MemoryRouter, Server, ServerHandle};

fn test_config() -> Config {
    Config {
        bind: "127.0.0.1".to_string(),
        port: 0,
        blocking_timeout: Duration::from_millis(50),
        keepalive_timeout: Duration::from_secs(1),
        body_size_limit: 1024,
        ..Config::default()
    }
}

fn start(config: Config) -> (ServerHandle, MemoryRouter) {
    let router = MemoryRouter::new();
    let handle = Server::new(config, router.clone()).start().unwrap();
    (handle, router)
}

fn connect(handle: &ServerHandle) -> TcpStream {
    TcpStream::connect(handle.local_addr()).unwrap()
}

fn post_json(path: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

#[test]
fn test_emits_posted_event() {
    let (handle, router) = start(test_config());
    let mut stream = connect(&handle);

    stream.write_all(&post_json("/app/access?time=1293974055", r#"{"a":1}"#)).unwrap();
    let resp = read_response(&mut stream);

    assert_eq!(resp.status, 200);
    let events = router.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "app.access");
    assert_eq!(events[0].1.time, 1293974055.0);

    handle.stop().unwrap();
}

#[test]
fn test_keep_alive_serves_several_requests() {
    let (handle, router) = start(test_config());
    let mut stream = connect(&handle);

    for n in 0..3 {
        stream.write_all(&post_json("/ka", &format!(r#"{{"n":{n}}}"#))).unwrap();
        let resp = read_response(&mut stream);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("Connection"), Some("Keep-Alive"));
    }

    assert_eq!(router.events().len(), 3);
    handle.stop().unwrap();
}

#[test]
fn test_preflight_closes_connection() {
    let (handle, router) = start(test_config());
    let mut stream = connect(&handle);

    stream
        .write_all(b"OPTIONS /a HTTP/1.1\r\nAccess-Control-Request-Method: POST\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut stream);

    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Access-Control-Allow-Methods"), Some("POST"));
    assert!(closed_within(&mut stream, Duration::from_secs(2)));
    assert!(router.events().is_empty());

    handle.stop().unwrap();
}

#[test]
fn test_expect_too_large_closes_connection() {
    let (handle, _router) = start(test_config());
    let mut stream = connect(&handle);

    stream
        .write_all(b"POST /a HTTP/1.1\r\nContent-Length: 4096\r\nExpect: 100-continue\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut stream);

    assert_eq!(resp.status, 413);
    assert!(closed_within(&mut stream, Duration::from_secs(2)));

    handle.stop().unwrap();
}

#[test]
fn test_idle_connection_reaped() {
    let (handle, _router) = start(test_config());
    let mut stream = connect(&handle);

    assert!(closed_within(&mut stream, Duration::from_secs(5)));

    handle.stop().unwrap();
}

#[test]
fn test_garbage_drops_connection_not_server() {
    let (handle, router) = start(test_config());

    let mut bad = connect(&handle);
    bad.write_all(b"\x00\x01\x02 garbage\r\n\r\n").unwrap();
    assert!(closed_within(&mut bad, Duration::from_secs(2)));

    let mut good = connect(&handle);
    good.write_all(&post_json("/ok", r#"{"a":1}"#)).unwrap();
    assert_eq!(read_response(&mut good).status, 200);
    assert_eq!(router.events().len(), 1);
    assert!(!handle.is_finished());

    handle.stop().unwrap();
}

#[test]
fn test_stop_closes_listener() {
    let (handle, _router) = start(test_config());
    let addr = handle.local_addr();

    handle.stop().unwrap();

    assert!(TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_err());
}

#[test]
fn test_port_in_use() {
    let (handle, _router) = start(test_config());
    let config = Config {
        port: handle.local_addr().port(),
        ..test_config()
    };

    assert!(Server::new(config, MemoryRouter::new()).start().is_err());

    handle.stop().unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let config = Config {
        body_size_limit: 0,
        ..test_config()
    };
    assert!(Server::new(config, MemoryRouter::new()).start().is_err());

    let config = Config {
        format: "yaml".to_string(),
        ..test_config()
    };
    assert!(Server::new(config, MemoryRouter::new()).start().is_err());
}
