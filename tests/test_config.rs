use std::io::Write;
use std::time::Duration;

use http_ingest::config::{Config, parse_duration, parse_size};
use http_ingest::ingest::FieldType;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.port, 9880);
    assert_eq!(cfg.bind, "0.0.0.0");
    assert_eq!(cfg.body_size_limit, 32 * 1024 * 1024);
    assert_eq!(cfg.keepalive_timeout, Duration::from_secs(10));
    assert_eq!(cfg.blocking_timeout, Duration::from_millis(500));
    assert_eq!(cfg.format, "default");
    assert!(!cfg.add_http_headers);
    assert!(!cfg.add_remote_addr);
    assert!(!cfg.respond_with_empty_img);
    assert_eq!(cfg.cors_allow_origins, None);
    assert_eq!(cfg.listen_addr(), "0.0.0.0:9880");
}

#[test]
fn test_config_from_env() {
    // Both variables are touched in one test so parallel tests never race.
    unsafe {
        std::env::remove_var("INGEST_CONFIG");
        std::env::remove_var("LISTEN");
    }
    assert_eq!(Config::load().unwrap(), Config::default());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port: 24224\nkeepalive_timeout: 30").unwrap();
    unsafe {
        std::env::set_var("INGEST_CONFIG", file.path());
        std::env::set_var("LISTEN", "127.0.0.1:8000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.bind, "127.0.0.1");
    assert_eq!(cfg.port, 8000);
    assert_eq!(cfg.keepalive_timeout, Duration::from_secs(30));

    unsafe {
        std::env::remove_var("INGEST_CONFIG");
        std::env::remove_var("LISTEN");
    }
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml_str(
        r#"
port: 9999
bind: 127.0.0.1
body_size_limit: 10m
keepalive_timeout: 5s
blocking_timeout: 250ms
add_http_headers: true
add_remote_addr: true
respond_with_empty_img: true
cors_allow_origins:
  - http://foo.example
format: csv
format_options:
  keys: [a, b]
  types:
    a: integer
"#,
    )
    .unwrap();

    assert_eq!(cfg.port, 9999);
    assert_eq!(cfg.bind, "127.0.0.1");
    assert_eq!(cfg.body_size_limit, 10 * 1024 * 1024);
    assert_eq!(cfg.keepalive_timeout, Duration::from_secs(5));
    assert_eq!(cfg.blocking_timeout, Duration::from_millis(250));
    assert!(cfg.add_http_headers);
    assert!(cfg.add_remote_addr);
    assert!(cfg.respond_with_empty_img);
    assert_eq!(
        cfg.cors_allow_origins,
        Some(vec!["http://foo.example".to_string()])
    );
    assert_eq!(cfg.format, "csv");
    assert_eq!(cfg.format_options.keys, vec!["a", "b"]);
    assert_eq!(cfg.format_options.types.get("a"), Some(&FieldType::Integer));
    assert_eq!(cfg.format_options.time_key, "time");
}

#[test]
fn test_numeric_sizes_and_durations() {
    let cfg = Config::from_yaml_str("body_size_limit: 1024\nblocking_timeout: 0.5\n").unwrap();
    assert_eq!(cfg.body_size_limit, 1024);
    assert_eq!(cfg.blocking_timeout, Duration::from_millis(500));
}

#[test]
fn test_empty_yaml_is_default() {
    assert_eq!(Config::from_yaml_str("").unwrap(), Config::default());
}

#[test]
fn test_bad_size_rejected() {
    assert!(Config::from_yaml_str("body_size_limit: huge\n").is_err());
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port: 1234\nformat: ltsv").unwrap();

    let cfg = Config::from_file(file.path()).unwrap();
    assert_eq!(cfg.port, 1234);
    assert_eq!(cfg.format, "ltsv");
}

#[test]
fn test_missing_file() {
    assert!(Config::from_file("/nonexistent/ingest.yaml").is_err());
}

#[test]
fn test_apply_listen() {
    let mut cfg = Config::default();
    cfg.apply_listen("127.0.0.1:3000").unwrap();
    assert_eq!(cfg.bind, "127.0.0.1");
    assert_eq!(cfg.port, 3000);

    cfg.apply_listen("[::1]:3001").unwrap();
    assert_eq!(cfg.bind, "::1");
    assert_eq!(cfg.listen_addr(), "[::1]:3001");

    assert!(cfg.apply_listen("no-port").is_err());
    assert!(cfg.apply_listen("host:http").is_err());
}

#[test]
fn test_validate() {
    assert!(Config::default().validate().is_ok());

    let cfg = Config {
        body_size_limit: 0,
        ..Config::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = Config {
        blocking_timeout: Duration::ZERO,
        ..Config::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_parse_size() {
    assert_eq!(parse_size("512"), Some(512));
    assert_eq!(parse_size("1k"), Some(1024));
    assert_eq!(parse_size("32m"), Some(32 * 1024 * 1024));
    assert_eq!(parse_size("2G"), Some(2 * 1024 * 1024 * 1024));
    assert_eq!(parse_size("4kb"), Some(4096));
    assert_eq!(parse_size("lots"), None);
}

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
    assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
    assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    assert_eq!(parse_duration("soon"), None);
}
