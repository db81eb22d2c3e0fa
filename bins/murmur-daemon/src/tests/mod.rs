use super::*;
use crate::config::{
    ContactConfig, ControlConfig, IdentityConfig, LoggingConfig, MurmurConfig,
};
use http_body_util::BodyExt;
use hyper::client::conn::http1 as client_http1;
use murmur_core::config::CoreConfig;
use murmur_core::policy::Policy;
use std::time::Duration;
use tempfile::tempdir;

fn test_config() -> MurmurConfig {
    MurmurConfig {
        identity: IdentityConfig {
            user_id: "alice".to_string(),
        },
        session: CoreConfig::default(),
        policy: Policy::default(),
        control: ControlConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        logging: LoggingConfig {
            level: "error".to_string(),
        },
        contacts: vec![ContactConfig {
            id: "bob".to_string(),
            full_name: Some("Bob".to_string()),
            account_id: Some("@bob".to_string()),
        }],
    }
}

async fn get(addr: SocketAddr, path: &str) -> (StatusCode, serde_json::Value) {
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (mut sender, connection) = client_http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .header("host", "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[test]
fn config_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("murmur.toml");
    std::fs::write(
        &path,
        r#"
[identity]
user_id = "alice"

[session]
history_limit = 20
typing_expiry_ms = 1500

[policy]
max_text_bytes = 512

[control]
bind = "127.0.0.1:9444"

[logging]
level = "debug"

[[contacts]]
id = "bob"
full_name = "Bob"

[[contacts]]
id = "carol"
"#,
    )
    .unwrap();
    let loaded = config::load_config(&path).unwrap();
    assert_eq!(loaded.local_user().as_str(), "alice");
    assert_eq!(loaded.session.history_limit, 20);
    assert_eq!(loaded.session.typing_expiry_ms, 1500);
    assert_eq!(loaded.session.echo_grace_ms, CoreConfig::default().echo_grace_ms);
    assert_eq!(loaded.policy.max_text_bytes, 512);
    assert_eq!(loaded.policy.max_media_bytes, Policy::default().max_media_bytes);
    assert_eq!(loaded.bind_addr().unwrap().port(), 9444);
    assert_eq!(loaded.contacts.len(), 2);
    assert_eq!(loaded.contacts[0].profile().display_name(), "Bob");
    assert_eq!(loaded.contacts[1].profile().display_name(), "User");
}

#[test]
fn minimal_config_uses_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("murmur.toml");
    std::fs::write(&path, "[identity]\nuser_id = \"alice\"\n").unwrap();
    let loaded = config::load_config(&path).unwrap();
    assert_eq!(loaded.session, CoreConfig::default());
    assert_eq!(loaded.control.bind, "127.0.0.1:9180");
    assert_eq!(loaded.logging.level, "info");
    assert!(loaded.contacts.is_empty());
}

#[test]
fn rejects_unknown_session_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("murmur.toml");
    std::fs::write(
        &path,
        "[identity]\nuser_id = \"alice\"\n[session]\nhistory_limt = 5\n",
    )
    .unwrap();
    assert!(matches!(
        config::load_config(&path),
        Err(config::ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        config::load_config(&dir.path().join("absent.toml")),
        Err(config::ConfigError::Io(_))
    ));
}

#[test]
fn validation_rejects_bad_values() {
    let mut cfg = test_config();
    cfg.identity.user_id = "  ".to_string();
    assert!(cfg.validate().is_err());

    let mut cfg = test_config();
    cfg.control.bind = "0.0.0.0:9180".to_string();
    assert!(cfg.validate().is_err());

    let mut cfg = test_config();
    cfg.control.bind = "not an address".to_string();
    assert!(cfg.validate().is_err());

    let mut cfg = test_config();
    cfg.contacts[0].id = "alice".to_string();
    assert!(cfg.validate().is_err());

    assert!(test_config().validate().is_ok());
}

fn args(list: &[&str]) -> impl Iterator<Item = String> {
    list.iter().map(|a| a.to_string()).collect::<Vec<_>>().into_iter()
}

#[test]
fn config_path_from_arguments() {
    assert_eq!(config_path(args(&[])).unwrap(), PathBuf::from("murmur.toml"));
    assert_eq!(
        config_path(args(&["--verbose"])).unwrap(),
        PathBuf::from("murmur.toml")
    );
    assert_eq!(
        config_path(args(&["--config", "/etc/murmur.toml"])).unwrap(),
        PathBuf::from("/etc/murmur.toml")
    );
    assert_eq!(
        config_path(args(&["--verbose", "--config", "local.toml", "--extra"])).unwrap(),
        PathBuf::from("local.toml")
    );
    assert!(matches!(
        config_path(args(&["--verbose", "--config"])),
        Err(DaemonError::Usage(_))
    ));
}

#[tokio::test]
async fn control_endpoints_report_session_state() {
    let cfg = test_config();
    init_logging(&cfg);
    let state = build_state(&cfg).await.unwrap();
    let (tx, rx) = oneshot::channel();
    let (addr, handle) = start_control_server(state.clone(), cfg.bind_addr().unwrap(), rx)
        .await
        .unwrap();

    let (status, health) = get(addr, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let mut roster = serde_json::Value::Null;
    for _ in 0..200 {
        let (status, body) = get(addr, "/roster").await;
        assert_eq!(status, StatusCode::OK);
        roster = body;
        if roster["state"]["state"] != "loading" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(roster["total_unread"], 0);
    assert_eq!(roster["entries"][0]["peer"]["id"], "bob");

    let (status, badge) = get(addr, "/badge").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(badge["total_unread"], 0);

    let (status, _) = get(addr, "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let _ = tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    state.core.shutdown().await.unwrap();
    assert!(state.core.roster().await.is_err());
}
