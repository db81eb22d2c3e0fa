mod config;

use bytes::Bytes;
use config::MurmurConfig;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::LevelFilter;
use murmur_core::media::InMemoryMedia;
use murmur_core::memory::InMemoryBackend;
use murmur_core::notify::RecordingNotifier;
use murmur_core::storage::MemorySessionStorage;
use murmur_core::time::SystemClock;
use murmur_core::{Collaborators, Core};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
enum DaemonError {
    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("core: {0}")]
    Core(#[from] murmur_core::error::CoreError),
    #[error("bind: {0}")]
    Bind(#[from] std::io::Error),
    #[error("usage: {0}")]
    Usage(String),
}

#[derive(Clone)]
struct DaemonState {
    core: Core,
    notifier: RecordingNotifier,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let path = config_path(std::env::args().skip(1))?;
    let cfg = config::load_config(&path)?;
    init_logging(&cfg);
    let state = build_state(&cfg).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (addr, server) = start_control_server(state.clone(), cfg.bind_addr()?, shutdown_rx).await?;
    log::info!("murmur {} listening on {}", state.core.local_identity(), addr);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let _ = ctrl_c.as_mut().await;
    log::info!("shutting down");
    let _ = shutdown_tx.send(());
    let _ = server.await;
    state.core.shutdown().await?;
    Ok(())
}

/// `--config <path>`, defaulting to `murmur.toml`.
fn config_path(args: impl Iterator<Item = String>) -> Result<PathBuf, DaemonError> {
    let mut rest = args.skip_while(|a| a.as_str() != "--config");
    match (rest.next(), rest.next()) {
        (None, _) => Ok(PathBuf::from("murmur.toml")),
        (Some(_), Some(path)) => Ok(PathBuf::from(path)),
        (Some(_), None) => Err(DaemonError::Usage("--config needs a path".to_string())),
    }
}

fn init_logging(cfg: &MurmurConfig) {
    let level = match cfg.logging.level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

/// Seeds an in-memory backend with the configured contacts and starts a
/// session for the local identity against it.
async fn build_state(cfg: &MurmurConfig) -> Result<DaemonState, DaemonError> {
    let local = cfg.local_user();
    let clock = Arc::new(SystemClock);
    let backend = InMemoryBackend::new(clock.clone());
    for contact in &cfg.contacts {
        let profile = contact.profile();
        backend.add_contact(&local, &profile.id).await;
        backend.add_profile(profile).await;
    }
    let notifier = RecordingNotifier::new();
    let collaborators = Collaborators {
        store: Arc::new(backend.clone()),
        realtime: Arc::new(backend),
        media: Arc::new(InMemoryMedia::new()),
        notifier: Arc::new(notifier.clone()),
        session_storage: Arc::new(MemorySessionStorage::new()),
        clock,
    };
    let core = Core::init(cfg.session.clone(), cfg.policy.clone(), local, collaborators).await?;
    Ok(DaemonState { core, notifier })
}

async fn start_control_server(
    state: DaemonState,
    addr: SocketAddr,
    shutdown: oneshot::Receiver<()>,
) -> Result<(SocketAddr, JoinHandle<()>), DaemonError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, _)) => {
                            let conn_state = state.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let inner = conn_state.clone();
                                    async move { handle_request(inner, req).await }
                                });
                                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                                    log::debug!("control connection closed: {}", err);
                                }
                            });
                        }
                        Err(err) => {
                            log::warn!("control accept failed: {}", err);
                            break;
                        }
                    }
                }
            }
        }
    });
    Ok((local_addr, handle))
}

async fn handle_request(
    state: DaemonState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match (req.method().as_str(), req.uri().path()) {
        ("GET", "/health") => json_response(StatusCode::OK, serde_json::json!({"status":"ok"})),
        ("GET", "/roster") => match state.core.roster().await {
            Ok(snapshot) => match serde_json::to_value(&snapshot) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
            },
            Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &err.to_string()),
        },
        ("GET", "/badge") => match state.core.roster().await {
            Ok(snapshot) => json_response(
                StatusCode::OK,
                serde_json::json!({
                    "total_unread": snapshot.total_unread,
                    "badge": state.notifier.badge(),
                }),
            ),
            Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &err.to_string()),
        },
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(status: StatusCode, reason: &str) -> Response<Full<Bytes>> {
    json_response(status, serde_json::json!({ "error": reason }))
}

#[cfg(test)]
mod tests;
