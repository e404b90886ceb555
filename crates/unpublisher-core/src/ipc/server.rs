//! Admin socket server run by the daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::admin::AdminService;
use crate::auth::Caller;
use crate::Result;

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// IPC Server that handles client connections
pub struct DaemonServer {
    admin: AdminService,
    socket_path: PathBuf,
    start_time: Instant,
    /// Semaphore to limit concurrent request processing
    request_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    pub fn new(admin: AdminService, socket_path: PathBuf) -> Self {
        Self {
            admin,
            socket_path,
            start_time: Instant::now(),
            request_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Run the IPC server
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        // Remove old socket file if exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let admin = self.admin.clone();
                            let start_time = self.start_time;
                            let semaphore = self.request_semaphore.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, admin, start_time, semaphore).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    admin: AdminService,
    start_time: Instant,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let _permit = semaphore.acquire().await.map_err(|e| {
            crate::Error::Other(format!("Failed to acquire semaphore: {}", e))
        })?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handle_request(request, &admin, start_time).await
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::fail(Uuid::nil(), RpcError::new(codes::PARSE, format!("Parse error: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

fn respond<T: Serialize>(id: Uuid, result: Result<T>) -> Response {
    match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::from_error(id, &e),
    }
}

fn params<T: serde::de::DeserializeOwned>(
    id: Uuid,
    value: serde_json::Value,
) -> std::result::Result<T, Response> {
    serde_json::from_value(value)
        .map_err(|e| Response::fail(id, RpcError::new(codes::INVALID_PARAMS, e.to_string())))
}

async fn handle_request(request: Request, admin: &AdminService, start_time: Instant) -> Response {
    let id = request.id;

    if request.method == methods::PING {
        return Response::ok(id, serde_json::json!({"ok": true}));
    }

    // Everything past ping requires a trusted administrator
    let caller: Caller = match admin.authorizer().authenticate(request.token.as_deref()) {
        Ok(caller) => caller,
        Err(e) => {
            warn!("Rejected '{}' request: {}", request.method, e);
            return Response::from_error(id, &e);
        }
    };

    match request.method.as_str() {
        methods::STATUS => {
            let result = admin.list(&caller).await.map(|policies| StatusResponse {
                running: true,
                uptime_secs: start_time.elapsed().as_secs(),
                enabled_policies: policies.iter().filter(|p| p.enabled).count(),
                policies: policies.len(),
            });
            respond(id, result)
        }

        methods::POLICY_LIST => {
            let result = admin
                .list(&caller)
                .await
                .map(|policies| PolicyListResponse { policies });
            respond(id, result)
        }

        methods::POLICY_STATUS => match params::<PolicyIdParams>(id, request.params) {
            Ok(p) => respond(id, admin.status(&caller, &p.policy_id).await),
            Err(response) => response,
        },

        methods::POLICY_CONFIGURE => match params::<ConfigureParams>(id, request.params) {
            Ok(p) => {
                let result = admin
                    .configure(&caller, &p.policy_id, &p.request)
                    .await
                    .map(|policy| PolicyResponse { policy });
                respond(id, result)
            }
            Err(response) => response,
        },

        methods::POLICY_CLEAR_LOG => match params::<PolicyIdParams>(id, request.params) {
            Ok(p) => {
                let result = admin
                    .clear_log(&caller, &p.policy_id)
                    .await
                    .map(|cleared| ClearLogResponse { cleared });
                respond(id, result)
            }
            Err(response) => response,
        },

        methods::POLICY_UPDATE_EXCLUSIONS => match params::<ExclusionParams>(id, request.params) {
            Ok(p) => {
                let result = admin
                    .update_exclusion_list(&caller, &p.policy_id, &p.exclusions)
                    .await
                    .map(|policy| PolicyResponse { policy });
                respond(id, result)
            }
            Err(response) => response,
        },

        methods::POLICY_RUN => match params::<PolicyIdParams>(id, request.params) {
            Ok(p) => respond(id, admin.run_now(&caller, &p.policy_id).await),
            Err(response) => response,
        },

        _ => Response::fail(id, RpcError::new(codes::METHOD_NOT_FOUND, "Method not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authorizer;
    use crate::config::{AdminConfig, AdminUser, AppConfig};
    use crate::ipc::DaemonClient;
    use crate::policy::ConfigureRequest;
    use crate::scheduler::{BatchDispatcher, CandidateSelector, FiringOutcome, Pipeline};
    use crate::storage::{Database, PolicyRepository, SqliteTaskQueue};
    use crate::testing::{item, MemoryContent};
    use std::time::Duration;

    const TOKEN: &str = "secret-ada";

    async fn admin() -> AdminService {
        let db = Database::new_in_memory().await.unwrap();
        PolicyRepository::new(&db)
            .sync_definitions(&AppConfig::default().policies)
            .await
            .unwrap();

        let content = Arc::new(MemoryContent::with_items([item(1, 2010, 1, 1)]));
        let queue = Arc::new(SqliteTaskQueue::new(db.clone()));
        let pipeline = Pipeline::new(
            db.clone(),
            CandidateSelector::new(content),
            BatchDispatcher::new(queue.clone()),
        );
        let authorizer = Authorizer::new(AdminConfig {
            users: vec![AdminUser {
                name: "ada".into(),
                role: "administrator".into(),
                token: TOKEN.into(),
            }],
            ..AdminConfig::default()
        });
        AdminService::new(db, pipeline, queue, authorizer)
    }

    #[tokio::test]
    async fn test_ping_needs_no_token() {
        let admin = admin().await;
        let response = handle_request(Request::new(methods::PING), &admin, Instant::now()).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_requests_without_valid_token_are_rejected() {
        let admin = admin().await;
        let params = serde_json::json!({"policy_id": "five-years", "enabled": true});

        for token in [None, Some("wrong".to_string())] {
            let request = Request::new(methods::POLICY_CONFIGURE)
                .with_params(params.clone())
                .with_token(token);
            let response = handle_request(request, &admin, Instant::now()).await;
            assert_eq!(response.error.unwrap().code, codes::UNAUTHORIZED);
        }

        let request = Request::new(methods::POLICY_STATUS)
            .with_params(serde_json::json!({"policy_id": "five-years"}))
            .with_token(Some(TOKEN.into()));
        let response = handle_request(request, &admin, Instant::now()).await;
        assert_eq!(response.result.unwrap()["enabled"], false);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let admin = admin().await;
        let token = Some(TOKEN.to_string());

        let bad_params = Request::new(methods::POLICY_STATUS).with_token(token.clone());
        let response = handle_request(bad_params, &admin, Instant::now()).await;
        assert_eq!(response.error.unwrap().code, codes::INVALID_PARAMS);

        let unknown = Request::new(methods::POLICY_STATUS)
            .with_params(serde_json::json!({"policy_id": "ten-years"}))
            .with_token(token.clone());
        let response = handle_request(unknown, &admin, Instant::now()).await;
        assert_eq!(response.error.unwrap().code, codes::NOT_FOUND);

        let invalid = Request::new(methods::POLICY_CONFIGURE)
            .with_params(serde_json::json!({"policy_id": "five-years", "enabled": true, "recurrence": "hourly"}))
            .with_token(token.clone());
        let response = handle_request(invalid, &admin, Instant::now()).await;
        assert_eq!(response.error.unwrap().code, codes::CONFIGURATION);

        let missing = Request::new("policy.delete").with_token(token);
        let response = handle_request(missing, &admin, Instant::now()).await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_client_round_trip_over_socket() {
        let socket_path = std::env::temp_dir().join(format!("unpublisher-{}.sock", Uuid::new_v4()));
        let server = DaemonServer::new(admin().await, socket_path.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { server.run(shutdown_rx).await });

        // Wait for the socket to appear
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let client = DaemonClient::new(socket_path.clone()).with_token(Some(TOKEN.into()));
        assert!(client.ping().await.unwrap());

        let request = ConfigureRequest {
            enabled: true,
            since_date: Some("2025-01-01".into()),
            recurrence: None,
        };
        let policy = client.configure("five-years", &request).await.unwrap();
        assert!(policy.enabled);

        let outcome = client.run("five-years").await.unwrap();
        assert!(matches!(outcome, FiringOutcome::Fired { ref run } if run.dispatched_count == 1));

        let status = client.policy_status("five-years").await.unwrap();
        assert_eq!(status.queue_depth, 1);

        let anonymous = DaemonClient::new(socket_path.clone());
        assert!(matches!(
            anonymous.list_policies().await,
            Err(crate::Error::Unauthorized(_))
        ));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }
}
