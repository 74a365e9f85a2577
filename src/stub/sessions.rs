//! Local session-status endpoint used by the stub driver.
//!
//! Upstream code polls a control endpoint on each machine to learn whether a
//! user's session is open. The stub driver emulates that endpoint with a
//! small HTTP listener bound to an ephemeral loopback port:
//!
//! * `GET /sessions/{user}` lists every session as
//!   `[null, user, null, "Active"|"Inactive"]` rows under `data`.
//! * `DELETE /sessions/{user}` closes a session. Closing the administrator
//!   deactivates the default session; any other user's row is removed.
//! * `POST /sessionOpen` activates the default session, or the user named
//!   in an optional `{"username": ...}` body.
//! * `POST /sessionClose` deactivates the default session.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::DriverError;

/// User whose session exists from the start.
pub const DEFAULT_SESSION_USER: &str = "username";

/// Login name whose session closure targets the default session.
pub const ADMIN_USER: &str = "Administrator";

/// A tracked user session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Session {
    /// Session owner.
    pub user: String,
    /// Whether the session is currently open.
    pub active: bool,
}

/// Shared session table behind the endpoint.
#[derive(Clone, Debug)]
pub struct SessionTable {
    sessions: Arc<Mutex<Vec<Session>>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(vec![Session {
                user: DEFAULT_SESSION_USER.to_owned(),
                active: false,
            }])),
        }
    }
}

impl SessionTable {
    /// Returns a snapshot of all sessions.
    pub async fn snapshot(&self) -> Vec<Session> {
        self.sessions.lock().await.clone()
    }

    async fn set_active(&self, user: &str, active: bool) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.iter_mut().find(|session| session.user == user) {
            session.active = active;
        } else if active {
            sessions.push(Session {
                user: user.to_owned(),
                active,
            });
        }
    }

    async fn open(&self, user: Option<&str>) {
        match user {
            Some(name) if name != DEFAULT_SESSION_USER => {
                self.set_active(DEFAULT_SESSION_USER, false).await;
                self.set_active(name, true).await;
            }
            _ => self.set_active(DEFAULT_SESSION_USER, true).await,
        }
    }

    async fn close(&self, user: &str) {
        if user == ADMIN_USER {
            self.set_active(DEFAULT_SESSION_USER, false).await;
        } else {
            self.sessions
                .lock()
                .await
                .retain(|session| session.user != user);
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenSession {
    username: String,
}

async fn list_sessions(
    State(table): State<SessionTable>,
    Path(_user): Path<String>,
) -> Json<Value> {
    let rows: Vec<Value> = table
        .snapshot()
        .await
        .into_iter()
        .map(|session| {
            let label = if session.active { "Active" } else { "Inactive" };
            json!([Value::Null, session.user, Value::Null, label])
        })
        .collect();
    Json(json!({ "data": rows }))
}

async fn close_session(State(table): State<SessionTable>, Path(user): Path<String>) -> StatusCode {
    debug!(%user, "closing session");
    table.close(&user).await;
    StatusCode::OK
}

async fn open_session(State(table): State<SessionTable>, body: Bytes) -> StatusCode {
    if body.iter().all(u8::is_ascii_whitespace) {
        table.open(None).await;
        return StatusCode::OK;
    }
    match serde_json::from_slice::<OpenSession>(&body) {
        Ok(request) => {
            debug!(user = %request.username, "opening session");
            table.open(Some(&request.username)).await;
            StatusCode::OK
        }
        Err(err) => {
            warn!(error = %err, "rejected malformed session open request");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn close_default_session(State(table): State<SessionTable>) -> StatusCode {
    table.set_active(DEFAULT_SESSION_USER, false).await;
    StatusCode::OK
}

fn router(table: SessionTable) -> Router {
    Router::new()
        .route(
            "/sessions/{user}",
            get(list_sessions).delete(close_session),
        )
        .route("/sessionOpen", post(open_session))
        .route("/sessionClose", post(close_default_session))
        .with_state(table)
}

/// Running session endpoint. Dropping it stops the listener.
#[derive(Debug)]
pub struct SessionEndpoint {
    addr: SocketAddr,
    table: SessionTable,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionEndpoint {
    /// Binds an ephemeral loopback port and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::BackendUnavailable`] when the listener cannot
    /// be bound.
    pub async fn start() -> Result<Self, DriverError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|err| {
                DriverError::BackendUnavailable(format!("session endpoint failed to bind: {err}"))
            })?;
        let addr = listener.local_addr().map_err(|err| {
            DriverError::BackendUnavailable(format!("session endpoint has no address: {err}"))
        })?;

        let table = SessionTable::default();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(table.clone());
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(err) = served {
                warn!(error = %err, "session endpoint stopped with an error");
            }
        });

        info!(%addr, "session endpoint listening");
        Ok(Self {
            addr,
            table,
            shutdown,
            task: Some(task),
        })
    }

    /// Address the endpoint is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Session table served by the endpoint.
    #[must_use]
    pub const fn sessions(&self) -> &SessionTable {
        &self.table
    }

    /// Stops the listener and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "session endpoint task failed");
            }
        }
        info!(addr = %self.addr, "session endpoint stopped");
    }
}

impl Drop for SessionEndpoint {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
