// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_gateway.
//
// smtp_gateway is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_gateway is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_gateway. If not, see <https://www.gnu.org/licenses/>.

//! The acceptor: binds the listening socket, enforces the concurrency ceiling, spawns a
//! [`crate::session::Session`] per accepted connection, and orchestrates graceful shutdown.
//!
//! A [`Server`] is created once per listening address; a host may run multiple independent
//! servers (on different ports) in the same process.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, Mutex, Semaphore},
    task::JoinSet,
};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::ServerError,
    handler::MessageHandler,
    response::{code, Response},
    session::{CloseReason, Session},
    transport::{TcpTransport, Transport},
};

/// A bound, running server. Dropping this without calling [`Server::stop`] abandons in-flight
/// sessions; prefer an explicit `stop` for a clean shutdown.
pub struct Server {
    config: Arc<Config>,
    handler: Arc<dyn MessageHandler>,
}

impl Server {
    /// Build a server from its configuration and message handler. Does not bind a socket yet;
    /// call [`Server::start`] to do that.
    pub fn new(config: Config, handler: impl MessageHandler + 'static) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        }
    }

    /// Bind the configured address and begin accepting connections in a background task.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the configured address cannot be bound.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let transport = TcpTransport::bind(&self.config.listen_addr())
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen_addr(),
                source,
            })?;

        Ok(self.start_on(transport))
    }

    /// Begin accepting connections on an already-constructed [`Transport`].
    ///
    /// Exposed so tests (and hosts with unusual transport needs) can supply a [`Transport`] other
    /// than [`TcpTransport`] — e.g. one bound to an ephemeral port, or an in-memory stand-in.
    pub fn start_on(self, transport: impl Transport + 'static) -> ServerHandle {
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let sessions = Arc::new(Mutex::new(JoinSet::new()));

        let accept_task = tokio::spawn(accept_loop(
            Box::new(transport),
            Arc::clone(&self.config),
            Arc::clone(&self.handler),
            Arc::clone(&semaphore),
            Arc::clone(&sessions),
            shutdown_tx.clone(),
        ));

        ServerHandle {
            shutdown_tx,
            sessions,
            accept_task,
        }
    }
}

/// A handle to a running [`Server`], used to shut it down.
pub struct ServerHandle {
    shutdown_tx: broadcast::Sender<()>,
    sessions: Arc<Mutex<JoinSet<CloseReason>>>,
    accept_task: tokio::task::JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Stop accepting new connections, ask every live session to close, and wait for them to
    /// finish — up to `drain_deadline`, after which this returns regardless of how many sessions
    /// are still live.
    ///
    /// Returns `Some` if the listening transport had already failed fatally (per the propagation
    /// policy in the crate's error-handling design, losing the listener is the only condition
    /// fatal to the server); `None` covers both a clean stop and the case where `stop` itself
    /// requested the accept loop's shutdown by aborting it.
    pub async fn stop(self, drain_deadline: Duration) -> Option<ServerError> {
        self.accept_task.abort();
        let _ = self.shutdown_tx.send(());

        let drain = async {
            let mut sessions = self.sessions.lock().await;
            while sessions.join_next().await.is_some() {}
        };

        if tokio::time::timeout(drain_deadline, drain).await.is_err() {
            warn!("drain deadline elapsed with sessions still live");
        }

        match self.accept_task.await {
            Ok(Err(err)) => Some(err),
            Ok(Ok(())) | Err(_) => None,
        }
    }
}

/// Accept connections until the listening transport fails. Per the crate's error-handling policy,
/// any accept error is treated as the fatal loss of the listener (the teacher's own `listen`
/// function propagates every accept error with `?` rather than distinguishing transient from
/// fatal failures) — so this returns instead of looping on a socket that may never recover.
async fn accept_loop(
    transport: Box<dyn Transport>,
    config: Arc<Config>,
    handler: Arc<dyn MessageHandler>,
    semaphore: Arc<Semaphore>,
    sessions: Arc<Mutex<JoinSet<CloseReason>>>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), ServerError> {
    info!(addr = ?transport.local_addr(), "accepting connections");

    loop {
        let conn = match transport.accept().await {
            Ok(conn) => conn,
            Err(error) => {
                error!(%error, "listening transport failed, no longer accepting connections");
                return Err(ServerError::Listener(error));
            }
        };

        let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
            let mut conn = conn;
            let _ = Response::new(code::TOO_MANY_CONNECTIONS, "Too many connections")
                .write_to(&mut conn)
                .await;
            continue;
        };

        let session = Session::new(conn, Arc::clone(&config), Arc::clone(&handler));
        let shutdown_rx = shutdown_tx.subscribe();

        sessions.lock().await.spawn(async move {
            let _permit = permit;
            session.run(shutdown_rx).await
        });
    }
}

/// Run until a SIGINT (`Ctrl+C`) or, on Unix, `SIGTERM` is received, then drain and stop `handle`.
///
/// A thin convenience for host binaries that want the conventional signal-triggered shutdown
/// without wiring up `tokio::signal` themselves.
pub async fn run_until_signal(handle: ServerHandle, drain_deadline: Duration) -> Option<ServerError> {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received, draining live sessions");
    handle.stop(drain_deadline).await
}
