//! Connection acceptor and worker pool.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::handler::{handle_connection, HandlerContext};
use crate::logger::Logger;
use crate::protocol::defaults::FORCE_DRAIN_MS;

// Back-off after a failed accept (e.g. out of descriptors)
const ACCEPT_ERROR_BACKOFF_MS: u64 = 50;

pub struct Server {
    listener: TcpListener,
    ctx: Arc<HandlerContext>,
    workers: Arc<Semaphore>,
    grace: Duration,
}

impl Server {
    /// Validate the root and bind the listening socket.
    pub async fn bind(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        if !config.root.is_dir() {
            anyhow::bail!("root is not a directory: {}", config.root.display());
        }
        let root = std::fs::canonicalize(&config.root)
            .with_context(|| format!("canonicalize root {}", config.root.display()))?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;

        let ctx = HandlerContext {
            root,
            admission: AdmissionController::new(config.max_transfers),
            admission_timeout: config.admission_timeout(),
            socket_timeout: config.socket_timeout(),
            stall: config.stall_policy(),
            logger,
            cancel: CancellationToken::new(),
        };
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            workers: Arc::new(Semaphore::new(config.workers)),
            grace: config.grace_period(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.ctx.admission
    }

    /// Accept until `shutdown` fires, then drain in-flight handlers.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Server {
            listener,
            ctx,
            workers,
            grace,
        } = self;
        if let Ok(addr) = listener.local_addr() {
            ctx.logger.listening(addr, &ctx.root);
        }

        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = done {
                        ctx.logger.error("handler", &e.to_string());
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let ctx = ctx.clone();
                        let workers = workers.clone();
                        tasks.spawn(async move {
                            // queue for a worker like a fixed-size pool would
                            let Ok(_worker) = workers.acquire_owned().await else {
                                return;
                            };
                            handle_connection(ctx, stream, peer).await;
                        });
                    }
                    Err(e) => {
                        ctx.logger.error("accept", &e.to_string());
                        tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                    }
                },
            }
        }

        drop(listener);
        ctx.logger.shutdown(tasks.len());
        if !drain(&mut tasks, grace).await {
            // interrupt stalled transfers, then stop whatever is left
            ctx.cancel.cancel();
            if !drain(&mut tasks, Duration::from_millis(FORCE_DRAIN_MS)).await {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }
        Ok(())
    }
}

async fn drain(tasks: &mut JoinSet<()>, limit: Duration) -> bool {
    timeout(limit, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_ok()
}

/// Bind and run until `shutdown` fires.
pub async fn serve(config: &ServerConfig, logger: Arc<dyn Logger>, shutdown: CancellationToken) -> Result<()> {
    Server::bind(config, logger).await?.run(shutdown).await
}
