//! Service runtime: wires the store, pipeline and HTTP surface together and
//! drives the periodic reconciliation loop.

use crate::api::{self, AppState};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, PipelineEvent, PipelineEventsChannel, PipelineEventsSender};
use crate::evidence::EvidencePublisher;
use crate::github::{CommitStatusSource, GithubClient};
use crate::ledger::LedgerRegistrar;
use crate::pipeline::Pipeline;
use crate::reconcile::Reconciler;
use crate::store::ContributionStore;
use crate::webhook::WebhookAuthenticator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Why [`RunningNode::run`] stopped waiting.
#[derive(Debug)]
enum Stop {
    /// Shutdown was requested through the handle or Ctrl-C.
    Requested,
    /// The HTTP server task finished on its own.
    ServerExited(std::result::Result<Result<()>, JoinError>),
}

/// Wait for a shutdown request, Ctrl-C, or the server task finishing.
async fn wait_for_stop(
    server: &mut JoinHandle<Result<()>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Stop {
    loop {
        tokio::select! {
            joined = &mut *server => return Stop::ServerExited(joined),
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received");
                    return Stop::Requested;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, initiating shutdown");
                return Stop::Requested;
            }
        }
    }
}

/// Builder for constructing the service.
pub struct NodeBuilder {
    config: ServiceConfig,
    registrar: Option<LedgerRegistrar>,
    store: Option<ContributionStore>,
}

impl NodeBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            registrar: None,
            store: None,
        }
    }

    /// Use `registrar` instead of building one from `config.ledger`.
    #[must_use]
    pub fn with_registrar(mut self, registrar: LedgerRegistrar) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// Use `store` instead of opening `config.store.path`.
    #[must_use]
    pub fn with_store(mut self, store: ContributionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the service and bind its listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the store cannot be
    /// opened, a client cannot be built or the listen address cannot be
    /// bound.
    pub async fn build(self) -> Result<RunningNode> {
        let config = self.config;
        config.validate()?;
        debug!(
            "Building merge-rewards (listen={}, store={})",
            config.server.listen,
            config.store.path.display()
        );

        let store = match self.store {
            Some(store) => store,
            None => ContributionStore::open(&config.store.path)?,
        };

        let registrar = match self.registrar {
            Some(registrar) => registrar,
            None => LedgerRegistrar::from_config(&config.ledger)?,
        };

        let ci: Option<Arc<dyn CommitStatusSource>> = if config.github.check_ci {
            Some(Arc::new(GithubClient::new(&config.github)?))
        } else {
            None
        };

        let evidence = EvidencePublisher::new(&config.evidence)?;
        info!("Evidence provider: {:?}", evidence.provider());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let pipeline = Pipeline::new(
            store,
            Arc::new(evidence),
            registrar,
            ci,
            config.defaults.clone(),
            events_tx.clone(),
        );

        let authenticator = WebhookAuthenticator::new(
            config.webhook.secret.clone(),
            config.webhook.allow_dev_bypass,
        );
        let state = AppState::new(
            pipeline,
            authenticator,
            config.admin.token.clone(),
            config.reconcile.batch_size,
        );

        let listener = TcpListener::bind(config.server.listen).await?;
        let local_addr = listener.local_addr()?;

        Ok(RunningNode {
            config,
            state,
            listener: Some(listener),
            local_addr,
            shutdown_tx,
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// A running merge-rewards service.
pub struct RunningNode {
    config: ServiceConfig,
    state: AppState,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: PipelineEventsSender,
    events_rx: Option<PipelineEventsChannel>,
}

impl RunningNode {
    /// Address the HTTP server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The reconciler backing the service.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.state.reconciler
    }

    /// Get a receiver for pipeline events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<PipelineEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to pipeline events.
    #[must_use]
    pub fn subscribe_events(&self) -> PipelineEventsChannel {
        self.events_tx.subscribe()
    }

    /// A handle that stops the service when sent `true`.
    #[must_use]
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown is requested or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            return Err(Error::Config("service already ran".to_string()));
        };
        info!("Starting merge-rewards on {}", self.local_addr);
        let _ = self.events_tx.send(PipelineEvent::Started);

        self.spawn_reconcile_loop();

        let mut server_shutdown = self.shutdown_rx.clone();
        let mut server = tokio::spawn(api::serve(listener, self.state.clone(), async move {
            while server_shutdown.changed().await.is_ok() {
                if *server_shutdown.borrow() {
                    break;
                }
            }
        }));

        let stop = wait_for_stop(&mut server, &mut self.shutdown_rx).await;
        // Stops the reconcile loop, and the server if it is still up.
        self.shutdown();
        let _ = self.events_tx.send(PipelineEvent::ShuttingDown);

        let joined = match stop {
            Stop::Requested => server.await,
            Stop::ServerExited(joined) => {
                error!("HTTP server exited before shutdown was requested");
                joined
            }
        };
        match joined {
            Ok(result) => result?,
            Err(e) => return Err(Error::Network(format!("HTTP server task failed: {e}"))),
        }
        info!("Service shutdown complete");
        Ok(())
    }

    fn spawn_reconcile_loop(&self) {
        let interval_secs = self.config.reconcile.interval_secs;
        if interval_secs == 0 {
            info!("Periodic reconciliation disabled");
            return;
        }
        let reconciler = self.state.reconciler.clone();
        if !reconciler.is_active() {
            info!("Ledger registrar inactive - periodic reconciliation not started");
            return;
        }

        let batch_size = self.config.reconcile.batch_size;
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // The first tick completes immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match reconciler.run_once(batch_size).await {
                            Ok(summary) => debug!(
                                "Reconcile pass: attached={}, claimed={}",
                                summary.attached, summary.claimed
                            ),
                            Err(e) => warn!("Reconcile pass failed: {e}"),
                        }
                    }
                }
            }
        });
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.server.listen = "127.0.0.1:0".parse().expect("addr");
        config
    }

    #[tokio::test]
    async fn test_build_binds_and_shuts_down() {
        let mut node = NodeBuilder::new(test_config())
            .with_store(ContributionStore::open_in_memory().expect("store"))
            .build()
            .await
            .expect("build");
        assert_ne!(node.local_addr().port(), 0);
        assert!(!node.reconciler().is_active());

        let mut events = node.events().expect("events");
        assert!(node.events().is_none());

        let handle = node.shutdown_handle();
        let task = tokio::spawn(async move { node.run().await });
        assert!(matches!(events.recv().await, Ok(PipelineEvent::Started)));
        handle.send(true).expect("send");

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stopped")
            .expect("join")
            .expect("run");
        assert!(matches!(events.recv().await, Ok(PipelineEvent::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_server_exit_stops_waiting() {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut server: JoinHandle<Result<()>> =
            tokio::spawn(async { Err(Error::Network("listener closed".to_string())) });

        let stop = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_stop(&mut server, &mut shutdown_rx),
        )
        .await
        .expect("returned");
        assert!(matches!(
            stop,
            Stop::ServerExited(Ok(Err(Error::Network(_))))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_request_stops_waiting() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut server: JoinHandle<Result<()>> = tokio::spawn(std::future::pending());
        shutdown_tx.send(true).expect("send");

        let stop = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_stop(&mut server, &mut shutdown_rx),
        )
        .await
        .expect("returned");
        assert!(matches!(stop, Stop::Requested));
        server.abort();
    }

    #[tokio::test]
    async fn test_malformed_ledger_address_runs_off_chain() {
        let mut config = test_config();
        config.ledger.enabled = true;
        config.ledger.rpc_url = Some("http://127.0.0.1:8545".to_string());
        config.ledger.registry_address = Some("0xnot-an-address".to_string());
        config.ledger.registrar_address = Some(format!("0x{}", "33".repeat(20)));
        config.github.check_ci = false;

        let node = NodeBuilder::new(config)
            .with_store(ContributionStore::open_in_memory().expect("store"))
            .build()
            .await
            .expect("build");
        assert!(!node.reconciler().is_active());

        let pipeline = &node.state.pipeline;
        assert!(!pipeline.registrar().is_enabled());
        pipeline
            .identity()
            .bind("alice", &crate::primitives::Address([0xaa; 20]))
            .await
            .expect("bind");
        let outcome = pipeline
            .process(&crate::pipeline::tests::merged_event(20))
            .await
            .expect("process");
        let crate::pipeline::Outcome::Registered { contribution, created } = outcome else {
            panic!("expected registration, got {outcome:?}");
        };
        assert!(created);
        assert!(contribution.ledger_tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_to_build() {
        let mut config = test_config();
        config.defaults.payout_mode = crate::primitives::PayoutMode::Erc20;
        let result = NodeBuilder::new(config)
            .with_store(ContributionStore::open_in_memory().expect("store"))
            .build()
            .await;
        assert!(result.is_err());
    }
}
