//! Background loops: inbound polling and ephemeral sweeping.
//!
//! Each loop ticks on a `tokio::time::interval` with `MissedTickBehavior::Skip`
//! and awaits its work inline, so a slow tick swallows the ones it overlaps.
//! Polled payloads go through a bounded channel to a consumer that hands them
//! to `MessageEngine::ingest`. `shutdown` signals every loop over a `watch`
//! channel and joins them all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MessagingSettings;
use crate::error::CoreError;
use crate::messaging::MessageEngine;
use crate::transport::{ConnectionState, Transport};

pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn spawn(
        engine: Arc<MessageEngine>,
        transport: Arc<dyn Transport>,
        settings: &MessagingSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_queue_capacity.max(1));

        let handles = vec![
            tokio::spawn(poll_loop(
                transport,
                inbound_tx,
                settings.poll_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(inbound_consumer(engine.clone(), inbound_rx, shutdown_rx.clone())),
            tokio::spawn(sweep_loop(engine, settings.sweep_interval(), shutdown_rx)),
        ];
        info!(event = "background_tasks_started", tasks = handles.len());

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal every loop and wait for all of them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(event = "background_task_join_failed", error = %e);
            }
        }
        info!(event = "background_tasks_stopped");
    }
}

/// Resolves once shutdown is requested (or the sender is gone).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn poll_loop(
    transport: Arc<dyn Transport>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let state_rx = transport.connection_state();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown_rx) => break,
            _ = ticker.tick() => {}
        }

        if *state_rx.borrow() != ConnectionState::Connected {
            continue;
        }

        let batch = match transport.poll_inbound().await {
            Ok(batch) => batch,
            Err(e) => {
                debug!(event = "poll_failed", error = %e);
                continue;
            }
        };

        for payload in batch {
            tokio::select! {
                _ = stopped(&mut shutdown_rx) => return,
                sent = inbound_tx.send(payload) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
    debug!(event = "poll_loop_stopped");
}

async fn inbound_consumer(
    engine: Arc<MessageEngine>,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = stopped(&mut shutdown_rx) => break,
            payload = inbound_rx.recv() => match payload {
                Some(p) => p,
                None => break,
            },
        };

        match engine.ingest(&payload).await {
            Ok(_) => {}
            Err(CoreError::State(reason)) => debug!(event = "inbound_deferred", reason = %reason),
            Err(e) => warn!(event = "inbound_ingest_failed", error = %e),
        }
    }
    debug!(event = "inbound_consumer_stopped");
}

async fn sweep_loop(
    engine: Arc<MessageEngine>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown_rx) => break,
            _ = ticker.tick() => {}
        }

        match engine.cleanup_ephemeral_messages().await {
            Ok(0) => {}
            Ok(n) => debug!(event = "ephemeral_sweep", removed = n),
            Err(CoreError::State(_)) => {}
            Err(e) => warn!(event = "ephemeral_sweep_failed", error = %e),
        }
    }
    debug!(event = "sweep_loop_stopped");
}
