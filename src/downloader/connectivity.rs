// src/downloader/connectivity.rs

use crate::{client::RobustClient, constants};
use log::{debug, info};
use reqwest::Method;
use std::time::Duration;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Periodically pings the server and announces reachability changes.
pub struct ConnectivityMonitor {
    http: RobustClient,
    interval: Duration,
    events: broadcast::Sender<ConnectivityEvent>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    pub fn new(http: RobustClient, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            http,
            interval,
            events,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<ConnectivityEvent> {
        self.events.clone()
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.cancel = CancellationToken::new();
        let http = self.http.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<bool> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let online = probe(&http).await;
                if last.is_some_and(|was| was != online) {
                    let event = if online {
                        ConnectivityEvent::Online
                    } else {
                        ConnectivityEvent::Offline
                    };
                    info!("Server connectivity changed: {:?}", event);
                    // no subscribers is fine
                    let _ = events.send(event);
                }
                last = Some(online);
            }
            debug!("Connectivity monitor stopped");
        }));
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn probe(http: &RobustClient) -> bool {
    let Ok(url) = http.endpoint(constants::api::PING_PATH) else {
        return false;
    };
    match http
        .request(Method::GET, url, http.config().connect_timeout)
        .send()
        .await
    {
        Ok(res) => res.status().is_success(),
        Err(e) => {
            debug!("Ping failed: {}", e);
            false
        }
    }
}
