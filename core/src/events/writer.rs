use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::bus::EventBus;
use super::types::RunEvent;
use crate::config::EventsOutConfig;

const STDOUT_TARGET: &str = "stdout:";

/// Sending half of the JSONL events writer.
#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    drop_when_full: bool,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            if self.tx.try_send(line).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        } else if self.tx.send(line).await.is_err() {
            // writer closed
        }
    }

    pub async fn send_event(&self, event: &RunEvent) {
        match event.to_jsonl() {
            Ok(line) => self.send_line(line).await,
            Err(e) => tracing::warn!(error = %e, "failed to serialize run event"),
        }
    }

    /// Forward every event published on `bus` until the bus is dropped.
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let out = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => out.send_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        out.dropped.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Close this sender and wait for the writer to drain.
    ///
    /// Other clones (including attached forwarders) must be gone first or
    /// this waits until they are.
    pub async fn finish(self) {
        let writer = self.writer.clone();
        drop(self);
        let handle = writer.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

pub async fn start_events_out(cfg: &EventsOutConfig) -> Result<Option<EventsOutTx>, String> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if cfg.path == STDOUT_TARGET {
        Box::new(tokio::io::stdout())
    } else {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.path)
            .await
            .map_err(|e| format!("failed to open events file {}: {e}", cfg.path))?;
        Box::new(file)
    };

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
    let path = cfg.path.clone();

    let handle = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(path = %path, error = %e, "events writer stopped");
                return;
            }
        }
        let _ = writer.flush().await;
    });

    Ok(Some(EventsOutTx {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        drop_when_full: cfg.drop_when_full,
        writer: Arc::new(Mutex::new(Some(handle))),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn disabled_config_starts_nothing() {
        let cfg = EventsOutConfig::default();
        assert!(start_events_out(&cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_bus_events_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let cfg = EventsOutConfig {
            enabled: true,
            path: path.to_string_lossy().into_owned(),
            channel_capacity: 16,
            drop_when_full: false,
        };

        let out = start_events_out(&cfg).await.unwrap().unwrap();
        let bus = EventBus::new(16);
        let forward = out.attach(&bus);

        bus.emit(RunEvent::RunStarted {
            run_id: "r1".into(),
            pipeline: "daily".into(),
            stages: vec![vec!["extract".into()]],
            timestamp: Utc::now(),
        });
        drop(bus);
        forward.await.unwrap();
        out.finish().await;

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["type"], "run_started");
        assert_eq!(v["pipeline"], "daily");
    }
}
