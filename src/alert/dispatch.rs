//! Alert delivery: snapshot persistence, notification channels, history.
//!
//! The dispatcher runs on its own worker thread fed by a blocking queue, so
//! slow or failing channels back-pressure alert delivery without touching
//! the frame path. A channel failure never aborts the dispatch: remaining
//! channels still run and the history record captures every outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

use super::controller::AlertEvent;
use super::history::{AlertHistoryStore, AlertRecord};

/// Outbound notification channel. Implementations must tolerate being called
/// from the dispatch worker thread and bound their own network time.
pub trait AlertChannel: Send {
    fn name(&self) -> &str;
    fn send(&self, subject: &str, body: &str, snapshot: &Path) -> Result<()>;
}

/// Delivery result for one channel, as persisted in the history record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// HTTP POST channel. The request body is JSON carrying the subject, body
/// text, and the path of the saved snapshot.
pub struct WebhookChannel {
    url: String,
    agent: ureq::Agent,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout(timeout)
                .build(),
        }
    }
}

impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send(&self, subject: &str, body: &str, snapshot: &Path) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(ureq::json!({
                "subject": subject,
                "body": body,
                "snapshot": snapshot.display().to_string(),
            }))
            .map_err(|e| PipelineError::DispatchFailure {
                channel: "webhook".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Telegram bot channel posting the alert text through the Bot API. The
/// snapshot path is already part of the body text.
pub struct TelegramChannel {
    endpoint: String,
    chat_id: String,
    agent: ureq::Agent,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
            chat_id: chat_id.into(),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout(timeout)
                .build(),
        }
    }
}

impl AlertChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send(&self, subject: &str, body: &str, _snapshot: &Path) -> Result<()> {
        self.agent
            .post(&self.endpoint)
            .send_json(ureq::json!({
                "chat_id": self.chat_id,
                "text": format!("{subject}\n\n{body}"),
            }))
            .map_err(|e| PipelineError::DispatchFailure {
                channel: "telegram".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Persists a snapshot, notifies every channel, and appends the history
/// record. Owns the dispatch side-effects end to end.
pub struct AlertDispatcher {
    channels: Vec<Box<dyn AlertChannel>>,
    history: Box<dyn AlertHistoryStore>,
    snapshot_dir: PathBuf,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<Box<dyn AlertChannel>>,
        history: Box<dyn AlertHistoryStore>,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channels,
            history,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// Handle one alert event. Channel failures are logged and recorded but
    /// do not fail the dispatch; snapshot or history persistence failures do.
    pub fn dispatch(&mut self, event: &AlertEvent) -> Result<AlertRecord> {
        let raised_at: DateTime<Local> = event.raised_at.into();
        let snapshot_path = self.save_snapshot(event, &raised_at)?;

        let subject = format!("Intrusion alert: zone {}", event.zone_id);
        let body = alert_body(event, &raised_at, &snapshot_path);

        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match channel.send(&subject, &body, &snapshot_path) {
                Ok(()) => {
                    log::info!("alert for zone {} delivered via {}", event.zone_id, channel.name());
                    outcomes.push(ChannelOutcome {
                        channel: channel.name().to_string(),
                        delivered: true,
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!(
                        "alert for zone {} failed via {}: {e:#}",
                        event.zone_id,
                        channel.name()
                    );
                    outcomes.push(ChannelOutcome {
                        channel: channel.name().to_string(),
                        delivered: false,
                        error: Some(format!("{e:#}")),
                    });
                }
            }
        }

        let record = AlertRecord {
            created_at: raised_at.to_rfc3339(),
            zone_id: event.zone_id.clone(),
            detections: event.detections.clone(),
            snapshot_path: snapshot_path.display().to_string(),
            channels: outcomes,
        };
        self.history.append(&record)?;
        Ok(record)
    }

    pub fn history(&self) -> &dyn AlertHistoryStore {
        self.history.as_ref()
    }

    fn save_snapshot(&self, event: &AlertEvent, raised_at: &DateTime<Local>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.snapshot_dir)
            .with_context(|| format!("create snapshot dir {}", self.snapshot_dir.display()))?;
        // Sequence id disambiguates multiple alerts within one second.
        let path = self.snapshot_dir.join(format!(
            "alert_{}_{}_{}.jpg",
            event.zone_id,
            raised_at.format("%Y%m%d_%H%M%S"),
            event.snapshot.sequence_id
        ));

        let snap = &event.snapshot;
        let img = image::RgbImage::from_raw(snap.width, snap.height, snap.pixels.clone())
            .ok_or_else(|| {
                PipelineError::DispatchFailure {
                    channel: "snapshot".to_string(),
                    reason: format!(
                        "pixel buffer of {} bytes does not match {}x{} RGB",
                        snap.pixels.len(),
                        snap.width,
                        snap.height
                    ),
                }
            })?;
        img.save(&path)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

fn alert_body(event: &AlertEvent, raised_at: &DateTime<Local>, snapshot: &Path) -> String {
    let mut body = format!(
        "Intrusion detected in zone '{}' at {}\n",
        event.zone_id,
        raised_at.format("%Y-%m-%d %H:%M:%S")
    );
    for detection in &event.detections {
        let (x, y) = detection.bbox.bottom_center();
        body.push_str(&format!(
            "  class {} confidence {:.2} at ({x:.0}, {y:.0})\n",
            detection.class_id, detection.confidence
        ));
    }
    body.push_str(&format!("Snapshot: {}\n", snapshot.display()));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::controller::FrameSnapshot;
    use crate::alert::history::InMemoryAlertHistory;
    use crate::detect::{BoundingBox, Detection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    struct CountingChannel {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl AlertChannel for CountingChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn send(&self, _subject: &str, body: &str, snapshot: &Path) -> Result<()> {
            assert!(body.contains("Intrusion detected"));
            assert!(snapshot.exists(), "snapshot saved before channels run");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::DispatchFailure {
                    channel: self.name.to_string(),
                    reason: "simulated outage".to_string(),
                }
                .into())
            } else {
                Ok(())
            }
        }
    }

    fn event(zone_id: &str) -> AlertEvent {
        AlertEvent {
            zone_id: zone_id.to_string(),
            detections: vec![Detection {
                class_id: 0,
                confidence: 0.95,
                bbox: BoundingBox {
                    x_min: 1.0,
                    y_min: 1.0,
                    x_max: 3.0,
                    y_max: 3.0,
                },
                frame_ref: 42,
            }],
            snapshot: FrameSnapshot {
                pixels: vec![128u8; 4 * 4 * 3],
                width: 4,
                height: 4,
                sequence_id: 42,
            },
            raised_at: SystemTime::now(),
        }
    }

    #[test]
    fn dispatch_saves_snapshot_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let channel = CountingChannel {
            name: "test",
            calls: calls.clone(),
            fail: false,
        };
        let mut dispatcher = AlertDispatcher::new(
            vec![Box::new(channel)],
            Box::new(InMemoryAlertHistory::new()),
            dir.path(),
        );

        let record = dispatcher.dispatch(&event("gate")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Path::new(&record.snapshot_path).exists());
        assert_eq!(record.channels.len(), 1);
        assert!(record.channels[0].delivered);

        let recent = dispatcher.history().recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].zone_id, "gate");
    }

    #[test]
    fn failing_channel_does_not_stop_others_or_history() {
        let dir = tempfile::tempdir().unwrap();
        let flaky_calls = Arc::new(AtomicUsize::new(0));
        let good_calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = AlertDispatcher::new(
            vec![
                Box::new(CountingChannel {
                    name: "flaky",
                    calls: flaky_calls.clone(),
                    fail: true,
                }),
                Box::new(CountingChannel {
                    name: "good",
                    calls: good_calls.clone(),
                    fail: false,
                }),
            ],
            Box::new(InMemoryAlertHistory::new()),
            dir.path(),
        );

        let record = dispatcher.dispatch(&event("gate")).unwrap();
        assert_eq!(flaky_calls.load(Ordering::SeqCst), 1);
        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
        assert!(!record.channels[0].delivered);
        assert!(record.channels[0].error.as_deref().unwrap().contains("simulated outage"));
        assert!(record.channels[1].delivered);
        assert_eq!(dispatcher.history().recent(10).unwrap().len(), 1);
    }

    #[test]
    fn mismatched_snapshot_buffer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = AlertDispatcher::new(
            Vec::new(),
            Box::new(InMemoryAlertHistory::new()),
            dir.path(),
        );
        let mut bad = event("gate");
        bad.snapshot.pixels.truncate(5);
        assert!(dispatcher.dispatch(&bad).is_err());
    }
}
