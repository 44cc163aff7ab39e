mod controller;
mod dispatch;
mod history;

pub use controller::{AlertController, AlertEvent, FrameSnapshot, ZonePhase};
pub use dispatch::{AlertChannel, AlertDispatcher, ChannelOutcome, TelegramChannel, WebhookChannel};
pub use history::{AlertHistoryStore, AlertRecord, InMemoryAlertHistory, SqliteAlertHistory};
