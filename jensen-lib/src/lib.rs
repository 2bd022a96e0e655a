pub mod bcd;
pub mod cache;
pub mod cancel;
pub mod client;
pub mod config;
pub mod constants;
pub mod counters;
pub mod device_info;
pub mod dispatcher;
pub mod download;
pub mod error;
pub mod filelist;
pub mod framer;
pub mod lifecycle;
pub mod recording;
pub mod schedule;
pub mod settings;
pub mod status;
pub mod transport;

pub use cache::{CacheEntry, KeyValueStore, RecordingsCache};
pub use cancel::CancelToken;
pub use client::Client;
pub use config::{ClientConfig, RetryPolicy};
pub use counters::Counters;
pub use device_info::{DeviceInfo, Model, StorageInfo};
pub use dispatcher::Dispatcher;
pub use error::JensenError;
pub use framer::Frame;
pub use lifecycle::{ConnectionState, SubStatus};
pub use recording::Recording;
pub use schedule::ScheduleEntry;
pub use settings::{Settings, SettingsField};
pub use status::{OperationStatus, StatusEvent, StatusSink};
pub use transport::{NusbBackend, UsbBackend, UsbFilter};
