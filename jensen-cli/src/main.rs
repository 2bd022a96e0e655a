use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jensen_lib::{CancelToken, Client, ClientConfig, KeyValueStore, OperationStatus, SettingsField, StatusSink};
use tokio::sync::mpsc;

/// A simple on-disk key-value store backing the recordings cache: one file
/// per key under a cache directory.
struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    async fn set(&self, key: &str, value: String) {
        let _ = std::fs::write(self.path_for(key), value);
    }

    async fn delete(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

#[derive(Parser)]
#[command(name = "jensen-cli", about = "Command-line client for Jensen recording devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for the persisted recordings cache.
    #[arg(long, default_value = "./.jensen-cache")]
    cache_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Print firmware version, serial number, and model.
    Info,
    /// Print storage capacity, used space, and file count.
    CardInfo,
    /// List recordings, using the cache when the device's storage hasn't changed.
    List {
        /// Bypass the cache and always fetch a fresh listing from the device.
        #[arg(long)]
        force_refresh: bool,
    },
    /// Download a recording by filename into the given output path.
    Download {
        filename: String,
        #[arg(long)]
        size: u32,
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete a recording by filename.
    Delete { filename: String },
    /// Read the device's current flag settings.
    SettingsGet,
    /// Enable or disable one flag setting.
    SettingsSet {
        #[arg(value_enum)]
        field: SettingsFieldArg,
        enabled: bool,
    },
    /// Read the device clock.
    TimeGet,
    /// Set the device clock to the host's current UTC time.
    TimeSync,
    /// Erase all recordings. Requires the literal confirmation bytes 1 2 3 4.
    Format {
        #[arg(num_args = 4)]
        confirm: Vec<u8>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum SettingsFieldArg {
    AutoRecord,
    AutoPlay,
    Notification,
    BluetoothTone,
}

impl From<SettingsFieldArg> for SettingsField {
    fn from(value: SettingsFieldArg) -> Self {
        match value {
            SettingsFieldArg::AutoRecord => SettingsField::AutoRecord,
            SettingsFieldArg::AutoPlay => SettingsField::AutoPlay,
            SettingsFieldArg::Notification => SettingsField::Notification,
            SettingsFieldArg::BluetoothTone => SettingsField::BluetoothTone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let store = FileStore::new(cli.cache_dir)?;
    let client = Client::connect(ClientConfig::default(), store).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<jensen_lib::status::StatusEvent>();
    let status_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event.status == OperationStatus::Streaming && event.message.is_none() {
                continue;
            }
            eprintln!("[{}] {}% {:?}", event.operation, event.progress, event.status);
        }
    });
    let sink = StatusSink::new("cli", Some(tx.clone()));

    client.initialize(&sink).await?;

    // Runs for the lifetime of this command, picking back up if the device
    // is unplugged and replugged mid-command; harmless for a short-lived
    // invocation since it's aborted before exit below.
    let reconnect_task = tokio::spawn(client.clone().run_auto_reconnect_loop(
        StatusSink::new("reconnect", Some(tx.clone())),
        Duration::from_secs(5),
    ));

    match cli.command {
        Command::Info => {
            let info = client.get_device_info().await?;
            println!("firmware: {}", info.firmware_version);
            println!("serial:   {}", info.serial_number);
            println!("model:    {:?}", info.model);
        }
        Command::CardInfo => {
            let storage = client.get_card_info().await?;
            println!("total: {} bytes", storage.total_bytes);
            println!("used:  {} bytes", storage.used_bytes);
            println!("free:  {} bytes", storage.free_bytes);
            println!("files: {}", storage.file_count);
        }
        Command::List { force_refresh } => {
            let cancel = CancelToken::new();
            let recordings = client.list_recordings(force_refresh, &cancel, &sink).await?;
            for r in recordings {
                println!("{}\t{:.1}s\t{}", r.filename, r.duration_secs, r.created_at);
            }
        }
        Command::Download { filename, size, out } => {
            let cancel = CancelToken::new();
            let data = client.download_file(&filename, size, &cancel, &sink).await?;
            std::fs::write(&out, &data)?;
            println!("wrote {} bytes to {}", data.len(), out.display());
        }
        Command::Delete { filename } => {
            client.delete_file(&filename).await?;
            println!("deleted {filename}");
        }
        Command::SettingsGet => {
            let settings = client.get_settings().await?;
            println!("{settings:#?}");
        }
        Command::SettingsSet { field, enabled } => {
            client.set_setting(field.into(), enabled).await?;
            println!("updated");
        }
        Command::TimeGet => {
            let (year, month, day, hour, minute, second) = client.get_device_time().await?;
            println!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
        }
        Command::TimeSync => {
            client.set_device_time(chrono::Utc::now()).await?;
            println!("synced device clock to host time");
        }
        Command::Format { confirm } => {
            let bytes: [u8; 4] = confirm.try_into().map_err(|_| "confirm requires exactly 4 bytes")?;
            client.format_card(bytes).await?;
            println!("card formatted");
        }
    }

    reconnect_task.abort();
    client.disconnect(&sink).await;
    drop(tx);
    status_task.await?;
    Ok(())
}
