//! MediaRemote client entry point.
//!
//! Wires the lifecycle controller to a device transport and drives it from a
//! small interactive prompt on stdin. The graphical shell (window, tray,
//! hotkeys) lives out of tree and talks to the same [`RemoteController`]
//! surface; this binary is the headless driver used for development and
//! scripting.
//!
//! ```text
//! main()
//!  └─ load config (--config / platform default)
//!  └─ RemoteController::start(transport, store, config)
//!       ├─ state event pump   (Tokio task)
//!       ├─ connection events  (Tokio task)
//!       └─ stale-check ticker (Tokio task)
//!  └─ bootstrap() → saved credentials ? CONNECTING : SCANNING
//!  └─ stdin command loop
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediaremote_client::application::controller::RemoteController;
use mediaremote_client::infrastructure::storage::config::{load_config, load_config_from};
use mediaremote_client::infrastructure::storage::credentials::CredentialStore;
use mediaremote_client::infrastructure::transport::mock::MockTransport;
use mediaremote_client::infrastructure::transport::DeviceTransport;
use mediaremote_core::{KeyAction, RemoteKey};

/// Interval between stale-connection checks.
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "mediaremote", about = "Remote control for networked media devices")]
struct Args {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, env = "MEDIAREMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the credential store (defaults to the platform config directory).
    #[arg(long, env = "MEDIAREMOTE_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    // Initialise structured logging. Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.client.log_level.clone())),
        )
        .init();

    info!("MediaRemote starting");

    let store = match &args.credentials {
        Some(path) => CredentialStore::with_path(path.clone()),
        None => CredentialStore::open_default()?,
    };

    // The production protocol stack implements DeviceTransport out of tree;
    // the headless binary runs against the in-memory transport.
    let transport: Arc<dyn DeviceTransport> = Arc::new(MockTransport::new());

    let controller = RemoteController::start(transport, store, &config);
    controller.bootstrap().await;

    // ── Stale-connection ticker ───────────────────────────────────────────────
    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STALE_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                controller.check_stale_connection().await;
            }
        });
    }

    println!("MediaRemote ready. Type `help` for commands.");
    run_prompt(&controller).await;

    controller.disconnect().await;
    info!("MediaRemote stopped");
    Ok(())
}

/// Reads commands from stdin until EOF or `quit`.
async fn run_prompt(controller: &Arc<RemoteController>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "" => {}
            "help" => print_help(),
            "status" => {
                println!(
                    "phase: {}, connected: {}",
                    controller.phase().await,
                    controller.is_connected().await
                );
            }
            "scan" => {
                for device in controller.scan().await {
                    println!("  {device}");
                }
            }
            "pair" => {
                if rest.is_empty() {
                    println!("usage: pair <Name (address)>");
                } else if !controller.select_device(rest).await {
                    println!("cannot start pairing from phase {}", controller.phase().await);
                }
            }
            "pin" => match controller.submit_pin(rest).await {
                Ok(()) => println!("accepted"),
                Err(err) => println!("pairing error: {err}"),
            },
            "key" => {
                let mut words = rest.split_whitespace();
                let name = words.next().unwrap_or("");
                let action = match words.next() {
                    Some("hold") => KeyAction::Hold,
                    _ => KeyAction::Tap,
                };
                match RemoteKey::from_str(name) {
                    Ok(key) => controller.send_command(key, action).await,
                    Err(err) => println!("{err}"),
                }
            }
            "keys" => {
                for key in RemoteKey::ALL {
                    println!("  {:14} {}", key.wire_name(), key.description());
                }
            }
            "text" => controller.set_text(rest).await,
            "gettext" => println!("{:?}", controller.text().await),
            "focus" => println!("keyboard focused: {}", controller.keyboard_focus().await),
            "reconnect" => {
                if !controller.reconnect().await {
                    println!("no saved credentials to reconnect with");
                }
            }
            "disconnect" => controller.disconnect().await,
            "devices" => {
                for name in controller.store().saved_device_names() {
                    println!("  {name}");
                }
            }
            "quit" | "exit" => break,
            other => println!("unknown command {other:?}; try `help`"),
        }
    }
}

fn print_help() {
    println!(
        "\
commands:
  scan                 list devices on the network
  pair <Name (addr)>   start pairing with a scanned device
  pin <code>           submit the PIN shown on the device
  key <name> [hold]    send a remote key (see `keys`)
  keys                 list remote key names
  text <s>             type into the focused text field
  gettext              read the focused text field
  focus                query keyboard focus
  devices              list saved devices
  reconnect            reconnect with saved credentials
  disconnect           drop the current connection
  status               show lifecycle phase
  quit                 exit"
    );
}
