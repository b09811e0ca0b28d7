//! Run command implementation.

use std::sync::Arc;

use clipbird_core::clipboard::{self, SharedClipboard};
use clipbird_core::store::SharedStore;
use clipbird_core::{
    Config, CoordinatorHandle, Device, FileStore, HostType, Snapshot, SyncCoordinator, SyncEvent,
    SystemClipboard,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::input::{Input, HELP};
use crate::ui::print_banner;

/// Run the clipbird service.
pub async fn run_service(config: Config, role: Option<HostType>) -> anyhow::Result<()> {
    print_banner();

    let store: SharedStore = Arc::new(FileStore::open(&config.data_dir)?);
    let system_clipboard: SharedClipboard = Arc::new(SystemClipboard::new());
    let (coordinator, mut events) =
        SyncCoordinator::new(config.clone(), store, system_clipboard.clone())?;

    println!("\x1b[1mDevice:\x1b[0m {}", config.device_name);
    println!("\x1b[1mCert:\x1b[0m   {}", coordinator.identity().fingerprint());

    let (local_changes, _monitor) =
        clipboard::start_monitor(system_clipboard, config.clipboard_poll_interval());
    let (handle, task) = coordinator.spawn(local_changes);

    let started = match role {
        Some(HostType::Server) => handle.set_current_host_as_server().await,
        Some(HostType::Client) => handle.set_current_host_as_client().await,
        _ => handle.restore_last_role().await,
    };
    if let Err(e) = started {
        eprintln!("\x1b[1;31m✗\x1b[0m Could not start: {}", e);
    }

    println!("\x1b[2mType 'help' for commands. Press Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut auth_requests: Vec<Device> = Vec::new();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let SyncEvent::AuthRequest(device) = &event {
                    auth_requests.retain(|d| d.name != device.name);
                    auth_requests.push(device.clone());
                }
                print_event(&event, &auth_requests);
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match Input::parse(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => {
                        if let Err(e) = execute(&handle, input, &mut auth_requests).await {
                            eprintln!("\x1b[1;31m✗\x1b[0m {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("\x1b[1;31m✗\x1b[0m {} (try 'help')", e),
                },
                _ => stdin_open = false,
            },
            _ = rx.recv() => break,
        }
    }

    println!("\n\x1b[1;33mShutting down...\x1b[0m");
    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn execute(
    handle: &CoordinatorHandle,
    input: Input,
    auth_requests: &mut Vec<Device>,
) -> anyhow::Result<()> {
    match input {
        Input::Servers => print_devices("Servers", &handle.server_list().await?),
        Input::Clients => print_devices("Clients", &handle.connected_clients().await?),
        Input::Connect(n) => {
            let servers = handle.server_list().await?;
            handle.connect_to_server(pick(&servers, n)?.clone()).await?;
        }
        Input::Approve(n) => {
            let device = pick(auth_requests, n)?.clone();
            handle.approve(device.clone()).await?;
            auth_requests.retain(|d| d != &device);
        }
        Input::Reject(n) => {
            let device = pick(auth_requests, n)?.clone();
            auth_requests.retain(|d| d != &device);
            handle.reject(device).await?;
        }
        Input::Disconnect(Some(n)) => {
            let clients = handle.connected_clients().await?;
            handle.disconnect_client(pick(&clients, n)?.clone()).await?;
        }
        Input::Disconnect(None) => match handle.host_type().await? {
            HostType::Server => handle.disconnect_all_clients().await?,
            _ => handle.disconnect_from_server().await?,
        },
        Input::History => {
            let history = handle.history().await?;
            println!("\x1b[1mHistory\x1b[0m (oldest first)");
            for (i, snapshot) in history.iter().enumerate() {
                println!("  {}. {}", i + 1, format_preview(snapshot));
            }
        }
        Input::Delete(n) => {
            handle.delete_history_at(n - 1).await?;
        }
        Input::Server => handle.set_current_host_as_server().await?,
        Input::Client => handle.set_current_host_as_client().await?,
        Input::Help => println!("{}", HELP),
        Input::Quit => {}
    }
    Ok(())
}

fn pick(devices: &[Device], n: usize) -> anyhow::Result<&Device> {
    devices
        .get(n.wrapping_sub(1))
        .ok_or_else(|| anyhow::anyhow!("no entry {} (have {})", n, devices.len()))
}

fn print_devices(title: &str, devices: &[Device]) {
    println!("\x1b[1m{}\x1b[0m", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {}", i + 1, device);
    }
}

/// Print a coordinator event.
fn print_event(event: &SyncEvent, auth_requests: &[Device]) {
    match event {
        SyncEvent::HostTypeChanged(host_type) => {
            println!("\x1b[1;36m⬤\x1b[0m Role: \x1b[1m{}\x1b[0m", host_type);
        }
        SyncEvent::ServerStateChanged(listening) => {
            let state = if *listening { "listening" } else { "stopped" };
            println!("\x1b[1;36m⬤\x1b[0m Server {}", state);
        }
        SyncEvent::ServerFound(device) => {
            println!("\x1b[1;32m⬤\x1b[0m Found: \x1b[1m{}\x1b[0m", device);
        }
        SyncEvent::ServerGone(device) => {
            println!("\x1b[1;31m⬤\x1b[0m Lost: {}", device);
        }
        SyncEvent::ServerStatusChanged { connected, server } => {
            if *connected {
                println!("\x1b[1;32m✓\x1b[0m Connected to \x1b[1m{}\x1b[0m", server);
            } else {
                println!("\x1b[1;33m⬤\x1b[0m Disconnected from {}", server);
            }
        }
        SyncEvent::ClientStateChanged { client, connected } => {
            if *connected {
                println!("\x1b[1;32m✓\x1b[0m Client joined: \x1b[1m{}\x1b[0m", client);
            } else {
                println!("\x1b[1;33m⬤\x1b[0m Client left: {}", client);
            }
        }
        SyncEvent::AuthRequest(device) => {
            let n = auth_requests.iter().position(|d| d == device).map_or(0, |i| i + 1);
            println!(
                "\x1b[1;35m⚡\x1b[0m \x1b[1m{}\x1b[0m is not trusted yet. 'approve {}' or 'reject {}'",
                device, n, n
            );
        }
        SyncEvent::SyncReceived(snapshot) => {
            println!("\x1b[1;34m📋\x1b[0m Received: \"{}\"", format_preview(snapshot));
        }
        SyncEvent::ConnectionError(e) => {
            eprintln!("\x1b[1;31m✗\x1b[0m Error: {}", e);
        }
        SyncEvent::ServerListChanged(_)
        | SyncEvent::ClientListChanged(_)
        | SyncEvent::HistoryChanged(_) => {}
    }
}

/// Format clipboard content for preview display.
fn format_preview(snapshot: &Snapshot) -> String {
    const MAX_PREVIEW_LEN: usize = 50;

    let Some(text) = snapshot.plain_text() else {
        let kinds: Vec<&str> = snapshot.items().iter().map(|i| i.kind.as_str()).collect();
        return format!("[{}]", kinds.join(", "));
    };

    let text = text.replace('\n', " ");
    if text.chars().count() > MAX_PREVIEW_LEN {
        let cut: String = text.chars().take(MAX_PREVIEW_LEN).collect();
        format!("{}...", cut)
    } else {
        text
    }
}
