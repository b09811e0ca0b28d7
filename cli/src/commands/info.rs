//! Info command implementation.

use clipbird_core::store::{FileStore, SettingsStore, TrustScope};
use clipbird_core::{Config, HostIdentity};

/// Display device information.
pub fn show_info(config: &Config) -> anyhow::Result<()> {
    let store = FileStore::open(&config.data_dir)?;
    let identity = HostIdentity::load_or_create(&store, &config.device_name)?;
    let last_role = if store.host_is_server() { "server" } else { "client" };

    println!("\n\x1b[1mClipbird Device Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mName:\x1b[0m        {}", config.device_name);
    println!("\x1b[1mFingerprint:\x1b[0m {}", identity.fingerprint());
    println!("\x1b[1mLast role:\x1b[0m   {}", last_role);
    println!("\x1b[1mPort:\x1b[0m        {}", config.port);
    println!("\x1b[1mData:\x1b[0m        {}", config.data_dir.display());
    println!(
        "\x1b[1mTrusted:\x1b[0m     {} server(s), {} client(s)",
        store.all_certs(TrustScope::Server).len(),
        store.all_certs(TrustScope::Client).len()
    );

    println!("\n\x1b[1mLocal IPs:\x1b[0m");
    for ip in clipbird_core::discovery::local_ips() {
        println!("  • {}", ip);
    }
    println!();
    Ok(())
}
