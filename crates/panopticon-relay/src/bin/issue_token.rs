//! Create or update an account and print a relay token for it.
//!
//! Usage: `issue-token <username> [user|admin|superadmin]`
//!
//! Reads the same `PANOPTICON_DB` and `JWT_*` variables as the relay.

use panopticon_core::Role;
use panopticon_relay::auth::IdentityVerifier;
use panopticon_relay::config::RelayConfig;
use panopticon_relay::storage::Storage;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    panopticon_relay::init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(username) = args.next() else {
        eprintln!("usage: issue-token <username> [user|admin|superadmin]");
        std::process::exit(2);
    };
    let role = match args.next() {
        Some(raw) => raw.parse::<Role>()?,
        None => Role::User,
    };

    let config = RelayConfig::from_env();
    let db = Storage::open(&config.db_path)?;
    let identity = db.upsert_account(&username, role)?;
    let token = IdentityVerifier::new(&config.jwt).issue(&identity)?;

    tracing::info!("Issued token for {} ({}) id={}", identity.username, identity.role, identity.id);
    println!("{token}");
    Ok(())
}
