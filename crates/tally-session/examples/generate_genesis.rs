//! Prints a devnet genesis for `N` participants (default 4) as JSON.
//!
//! ```text
//! cargo run -p tally-session --example generate_genesis -- 7
//! ```

use tally_session::generate_devnet_genesis;
use tally_types::Ed25519Verifier;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let count = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<usize>()?,
        None => 4,
    };

    let genesis = generate_devnet_genesis(count);
    genesis.validate()?;
    let desc = genesis.clone().into_description(Ed25519Verifier::new())?;
    tracing::info!(
        participants = desc.total_nodes(),
        cutoff_weight = desc.cutoff_weight(),
        "generated devnet genesis"
    );

    println!("{}", serde_json::to_string_pretty(&genesis)?);
    Ok(())
}
