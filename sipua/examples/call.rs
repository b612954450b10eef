//! Places a single call, holds it for two seconds, and hangs up.
//!
//! Run the `uas` example first, then: `cargo run --example call`.

use std::error::Error;
use std::time::Duration;

use tracing::Level;

use sipua::dialog::DialogState;
use sipua::{Endpoint, Party, PartyConfig, PartyHandler};

struct Caller;

impl PartyHandler for Caller {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter("sipua=debug,call=info")
        .init();

    let endpoint = Endpoint::builder().with_name("uac-demo").build();

    let config = PartyConfig::new()
        .with_aor("alice@127.0.0.1")?
        .with_listen_addr("127.0.0.1".parse()?)
        .with_listen_port(0);

    let party = Party::new(&endpoint, config, Caller);
    party.listen().await?;

    let dialog = party.invite("sip:bob@127.0.0.1:5060").await?;

    match dialog
        .wait_for_state(|s| s.is_terminal() || *s == DialogState::Confirmed, Duration::from_secs(10))
        .await
    {
        Some(DialogState::Confirmed) => {
            tracing::info!("Call {} answered", dialog.id());
            tokio::time::sleep(Duration::from_secs(2)).await;
            dialog.bye().await?;
            tracing::info!("Hung up");
        }
        other => {
            tracing::warn!("Call failed: {:?} ({:?})", other, dialog.last_error());
        }
    }

    party.terminate().await?;
    Ok(())
}
