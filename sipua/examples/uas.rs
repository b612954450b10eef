//! A minimal answering user agent: listens on UDP and accepts every
//! inbound call.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Level;

use sipua::dialog::{Dialog, DialogState};
use sipua::{Endpoint, Party, PartyConfig, PartyHandler};

struct AnswerAll;

#[async_trait]
impl PartyHandler for AnswerAll {
    async fn on_inbound_invite(&self, dialog: &Dialog) {
        tracing::info!("Inbound call {}", dialog.id());

        dialog.ring().await.expect("ring");
        tokio::time::sleep(Duration::from_millis(500)).await;
        dialog.accept().await.expect("accept");
    }

    async fn on_dialog_state(&self, dialog: &Dialog, old: DialogState, new: DialogState) {
        tracing::info!("Dialog {}: {:?} -> {:?}", dialog.id(), old, new);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter("sipua=debug,uas=info")
        .init();

    let endpoint = Endpoint::builder().with_name("uas-demo").build();

    let config = PartyConfig::new()
        .with_aor("bob@127.0.0.1")?
        .with_listen_addr("127.0.0.1".parse()?)
        .with_listen_port(5060);

    let party = Party::new(&endpoint, config, AnswerAll);
    let addr = party.listen().await?;

    tracing::info!("Answering calls for sip:bob@{addr}");

    tokio::signal::ctrl_c().await?;
    party.terminate().await?;

    Ok(())
}
