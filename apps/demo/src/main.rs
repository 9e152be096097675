use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use relay_integration::memory::{HeadlessModalFactory, MemoryProviderFactory, MemoryWallet};
use session_core::{load_config, AdapterEvent, EventKind, WalletSessionAdapter};
use shared::{
    domain::{Namespace, Namespaces, Session, Topic},
    protocol::tron_methods,
};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Adapter settings; missing files fall back to defaults plus `APP__*` env.
    #[arg(long, default_value = "walletconnect.toml")]
    config: PathBuf,
    /// Overrides the configured project id. The loopback relay accepts any.
    #[arg(long)]
    project_id: Option<String>,
    /// Account the loopback wallet approves with.
    #[arg(long, default_value = "TDemoWa11etAddre55xxxxxxxxxxxxxxx")]
    account: String,
    /// Account the wallet switches to after pairing.
    #[arg(long, default_value = "TSecondAccountxxxxxxxxxxxxxxxxxx")]
    switch_to: String,
    #[arg(long, default_value = "hello from tron-session-demo")]
    message: String,
}

fn namespaces(chain_id: &str, accounts: &[&str]) -> Namespaces {
    let mut namespaces = Namespaces::new();
    namespaces.insert(
        "tron".to_string(),
        Namespace {
            chains: Some(vec![chain_id.to_string()]),
            accounts: accounts
                .iter()
                .map(|account| format!("{chain_id}:{account}"))
                .collect(),
            methods: tron_methods(),
            events: Vec::new(),
        },
    );
    namespaces
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(project_id) = args.project_id {
        config.project_id = project_id;
    }
    if config.project_id.trim().is_empty() {
        config.project_id = "local-demo".into();
    }
    config.validate()?;
    let chain_id = config.chain_id().to_string();
    info!(chain = %chain_id, project_id = %config.project_id, "demo: loaded config");

    let topic = Topic::new("demo-session");
    let wallet = MemoryWallet::new();
    wallet.set_auto_approve(Some(Session {
        topic: topic.clone(),
        namespaces: namespaces(&chain_id, &[&args.account]),
        session_properties: None,
        peer: None,
        expiry: 0,
        acknowledged: true,
    }));

    let modals = HeadlessModalFactory::new();
    let adapter = WalletSessionAdapter::new_with_modal(
        config,
        MemoryProviderFactory::new(Arc::clone(&wallet)),
        modals,
    );
    adapter.on(EventKind::AccountsChanged, |event| {
        if let AdapterEvent::AccountsChanged(accounts) = event {
            println!("accountsChanged: {accounts:?}");
        }
    });
    adapter.on(EventKind::Disconnect, |_event| println!("disconnect"));

    let status = adapter.check_connect_status().await?;
    println!("resumable address: {:?}", status.address);

    let address = adapter.connect().await?;
    println!("connected as {address}");

    let signature = adapter.sign_message(&args.message).await?;
    println!("message signature: {signature}");

    let signed = adapter
        .sign_transaction(serde_json::json!({ "txID": "demo", "raw_data": {} }))
        .await?;
    println!("signed transaction: {}", serde_json::to_string(&signed)?);

    wallet.update_session(
        &topic,
        namespaces(&chain_id, &[&args.switch_to, &args.account]),
    );
    // Let the remote-mutation listener drain the update.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    println!("state after wallet update: {:?}", adapter.state());
    println!("primary address: {:?}", adapter.address());

    adapter.disconnect().await?;
    println!("state after disconnect: {:?}", adapter.state());

    Ok(())
}
