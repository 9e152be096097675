use std::{sync::Arc, time::Duration};

use relay_integration::memory::{HeadlessModalFactory, MemoryProviderFactory, MemoryWallet};
use serde_json::json;
use session_core::{
    AdapterConfig, AdapterEvent, ConnectionState, EventKind, WalletSessionAdapter,
};
use shared::{
    domain::{Namespace, Namespaces, Session, Topic, TronChain, TRON_NILE},
    protocol::tron_methods,
};
use tokio::sync::mpsc;

fn nile_namespaces(addresses: &[&str]) -> Namespaces {
    let mut namespaces = Namespaces::new();
    namespaces.insert(
        "tron".to_string(),
        Namespace {
            chains: Some(vec![TRON_NILE.to_string()]),
            accounts: addresses
                .iter()
                .map(|address| format!("{TRON_NILE}:{address}"))
                .collect(),
            methods: tron_methods(),
            events: Vec::new(),
        },
    );
    namespaces
}

fn nile_session(topic: &str, addresses: &[&str]) -> Session {
    Session {
        topic: Topic::new(topic),
        namespaces: nile_namespaces(addresses),
        session_properties: None,
        peer: None,
        expiry: 0,
        acknowledged: false,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<AdapterEvent>) -> AdapterEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event in time")
        .expect("bus alive")
}

#[tokio::test]
async fn pair_follow_remote_changes_and_reconnect() {
    let wallet = MemoryWallet::new();
    let modals = HeadlessModalFactory::new();
    let mut config = AdapterConfig::new("integration-project");
    config.network = TronChain::Nile;
    let adapter = WalletSessionAdapter::new_with_modal(
        config,
        MemoryProviderFactory::new(Arc::clone(&wallet)),
        modals.clone(),
    );

    let (tx, mut events) = mpsc::unbounded_channel();
    for kind in [EventKind::AccountsChanged, EventKind::Disconnect] {
        let tx = tx.clone();
        adapter.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }

    let (address, ()) = tokio::join!(adapter.connect(), async {
        wallet.wait_for_pending_approval().await;
        wallet.approve_pending(nile_session("pairing-1", &["TAlpha"]));
    });
    assert_eq!(address.expect("paired"), "TAlpha");
    assert_eq!(
        next_event(&mut events).await,
        AdapterEvent::AccountsChanged(vec!["TAlpha".into()])
    );

    wallet.update_session(&Topic::new("pairing-1"), nile_namespaces(&["TBeta", "TAlpha"]));
    assert_eq!(
        next_event(&mut events).await,
        AdapterEvent::AccountsChanged(vec!["TBeta".into(), "TAlpha".into()])
    );
    assert_eq!(adapter.address().as_deref(), Some("TBeta"));

    let signature = adapter.sign_message("gm").await.expect("signed");
    assert_eq!(signature, "0xmemory-signature");
    let request = &wallet.requests()[0];
    assert_eq!(request.chain_id, TRON_NILE);
    assert_eq!(request.request.params, json!({ "address": "TBeta", "message": "gm" }));

    wallet.delete_session(&Topic::new("pairing-1"));
    assert_eq!(next_event(&mut events).await, AdapterEvent::Disconnect);
    assert_eq!(adapter.state(), ConnectionState::Idle);
    assert!(adapter.sign_message("after delete").await.is_err());

    let (address, ()) = tokio::join!(adapter.connect(), async {
        wallet.wait_for_pending_approval().await;
        wallet.approve_pending(nile_session("pairing-2", &["TGamma"]));
    });
    assert_eq!(address.expect("re-paired"), "TGamma");
    assert_eq!(modals.create_calls(), 1);
    assert_eq!(modals.modal().open_calls(), 2);

    adapter.disconnect().await.expect("disconnect");
    assert!(!adapter.is_connected());
    assert!(wallet.sessions().is_empty());
}
