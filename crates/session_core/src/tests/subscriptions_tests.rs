use super::*;

use std::sync::atomic::AtomicUsize;

use relay_integration::memory::HeadlessModalFactory;
use shared::protocol::{ModalEvent, ModalState};

fn counting_state_callback(counter: &Arc<AtomicUsize>) -> ModalStateCallback {
    let counter = Arc::clone(counter);
    Arc::new(move |_state: &ModalState| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn pending_subscription_released_before_attach_never_fires() {
    let factory = HeadlessModalFactory::new();
    let modal = factory.modal();
    let cache = SubscriptionCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = cache.subscribe_modal_state(counting_state_callback(&calls));
    assert_eq!(cache.pending_count(), 1);
    handle.unsubscribe();
    assert_eq!(cache.pending_count(), 0);

    cache.attach(modal.clone());
    modal.open().await.expect("open");
    modal.simulate_user_close();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(modal.subscriber_count(), 0);
}

#[tokio::test]
async fn queued_subscriptions_replay_in_order_on_attach() {
    let factory = HeadlessModalFactory::new();
    let modal = factory.modal();
    let cache = SubscriptionCache::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second"] {
        let order = Arc::clone(&order);
        cache.subscribe_modal_state(Arc::new(move |state: &ModalState| {
            order.lock().push(format!("{tag}:{}", state.open));
        }));
    }
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        cache.subscribe_modal_events(Arc::new(move |event: &ModalEvent| {
            events.lock().push(event.event.clone());
        }));
    }

    cache.attach(modal.clone());
    assert_eq!(cache.active_count(), 3);
    assert_eq!(cache.pending_count(), 0);

    modal.open().await.expect("open");
    modal.emit_event(ModalEvent {
        timestamp: 1,
        event: "SELECT_WALLET".into(),
        properties: serde_json::Value::Null,
    });

    assert_eq!(*order.lock(), vec!["first:true", "second:true"]);
    assert_eq!(*events.lock(), vec!["SELECT_WALLET"]);
}

#[tokio::test]
async fn handle_unsubscribes_after_attach_and_is_idempotent() {
    let factory = HeadlessModalFactory::new();
    let modal = factory.modal();
    let cache = SubscriptionCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = cache.subscribe_modal_state(counting_state_callback(&calls));
    cache.attach(modal.clone());
    modal.open().await.expect("open");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    handle.unsubscribe();
    handle.unsubscribe();
    modal.simulate_user_close();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.active_count(), 0);
    assert_eq!(modal.subscriber_count(), 0);
}

#[tokio::test]
async fn subscribing_after_attach_goes_straight_to_the_controller() {
    let factory = HeadlessModalFactory::new();
    let modal = factory.modal();
    let cache = SubscriptionCache::new();
    cache.attach(modal.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = cache.subscribe_modal_state(counting_state_callback(&calls));
    assert_eq!(cache.active_count(), 1);
    assert_eq!(modal.subscriber_count(), 1);

    modal.open().await.expect("open");
    handle.unsubscribe();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(modal.subscriber_count(), 0);
}

#[tokio::test]
async fn release_all_clears_pending_and_active_records() {
    let factory = HeadlessModalFactory::new();
    let modal = factory.modal();
    let cache = SubscriptionCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let early = cache.subscribe_modal_state(counting_state_callback(&calls));
    cache.attach(modal.clone());
    cache.subscribe_modal_state(counting_state_callback(&calls));

    assert_eq!(cache.release_all(), 2);
    assert_eq!(modal.subscriber_count(), 0);
    early.unsubscribe();

    modal.open().await.expect("open");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handle_outliving_the_cache_is_inert() {
    let cache = SubscriptionCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = cache.subscribe_modal_state(counting_state_callback(&calls));
    drop(cache);
    handle.unsubscribe();
}
