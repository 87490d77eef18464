use std::time::Duration;

use flockview_core_types::{FaultKind, FaultSignal};
use flockview_event_bus::{to_mpsc, EventBus, InMemoryBus};

#[tokio::test]
async fn publish_without_subscribers_is_not_an_error() {
    let bus = InMemoryBus::<FaultSignal>::new(8);
    let delivered = bus
        .publish(FaultSignal::new(FaultKind::Transport, None, "offline"))
        .await
        .unwrap();
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn mpsc_bridge_forwards_signals() {
    let bus = InMemoryBus::<FaultSignal>::new(8);
    let mut rx = to_mpsc(bus.clone(), 4);
    assert_eq!(bus.subscriber_count(), 1);

    bus.emit(FaultSignal::new(FaultKind::Decode, None, "bad doc"));
    let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("signal forwarded")
        .expect("channel open");
    assert_eq!(signal.kind, FaultKind::Decode);
}
