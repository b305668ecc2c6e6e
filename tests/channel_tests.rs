use std::time::Duration;

use tick_recorder::pipeline::{bounded, ChannelError};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn producer_waits_when_full_until_consumer_pops() {
    const CAP: usize = 16;
    let (tx, mut rx) = bounded::<usize>(CAP);
    let cancel = CancellationToken::new();

    for i in 0..CAP {
        tx.push(i, &cancel).await.unwrap();
    }
    assert_eq!(tx.len(), CAP);

    // The (C+1)th push cannot complete without a pop.
    let blocked = tokio::time::timeout(Duration::from_secs(5), tx.push(CAP, &cancel)).await;
    assert!(blocked.is_err());
    assert_eq!(rx.len(), CAP);

    let producer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            for i in CAP..CAP * 3 {
                tx.push(i, &cancel).await.unwrap();
            }
        }
    });

    let mut seen = Vec::new();
    for _ in 0..CAP * 3 {
        seen.push(rx.pop(&cancel).await.unwrap());
        assert!(rx.len() <= CAP);
    }
    producer.await.unwrap();
    assert_eq!(seen, (0..CAP * 3).collect::<Vec<_>>());
}

#[tokio::test]
async fn cancellation_unblocks_a_waiting_consumer() {
    let (_tx, mut rx) = bounded::<u8>(1);
    let cancel = CancellationToken::new();
    let waiter = tokio::spawn({
        let cancel = cancel.clone();
        async move { rx.pop(&cancel).await }
    });
    tokio::task::yield_now().await;
    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), Err(ChannelError::Cancelled));
}
