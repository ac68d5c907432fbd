mod common;

use comet_mq::prelude::*;
use common::{connect, drained, name, new_broker};

#[tokio::test]
async fn every_subscriber_receives_every_publish() {
    let broker = new_broker();
    let channel = broker
        .create_channel(name("ticker"), ChannelOptions::default())
        .unwrap();
    let (s1, rx1) = connect(&broker, "subscriber-1");
    let (s2, rx2) = connect(&broker, "subscriber-2");
    channel.subscribe(&s1).await.unwrap();
    channel.subscribe(&s2).await.unwrap();

    for no in 0..3 {
        let result = channel.push(Message::channel("ticker", format!("tick {no}"))).await;
        assert_eq!(result, PushResult::Success);
    }

    assert_eq!(drained(&rx1).len(), 3);
    assert_eq!(drained(&rx2).len(), 3);
}

#[tokio::test]
async fn paused_channel_refuses_publishes() {
    let broker = new_broker();
    let channel = broker
        .create_channel(name("gate"), ChannelOptions::default())
        .unwrap();
    channel.set_status(ChannelStatus::Paused);
    let result = channel.push(Message::channel("gate", "x")).await;
    assert_eq!(result, PushResult::StatusNotSupported);
}

#[tokio::test]
async fn size_limit_is_enforced() {
    let broker = new_broker();
    let channel = broker
        .create_channel(
            name("small"),
            ChannelOptions {
                message_size_limit: 4,
                ..ChannelOptions::default()
            },
        )
        .unwrap();
    assert_eq!(
        channel.push(Message::channel("small", "ok")).await,
        PushResult::Success
    );
    assert_eq!(
        channel.push(Message::channel("small", "way too long")).await,
        PushResult::LimitExceeded
    );
}

#[tokio::test]
async fn client_limit_is_enforced() {
    let broker = new_broker();
    let channel = broker
        .create_channel(
            name("exclusive"),
            ChannelOptions {
                client_limit: 1,
                ..ChannelOptions::default()
            },
        )
        .unwrap();
    let (s1, _rx1) = connect(&broker, "subscriber-1");
    let (s2, _rx2) = connect(&broker, "subscriber-2");
    channel.subscribe(&s1).await.unwrap();
    let denied = channel.subscribe(&s2).await;
    assert!(denied.is_err());
    assert_eq!(channel.subscriber_count(), 1);
}

#[tokio::test]
async fn operational_headers_are_stripped_before_fanout() {
    let broker = new_broker();
    let channel = broker
        .create_channel(name("clean"), ChannelOptions::default())
        .unwrap();
    let (s1, rx1) = connect(&broker, "subscriber-1");
    channel.subscribe(&s1).await.unwrap();

    let message = Message::channel("clean", "data")
        .with_header(headers::ACK_TIMEOUT, "30")
        .with_header("X-Trace", "keep-me");
    channel.push(message).await;

    let delivered = drained(&rx1);
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].headers.get(headers::ACK_TIMEOUT).is_none());
    assert_eq!(delivered[0].headers.get("X-Trace"), Some("keep-me"));
}

#[tokio::test]
async fn idle_channel_auto_destroys_on_last_unsubscribe() {
    let broker = new_broker();
    let channel = broker
        .create_channel(
            name("fleeting"),
            ChannelOptions {
                auto_destroy_idle: true,
                ..ChannelOptions::default()
            },
        )
        .unwrap();
    let (s1, _rx1) = connect(&broker, "subscriber-1");
    channel.subscribe(&s1).await.unwrap();
    assert!(broker.get_channel(&name("fleeting")).is_some());

    channel.remove_client(&s1).await;
    assert!(broker.get_channel(&name("fleeting")).is_none());
}

#[tokio::test]
async fn disconnect_leaves_no_dangling_subscription() {
    let broker = new_broker();
    let channel = broker
        .create_channel(name("tidy"), ChannelOptions::default())
        .unwrap();
    let (s1, _rx1) = connect(&broker, "subscriber-1");
    channel.subscribe(&s1).await.unwrap();
    assert_eq!(channel.subscriber_count(), 1);

    broker.disconnect_client(&s1).await;
    assert_eq!(channel.subscriber_count(), 0);
}
