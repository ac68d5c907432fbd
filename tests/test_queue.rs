mod common;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use comet_mq::prelude::*;
use common::{connect, drained, name, new_broker};

fn round_robin_options(configure: impl FnOnce(&mut QueueOptions)) -> QueueOptions {
    let mut options = QueueOptions {
        queue_type: QueueType::RoundRobin,
        ..QueueOptions::default()
    };
    configure(&mut options);
    options
}

#[tokio::test(start_paused = true)]
async fn delay_between_messages_paces_delivery() {
    let broker = new_broker();
    let queue = broker
        .create_queue(
            name("paced"),
            round_robin_options(|options| {
                options.delay_between_messages = Duration::from_millis(100);
                options.acknowledge = AckDecision::None;
            }),
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();

    let (producer, _producer_rx) = connect(&broker, "producer-1");
    for no in 0..30 {
        let frame = Message::queue("paced", format!("message {no}"));
        broker.dispatch(&producer, frame).await;
    }
    tokio::time::sleep(Duration::from_millis(501)).await;

    let received = drained(&rx).len();
    assert!(
        (5..=6).contains(&received),
        "expected 5..=6 deliveries in 500ms, got {received}"
    );
}

/// Returns put-back-priority on the first ack, delete afterwards.
struct PutBackOnFirstAck {
    first: AtomicBool,
}

impl DeliveryHandler for PutBackOnFirstAck {
    async fn received_from_producer(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _sender: Option<&Client>,
    ) -> Decision {
        Decision::keep()
    }
    async fn begin_send(&self, _queue: &Queue, _message: &QueueMessage) -> Decision {
        Decision::keep()
    }
    async fn can_consumer_receive(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _receiver: &QueueClient,
    ) -> bool {
        true
    }
    async fn consumer_receive_failed(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _receiver: &QueueClient,
    ) -> Decision {
        Decision::keep()
    }
    async fn end_send(&self, _queue: &Queue, _message: &QueueMessage) -> Decision {
        Decision::keep()
    }
    async fn acknowledge_received(
        &self,
        _queue: &Queue,
        _ack: &Message,
        _delivery: &MessageDelivery,
        _success: bool,
    ) -> Decision {
        if self.first.swap(false, Ordering::AcqRel) {
            Decision::put_back(PutBack::Priority)
        } else {
            Decision::remove()
        }
    }
    async fn message_timed_out(&self, _queue: &Queue, _message: &QueueMessage) -> Decision {
        Decision::keep()
    }
    async fn message_dequeued(&self, _queue: &Queue, _message: &QueueMessage) {}
    async fn save_message(&self, _queue: &Queue, _message: &QueueMessage) -> bool {
        false
    }
    async fn exception_thrown(
        &self,
        _queue: &Queue,
        _message: Option<&QueueMessage>,
        _error: &comet_mq::Error,
    ) -> Decision {
        Decision::keep()
    }
}

#[tokio::test(start_paused = true)]
async fn put_back_priority_is_delivered_next() {
    let broker = new_broker();
    broker.config().delivery_handlers.register("PutBackOnce", |_ctx| {
        DeliveryHandlerService::new(PutBackOnFirstAck {
            first: AtomicBool::new(true),
        })
    });
    let queue = broker
        .create_queue(
            name("requeue"),
            round_robin_options(|options| {
                options.acknowledge = AckDecision::Wait;
                options.delivery_handler = "PutBackOnce".to_string();
            }),
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    broker
        .dispatch(&producer, Message::queue("requeue", "M1"))
        .await;
    broker
        .dispatch(&producer, Message::queue("requeue", "M2"))
        .await;

    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Ok(frame) = rx.try_recv() {
                break frame;
            }
        };
        received.push(String::from_utf8(frame.payload.to_vec()).unwrap());
        broker
            .dispatch(&consumer, Message::acknowledge(&frame))
            .await;
    }

    // M1 re-entered as priority, so it overtakes M2
    assert_eq!(received, vec!["M1", "M1", "M2"]);
}

#[tokio::test(start_paused = true)]
async fn delivery_timeout_fires_once_and_frees_tracker() {
    let broker = new_broker();
    let timeouts = Arc::new(AtomicUsize::new(0));
    let counter = timeouts.clone();
    broker.events().attach(move |event: &BrokerEvent| {
        if event.event_type == EventType::MessageTimeout {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let queue = broker
        .create_queue(
            name("timeouts"),
            round_robin_options(|options| {
                options.acknowledge = AckDecision::Just;
                options.ack_timeout = Duration::from_millis(200);
            }),
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    broker
        .dispatch(&producer, Message::queue("timeouts", "never acked"))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(drained(&rx).len(), 1, "message must reach the consumer");
    assert_eq!(queue.tracker().pending_count(), 1);

    // consumer never acks; 200ms later the delivery times out
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(queue.tracker().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_acknowledge_serialises_deliveries() {
    let broker = new_broker();
    let queue = broker
        .create_queue(
            name("serial"),
            round_robin_options(|options| {
                options.acknowledge = AckDecision::Wait;
            }),
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    for no in 0..3 {
        broker
            .dispatch(&producer, Message::queue("serial", format!("m{no}")))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // only one outstanding delivery while the first ack is pending
    let first = drained(&rx);
    assert_eq!(first.len(), 1);
    assert_eq!(queue.tracker().pending_count(), 1);

    broker
        .dispatch(&consumer, Message::acknowledge(&first[0]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = drained(&rx);
    assert_eq!(second.len(), 1);

    broker
        .dispatch(&consumer, Message::acknowledge(&second[0]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(drained(&rx).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn round_robin_rotates_over_consumers() {
    let broker = new_broker();
    let queue = broker
        .create_queue(name("rotation"), round_robin_options(|_| {}))
        .unwrap();
    let (c1, rx1) = connect(&broker, "consumer-1");
    let (c2, rx2) = connect(&broker, "consumer-2");
    let (c3, rx3) = connect(&broker, "consumer-3");
    queue.subscribe(&c1).await.unwrap();
    queue.subscribe(&c2).await.unwrap();
    queue.subscribe(&c3).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    for no in 0..6 {
        broker
            .dispatch(&producer, Message::queue("rotation", format!("m{no}")))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (a, b, c) = (drained(&rx1), drained(&rx2), drained(&rx3));
    assert_eq!((a.len(), b.len(), c.len()), (2, 2, 2));
    // strict rotation starting at the first registered consumer
    assert_eq!(
        String::from_utf8(a[0].payload.to_vec()).unwrap(),
        "m0"
    );
    assert_eq!(
        String::from_utf8(b[0].payload.to_vec()).unwrap(),
        "m1"
    );
    assert_eq!(
        String::from_utf8(c[0].payload.to_vec()).unwrap(),
        "m2"
    );

    // a disconnect shrinks the ring; the survivors keep rotating
    broker.disconnect_client(&c2).await;
    for no in 6..10 {
        broker
            .dispatch(&producer, Message::queue("rotation", format!("m{no}")))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(drained(&rx1).len() + drained(&rx3).len(), 4);
    assert!(drained(&rx2).is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_destroy_empty_waits_for_both_conditions() {
    let broker = new_broker();
    let queue = broker
        .create_queue(
            name("ephemeral"),
            round_robin_options(|options| {
                options.auto_destroy = AutoDestroy::Empty;
            }),
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    broker
        .dispatch(&producer, Message::queue("ephemeral", "work"))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let frames = drained(&rx);
    broker
        .dispatch(&consumer, Message::acknowledge(&frames[0]))
        .await;

    // store empty, no pending deliveries, but a consumer remains
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(broker.get_queue(&name("ephemeral")).is_some());

    broker.disconnect_client(&consumer).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(broker.get_queue(&name("ephemeral")).is_none());
}

#[tokio::test(start_paused = true)]
async fn pull_streams_batch_and_terminator() {
    let broker = new_broker();
    let queue = broker
        .create_queue(
            name("backlog"),
            QueueOptions {
                queue_type: QueueType::Pull,
                ..QueueOptions::default()
            },
        )
        .unwrap();
    let (consumer, rx) = connect(&broker, "consumer-1");
    queue.subscribe(&consumer).await.unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    for no in 0..3 {
        broker
            .dispatch(&producer, Message::queue("backlog", format!("m{no}")))
            .await;
    }
    assert_eq!(queue.store().count_all(), 3);

    let mut request = Message::new(MessageKind::Pull, "backlog", comet_mq::bytes::Bytes::new());
    request.id = Some(MessageId::new_snowflake());
    request.headers.insert(headers::COUNT, "2");
    broker.dispatch(&consumer, request).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let frames = drained(&rx);
    assert_eq!(frames.len(), 3, "two messages plus the end-of-batch frame");
    assert_eq!(
        String::from_utf8(frames[0].payload.to_vec()).unwrap(),
        "m0"
    );
    assert_eq!(
        String::from_utf8(frames[1].payload.to_vec()).unwrap(),
        "m1"
    );
    let terminator = &frames[2];
    assert_eq!(terminator.headers.get(headers::LAST_MESSAGE), Some("true"));
    assert_eq!(terminator.headers.get(headers::COUNT), Some("2"));
    assert_eq!(queue.store().count_all(), 1);
}

#[tokio::test(start_paused = true)]
async fn paused_queue_rejects_producers() {
    let broker = new_broker();
    let queue = broker
        .create_queue(name("gated"), round_robin_options(|_| {}))
        .unwrap();
    queue.initialize(None).await.unwrap();
    assert!(queue.set_status(QueueStatus::Paused).await);

    let result = queue.push(Message::queue("gated", "nope"), None).await;
    assert_eq!(result, PushResult::StatusNotSupported);

    assert!(queue.set_status(QueueStatus::Running).await);
    let result = queue.push(Message::queue("gated", "yes"), None).await;
    assert_eq!(result, PushResult::Success);
    assert_eq!(queue.store().count_all(), 1);
}

#[tokio::test(start_paused = true)]
async fn message_limit_policies() {
    let broker = new_broker();
    let queue = broker
        .create_queue(
            name("bounded"),
            QueueOptions {
                message_limit: 2,
                ..QueueOptions::default()
            },
        )
        .unwrap();
    queue.initialize(None).await.unwrap();

    assert_eq!(
        queue.push(Message::queue("bounded", "a"), None).await,
        PushResult::Success
    );
    assert_eq!(
        queue.push(Message::queue("bounded", "b"), None).await,
        PushResult::Success
    );
    assert_eq!(
        queue.push(Message::queue("bounded", "c"), None).await,
        PushResult::LimitExceeded
    );

    let drop_old = broker
        .create_queue(
            name("rolling"),
            QueueOptions {
                message_limit: 2,
                limit_policy: MessageLimitPolicy::DropOld,
                ..QueueOptions::default()
            },
        )
        .unwrap();
    drop_old.initialize(None).await.unwrap();
    for payload in ["a", "b", "c"] {
        assert_eq!(
            drop_old.push(Message::queue("rolling", payload), None).await,
            PushResult::Success
        );
    }
    assert_eq!(drop_old.store().count_all(), 2);
    let head = drop_old.store().get_next(true, false).unwrap();
    assert_eq!(head.read_message(|m| m.payload.to_vec()), b"b".to_vec());
}
