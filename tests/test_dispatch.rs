mod common;

use comet_mq::prelude::*;
use common::{connect, drained, name, new_broker};

fn operation(code: u16, target: &str) -> Message {
    let mut request = Message::operation(code, target);
    request.id = Some(MessageId::new_snowflake());
    request
}

#[tokio::test]
async fn ping_pong() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let mut ping = Message::new(MessageKind::Ping, "", comet_mq::bytes::Bytes::new());
    ping.id = Some(MessageId::new_snowflake());
    let pong = broker.dispatch(&client, ping.clone()).await.unwrap();
    assert_eq!(pong.kind, MessageKind::Pong);
    assert_eq!(pong.id, ping.id);
}

#[tokio::test]
async fn queue_subscribe_auto_creates() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let response = broker
        .dispatch(&client, operation(operations::QUEUE_SUBSCRIBE, "orders"))
        .await
        .unwrap();
    assert_eq!(response.content_type, results::OK);
    let queue = broker.get_queue(&name("orders")).unwrap();
    assert_eq!(queue.consumer_count(), 1);
}

#[tokio::test]
async fn queue_create_is_duplicate_safe() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let create = operation(operations::QUEUE_CREATE, "orders")
        .with_header(headers::QUEUE_TYPE, "round-robin")
        .with_header(headers::ACKNOWLEDGE, "just");
    let response = broker.dispatch(&client, create.clone()).await.unwrap();
    assert_eq!(response.content_type, results::OK);

    let queue = broker.get_queue(&name("orders")).unwrap();
    assert_eq!(queue.options().queue_type, QueueType::RoundRobin);
    assert_eq!(queue.options().acknowledge, AckDecision::Just);
    assert_eq!(queue.status(), QueueStatus::Running);

    let duplicate = broker.dispatch(&client, create).await.unwrap();
    assert_eq!(duplicate.content_type, results::DUPLICATE);
}

struct DenyEverything;

impl Authorization for DenyEverything {
    async fn allow(&self, _client: &Client, _request: &Message) -> bool {
        false
    }
}

#[tokio::test]
async fn admin_operations_respect_authorization_hooks() {
    let mut config = BrokerConfig::default();
    config
        .admin_authorization
        .push(AuthorizationService::new(DenyEverything));
    common::init_tracing();
    let broker = Broker::new(config);
    let (client, _rx) = connect(&broker, "client-1");

    let response = broker
        .dispatch(&client, operation(operations::QUEUE_CREATE, "orders"))
        .await
        .unwrap();
    assert_eq!(response.content_type, results::UNAUTHORIZED);
    assert!(broker.get_queue(&name("orders")).is_none());

    // non-admin traffic is still allowed
    let response = broker
        .dispatch(&client, operation(operations::QUEUE_SUBSCRIBE, "orders"))
        .await
        .unwrap();
    assert_eq!(response.content_type, results::OK);
}

#[tokio::test]
async fn unsubscribe_star_leaves_every_queue() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    for queue_name in ["a", "b", "c"] {
        broker
            .dispatch(&client, operation(operations::QUEUE_SUBSCRIBE, queue_name))
            .await;
    }
    assert_eq!(broker.get_queue(&name("b")).unwrap().consumer_count(), 1);

    let response = broker
        .dispatch(&client, operation(operations::QUEUE_UNSUBSCRIBE, "*"))
        .await
        .unwrap();
    assert_eq!(response.content_type, results::OK);
    for queue_name in ["a", "b", "c"] {
        assert_eq!(
            broker.get_queue(&name(queue_name)).unwrap().consumer_count(),
            0
        );
    }
}

#[tokio::test]
async fn clear_messages_honours_class_headers() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let queue = broker
        .create_queue(name("mixed"), QueueOptions::default())
        .unwrap();
    queue.initialize(None).await.unwrap();
    queue
        .push(Message::queue("mixed", "regular"), None)
        .await;
    queue
        .push(
            Message::queue("mixed", "priority").with_high_priority(),
            None,
        )
        .await;
    assert_eq!(queue.store().count_all(), 2);

    let clear = operation(operations::QUEUE_CLEAR, "mixed")
        .with_header(headers::CLEAR_PRIORITY, "yes");
    let response = broker.dispatch(&client, clear).await.unwrap();
    assert_eq!(response.content_type, results::OK);
    assert_eq!(response.headers.get(headers::COUNT), Some("1"));
    assert_eq!(queue.store().count_priority(), 0);
    assert_eq!(queue.store().count_regular(), 1);
}

#[tokio::test]
async fn queue_list_applies_the_filter_glob() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    for queue_name in ["push-a", "push-b", "pull-x"] {
        broker
            .create_queue(name(queue_name), QueueOptions::default())
            .unwrap();
    }
    let list = operation(operations::QUEUE_LIST, "").with_header(headers::FILTER, "push-*");
    let response = broker.dispatch(&client, list).await.unwrap();
    assert_eq!(response.content_type, results::OK);
    let infos: Vec<QueueInfo> = serde_json::from_slice(&response.payload).unwrap();
    let mut names: Vec<String> = infos.into_iter().map(|info| info.name).collect();
    names.sort();
    assert_eq!(names, vec!["push-a", "push-b"]);
}

#[tokio::test]
async fn direct_messages_are_forwarded_verbatim() {
    let broker = new_broker();
    let (sender, _sender_rx) = connect(&broker, "alice");
    let (_receiver, receiver_rx) = connect(&broker, "bob");

    let mut frame = Message::direct("bob", "hi bob").with_header("X-From", "alice");
    frame.id = Some(MessageId::new_snowflake());
    let response = broker.dispatch(&sender, frame.clone()).await;
    assert!(response.is_none());

    let delivered = drained(&receiver_rx);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload, frame.payload);
    assert_eq!(delivered[0].headers.get("X-From"), Some("alice"));
}

#[tokio::test]
async fn direct_message_to_unknown_target_is_not_found() {
    let broker = new_broker();
    let (sender, _rx) = connect(&broker, "alice");
    let mut frame = Message::direct("ghost", "anyone?");
    frame.wait_response = true;
    frame.id = Some(MessageId::new_snowflake());
    let response = broker.dispatch(&sender, frame).await.unwrap();
    assert_eq!(response.content_type, results::NOT_FOUND);
}

#[tokio::test]
async fn router_crud_and_publish_through_dispatcher() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let (_worker, worker_rx) = connect(&broker, "worker-1");

    let create = operation(operations::ROUTER_CREATE, "jobs")
        .with_header(headers::ROUTE_METHOD, "distribute");
    assert_eq!(
        broker.dispatch(&client, create).await.unwrap().content_type,
        results::OK
    );

    let mut add = operation(operations::BINDING_ADD, "jobs");
    add.payload = serde_json::to_vec(&BindingDefinition {
        name: "workers".to_string(),
        kind: "direct".to_string(),
        target: "worker-1".to_string(),
        priority: 1,
        interaction: BindingInteraction::None,
        method: None,
        content_type: None,
    })
    .unwrap()
    .into();
    assert_eq!(
        broker.dispatch(&client, add).await.unwrap().content_type,
        results::OK
    );

    let publish = Message::router("jobs", "work unit");
    let response = broker.dispatch(&client, publish).await;
    assert!(response.is_none());
    assert_eq!(drained(&worker_rx).len(), 1);

    let list = operation(operations::BINDING_LIST, "jobs");
    let response = broker.dispatch(&client, list).await.unwrap();
    let bindings: Vec<BindingDefinition> = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].name, "workers");

    let remove = operation(operations::BINDING_REMOVE, "jobs")
        .with_header(headers::BINDING_NAME, "workers");
    assert_eq!(
        broker.dispatch(&client, remove).await.unwrap().content_type,
        results::OK
    );
    let mut publish = Message::router("jobs", "lost");
    publish.wait_response = true;
    let response = broker.dispatch(&client, publish).await.unwrap();
    assert_eq!(response.content_type, results::NO_BINDINGS);
}

#[tokio::test]
async fn unknown_operation_is_rejected() {
    let broker = new_broker();
    let (client, _rx) = connect(&broker, "client-1");
    let response = broker
        .dispatch(&client, operation(0x7fff, "anything"))
        .await
        .unwrap();
    assert_eq!(response.content_type, results::BAD_REQUEST);
}

#[tokio::test]
async fn channel_publish_through_dispatcher_auto_creates() {
    let broker = new_broker();
    let (publisher, _publisher_rx) = connect(&broker, "publisher-1");
    let (subscriber, subscriber_rx) = connect(&broker, "subscriber-1");

    assert_eq!(
        broker
            .dispatch(
                &subscriber,
                operation(operations::CHANNEL_SUBSCRIBE, "alerts")
            )
            .await
            .unwrap()
            .content_type,
        results::OK
    );

    let mut publish = Message::channel("alerts", "fire!");
    publish.wait_response = true;
    let response = broker.dispatch(&publisher, publish).await.unwrap();
    assert_eq!(response.content_type, results::OK);
    assert_eq!(drained(&subscriber_rx).len(), 1);
}
