mod common;

use std::sync::Arc;

use comet_mq::prelude::*;
use common::{connect, drained, name, new_broker};

fn definition(kind: &str, binding_name: &str, target: &str, priority: i32) -> BindingDefinition {
    BindingDefinition {
        name: binding_name.to_string(),
        kind: kind.to_string(),
        target: target.to_string(),
        priority,
        interaction: BindingInteraction::None,
        method: None,
        content_type: None,
    }
}

fn queue_binding(binding_name: &str, target: &str, priority: i32) -> Arc<dyn Binding> {
    Arc::new(QueueBinding::new(definition("queue", binding_name, target, priority)).unwrap())
}

fn direct_binding(binding_name: &str, target: &str, priority: i32) -> Arc<dyn Binding> {
    Arc::new(DirectBinding::new(definition("direct", binding_name, target, priority)).unwrap())
}

fn mixed_router(broker: &Broker, method: RouteMethod) -> Router {
    broker
        .create_queue(name("push-a"), QueueOptions::default())
        .unwrap();
    broker
        .create_queue(name("push-a-cc"), QueueOptions::default())
        .unwrap();
    let router = broker.create_router(name("router-1"), method).unwrap();
    assert!(router.add_binding(queue_binding("q1", "push-a", 5)));
    assert!(router.add_binding(queue_binding("q2", "push-a-cc", 10)));
    assert!(router.add_binding(direct_binding("d1", "client-1", 20)));
    assert!(router.add_binding(direct_binding("d2", "client-2", 0)));
    router
}

#[tokio::test]
async fn distribute_reaches_every_binding_once_per_publish() {
    let broker = new_broker();
    let router = mixed_router(&broker, RouteMethod::Distribute);
    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let (_client1, rx1) = connect(&broker, "client-1");
    let (_client2, rx2) = connect(&broker, "client-2");

    for _ in 0..4 {
        let result = router
            .publish(Some(&producer), Message::router("router-1", "Hello, World!"))
            .await;
        assert_eq!(result, RouterPublishResult::OkNoRespond);
    }

    let push_a = broker.get_queue(&name("push-a")).unwrap();
    let push_a_cc = broker.get_queue(&name("push-a-cc")).unwrap();
    assert_eq!(push_a.store().count_all(), 4);
    assert_eq!(push_a_cc.store().count_all(), 4);
    assert_eq!(drained(&rx1).len(), 4);
    assert_eq!(drained(&rx2).len(), 4);
}

#[tokio::test]
async fn round_robin_walks_bindings_in_priority_order() {
    let broker = new_broker();
    let router = mixed_router(&broker, RouteMethod::RoundRobin);
    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let (_client1, rx1) = connect(&broker, "client-1");
    let (_client2, rx2) = connect(&broker, "client-2");

    for _ in 0..5 {
        router
            .publish(Some(&producer), Message::router("router-1", "Hello, World!"))
            .await;
    }

    // ordered by priority: d1(20), q2(10), q1(5), d2(0), then d1 again
    let push_a = broker.get_queue(&name("push-a")).unwrap();
    let push_a_cc = broker.get_queue(&name("push-a-cc")).unwrap();
    assert_eq!(push_a.store().count_all(), 1);
    assert_eq!(push_a_cc.store().count_all(), 1);
    assert_eq!(drained(&rx1).len(), 2);
    assert_eq!(drained(&rx2).len(), 1);
}

#[tokio::test]
async fn only_first_skips_failing_bindings() {
    let broker = new_broker();
    broker
        .create_queue(name("push-a-cc"), QueueOptions::default())
        .unwrap();
    let router = broker
        .create_router(name("router-2"), RouteMethod::OnlyFirst)
        .unwrap();
    // client-offline never connects, so d1 can never deliver
    assert!(router.add_binding(direct_binding("d1", "client-offline", 2)));
    assert!(router.add_binding(queue_binding("q2", "push-a-cc", 10)));

    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let (_other, other_rx) = connect(&broker, "client-2");

    for _ in 0..4 {
        let result = router
            .publish(Some(&producer), Message::router("router-2", "Hello, World!"))
            .await;
        assert_eq!(result, RouterPublishResult::OkNoRespond);
    }

    let push_a_cc = broker.get_queue(&name("push-a-cc")).unwrap();
    assert_eq!(push_a_cc.store().count_all(), 4);
    assert!(drained(&other_rx).is_empty());
}

#[tokio::test]
async fn only_first_falls_through_to_lower_priority() {
    let broker = new_broker();
    broker
        .create_queue(name("fallback"), QueueOptions::default())
        .unwrap();
    let router = broker
        .create_router(name("router-3"), RouteMethod::OnlyFirst)
        .unwrap();
    // highest priority targets an offline client; the queue must win
    assert!(router.add_binding(direct_binding("dead", "client-offline", 50)));
    assert!(router.add_binding(queue_binding("alive", "fallback", 1)));

    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let result = router
        .publish(Some(&producer), Message::router("router-3", "payload"))
        .await;
    assert_eq!(result, RouterPublishResult::OkNoRespond);
    let fallback = broker.get_queue(&name("fallback")).unwrap();
    assert_eq!(fallback.store().count_all(), 1);
}

#[tokio::test]
async fn disabled_router_and_empty_router_results() {
    let broker = new_broker();
    let router = broker
        .create_router(name("router-4"), RouteMethod::Distribute)
        .unwrap();
    let (producer, _producer_rx) = connect(&broker, "producer-1");

    let result = router
        .publish(Some(&producer), Message::router("router-4", "x"))
        .await;
    assert_eq!(result, RouterPublishResult::NoBindings);

    router.set_enabled(false);
    let result = router
        .publish(Some(&producer), Message::router("router-4", "x"))
        .await;
    assert_eq!(result, RouterPublishResult::Disabled);
}

#[tokio::test]
async fn binding_names_are_unique_and_ties_keep_insertion_order() {
    let broker = new_broker();
    let router = broker
        .create_router(name("router-5"), RouteMethod::Distribute)
        .unwrap();
    assert!(router.add_binding(direct_binding("a", "client-1", 5)));
    assert!(!router.add_binding(direct_binding("a", "client-2", 9)));
    assert!(router.add_binding(direct_binding("b", "client-2", 5)));
    assert!(router.add_binding(direct_binding("c", "client-3", 7)));

    let order: Vec<String> = router
        .binding_snapshot()
        .iter()
        .map(|b| b.name().to_string())
        .collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn direct_binding_selectors_match_many() {
    let broker = new_broker();
    let router = broker
        .create_router(name("router-6"), RouteMethod::Distribute)
        .unwrap();
    assert!(router.add_binding(direct_binding("workers", "@type:worker", 1)));

    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let (w1, rx1) = connect(&broker, "worker-1");
    let (w2, rx2) = connect(&broker, "worker-2");
    let (other, other_rx) = connect(&broker, "other-1");
    w1.set_client_type("worker");
    w2.set_client_type("worker");
    other.set_client_type("monitor");

    let result = router
        .publish(Some(&producer), Message::router("router-6", "job"))
        .await;
    assert_eq!(result, RouterPublishResult::OkNoRespond);

    assert_eq!(drained(&rx1).len(), 1);
    assert_eq!(drained(&rx2).len(), 1);
    assert!(drained(&other_rx).is_empty());
}

#[tokio::test]
async fn response_interaction_marks_wait_response() {
    let broker = new_broker();
    let router = broker
        .create_router(name("router-7"), RouteMethod::Distribute)
        .unwrap();
    let mut def = definition("direct", "rpc", "client-1", 1);
    def.interaction = BindingInteraction::Response;
    assert!(router.add_binding(Arc::new(DirectBinding::new(def).unwrap())));

    let (producer, _producer_rx) = connect(&broker, "producer-1");
    let (_client1, rx1) = connect(&broker, "client-1");

    let result = router
        .publish(Some(&producer), Message::router("router-7", "ask"))
        .await;
    assert_eq!(result, RouterPublishResult::OkAndWillRespond);
    let delivered = drained(&rx1);
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].wait_response);
    assert_eq!(delivered[0].kind, MessageKind::DirectMessage);
}
