#![allow(dead_code)]

use std::str::FromStr;

use comet_mq::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                tracing_subscriber::filter::EnvFilter::from_default_env().add_directive(
                    tracing_subscriber::filter::Directive::from_str("comet_mq=debug").unwrap(),
                ),
            ),
        )
        .try_init();
}

pub fn new_broker() -> Broker {
    init_tracing();
    Broker::new(BrokerConfig::default())
}

/// A peer over an in-process channel link; the receiver side is what the
/// test polls for delivered frames.
pub fn connect(broker: &Broker, id: &str) -> (Client, flume::Receiver<Message>) {
    let (connection, rx) = Connection::channel();
    let client = broker.connect_client(Some(ClientId::new(id)), connection);
    (client, rx)
}

pub fn drained(rx: &flume::Receiver<Message>) -> Vec<Message> {
    rx.try_iter().collect()
}

pub fn name(value: &str) -> EntityName {
    EntityName::new(value).unwrap()
}
