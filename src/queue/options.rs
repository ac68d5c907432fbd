use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{headers, HeaderMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    #[default]
    Push,
    RoundRobin,
    Pull,
}

impl QueueType {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "push" => Some(QueueType::Push),
            "roundrobin" | "round-robin" => Some(QueueType::RoundRobin),
            "pull" => Some(QueueType::Pull),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckDecision {
    /// Fire and forget.
    #[default]
    None,
    /// Producer is acked as soon as the queue owns the message.
    Just,
    /// Producer is acked when the consumer acks; deliveries serialise on
    /// the previous ack.
    Wait,
}

impl AckDecision {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(AckDecision::None),
            "just" => Some(AckDecision::Just),
            "wait" => Some(AckDecision::Wait),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoDestroy {
    #[default]
    Disabled,
    NoConsumers,
    NoMessages,
    Empty,
}

impl AutoDestroy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" => Some(AutoDestroy::Disabled),
            "no-consumers" => Some(AutoDestroy::NoConsumers),
            "no-messages" => Some(AutoDestroy::NoMessages),
            "empty" => Some(AutoDestroy::Empty),
            _ => None,
        }
    }
}

/// What happens to a full queue on the next push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLimitPolicy {
    #[default]
    RejectNew,
    DropOld,
}

impl MessageLimitPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reject-new" => Some(MessageLimitPolicy::RejectNew),
            "drop-old" => Some(MessageLimitPolicy::DropOld),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    pub queue_type: QueueType,
    pub topic: Option<String>,
    pub acknowledge: AckDecision,
    pub ack_timeout: Duration,
    /// Time-to-live stamped on every accepted message; `None` keeps them
    /// forever.
    pub message_timeout: Option<Duration>,
    /// Zero means unlimited.
    pub message_limit: usize,
    pub limit_policy: MessageLimitPolicy,
    /// Payload byte cap per message; zero means unlimited.
    pub message_size_limit: usize,
    /// Subscriber cap; zero means unlimited.
    pub client_limit: usize,
    pub delay_between_messages: Duration,
    pub put_back_delay: Duration,
    pub auto_destroy: AutoDestroy,
    /// Factory name resolved against the handler registry on first init.
    pub delivery_handler: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            queue_type: QueueType::default(),
            topic: None,
            acknowledge: AckDecision::default(),
            ack_timeout: Duration::from_secs(15),
            message_timeout: None,
            message_limit: 0,
            limit_policy: MessageLimitPolicy::default(),
            message_size_limit: 0,
            client_limit: 0,
            delay_between_messages: Duration::ZERO,
            put_back_delay: Duration::ZERO,
            auto_destroy: AutoDestroy::Disabled,
            delivery_handler: "Default".to_string(),
        }
    }
}

impl QueueOptions {
    /// Fold the well-known configuration headers of an init or update
    /// frame into these options. Unknown values are logged and skipped so
    /// a bad producer cannot wedge a queue.
    pub fn apply_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers.iter() {
            self.apply_header(name, value);
        }
    }

    fn apply_header(&mut self, name: &str, value: &str) {
        match name {
            headers::ACKNOWLEDGE => match AckDecision::parse(value) {
                Some(ack) => self.acknowledge = ack,
                None => tracing::warn!(value, "unknown acknowledge mode"),
            },
            headers::QUEUE_TYPE => match QueueType::parse(value) {
                Some(queue_type) => self.queue_type = queue_type,
                None => tracing::warn!(value, "unknown queue type"),
            },
            headers::QUEUE_TOPIC => self.topic = Some(value.to_string()),
            headers::PUT_BACK_DELAY => {
                self.put_back_delay = parse_millis(name, value).unwrap_or(self.put_back_delay)
            }
            headers::MESSAGE_TIMEOUT => {
                self.message_timeout = parse_secs(name, value).or(self.message_timeout)
            }
            headers::ACK_TIMEOUT => {
                self.ack_timeout = parse_secs(name, value).unwrap_or(self.ack_timeout)
            }
            headers::DELAY_BETWEEN_MESSAGES => {
                self.delay_between_messages =
                    parse_millis(name, value).unwrap_or(self.delay_between_messages)
            }
            headers::DELIVERY_HANDLER => self.delivery_handler = value.to_string(),
            headers::MESSAGE_LIMIT => {
                self.message_limit = parse_usize(name, value).unwrap_or(self.message_limit)
            }
            headers::MESSAGE_SIZE_LIMIT => {
                self.message_size_limit =
                    parse_usize(name, value).unwrap_or(self.message_size_limit)
            }
            headers::LIMIT_POLICY => match MessageLimitPolicy::parse(value) {
                Some(policy) => self.limit_policy = policy,
                None => tracing::warn!(value, "unknown limit policy"),
            },
            headers::CLIENT_LIMIT => {
                self.client_limit = parse_usize(name, value).unwrap_or(self.client_limit)
            }
            headers::AUTO_DESTROY => match AutoDestroy::parse(value) {
                Some(auto_destroy) => self.auto_destroy = auto_destroy,
                None => tracing::warn!(value, "unknown auto destroy mode"),
            },
            _ => {}
        }
    }
}

fn parse_usize(name: &str, value: &str) -> Option<usize> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(header = name, value, "not an integer, header ignored");
            None
        }
    }
}

fn parse_millis(name: &str, value: &str) -> Option<Duration> {
    parse_usize(name, value).map(|ms| Duration::from_millis(ms as u64))
}

fn parse_secs(name: &str, value: &str) -> Option<Duration> {
    parse_usize(name, value).map(|secs| Duration::from_secs(secs as u64))
}
