//! Well-known header names the engine interprets. Everything in
//! [`INTERNAL`] is stripped from a message before it reaches consumers or
//! durable storage.

pub const ACKNOWLEDGE: &str = "Acknowledge";
pub const QUEUE_NAME: &str = "Queue-Name";
pub const QUEUE_TYPE: &str = "Queue-Type";
pub const QUEUE_TOPIC: &str = "Queue-Topic";
pub const PUT_BACK_DELAY: &str = "Put-Back-Delay";
pub const MESSAGE_TIMEOUT: &str = "Message-Timeout";
pub const ACK_TIMEOUT: &str = "Ack-Timeout";
pub const DELAY_BETWEEN_MESSAGES: &str = "Delay-Between-Messages";
pub const DELIVERY_HANDLER: &str = "Delivery-Handler";
pub const MESSAGE_LIMIT: &str = "Message-Limit";
pub const MESSAGE_SIZE_LIMIT: &str = "Message-Size-Limit";
pub const LIMIT_POLICY: &str = "Limit-Policy";
pub const CLIENT_LIMIT: &str = "Client-Limit";
pub const AUTO_DESTROY: &str = "Auto-Destroy";

pub const NACK_REASON: &str = "Nack-Reason";
pub const ROUTE_METHOD: &str = "Route-Method";
pub const BINDING_NAME: &str = "Binding-Name";
pub const BINDING_KIND: &str = "Binding-Kind";
pub const BINDING_TARGET: &str = "Binding-Target";
pub const BINDING_PRIORITY: &str = "Binding-Priority";
pub const BINDING_INTERACTION: &str = "Binding-Interaction";
pub const FILTER: &str = "Filter";
pub const CLEAR_PRIORITY: &str = "Clear-Priority";
pub const CLEAR_MESSAGES: &str = "Clear-Messages";

pub const CLIENT_ID: &str = "Client-Id";
pub const CLIENT_NAME: &str = "Client-Name";
pub const CLIENT_TYPE: &str = "Client-Type";

pub const COUNT: &str = "Count";
pub const ORDER: &str = "Order";
pub const CLEAR_AFTER: &str = "Clear-After";
pub const INDEX: &str = "Index";
pub const LAST_MESSAGE: &str = "Last-Message";

pub const STATUS: &str = "Status";
pub const REASON: &str = "Reason";

/// Administrative headers that configure a queue or steer routing; never
/// forwarded to consumers, never persisted with the message body.
pub const INTERNAL: &[&str] = &[
    ACKNOWLEDGE,
    QUEUE_NAME,
    QUEUE_TYPE,
    QUEUE_TOPIC,
    PUT_BACK_DELAY,
    MESSAGE_TIMEOUT,
    ACK_TIMEOUT,
    DELAY_BETWEEN_MESSAGES,
    DELIVERY_HANDLER,
    MESSAGE_LIMIT,
    MESSAGE_SIZE_LIMIT,
    LIMIT_POLICY,
    CLIENT_LIMIT,
    AUTO_DESTROY,
];

pub fn strip_internal(headers: &mut super::HeaderMap) {
    headers.retain(|name| !INTERNAL.contains(&name));
}
