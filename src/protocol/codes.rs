//! Content-type discriminators. Operation frames carry one of the
//! [`operations`] codes; response frames carry a [`results`] code.

pub mod operations {
    pub const QUEUE_SUBSCRIBE: u16 = 0x3e9; // 1001
    pub const QUEUE_UNSUBSCRIBE: u16 = 0x3ea;
    pub const QUEUE_CREATE: u16 = 0x3eb;
    pub const QUEUE_REMOVE: u16 = 0x3ec;
    pub const QUEUE_UPDATE: u16 = 0x3ed;
    pub const QUEUE_CLEAR: u16 = 0x3ee;
    pub const QUEUE_LIST: u16 = 0x3ef;
    pub const QUEUE_INFO: u16 = 0x3f0;

    pub const ROUTER_CREATE: u16 = 0x4b1; // 1201
    pub const ROUTER_REMOVE: u16 = 0x4b2;
    pub const ROUTER_LIST: u16 = 0x4b3;
    pub const BINDING_ADD: u16 = 0x4bb;
    pub const BINDING_REMOVE: u16 = 0x4bc;
    pub const BINDING_LIST: u16 = 0x4bd;

    pub const CHANNEL_SUBSCRIBE: u16 = 0x579; // 1401
    pub const CHANNEL_UNSUBSCRIBE: u16 = 0x57a;
    pub const CHANNEL_CREATE: u16 = 0x57b;
    pub const CHANNEL_REMOVE: u16 = 0x57c;
    pub const CHANNEL_LIST: u16 = 0x57d;
}

pub mod results {
    pub const OK: u16 = 200;
    pub const FAILED: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const DUPLICATE: u16 = 409;
    pub const STATUS_NOT_SUPPORTED: u16 = 423;
    pub const LIMIT_EXCEEDED: u16 = 429;
    pub const NO_CONSUMERS: u16 = 444;
    pub const NO_RECEIVERS: u16 = 445;
    pub const NO_BINDINGS: u16 = 446;
    pub const DISABLED: u16 = 447;
    pub const BAD_REQUEST: u16 = 422;
    pub const INTERNAL: u16 = 500;
}
