pub mod codes;
pub mod headers;
pub mod message;
pub mod name;

pub use codes::{operations, results};
pub use message::{HeaderMap, IdGenerator, Message, MessageId, MessageKind, SnowflakeIdGenerator};
pub use name::{ClientId, EntityName};
