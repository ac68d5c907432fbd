use bytes::Bytes;
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Frame kinds the dispatcher switches on. The wire framing itself is the
/// protocol module of the hosting process; the engine only ever sees parsed
/// frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[typeshare]
#[repr(u8)]
pub enum MessageKind {
    QueueMessage = 0x01,
    DirectMessage = 0x02,
    RouterPublish = 0x03,
    ChannelPublish = 0x04,
    Response = 0x05,
    Acknowledge = 0x06,
    Event = 0x07,
    Operation = 0x08,
    Pull = 0x09,
    Ping = 0x0e,
    Pong = 0x0f,
}

impl MessageKind {
    pub fn try_from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(MessageKind::QueueMessage),
            0x02 => Some(MessageKind::DirectMessage),
            0x03 => Some(MessageKind::RouterPublish),
            0x04 => Some(MessageKind::ChannelPublish),
            0x05 => Some(MessageKind::Response),
            0x06 => Some(MessageKind::Acknowledge),
            0x07 => Some(MessageKind::Event),
            0x08 => Some(MessageKind::Operation),
            0x09 => Some(MessageKind::Pull),
            0x0e => Some(MessageKind::Ping),
            0x0f => Some(MessageKind::Pong),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[typeshare(serialized_as = "String")]
#[repr(transparent)]
pub struct MessageId {
    pub bytes: [u8; 16],
}

impl MessageId {
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }
    pub fn from_base64(s: &str) -> Result<Self, base64::DecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s.as_bytes())?;
        if bytes.len() != 16 {
            return Err(base64::DecodeError::InvalidLength(bytes.len()));
        }
        let mut id = [0; 16];
        id.copy_from_slice(&bytes);
        Ok(Self { bytes: id })
    }
    /// Timestamp first so raw ids sort in generation order; then a
    /// per-thread counter and the generator salt to keep concurrent
    /// producers collision-free.
    pub fn new_snowflake() -> Self {
        thread_local! {
            static COUNTER: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
        }
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time never goes backward")
            .as_secs();
        let counter = COUNTER.with(|c| {
            let v = c.get();
            c.set(v.wrapping_add(1));
            v
        });
        let mut bytes = [0; 16];
        bytes[0..8].copy_from_slice(&timestamp.to_be_bytes());
        bytes[8..12].copy_from_slice(&counter.to_be_bytes());
        bytes[12..16].copy_from_slice(&generator_salt().to_be_bytes());
        Self { bytes }
    }
}

/// Stable salt for the id tail: machine identity hashed together with the
/// generating thread, computed once per thread.
fn generator_salt() -> u32 {
    thread_local! {
        static SALT: std::cell::OnceCell<u32> = const { std::cell::OnceCell::new() };
    }
    SALT.with(|salt| {
        *salt.get_or_init(|| {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::hash::DefaultHasher::new();
            machine_uid::get()
                .unwrap_or_else(|_| std::process::id().to_string())
                .hash(&mut hasher);
            std::thread::current().id().hash(&mut hasher);
            hasher.finish() as u32
        })
    })
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64())
        } else {
            <[u8; 16]>::serialize(&self.bytes, serializer)
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            use serde::de::Error;
            let s = String::deserialize(deserializer)?;
            Self::from_base64(&s).map_err(D::Error::custom)
        } else {
            Ok(Self {
                bytes: <[u8; 16]>::deserialize(deserializer)?,
            })
        }
    }
}

impl std::fmt::Display for MessageId {
    /// Hex with dashes at the snowflake segment boundaries:
    /// `timestamp-counter-salt`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, byte) in self.bytes.iter().enumerate() {
            if index == 8 || index == 12 {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// Assigns message and client ids. The default snowflake layout is
/// collision-free per executor and roughly monotonic across a process.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> MessageId;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeIdGenerator;

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> MessageId {
        MessageId::new_snowflake()
    }
}

/// Insertion-ordered header pairs. Lookup is exact-key; duplicates are
/// allowed on insert and the first occurrence wins on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[typeshare]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(key, _)| key == name)
    }
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }
    /// Replace-or-append, keeping the original position on replace.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let at = self.0.iter().position(|(key, _)| key == name)?;
        Some(self.0.remove(at).1)
    }
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|(key, _)| keep(key));
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A parsed frame. `content_type` discriminates operations (for
/// `MessageKind::Operation`) and carries result codes on responses; for
/// payload-bearing kinds it is an application tag the engine passes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[typeshare]
pub struct Message {
    pub id: Option<MessageId>,
    pub kind: MessageKind,
    pub target: String,
    pub content_type: u16,
    pub high_priority: bool,
    pub wait_response: bool,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, target: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            kind,
            target: target.into(),
            content_type: 0,
            high_priority: false,
            wait_response: false,
            headers: HeaderMap::new(),
            payload: payload.into(),
        }
    }
    pub fn queue(target: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::QueueMessage, target, payload)
    }
    pub fn direct(target: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::DirectMessage, target, payload)
    }
    pub fn router(target: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::RouterPublish, target, payload)
    }
    pub fn channel(target: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::ChannelPublish, target, payload)
    }
    pub fn operation(content_type: u16, target: impl Into<String>) -> Self {
        let mut message = Self::new(MessageKind::Operation, target, Bytes::new());
        message.content_type = content_type;
        message
    }
    /// A response frame for `to`, echoing its id and target.
    pub fn response(to: &Message, content_type: u16) -> Self {
        let mut message = Self::new(MessageKind::Response, to.target.clone(), Bytes::new());
        message.id = to.id;
        message.content_type = content_type;
        message
    }
    /// Consumer-side acknowledge frame for a delivered queue message.
    pub fn acknowledge(to: &Message) -> Self {
        let mut message = Self::new(MessageKind::Acknowledge, to.target.clone(), Bytes::new());
        message.id = to.id;
        message
    }
    /// Negative acknowledge; the presence of the reason header is what
    /// makes it negative.
    pub fn negative_acknowledge(to: &Message, reason: impl Into<String>) -> Self {
        let mut message = Self::acknowledge(to);
        message.headers.insert(super::headers::NACK_REASON, reason);
        message
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
    pub fn with_high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }
    pub fn with_wait_response(mut self) -> Self {
        self.wait_response = true;
        self
    }
    pub fn with_content_type(mut self, content_type: u16) -> Self {
        self.content_type = content_type;
        self
    }
}
