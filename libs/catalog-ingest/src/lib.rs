pub mod config;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod event;
pub mod source;

pub use config::{IngestConfig, TopicConfig};
pub use consumer::{channel_consumer, ChannelConsumer, EventConsumer, TcpLineConsumer};
pub use decode::{EventDecoder, JsonEventDecoder, TopicBinding, PARSED_TOPIC};
pub use error::{DecodeError, IngestError};
pub use event::{EventKind, InboundMessage, ResourceEvent};
pub use source::{spawn_ingest_loop, IngestSettings, IngestStats};
