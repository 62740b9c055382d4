//! Realtime voice sessions with an inference service.

pub mod config;
pub mod events;
pub mod handle;
pub mod presets;
pub mod protocol;
pub mod tcp;
pub mod tools;
pub mod transcript;
pub mod transport;
pub mod widget;

pub use config::{Modality, SessionConfig, StartupPolicy, ToolDeclaration};
pub use events::{Outbound, Speaker, StreamEvent};
pub use handle::{Outbox, OutboxState, SessionControl, SessionHandle, SessionUpdate, VoiceSession};
pub use presets::Preset;
pub use tcp::JsonLinesTransport;
pub use tools::{ToolHandler, ToolRegistry};
pub use transcript::{TranscriptEntry, TranscriptLog};
pub use transport::{ChannelTransport, InferenceTransport, ServiceEnd, ServiceListener, TransportLink};
pub use widget::{AudioHost, VoiceWidget, WidgetStatus};
