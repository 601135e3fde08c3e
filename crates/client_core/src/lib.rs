//! Client side of the chat: REST and realtime transports plus the state engine that
//! reconciles optimistic local changes with what the server pushes.

pub mod attachment;
pub mod engine;
pub mod error;
pub mod realtime;
pub mod sidebar;
pub mod store;
pub mod transport;
pub mod typing;

pub use attachment::{MediaAttachment, MediaKind, MAX_ATTACHMENT_BYTES};
pub use engine::{ChatEngine, ChatState, ClientEvent, Draft, SubscriptionToken};
pub use error::{ClientError, ClientResult};
pub use realtime::RealtimeConnection;
pub use sidebar::{Sidebar, SidebarEntry};
pub use store::{MessageStore, StoreEntry};
pub use transport::{ChatApi, HttpChatApi};
pub use typing::{SignalSink, TypingIndicator, DEFAULT_TYPING_IDLE};
