pub mod client;
pub mod context;
pub mod message;
pub mod streams;

pub use client::{ChatClient, ChatState, PendingSend, SendOutcome, SkipReason};
pub use context::{TRUNCATION_MARKER, build_history, provisional_title};
pub use message::{
    Attachment, AttachmentKind, ChatMessage, MessageId, Role, ToolInteraction, ToolStatus,
};
pub use streams::{StreamHandle, StreamRegistry};
