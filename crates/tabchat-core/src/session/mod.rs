pub mod cache;
pub mod registry;
pub mod types;

pub use cache::{Activation, DisplayedView, MessageCache};
pub use registry::SessionRegistry;
pub use types::{ChatSession, ChatTab, SessionId, TabId, View};
