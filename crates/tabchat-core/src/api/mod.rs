pub mod error;
pub mod stream;
pub mod transport;

pub use error::TransportError;
pub use stream::{ByteStream, EventStream, LineDecoder, StreamEvent, decode_event_stream};
pub use transport::{HistoryMessage, HttpTransport, StreamRequest, Transport};
