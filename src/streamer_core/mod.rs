pub mod error_handler;
pub mod messages;
pub mod ws_client;

pub use error_handler::ExponentialBackoff;
pub use messages::{FeedMessage, LogNotification};
pub use ws_client::{ConnectorSettings, ConnectorState, StreamConnector, StreamError};
