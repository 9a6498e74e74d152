//! WebSocket side of the relay: one task per connection, feeding the
//! shared room registry.

pub mod client;
pub mod sender;
pub mod server;
