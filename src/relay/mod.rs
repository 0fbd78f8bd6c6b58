//! Relay module - turns inbound chat messages into replies.

pub mod completion;
pub mod dispatcher;
pub mod history;
pub mod message;
pub mod outbound;
pub mod prompt;
pub mod reply;
pub mod webhook;


pub use dispatcher::{Dispatcher, Outcome};
pub use history::{ConversationStore, Role, Turn};
pub use message::{Dropped, Inbound, MessageContent, WebMessage};
pub use outbound::OutboundSender;
pub use reply::ReplyProducer;
