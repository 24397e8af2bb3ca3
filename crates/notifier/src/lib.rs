//! Channel clients used to deliver reminders.
//!
//! The engine only depends on the [`ChannelClient`] contract; concrete clients
//! own their provider session and credentials.

pub mod channel;
pub mod email;
pub mod stub;
pub mod whatsapp;

pub use channel::{ChannelClient, ChannelError, SendReceipt};
pub use email::{EmailConfig, ResendEmailChannel};
pub use stub::StubChannel;
pub use whatsapp::{WhatsAppChannel, WhatsAppConfig};
