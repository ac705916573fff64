pub mod channel;
pub mod channel_store;

pub use channel::Channel;
pub use channel_store::ChannelStore;
