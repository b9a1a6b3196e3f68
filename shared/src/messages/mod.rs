pub mod connection_config;
pub mod constants;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod fragment_receiver;
pub mod fragmenter;
pub mod frame;
pub mod handler;
pub mod hooks;
pub mod message_kind;
pub mod message_manager;
pub mod outbound_batch;
pub mod rpc;
pub mod system_messages;
