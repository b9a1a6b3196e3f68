pub mod approval;
pub mod connection_manager;
pub mod peer;
pub mod roster;
