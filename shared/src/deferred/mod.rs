pub mod deferred_message_manager;
