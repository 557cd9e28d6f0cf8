//! Client wiring for the durable action queue.
//!
//! - [`SqliteTaskStore`]: the on-disk task store
//! - handlers for `send-message`, `save-user-config` and `kick-user` backed
//!   by application-provided services
//! - [`ConnectivityMonitor`]: drains the queue whenever the network comes back
//! - [`ActionClient`]: the entry point an application holds on to

pub mod client;
pub mod connectivity;
pub mod handlers;
pub mod services;
pub mod sqlite_store;

pub use client::ActionClient;
pub use connectivity::{ConnectivityMonitor, ConnectivityState, OfflineError};
pub use handlers::{
    KickUserHandler, SaveUserConfigHandler, SendMessageHandler, Services, client_registry,
};
pub use services::{ConfigService, MessageService, SpaceMembershipService};
pub use sqlite_store::{SqliteTaskStore, default_db_path};
