//! Collaborator services the handlers call.
//!
//! These are implemented by the embedding application (network client,
//! local cache). Payload blobs pass through untouched.

use async_trait::async_trait;
use serde_json::Value;

use actionq_core::MessageId;

/// Posts messages to a channel.
///
/// Implementations must upsert on `message_id`: the queue may deliver the
/// same message more than once.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn send_message(
        &self,
        space_id: &str,
        channel_id: &str,
        message_id: MessageId,
        body: &Value,
        signing: &Value,
    ) -> anyhow::Result<()>;
}

/// Persists a user's settings.
#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn save_config(&self, user_address: &str, config: &Value, keyset: &Value)
    -> anyhow::Result<()>;
}

/// Manages space membership.
#[async_trait]
pub trait SpaceMembershipService: Send + Sync {
    /// Remove `user_address` from the space. Removing a non-member succeeds.
    async fn kick_user(
        &self,
        space_id: &str,
        user_address: &str,
        keysets: &Value,
        registration: &Value,
    ) -> anyhow::Result<()>;
}
