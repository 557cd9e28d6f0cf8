//! Task types and their typed payloads.
//!
//! A task's payload is a tagged union keyed by [`TaskType`]. The engine never
//! looks inside a context; it only asks for the tag when dispatching and for
//! the human-readable outcome messages when notifying.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::MessageId;

/// Closed set of operations the queue knows how to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    SendMessage,
    SaveUserConfig,
    KickUser,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::SendMessage,
        TaskType::SaveUserConfig,
        TaskType::KickUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SendMessage => "send-message",
            TaskType::SaveUserConfig => "save-user-config",
            TaskType::KickUser => "kick-user",
        }
    }

    /// Notification text for a task that completed.
    pub fn success_message(&self) -> &'static str {
        match self {
            TaskType::SendMessage => "Message sent",
            TaskType::SaveUserConfig => "Settings saved",
            TaskType::KickUser => "User removed from space",
        }
    }

    /// Notification text for a task that reached terminal failure.
    pub fn failure_message(&self) -> &'static str {
        match self {
            TaskType::SendMessage => "Failed to send message",
            TaskType::SaveUserConfig => "Failed to save settings",
            TaskType::KickUser => "Failed to remove user from space",
        }
    }
}

impl core::fmt::Display for TaskType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskType(pub String);

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send-message" => Ok(TaskType::SendMessage),
            "save-user-config" => Ok(TaskType::SaveUserConfig),
            "kick-user" => Ok(TaskType::KickUser),
            other => Err(UnknownTaskType(other.to_string())),
        }
    }
}

/// Static link from a payload type to its task type.
pub trait ContextKind {
    const TASK_TYPE: TaskType;
}

/// Payload for posting a message into a channel.
///
/// `message_id` is generated by the caller before enqueue so the send can be
/// made idempotent on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageContext {
    pub space_id: String,
    pub channel_id: String,
    pub message_id: MessageId,
    pub sender_address: String,
    pub body: Value,
    /// Signing/identity material, passed through untouched.
    #[serde(default)]
    pub signing: Value,
}

impl ContextKind for SendMessageContext {
    const TASK_TYPE: TaskType = TaskType::SendMessage;
}

impl SendMessageContext {
    pub fn ordering_key(&self) -> String {
        format!("{}/{}", self.space_id, self.channel_id)
    }
}

/// Payload for persisting a user's settings blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveUserConfigContext {
    pub user_address: String,
    pub config: Value,
    #[serde(default)]
    pub keyset: Value,
}

impl ContextKind for SaveUserConfigContext {
    const TASK_TYPE: TaskType = TaskType::SaveUserConfig;
}

impl SaveUserConfigContext {
    pub fn ordering_key(&self) -> String {
        format!("config/{}", self.user_address)
    }
}

/// Payload for removing a member from a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickUserContext {
    pub space_id: String,
    pub user_address: String,
    #[serde(default)]
    pub keysets: Value,
    #[serde(default)]
    pub registration: Value,
}

impl ContextKind for KickUserContext {
    const TASK_TYPE: TaskType = TaskType::KickUser;
}

impl KickUserContext {
    pub fn ordering_key(&self) -> String {
        format!("space/{}", self.space_id)
    }
}

/// Task payload, tagged by task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "context", rename_all = "kebab-case")]
pub enum TaskContext {
    SendMessage(SendMessageContext),
    SaveUserConfig(SaveUserConfigContext),
    KickUser(KickUserContext),
}

impl TaskContext {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskContext::SendMessage(_) => TaskType::SendMessage,
            TaskContext::SaveUserConfig(_) => TaskType::SaveUserConfig,
            TaskContext::KickUser(_) => TaskType::KickUser,
        }
    }

    /// Default ordering domain for this payload.
    ///
    /// Callers may pass any key to `enqueue`; this is the one the client
    /// services use.
    pub fn ordering_key(&self) -> String {
        match self {
            TaskContext::SendMessage(ctx) => ctx.ordering_key(),
            TaskContext::SaveUserConfig(ctx) => ctx.ordering_key(),
            TaskContext::KickUser(ctx) => ctx.ordering_key(),
        }
    }
}

impl From<SendMessageContext> for TaskContext {
    fn from(value: SendMessageContext) -> Self {
        TaskContext::SendMessage(value)
    }
}

impl From<SaveUserConfigContext> for TaskContext {
    fn from(value: SaveUserConfigContext) -> Self {
        TaskContext::SaveUserConfig(value)
    }
}

impl From<KickUserContext> for TaskContext {
    fn from(value: KickUserContext) -> Self {
        TaskContext::KickUser(value)
    }
}
