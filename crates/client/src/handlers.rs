//! Concrete handlers for the client task types.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use actionq_core::{HandlerError, KickUserContext, SaveUserConfigContext, SendMessageContext};
use actionq_queue::{HandlerRegistry, TaskHandler};

use crate::connectivity::ConnectivityMonitor;
use crate::services::{ConfigService, MessageService, SpaceMembershipService};

/// Defer while offline: the task stays pending with its attempts intact and
/// runs on the drain that follows reconnection.
fn check_online(connectivity: Option<&ConnectivityMonitor>) -> Result<(), HandlerError> {
    match connectivity {
        Some(monitor) => monitor.require_online().map_err(HandlerError::deferred),
        None => Ok(()),
    }
}

pub struct SendMessageHandler {
    service: Arc<dyn MessageService>,
    connectivity: Option<ConnectivityMonitor>,
}

impl SendMessageHandler {
    pub fn new(service: Arc<dyn MessageService>, connectivity: Option<ConnectivityMonitor>) -> Self {
        Self {
            service,
            connectivity,
        }
    }
}

#[async_trait]
impl TaskHandler<SendMessageContext> for SendMessageHandler {
    async fn handle(&self, ctx: SendMessageContext) -> Result<(), HandlerError> {
        check_online(self.connectivity.as_ref())?;
        self.service
            .send_message(
                &ctx.space_id,
                &ctx.channel_id,
                ctx.message_id,
                &ctx.body,
                &ctx.signing,
            )
            .await
            .with_context(|| {
                format!(
                    "send message {} to {}/{}",
                    ctx.message_id, ctx.space_id, ctx.channel_id
                )
            })?;
        Ok(())
    }
}

pub struct SaveUserConfigHandler {
    service: Arc<dyn ConfigService>,
    connectivity: Option<ConnectivityMonitor>,
}

impl SaveUserConfigHandler {
    pub fn new(service: Arc<dyn ConfigService>, connectivity: Option<ConnectivityMonitor>) -> Self {
        Self {
            service,
            connectivity,
        }
    }
}

#[async_trait]
impl TaskHandler<SaveUserConfigContext> for SaveUserConfigHandler {
    async fn handle(&self, ctx: SaveUserConfigContext) -> Result<(), HandlerError> {
        check_online(self.connectivity.as_ref())?;
        self.service
            .save_config(&ctx.user_address, &ctx.config, &ctx.keyset)
            .await
            .context("save user config")?;
        Ok(())
    }
}

pub struct KickUserHandler {
    service: Arc<dyn SpaceMembershipService>,
    connectivity: Option<ConnectivityMonitor>,
}

impl KickUserHandler {
    pub fn new(
        service: Arc<dyn SpaceMembershipService>,
        connectivity: Option<ConnectivityMonitor>,
    ) -> Self {
        Self {
            service,
            connectivity,
        }
    }
}

#[async_trait]
impl TaskHandler<KickUserContext> for KickUserHandler {
    async fn handle(&self, ctx: KickUserContext) -> Result<(), HandlerError> {
        check_online(self.connectivity.as_ref())?;
        self.service
            .kick_user(&ctx.space_id, &ctx.user_address, &ctx.keysets, &ctx.registration)
            .await
            .with_context(|| format!("kick {} from space {}", ctx.user_address, ctx.space_id))?;
        Ok(())
    }
}

/// Services backing the client handlers.
#[derive(Clone)]
pub struct Services {
    pub messages: Arc<dyn MessageService>,
    pub config: Arc<dyn ConfigService>,
    pub membership: Arc<dyn SpaceMembershipService>,
}

/// Registry wiring each task type to its client handler.
pub fn client_registry(
    services: &Services,
    connectivity: Option<ConnectivityMonitor>,
) -> HandlerRegistry {
    HandlerRegistry::new(
        SendMessageHandler::new(services.messages.clone(), connectivity.clone()),
        SaveUserConfigHandler::new(services.config.clone(), connectivity.clone()),
        KickUserHandler::new(services.membership.clone(), connectivity),
    )
}
