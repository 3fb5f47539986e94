//! Delivery channels.
//!
//! The built-in channels only log the delivery; real transports plug in
//! through the same trait.

use async_trait::async_trait;
use tracing::info;

use super::model::Message;
use crate::error::BeaconError;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used in recipient preferences ("email", "sms", "app").
    fn name(&self) -> &str;

    async fn deliver(&self, message: &Message) -> Result<(), BeaconError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailChannel;

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, message: &Message) -> Result<(), BeaconError> {
        let subject = if message.titre.is_empty() {
            "Sans titre"
        } else {
            message.titre.as_str()
        };
        info!(
            channel = "email",
            to = %message.recipient.email,
            subject,
            body = %message.body,
            "delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmsChannel;

#[async_trait]
impl Channel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    async fn deliver(&self, message: &Message) -> Result<(), BeaconError> {
        let to = match &message.recipient.phone {
            Some(phone) => format!("{} ({phone})", message.recipient.name),
            None => message.recipient.name.clone(),
        };
        info!(channel = "sms", to = %to, body = %message.body, "delivered");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppChannel;

#[async_trait]
impl Channel for AppChannel {
    fn name(&self) -> &str {
        "app"
    }

    async fn deliver(&self, message: &Message) -> Result<(), BeaconError> {
        info!(
            channel = "app",
            to = %message.recipient.name,
            title = %message.titre,
            "delivered"
        );
        Ok(())
    }
}
