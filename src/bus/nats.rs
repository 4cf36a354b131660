//! NATS binding: operation subjects in, one reply per message out

use super::codec::{decode_reply, decode_request, encode_reply, FAILURE_CODE_HEADER};
use crate::config::NatsConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{BackboneError, Result};
use crate::operation::Operation;
use crate::types::{Payload, Reply};
use async_nats::{HeaderMap, Message, Subject};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Request timeout used by [`NatsBinding::request`]
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection to the event bus
pub struct NatsBinding {
    client: async_nats::Client,
    config: Arc<NatsConfig>,
}

impl NatsBinding {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = build_connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| BackboneError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Answer requests on every operation subject until the connection closes
    ///
    /// Each message is handled on its own task and answered exactly once on
    /// its reply subject. Messages without a reply subject are dropped.
    ///
    /// At most `max_in_flight` messages are handled at once. Past that the
    /// subscriptions are not read, and NATS applies its own slow-consumer
    /// handling to the backlog.
    pub async fn serve(&self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        let in_flight = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));

        let mut subscribers = Vec::with_capacity(Operation::ALL.len());
        for op in Operation::ALL {
            let subject = self.config.subject(op.subject());
            let subscriber = self
                .client
                .queue_subscribe(subject.clone(), self.config.queue_group.clone())
                .await
                .map_err(|e| BackboneError::Connection(format!("subscribe {}: {}", subject, e)))?;
            tracing::info!(subject = %subject, queue_group = %self.config.queue_group, "Subscribed");
            subscribers.push(subscriber);
        }

        let mut messages = futures::stream::select_all(subscribers);
        while let Some(message) = messages.next().await {
            let Some(reply_to) = message.reply.clone() else {
                tracing::warn!(subject = %message.subject, "Dropping request without reply subject");
                continue;
            };
            let permit = Arc::clone(&in_flight)
                .acquire_owned()
                .await
                .map_err(|_| BackboneError::Worker("in-flight limiter closed".to_string()))?;
            let client = self.client.clone();
            let config = Arc::clone(&self.config);
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                answer(&client, &config, &dispatcher, message, reply_to).await;
                drop(permit);
            });
        }

        tracing::info!("NATS subscriptions closed");
        Ok(())
    }

    /// Send a request for `op` and wait for its reply
    pub async fn request(&self, op: Operation, payload: &Payload) -> Result<Reply> {
        let subject = self.config.subject(op.subject());
        let body = serde_json::to_vec(payload)?;
        let message = self
            .client
            .request(subject.clone(), body.into())
            .await
            .map_err(|e| BackboneError::Connection(format!("request {}: {}", subject, e)))?;
        let code = message
            .headers
            .as_ref()
            .and_then(|h| h.get(FAILURE_CODE_HEADER))
            .map(|v| v.as_str());
        decode_reply(code, message.payload.clone())
    }
}

async fn answer(
    client: &async_nats::Client,
    config: &NatsConfig,
    dispatcher: &Dispatcher,
    message: Message,
    reply_to: Subject,
) {
    let request = config
        .operation_subject(message.subject.as_str())
        .ok_or_else(|| BackboneError::UnsupportedOperation(message.subject.to_string()))
        .and_then(|subject| decode_request(subject, &message.payload));

    let reply = match request {
        Ok(request) => dispatcher.handle(request).await,
        Err(e) => {
            tracing::warn!(subject = %message.subject, error = %e, "Undecodable request");
            Reply::failure(&e)
        }
    };

    let encoded = encode_reply(&reply);
    let published = match encoded.failure_code {
        Some(code) => {
            let mut headers = HeaderMap::new();
            headers.insert(FAILURE_CODE_HEADER, code.to_string().as_str());
            client
                .publish_with_headers(reply_to.clone(), headers, encoded.body)
                .await
        }
        None => client.publish(reply_to.clone(), encoded.body).await,
    };
    if let Err(e) = published {
        tracing::warn!(reply_to = %reply_to, error = %e, "Failed to publish reply");
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}
