//! # AMQP Broker Adapter
//!
//! `Broker` implementation over an AMQP 0-9-1 connection (RabbitMQ).
//!
//! One connection per process. Publishing shares a single channel in
//! confirm mode; every consumer gets its own channel so its prefetch
//! (`basic.qos`) is independent.
//!
//! | Core concept | AMQP mapping |
//! |--------------|--------------|
//! | `QueueSpec::dead_letter` | `x-dead-letter-exchange`, `x-dead-letter-routing-key` |
//! | `QueueSpec::message_ttl` | `x-message-ttl` |
//! | persistent envelope | `delivery_mode = 2` |
//! | envelope headers | headers table, long strings |

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker as LapinAcker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use shared_types::{BrokerError, ExchangeKind, ExchangeSpec, MessageEnvelope, QueueSpec};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{Acker, Broker, ConsumeOptions, Delivery, DeliveryStream, PublishOptions};

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// AMQP-backed broker.
pub struct AmqpBroker {
    endpoint: String,
    connection: Connection,
    publish_channel: Channel,
}

impl AmqpBroker {
    /// Open a connection and the shared publishing channel.
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let endpoint = redact(uri);
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        let publish_channel = connection.create_channel().await.map_err(protocol)?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(protocol)?;

        info!(%endpoint, "AMQP connection established");
        Ok(Self {
            endpoint,
            connection,
            publish_channel,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let kind = match exchange.kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };
        let options = ExchangeDeclareOptions {
            durable: exchange.durable,
            ..ExchangeDeclareOptions::default()
        };
        self.publish_channel
            .exchange_declare(&exchange.name, kind, options, FieldTable::default())
            .await
            .map_err(|e| declare_error(&exchange.name, e))
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        let mut arguments = FieldTable::default();
        if let Some(target) = &queue.dead_letter {
            arguments.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(LongString::from(target.exchange.clone())),
            );
            if let Some(key) = &target.routing_key {
                arguments.insert(
                    ShortString::from("x-dead-letter-routing-key"),
                    AMQPValue::LongString(LongString::from(key.clone())),
                );
            }
        }
        if let Some(ttl) = queue.message_ttl {
            let millis = i32::try_from(ttl.as_millis()).map_err(|_| {
                BrokerError::Protocol(format!("message TTL too large for {}", queue.name))
            })?;
            arguments.insert(
                ShortString::from("x-message-ttl"),
                AMQPValue::LongInt(millis),
            );
        }

        let options = QueueDeclareOptions {
            durable: queue.durable,
            ..QueueDeclareOptions::default()
        };
        self.publish_channel
            .queue_declare(&queue.name, options, arguments)
            .await
            .map_err(|e| declare_error(&queue.name, e))?;

        for binding in &queue.bindings {
            self.publish_channel
                .queue_bind(
                    &queue.name,
                    &binding.exchange,
                    &binding.pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| declare_error(&queue.name, e))?;
        }
        debug!(queue = %queue.name, bindings = queue.bindings.len(), "AMQP queue declared");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        let publish_error = |reason: String| BrokerError::PublishFailed {
            exchange: exchange.to_string(),
            reason,
        };

        let confirm = self
            .publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                envelope.payload(),
                properties_for(&envelope),
            )
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        if options.confirm {
            let confirmation = confirm.await.map_err(|e| publish_error(e.to_string()))?;
            if confirmation.is_nack() {
                return Err(publish_error("broker nacked the message".to_string()));
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError> {
        let consume_error = |e: lapin::Error| BrokerError::ConsumeFailed {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        let channel = self.connection.create_channel().await.map_err(consume_error)?;
        channel
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;
        let consumer = channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        debug!(queue, consumer_tag = %options.consumer_tag, "AMQP consumer registered");

        let queue = queue.to_string();
        let stream = consumer.map(move |item| {
            item.map(|delivery| into_delivery(&queue, delivery))
                .map_err(|e| BrokerError::ConsumeFailed {
                    queue: queue.clone(),
                    reason: e.to_string(),
                })
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        let _ = self.publish_channel.close(200, "shutdown").await;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(protocol)?;
        info!(endpoint = %self.endpoint, "AMQP connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }
}

struct AmqpAcker {
    acker: LapinAcker,
    tag: u64,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| settle_error(self.tag, e))
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let options = BasicNackOptions {
            requeue,
            multiple: false,
        };
        self.acker
            .nack(options)
            .await
            .map_err(|e| settle_error(self.tag, e))
    }
}

fn properties_for(envelope: &MessageEnvelope) -> BasicProperties {
    let mut headers = FieldTable::default();
    for (key, value) in envelope.headers() {
        headers.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }

    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(envelope.content_type().to_string()))
        .with_message_id(ShortString::from(envelope.message_id().to_string()))
        .with_timestamp(envelope.published_at() / 1000)
        .with_headers(headers);
    if envelope.is_persistent() {
        properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(id) = envelope.correlation_id() {
        properties = properties.with_correlation_id(ShortString::from(id.to_string()));
    }
    properties
}

fn into_delivery(queue: &str, delivery: lapin::message::Delivery) -> Delivery {
    let properties = &delivery.properties;
    let headers = properties
        .headers()
        .as_ref()
        .map(header_strings)
        .unwrap_or_default();

    let envelope = MessageEnvelope::from_parts(
        delivery.data.clone(),
        properties.content_type().as_ref().map(|s| s.as_str().to_string()),
        headers,
        properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        properties
            .message_id()
            .as_ref()
            .and_then(|s| Uuid::parse_str(s.as_str()).ok()),
        properties.delivery_mode().unwrap_or(1) == PERSISTENT_DELIVERY_MODE,
        properties.timestamp().map(|secs| secs * 1000),
    );

    Delivery::new(
        delivery.delivery_tag,
        queue,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.redelivered,
        envelope,
        Box::new(AmqpAcker {
            acker: delivery.acker.clone(),
            tag: delivery.delivery_tag,
        }),
    )
}

/// Flatten an AMQP headers table to strings. Nested tables and arrays (such
/// as the broker's own `x-death`) are skipped.
fn header_strings(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                AMQPValue::ShortShortInt(v) => v.to_string(),
                AMQPValue::ShortShortUInt(v) => v.to_string(),
                AMQPValue::ShortInt(v) => v.to_string(),
                AMQPValue::ShortUInt(v) => v.to_string(),
                AMQPValue::LongInt(v) => v.to_string(),
                AMQPValue::LongUInt(v) => v.to_string(),
                AMQPValue::LongLongInt(v) => v.to_string(),
                AMQPValue::Boolean(v) => v.to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}

fn protocol(err: lapin::Error) -> BrokerError {
    BrokerError::Protocol(err.to_string())
}

fn declare_error(name: &str, err: lapin::Error) -> BrokerError {
    let reason = err.to_string();
    if reason.contains("PRECONDITION_FAILED") {
        BrokerError::PreconditionFailed {
            name: name.to_string(),
            reason,
        }
    } else if reason.contains("NOT_FOUND") {
        BrokerError::ExchangeNotFound(name.to_string())
    } else {
        BrokerError::Protocol(reason)
    }
}

fn settle_error(tag: u64, err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed
        }
        other => BrokerError::Protocol(format!("settling delivery {tag}: {other}")),
    }
}
