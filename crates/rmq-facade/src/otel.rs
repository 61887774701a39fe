//! OpenTelemetry instrumentation for producers and consumers.
//!
//! [`TracedProducer`] records a `rocketmqSend` span around every send and
//! writes the span's ids into the message properties `traceId` and
//! `spanId`. [`TracedHandler`] reads them back on the consumer side and
//! runs the wrapped handler inside a `rocketmqConsume` span whose parent is
//! the producer's span.
//!
//! The wrapped operation runs with its span as the active [`Context`], so
//! spans started inside a handler or a transaction confirm callback nest
//! under it.
//!
//! Both accept any [`Tracer`], so applications pass the tracer of whatever
//! provider they installed.

use crate::broker::BrokerConnector;
use crate::config::ClientConfig;
use crate::consumer::{simple_consume, ConsumerHandle, ConsumerOptions, MessageHandler, MessageLease};
use crate::diagnostics::Diagnostics;
use crate::error::FacadeError;
use crate::message::{Message, MessageView, SendReceipt, TopicType};
use crate::producer::{Producer, SendCompletion};
use crate::transaction::TransactionOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::context::FutureExt;
use opentelemetry::trace::{
    Span, SpanContext, SpanId, SpanKind, SpanRef, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer,
};
use opentelemetry::{Array, Context, KeyValue, StringValue, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "otel_tests.rs"]
mod tests;

/// Message property carrying the hex trace id of the producing span
pub const TRACE_ID_PROPERTY: &str = "traceId";

/// Message property carrying the hex span id of the producing span
pub const SPAN_ID_PROPERTY: &str = "spanId";

pub const SEND_SPAN_NAME: &str = "rocketmqSend";
pub const CONSUME_SPAN_NAME: &str = "rocketmqConsume";

const END_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ============================================================================
// Span Attributes
// ============================================================================

struct MessageFields<'a> {
    body: std::borrow::Cow<'a, str>,
    topic: &'a str,
    tag: Option<&'a str>,
    message_group: Option<&'a str>,
    keys: &'a [String],
    properties: &'a HashMap<String, String>,
    delivery_timestamp: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Message> for MessageFields<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            body: message.body_str(),
            topic: &message.topic,
            tag: message.tag.as_deref(),
            message_group: message.message_group.as_deref(),
            keys: &message.keys,
            properties: &message.properties,
            delivery_timestamp: message.delivery_timestamp,
        }
    }
}

impl<'a> From<&'a MessageView> for MessageFields<'a> {
    fn from(view: &'a MessageView) -> Self {
        Self {
            body: view.body_str(),
            topic: &view.topic,
            tag: view.tag.as_deref(),
            message_group: view.message_group.as_deref(),
            keys: &view.keys,
            properties: &view.properties,
            delivery_timestamp: view.delivery_timestamp,
        }
    }
}

impl MessageFields<'_> {
    fn attributes(&self) -> Vec<KeyValue> {
        let keys: Vec<StringValue> = self.keys.iter().cloned().map(StringValue::from).collect();
        let properties: BTreeMap<&String, &String> = self.properties.iter().collect();

        vec![
            KeyValue::new("Body", self.body.to_string()),
            KeyValue::new("Topic", self.topic.to_string()),
            KeyValue::new("Tag", self.tag.unwrap_or_default().to_string()),
            KeyValue::new(
                "MessageGroup",
                self.message_group.unwrap_or_default().to_string(),
            ),
            KeyValue::new("Keys", Value::Array(Array::String(keys))),
            KeyValue::new(
                "Properties",
                serde_json::to_string(&properties).unwrap_or_default(),
            ),
            KeyValue::new(
                "DeliveryTimestamp",
                self.delivery_timestamp
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            ),
        ]
    }
}

fn end_span(span: &SpanRef<'_>, outcome: Result<&[SendReceipt], &FacadeError>) {
    match outcome {
        Ok(receipts) => {
            span.set_attribute(KeyValue::new(
                "SendReceipt",
                serde_json::to_string(receipts).unwrap_or_default(),
            ));
            span.set_status(Status::Ok);
        }
        Err(e) => span.set_status(Status::error(e.to_string())),
    }
    finish(span);
}

fn finish(span: &SpanRef<'_>) {
    span.set_attribute(KeyValue::new(
        "endTime",
        Utc::now().format(END_TIME_FORMAT).to_string(),
    ));
    span.end();
}

// ============================================================================
// Traced Producer
// ============================================================================

/// [`Producer`] recording a span around every send
pub struct TracedProducer<T> {
    producer: Producer,
    tracer: T,
}

impl<T> TracedProducer<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    pub fn new(producer: Producer, tracer: T) -> Self {
        Self { producer, tracer }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn into_inner(self) -> Producer {
        self.producer
    }

    /// Traced [`Producer::send`]
    pub async fn send(
        &self,
        topic_type: TopicType,
        message: &Message,
    ) -> Result<Vec<SendReceipt>, FacadeError> {
        let mut message = message.clone();
        let cx = self.start_send_span(&mut message);

        let result = self
            .producer
            .send(topic_type, &message)
            .with_context(cx.clone())
            .await;
        end_span(&cx.span(), result.as_deref());
        result
    }

    /// Traced [`Producer::send_async`]
    ///
    /// The span ends when the returned future resolves.
    pub fn send_async(
        &self,
        topic_type: TopicType,
        message: Message,
    ) -> Result<impl Future<Output = SendCompletion> + Send + 'static, FacadeError> {
        let mut message = message;
        let cx = self.start_send_span(&mut message);

        let pending = match self.producer.send_async(topic_type, message) {
            Ok(pending) => pending,
            Err(e) => {
                end_span(&cx.span(), Err(&e));
                return Err(e);
            }
        };

        Ok(async move {
            let completion = pending.with_context(cx.clone()).await;
            end_span(&cx.span(), completion.result.as_deref());
            completion
        })
    }

    /// Traced [`Producer::send_async_with`]
    pub fn send_async_with<F>(
        &self,
        topic_type: TopicType,
        message: Message,
        callback: F,
    ) -> Result<(), FacadeError>
    where
        F: FnOnce(SendCompletion) + Send + 'static,
    {
        let pending = self.send_async(topic_type, message)?;
        tokio::spawn(async move {
            callback(pending.await);
        });
        Ok(())
    }

    /// Traced [`Producer::send_transaction`]
    pub async fn send_transaction<F>(
        &self,
        message: &Message,
        confirm: F,
    ) -> Result<TransactionOutcome, FacadeError>
    where
        F: FnOnce(&Message, &[SendReceipt]) -> bool,
    {
        let mut message = message.clone();
        let cx = self.start_send_span(&mut message);

        let result = self
            .producer
            .send_transaction(&message, confirm)
            .with_context(cx.clone())
            .await;
        let span = cx.span();
        match &result {
            Ok(TransactionOutcome::Committed(receipts)) => end_span(&span, Ok(receipts.as_slice())),
            Ok(TransactionOutcome::RolledBack) => end_span(&span, Ok(&[])),
            Err(e) => end_span(&span, Err(e)),
        }
        result
    }

    pub async fn stop(&self) -> Result<(), FacadeError> {
        self.producer.stop().await
    }

    /// Start the send span and record its ids in the message properties
    ///
    /// Returns the current context with the new span active.
    fn start_send_span(&self, message: &mut Message) -> Context {
        let span = self
            .tracer
            .span_builder(SEND_SPAN_NAME)
            .with_kind(SpanKind::Producer)
            .start(&self.tracer);

        let span_context = span.span_context();
        if span_context.is_valid() {
            message.properties.insert(
                TRACE_ID_PROPERTY.to_string(),
                span_context.trace_id().to_string(),
            );
            message.properties.insert(
                SPAN_ID_PROPERTY.to_string(),
                span_context.span_id().to_string(),
            );
        } else {
            self.producer.diagnostics().emit(format_args!(
                "tracer produced an invalid span context; trace ids not propagated"
            ));
        }

        let mut span = span;
        span.set_attributes(MessageFields::from(&*message).attributes());
        Context::current_with_span(span)
    }
}

// ============================================================================
// Traced Consumer
// ============================================================================

/// [`MessageHandler`] running the wrapped handler inside a consume span
///
/// The span is linked to the producer's span through the `traceId` and
/// `spanId` message properties. Messages without valid ids are handled
/// untraced. Errors of the wrapped handler are recorded on the span and
/// logged, then swallowed.
pub struct TracedHandler<H, T> {
    inner: H,
    tracer: T,
    diagnostics: Diagnostics,
}

impl<H, T> TracedHandler<H, T> {
    pub fn new(inner: H, tracer: T) -> Self {
        Self {
            inner,
            tracer,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Recover the producer's span context from the message properties
fn remote_parent(view: &MessageView) -> Result<Context, String> {
    let trace_id = view
        .property(TRACE_ID_PROPERTY)
        .ok_or_else(|| format!("message {} carries no trace context", view.message_id))?;
    let span_id = view.property(SPAN_ID_PROPERTY).unwrap_or_default();

    let parsed = TraceId::from_hex(trace_id)
        .map_err(|e| format!("trace id: {}", e))
        .and_then(|t| {
            SpanId::from_hex(span_id)
                .map(|s| (t, s))
                .map_err(|e| format!("span id: {}", e))
        });

    match parsed {
        Ok((trace_id, span_id)) => {
            let span_context = SpanContext::new(
                trace_id,
                span_id,
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            );
            if span_context.is_valid() {
                Ok(Context::new().with_remote_span_context(span_context))
            } else {
                Err(format!(
                    "span context failed traceId[{}] spanId[{}]: invalid ids",
                    trace_id, span_id
                ))
            }
        }
        Err(reason) => Err(format!(
            "span context failed traceId[{}] spanId[{}]: {}",
            trace_id, span_id, reason
        )),
    }
}

#[async_trait]
impl<H, T> MessageHandler for TracedHandler<H, T>
where
    H: MessageHandler,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    async fn handle(&self, lease: MessageLease) -> anyhow::Result<()> {
        let view = lease.message();
        let message_id = view.message_id.clone();

        let cx = match remote_parent(view) {
            Ok(parent) => {
                let span = self
                    .tracer
                    .span_builder(CONSUME_SPAN_NAME)
                    .with_kind(SpanKind::Consumer)
                    .with_attributes(MessageFields::from(view).attributes())
                    .start_with_context(&self.tracer, &parent);
                Some(parent.with_span(span))
            }
            Err(reason) => {
                self.diagnostics.emit(format_args!("{}", reason));
                None
            }
        };

        let result = match &cx {
            Some(cx) => self.inner.handle(lease).with_context(cx.clone()).await,
            None => self.inner.handle(lease).await,
        };

        if let Some(cx) = &cx {
            let span = cx.span();
            match &result {
                Ok(()) => span.set_status(Status::Ok),
                Err(e) => span.set_status(Status::error(format!("{:#}", e))),
            }
            finish(&span);
        }

        if let Err(e) = result {
            warn!(message_id = %message_id, error = %format!("{:#}", e), "Traced message handler failed");
        } else {
            debug!(message_id = %message_id, "Traced message handled");
        }
        Ok(())
    }
}

/// [`simple_consume`] with every message handled inside a consume span
pub async fn traced_simple_consume<H, T>(
    config: &ClientConfig,
    options: ConsumerOptions,
    connector: &dyn BrokerConnector,
    handler: H,
    tracer: T,
) -> Result<ConsumerHandle, FacadeError>
where
    H: MessageHandler,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    let handler =
        TracedHandler::new(handler, tracer).with_diagnostics(Diagnostics::from_config(config));
    simple_consume(config, options, connector, handler).await
}
