//! The operations of a channel as the application sees them.
//!
//! Every operation which the broker confirms returns a deferred, publish, ack and reject return
//! only whether the frame was handed over to the transport.

use crate::channel::Channel;
use crate::client_error;
use crate::deferred::{Deferred, DeferredCancel, DeferredConsumer, DeferredDelete, DeferredQueue};
use crate::error::{ClientError, ErrorKind};
use crate::frame::{
    self, BasicAckArgs, BasicAckFlags, BasicCancelArgs, BasicCancelFlags, BasicConsumeArgs, BasicConsumeFlags,
    BasicNackArgs, BasicPublishArgs, BasicPublishFlags, BasicQosArgs, BasicRecoverArgs, BasicRecoverFlags,
    BasicRejectArgs, BasicRejectFlags, ChannelCloseArgs, ChannelFlowArgs, Envelope, ExchangeBindArgs,
    ExchangeDeclareArgs, ExchangeDeleteArgs, ExchangeDeleteFlags, MethodFrame, QueueBindArgs, QueueDeclareArgs,
    QueueDeleteArgs, QueueDeleteFlags, QueuePurgeArgs, QueuePurgeFlags, QueueUnbindArgs,
};
use crate::model::{self, ChannelNumber, ClassMethod};
use crate::sequencer::Resolver;
use crate::state::Phase;
use anyhow::Result;
use log::{debug, warn};

/// Exchange, queue and consumer names are AMQP short strings.
const MAX_NAME_LEN: usize = 255;

impl Channel {
    pub fn id(&self) -> ChannelNumber {
        self.inner.borrow().id
    }

    /// True if the channel is open.
    pub fn connected(&self) -> bool {
        self.inner.borrow().state.is_open()
    }

    pub fn phase(&self) -> Phase {
        self.inner.borrow().state.phase()
    }

    pub fn is_transactional(&self) -> bool {
        let inner = self.inner.borrow();

        inner.state.transactional || inner.sequencer.is_parked(frame::TX_SELECT)
    }

    /// True if the deliveries were paused by a confirmed `pause()`.
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().state.paused
    }

    pub fn prefetch_count(&self) -> u16 {
        self.inner.borrow().state.prefetch_count
    }

    /// Tags of the active consumers in alphabetical order.
    pub fn consumer_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.inner.borrow().state.consumers.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// The queue the consumer consumes.
    pub fn consumed_queue(&self, consumer_tag: &str) -> Option<String> {
        self.inner.borrow().state.consumers.get(consumer_tag).map(|c| c.queue.clone())
    }

    /// Delivery tags waiting for ack or reject.
    pub fn outstanding_deliveries(&self) -> Vec<u64> {
        self.inner.borrow().state.outstanding()
    }

    pub fn last_delivery_tag(&self) -> u64 {
        self.inner.borrow().state.last_delivery_tag
    }

    /// The number of operations which are not resolved yet.
    pub fn pending_operations(&self) -> usize {
        let inner = self.inner.borrow();

        inner.sequencer.awaiting_len() + inner.sequencer.outbox_len()
    }

    /// The error which closed the channel.
    pub fn close_reason(&self) -> Option<ClientError> {
        self.inner.borrow().close_reason.clone()
    }

    /// Asks the broker to stop the deliveries.
    pub fn pause(&self) -> Deferred<()> {
        self.call(ChannelFlowArgs::default().active(false).frame(), Resolver::Bare)
    }

    /// Asks the broker to continue the deliveries.
    pub fn resume(&self) -> Deferred<()> {
        self.call(ChannelFlowArgs::default().active(true).frame(), Resolver::Bare)
    }

    /// Puts the channel in transactional mode. There is no way back, after commit or rollback a
    /// new transaction starts.
    pub fn start_transaction(&self) -> Deferred<()> {
        self.call(frame::tx_select(), Resolver::Bare)
    }

    pub fn commit_transaction(&self) -> Result<Deferred<()>> {
        self.check_transaction(frame::TX_COMMIT)?;

        Ok(self.call(frame::tx_commit(), Resolver::Bare))
    }

    pub fn rollback_transaction(&self) -> Result<Deferred<()>> {
        self.check_transaction(frame::TX_ROLLBACK)?;

        Ok(self.call(frame::tx_rollback(), Resolver::Bare))
    }

    fn check_transaction(&self, cm: ClassMethod) -> Result<()> {
        if self.is_transactional() {
            return Ok(());
        }

        client_error!(
            ErrorKind::Misuse,
            Some(self.id()),
            model::ChannelError::PreconditionFailed as u16,
            "PRECONDITION_FAILED - channel is not transactional",
            cm
        )
    }

    /// Declares an exchange.
    ///
    /// ```no_run
    /// # use metalmq_channel::{Channel, ExchangeType, frame::ExchangeDeclareArgs};
    /// # fn declare(channel: &Channel) {
    /// channel.declare_exchange(ExchangeDeclareArgs::new("logs", ExchangeType::Topic).durable(true));
    /// # }
    /// ```
    pub fn declare_exchange(&self, args: ExchangeDeclareArgs) -> Deferred<()> {
        if let Some(err) = self.check_names(frame::EXCHANGE_DECLARE, &[&args.exchange_name]) {
            return Deferred::failed(err);
        }

        self.call(args.frame(), Resolver::Bare)
    }

    pub fn remove_exchange(&self, exchange_name: &str, flags: ExchangeDeleteFlags) -> Deferred<()> {
        if let Some(err) = self.check_names(frame::EXCHANGE_DELETE, &[exchange_name]) {
            return Deferred::failed(err);
        }

        let args = ExchangeDeleteArgs {
            exchange_name: exchange_name.to_string(),
            flags,
        };

        self.call(args.frame(), Resolver::Bare)
    }

    /// Binds the destination exchange to the source one.
    pub fn bind_exchange(&self, args: ExchangeBindArgs) -> Deferred<()> {
        if let Some(err) = self.check_names(frame::EXCHANGE_BIND, &[&args.source, &args.destination, &args.routing_key]) {
            return Deferred::failed(err);
        }

        self.call(MethodFrame::ExchangeBind(args), Resolver::Bare)
    }

    pub fn unbind_exchange(&self, args: ExchangeBindArgs) -> Deferred<()> {
        if let Some(err) = self.check_names(frame::EXCHANGE_UNBIND, &[&args.source, &args.destination, &args.routing_key])
        {
            return Deferred::failed(err);
        }

        self.call(MethodFrame::ExchangeUnbind(args), Resolver::Bare)
    }

    /// Declares a queue. With an empty name the broker generates one, the deferred gets it back.
    /// A no-wait declaration resolves with the requested name and zero counts.
    pub fn declare_queue(&self, args: QueueDeclareArgs) -> DeferredQueue {
        if let Some(err) = self.check_names(frame::QUEUE_DECLARE, &[&args.name]) {
            return Deferred::failed(err);
        }

        self.call(args.frame(), Resolver::Queue)
    }

    pub fn bind_queue(&self, args: QueueBindArgs) -> Deferred<()> {
        if let Some(err) = self.check_names(frame::QUEUE_BIND, &[&args.queue_name, &args.exchange_name, &args.routing_key]) {
            return Deferred::failed(err);
        }

        self.call(args.frame(), Resolver::Bare)
    }

    pub fn unbind_queue(&self, args: QueueUnbindArgs) -> Deferred<()> {
        if let Some(err) =
            self.check_names(frame::QUEUE_UNBIND, &[&args.queue_name, &args.exchange_name, &args.routing_key])
        {
            return Deferred::failed(err);
        }

        self.call(args.frame(), Resolver::Bare)
    }

    /// Removes the ready messages of a queue, the deferred gets the number of purged messages.
    pub fn purge_queue(&self, queue_name: &str, flags: QueuePurgeFlags) -> DeferredDelete {
        if let Some(err) = self.check_names(frame::QUEUE_PURGE, &[queue_name]) {
            return Deferred::failed(err);
        }

        let args = QueuePurgeArgs {
            queue_name: queue_name.to_string(),
            flags,
        };

        self.call(args.frame(), Resolver::Count)
    }

    /// Deletes a queue, the deferred gets the number of messages deleted with it.
    pub fn remove_queue(&self, queue_name: &str, flags: QueueDeleteFlags) -> DeferredDelete {
        if let Some(err) = self.check_names(frame::QUEUE_DELETE, &[queue_name]) {
            return Deferred::failed(err);
        }

        let args = QueueDeleteArgs {
            queue_name: queue_name.to_string(),
            flags,
        };

        self.call(args.frame(), Resolver::Count)
    }

    /// Publishes a message. Returns false if the channel is not open or the transport didn't
    /// take the frame.
    pub fn publish<E>(&self, exchange_name: &str, routing_key: &str, envelope: E, flags: BasicPublishFlags) -> bool
    where
        E: Into<Envelope>,
    {
        if self.check_names(frame::BASIC_PUBLISH, &[exchange_name, routing_key]).is_some() {
            return false;
        }

        let mut args = BasicPublishArgs::new(exchange_name, routing_key).envelope(envelope.into());
        args.flags = flags;

        self.send_immediate(args.frame())
    }

    /// Limits the number of unacked messages the broker sends to the consumers of the channel.
    pub fn set_qos(&self, prefetch_count: u16) -> Deferred<()> {
        self.call(BasicQosArgs::default().prefetch_count(prefetch_count).frame(), Resolver::Bare)
    }

    /// Starts consuming a queue. The deferred gets the consumer tag, the one the broker generated
    /// if the tag was empty. A no-wait consume without tag gets a generated one, since the broker
    /// won't tell it.
    pub fn consume(&self, mut args: BasicConsumeArgs) -> DeferredConsumer {
        if let Some(err) = self.check_names(frame::BASIC_CONSUME, &[&args.queue, &args.consumer_tag]) {
            return Deferred::failed(err);
        }

        if args.consumer_tag.is_empty() && args.flags.contains(BasicConsumeFlags::NO_WAIT) {
            args.consumer_tag = format!("ctag-{}", uuid::Uuid::new_v4());

            debug!("Generated consumer tag {}", args.consumer_tag);
        }

        self.call(args.frame(), Resolver::Tag)
    }

    /// Stops a consumer, the deferred gets the consumer tag back.
    pub fn cancel(&self, consumer_tag: &str, flags: BasicCancelFlags) -> DeferredCancel {
        if !self.inner.borrow().state.consumers.contains_key(consumer_tag) {
            warn!("Cancelling consumer {} which is not known to be active", consumer_tag);
        }

        let mut args = BasicCancelArgs::new(consumer_tag);
        args.flags = flags;

        self.call(args.frame(), Resolver::Tag)
    }

    /// Acknowledges a delivery, with `MULTIPLE` all the outstanding deliveries up to the tag.
    pub fn ack(&self, delivery_tag: u64, flags: BasicAckFlags) -> bool {
        let multiple = flags.contains(BasicAckFlags::MULTIPLE);

        if !self.check_delivery_tag(delivery_tag, multiple) {
            return false;
        }

        self.send_immediate(BasicAckArgs::default().delivery_tag(delivery_tag).multiple(multiple).frame())
    }

    /// Rejects a delivery. With `MULTIPLE` it is sent as `Basic.Nack`, plain `Basic.Reject`
    /// cannot reject more messages.
    pub fn reject(&self, delivery_tag: u64, flags: BasicRejectFlags) -> bool {
        let multiple = flags.contains(BasicRejectFlags::MULTIPLE);
        let requeue = flags.contains(BasicRejectFlags::REQUEUE);

        if !self.check_delivery_tag(delivery_tag, multiple) {
            return false;
        }

        let frame = if multiple {
            BasicNackArgs::default()
                .delivery_tag(delivery_tag)
                .multiple(true)
                .requeue(requeue)
                .frame()
        } else {
            BasicRejectArgs::default().delivery_tag(delivery_tag).requeue(requeue).frame()
        };

        self.send_immediate(frame)
    }

    /// Asks the broker to redeliver the unacked messages.
    pub fn recover(&self, flags: BasicRecoverFlags) -> Deferred<()> {
        let args = BasicRecoverArgs::default().requeue(flags.contains(BasicRecoverFlags::REQUEUE));

        self.call(args.frame(), Resolver::Bare)
    }

    /// Closes the channel. Operations requested before are still sent and confirmed, the ones
    /// requested after fail.
    pub fn close(&self) -> Deferred<()> {
        let args = ChannelCloseArgs::new(model::ChannelError::Success as u16, "Normal shutdown", 0);

        self.call(args.frame(), Resolver::Bare)
    }

    fn check_names(&self, cm: ClassMethod, names: &[&str]) -> Option<ClientError> {
        let too_long = names.iter().find(|name| name.len() > MAX_NAME_LEN)?;

        let prefix: String = too_long.chars().take(16).collect();

        warn!("Name {}... is longer than {} bytes", prefix, MAX_NAME_LEN);

        Some(ClientError::new(
            ErrorKind::Misuse,
            Some(self.id()),
            model::ConnectionError::SyntaxError as u16,
            "Name is longer than 255 bytes",
            cm,
        ))
    }

    fn check_delivery_tag(&self, delivery_tag: u64, multiple: bool) -> bool {
        let inner = self.inner.borrow();

        if !inner.config.validate_delivery_tags || inner.state.can_settle(delivery_tag, multiple) {
            return true;
        }

        warn!(
            "Channel {} delivery tag {} (multiple={}) is not outstanding",
            inner.id, delivery_tag, multiple
        );

        false
    }
}
