//! The channel engine. It sends the requests through the transport, matches the confirmations
//! with the awaiting requests and resolves their deferreds.
//!
//! Everything runs on one thread. The engine never runs a reaction or a callback while it holds
//! the inner borrow, the side effects are collected as [`Settlement`]s and executed at the end of
//! the entry point, so reactions can call the channel again.

use crate::config::{ChannelConfig, FailurePolicy};
use crate::deferred::Deferred;
use crate::error::{ClientError, ErrorKind};
use crate::frame::{self, ChannelCloseArgs, Confirmation, MethodFrame};
use crate::model::{self, ChannelNumber};
use crate::sequencer::{settle, Operation, OperationSequencer, Resolver, Settlement};
use crate::state::{ChannelState, Phase, Transition};
use log::{debug, error, info, trace, warn};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// The connection side which puts the frames on the wire.
///
/// `transmit` returns false if the connection cannot accept the frame. It is called while the
/// channel is in the middle of an operation, so it must not call back into the same channel.
pub trait Transmit {
    fn transmit(&self, channel: ChannelNumber, frame: MethodFrame) -> bool;
}

pub(crate) struct ChannelInner {
    pub(crate) id: ChannelNumber,
    transport: Weak<dyn Transmit>,
    pub(crate) config: ChannelConfig,
    pub(crate) state: ChannelState,
    pub(crate) sequencer: OperationSequencer,
    /// Resolved by `Channel.OpenOk`.
    opened: Deferred<()>,
    ready_callback: Option<Box<dyn FnOnce()>>,
    error_callback: Option<Box<dyn FnOnce(&ClientError)>>,
    /// The error which closed the channel.
    pub(crate) close_reason: Option<ClientError>,
}

/// A channel of an AMQP connection. Clones are handles of the same channel.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Rc<RefCell<ChannelInner>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => write!(f, "Channel {{ id={}, state={:?} }}", inner.id, inner.state),
            Err(_) => write!(f, "Channel {{ <busy> }}"),
        }
    }
}

impl ChannelInner {
    fn send(&self, frame: MethodFrame) -> bool {
        trace!("Channel {} sends {:08X}", self.id, frame.class_method());

        match self.transport.upgrade() {
            Some(transport) => transport.transmit(self.id, frame),
            None => {
                warn!("Channel {} has no transport, frame is dropped", self.id);

                false
            }
        }
    }

    /// Sends a request of an open channel. The request is either settled right away (no-wait or
    /// send failure) or it waits for the confirmation.
    fn dispatch(&mut self, frame: MethodFrame, resolver: Resolver, settlements: &mut Vec<Settlement>) {
        let cm = frame.class_method();

        let expected = match frame.reply() {
            Some(expected) => expected,
            None => {
                error!("Method {:08X} is never confirmed, it cannot be queued", cm);

                settlements.push(Settlement::Fail(
                    resolver,
                    ClientError::new(
                        ErrorKind::Misuse,
                        Some(self.id),
                        model::ConnectionError::CommandInvalid as u16,
                        "Method is not confirmed by the broker",
                        cm,
                    ),
                ));

                return;
            }
        };

        if !self.send(frame.clone()) {
            settlements.push(Settlement::Fail(resolver, ClientError::local_dispatch(self.id, cm)));

            return;
        }

        self.state.issued(&frame);

        let assumed = if frame.no_wait() { frame.assumed_reply() } else { None };

        match assumed {
            Some(confirmation) => {
                trace!("Channel {} no-wait {:08X} is settled locally", self.id, cm);

                self.state.confirmed(&frame, &confirmation);
                settlements.push(Settlement::Resolve(resolver, confirmation));
            }
            None => self.sequencer.push(expected, frame, resolver),
        }
    }

    fn flush_outbox(&mut self, settlements: &mut Vec<Settlement>) {
        let parked = self.sequencer.take_outbox();

        if !parked.is_empty() {
            debug!("Channel {} sends {} parked operations", self.id, parked.len());
        }

        for op in parked {
            // A parked close makes the rest of the outbox unusable.
            if self.state.is_open() {
                self.dispatch(op.frame, op.resolver, settlements);
            } else {
                let err = ClientError::not_usable(self.id, op.frame.class_method());

                settlements.push(Settlement::Fail(op.resolver, err));
            }
        }
    }

    fn confirm(&mut self, confirmation: Confirmation, settlements: &mut Vec<Settlement>) {
        let cm = confirmation.class_method();

        if self.state.phase() == Phase::Closed {
            debug!("Channel {} is closed, confirmation {:08X} is ignored", self.id, cm);

            return;
        }

        let expected = match self.sequencer.head() {
            Some(head) => head.expected,
            None => {
                warn!("Channel {} doesn't wait for anything, confirmation {:08X} is ignored", self.id, cm);

                return;
            }
        };

        if expected != cm {
            let err = ClientError::mismatch(self.id, expected, cm);

            error!("Channel {} is out of sync {}", self.id, err);

            self.send(ChannelCloseArgs::new(err.code, &err.message, cm).frame());
            self.close_with_error(err, settlements);

            return;
        }

        let awaiting = match self.sequencer.pop() {
            Some(awaiting) => awaiting,
            None => return,
        };

        let transition = self.state.confirmed(&awaiting.request, &confirmation);

        settlements.push(Settlement::Resolve(awaiting.resolver, confirmation));

        match transition {
            Transition::Opened => {
                info!("Channel {} is open", self.id);

                if let Some(callback) = self.ready_callback.take() {
                    settlements.push(Settlement::Ready(callback));
                }

                self.flush_outbox(settlements);
            }
            Transition::Closed => {
                info!("Channel {} is closed", self.id);

                self.ready_callback = None;
                self.error_callback = None;

                for (cm, resolver) in self.sequencer.drain() {
                    settlements.push(Settlement::Fail(resolver, ClientError::closed(self.id, cm)));
                }
            }
            Transition::None => (),
        }
    }

    /// Closes the channel because of an error. Everything which is still pending fails with the
    /// error, then the error callback is called.
    fn close_with_error(&mut self, err: ClientError, settlements: &mut Vec<Settlement>) {
        if self.state.phase() == Phase::Closed {
            return;
        }

        warn!("Channel {} is closed by error {}", self.id, err);

        self.state.transition(Phase::Closed);
        self.ready_callback = None;

        if let Some(callback) = self.error_callback.take() {
            settlements.push(Settlement::ChannelError(callback, err.clone()));
        }

        for (cm, resolver) in self.sequencer.drain() {
            settlements.push(Settlement::Fail(resolver, err.for_method(cm)));
        }

        self.close_reason = Some(err);
    }

    fn channel_error(&mut self, err: ClientError, settlements: &mut Vec<Settlement>) {
        if self.state.phase() == Phase::Closed {
            debug!("Channel {} is already closed, error {} is ignored", self.id, err);

            return;
        }

        self.send(frame::channel_close_ok());
        self.close_with_error(err, settlements);
    }

    fn operation_error(&mut self, err: ClientError, settlements: &mut Vec<Settlement>) {
        if self.config.failure_policy == FailurePolicy::CloseChannel {
            self.channel_error(err, settlements);

            return;
        }

        let head = match self.sequencer.pop() {
            Some(head) => head,
            None => {
                warn!("Channel {} doesn't wait for anything, error {} is ignored", self.id, err);

                return;
            }
        };

        debug!("Channel {} operation {:08X} failed {}", self.id, head.request.class_method(), err);

        match head.request {
            MethodFrame::TxSelect => self.state.select_failed(),
            MethodFrame::ChannelOpen => {
                settlements.push(Settlement::Fail(head.resolver, err.clone()));
                self.close_with_error(err, settlements);

                return;
            }
            _ => (),
        }

        let cm = head.request.class_method();

        settlements.push(Settlement::Fail(head.resolver, err.for_method(cm)));
    }
}

impl Channel {
    /// Creates the channel and sends the `Channel.Open`. Operations requested before the channel
    /// is open are sent in order after `Channel.OpenOk` arrives.
    pub fn open(id: ChannelNumber, transport: Weak<dyn Transmit>, config: ChannelConfig) -> Channel {
        let opened = Deferred::new();

        let mut inner = ChannelInner {
            id,
            transport,
            config,
            state: ChannelState::default(),
            sequencer: OperationSequencer::default(),
            opened: opened.clone(),
            ready_callback: None,
            error_callback: None,
            close_reason: None,
        };

        let mut settlements = vec![];

        debug!("Opening channel {}", id);

        if inner.send(frame::channel_open()) {
            inner
                .sequencer
                .push(frame::CHANNEL_OPEN_OK, frame::channel_open(), Resolver::Bare(opened));
        } else {
            let err = ClientError::local_dispatch(id, frame::CHANNEL_OPEN);

            settlements.push(Settlement::Fail(Resolver::Bare(opened), err.clone()));
            inner.close_with_error(err, &mut settlements);
        }

        settle(settlements);

        Channel {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Queues an operation and hands back the deferred of its result.
    pub(crate) fn call<T>(&self, frame: MethodFrame, wrap: fn(Deferred<T>) -> Resolver) -> Deferred<T>
    where
        T: Clone + 'static,
    {
        let deferred = Deferred::new();

        self.enqueue(frame, wrap(deferred.clone()));

        deferred
    }

    fn enqueue(&self, frame: MethodFrame, resolver: Resolver) {
        let mut settlements = vec![];

        {
            let mut inner = self.inner.borrow_mut();

            if !inner.state.accepts_operations() {
                debug!("Channel {} is not usable, {:08X} is refused", inner.id, frame.class_method());

                let err = ClientError::not_usable(inner.id, frame.class_method());

                settlements.push(Settlement::Fail(resolver, err));
            } else if inner.state.phase() == Phase::Opening {
                trace!("Channel {} parks {:08X} until open", inner.id, frame.class_method());

                inner.sequencer.park(Operation { frame, resolver });
            } else {
                inner.dispatch(frame, resolver, &mut settlements);
            }
        }

        settle(settlements);
    }

    /// Sends a method which is never confirmed. Returns true if the transport accepted it.
    pub(crate) fn send_immediate(&self, frame: MethodFrame) -> bool {
        let mut inner = self.inner.borrow_mut();

        if !inner.state.is_open() {
            debug!("Channel {} is not open, {:08X} is not sent", inner.id, frame.class_method());

            return false;
        }

        if !inner.send(frame.clone()) {
            return false;
        }

        inner.state.issued(&frame);

        true
    }

    /// Deferred of the channel opening, it succeeds when `Channel.OpenOk` arrives.
    pub fn ready(&self) -> Deferred<()> {
        self.inner.borrow().opened.clone()
    }

    /// Registers the callback of the channel becoming open, replacing the previous one. If the
    /// channel is already open it is called right away.
    pub fn on_ready<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();

        match inner.state.phase() {
            Phase::Opening => inner.ready_callback = Some(Box::new(callback)),
            Phase::Open => {
                drop(inner);
                callback();
            }
            Phase::Closing | Phase::Closed => debug!("Channel {} won't be ready again", inner.id),
        }

        self
    }

    /// Registers the callback of the channel being closed by an error, replacing the previous
    /// one. If the channel has already been closed by an error it is called right away.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&ClientError) + 'static,
    {
        let mut inner = self.inner.borrow_mut();

        if inner.state.phase() != Phase::Closed {
            inner.error_callback = Some(Box::new(callback));

            return self;
        }

        let reason = inner.close_reason.clone();
        drop(inner);

        if let Some(reason) = reason {
            callback(&reason);
        }

        self
    }

    /// A confirmation arrived from the broker.
    pub fn on_confirmation(&self, confirmation: Confirmation) {
        let mut settlements = vec![];

        self.inner.borrow_mut().confirm(confirmation, &mut settlements);

        settle(settlements);
    }

    /// The broker closed the channel with `Channel.Close`. The channel answers with
    /// `Channel.CloseOk` and fails everything pending.
    pub fn on_channel_error(&self, err: ClientError) {
        let mut settlements = vec![];

        self.inner.borrow_mut().channel_error(err, &mut settlements);

        settle(settlements);
    }

    /// The operation at the head of the queue failed. What happens to the channel depends on the
    /// failure policy of the config.
    pub fn on_operation_error(&self, err: ClientError) {
        let mut settlements = vec![];

        self.inner.borrow_mut().operation_error(err, &mut settlements);

        settle(settlements);
    }

    /// A message was delivered to one of the consumers of the channel.
    pub fn on_delivery(&self, consumer_tag: &str, delivery_tag: u64) {
        let mut inner = self.inner.borrow_mut();

        if inner.state.phase() == Phase::Closed {
            debug!("Channel {} is closed, delivery {} is ignored", inner.id, delivery_tag);

            return;
        }

        inner.state.delivered(consumer_tag, delivery_tag);
    }

    /// The broker cancelled a consumer by `Basic.Cancel`.
    pub fn on_consumer_cancelled(&self, consumer_tag: &str) {
        let mut inner = self.inner.borrow_mut();

        if inner.state.consumer_cancelled(consumer_tag) {
            info!("Channel {} consumer {} is cancelled by the broker", inner.id, consumer_tag);
        } else {
            warn!("Channel {} cancel of unknown consumer {}", inner.id, consumer_tag);
        }
    }

    /// The connection is gone, nothing can be sent any more.
    pub fn on_connection_lost(&self, err: ClientError) {
        let mut settlements = vec![];

        {
            let mut inner = self.inner.borrow_mut();
            let err = ClientError {
                channel: Some(inner.id),
                ..err
            };

            inner.close_with_error(err, &mut settlements);
        }

        settle(settlements);
    }
}
