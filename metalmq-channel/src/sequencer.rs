//! Ordering of the requests and the confirmations.
//!
//! AMQP answers the synchronous methods of a channel in the order they were sent, so the
//! sequencer is two FIFO queues. The outbox holds what was requested before the channel opened,
//! the awaiting queue holds what was sent and is not confirmed yet.

use crate::deferred::{Deferred, QueueInfo};
use crate::error::{ClientError, ErrorKind};
use crate::frame::{Confirmation, MethodFrame};
use crate::model::{self, ClassMethod};
use log::warn;
use std::collections::VecDeque;

/// The deferred of an operation, typed by what its confirmation carries.
pub(crate) enum Resolver {
    Bare(Deferred<()>),
    Queue(Deferred<QueueInfo>),
    Count(Deferred<u32>),
    Tag(Deferred<String>),
}

impl Resolver {
    pub(crate) fn resolve(self, confirmation: Confirmation) {
        match (self, confirmation) {
            (Resolver::Queue(d), Confirmation::QueueDeclareOk(args)) => {
                d.resolve(QueueInfo {
                    name: args.name,
                    message_count: args.message_count,
                    consumer_count: args.consumer_count,
                });
            }
            (Resolver::Count(d), Confirmation::QueuePurgeOk(args)) => {
                d.resolve(args.message_count);
            }
            (Resolver::Count(d), Confirmation::QueueDeleteOk(args)) => {
                d.resolve(args.message_count);
            }
            (Resolver::Tag(d), Confirmation::BasicConsumeOk(args)) => {
                d.resolve(args.consumer_tag);
            }
            (Resolver::Tag(d), Confirmation::BasicCancelOk(args)) => {
                d.resolve(args.consumer_tag);
            }
            (Resolver::Bare(d), _) => {
                d.resolve(());
            }
            (resolver, confirmation) => {
                // Class-methods were already matched, only a wrongly typed deferred gets here.
                warn!(
                    "Confirmation {:08X} doesn't fit the deferred of the operation",
                    confirmation.class_method()
                );
                resolver.fail(ClientError::new(
                    ErrorKind::ProtocolMismatch,
                    None,
                    model::ConnectionError::UnexpectedFrame as u16,
                    "Confirmation doesn't fit the operation",
                    confirmation.class_method(),
                ));
            }
        }
    }

    pub(crate) fn fail(self, err: ClientError) {
        match self {
            Resolver::Bare(d) => d.reject(err),
            Resolver::Queue(d) => d.reject(err),
            Resolver::Count(d) => d.reject(err),
            Resolver::Tag(d) => d.reject(err),
        };
    }
}

/// A request which is not sent yet.
pub(crate) struct Operation {
    pub(crate) frame: MethodFrame,
    pub(crate) resolver: Resolver,
}

/// A request which was sent and waits for its confirmation.
pub(crate) struct Awaiting {
    pub(crate) expected: ClassMethod,
    pub(crate) request: MethodFrame,
    pub(crate) resolver: Resolver,
}

#[derive(Default)]
pub(crate) struct OperationSequencer {
    outbox: VecDeque<Operation>,
    awaiting: VecDeque<Awaiting>,
}

impl OperationSequencer {
    /// Keeps the operation until the channel can send it.
    pub(crate) fn park(&mut self, operation: Operation) {
        self.outbox.push_back(operation);
    }

    pub(crate) fn take_outbox(&mut self) -> VecDeque<Operation> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn push(&mut self, expected: ClassMethod, request: MethodFrame, resolver: Resolver) {
        self.awaiting.push_back(Awaiting {
            expected,
            request,
            resolver,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<Awaiting> {
        self.awaiting.pop_front()
    }

    pub(crate) fn head(&self) -> Option<&Awaiting> {
        self.awaiting.front()
    }

    /// Removes everything, the awaiting operations come first in the order they were sent.
    pub(crate) fn drain(&mut self) -> Vec<(ClassMethod, Resolver)> {
        let mut resolvers = Vec::with_capacity(self.awaiting.len() + self.outbox.len());

        for a in self.awaiting.drain(..) {
            resolvers.push((a.request.class_method(), a.resolver));
        }

        for o in self.outbox.drain(..) {
            resolvers.push((o.frame.class_method(), o.resolver));
        }

        resolvers
    }

    /// True if a request of the class-method waits in the outbox.
    pub(crate) fn is_parked(&self, class_method: ClassMethod) -> bool {
        self.outbox.iter().any(|o| o.frame.class_method() == class_method)
    }

    pub(crate) fn awaiting_len(&self) -> usize {
        self.awaiting.len()
    }

    pub(crate) fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

/// Side effect collected under the channel borrow and executed after it was released, since
/// reactions are free to call the channel again.
pub(crate) enum Settlement {
    Resolve(Resolver, Confirmation),
    Fail(Resolver, ClientError),
    Ready(Box<dyn FnOnce()>),
    ChannelError(Box<dyn FnOnce(&ClientError)>, ClientError),
}

pub(crate) fn settle(settlements: Vec<Settlement>) {
    for settlement in settlements {
        match settlement {
            Settlement::Resolve(resolver, confirmation) => resolver.resolve(confirmation),
            Settlement::Fail(resolver, err) => resolver.fail(err),
            Settlement::Ready(callback) => callback(),
            Settlement::ChannelError(callback, err) => callback(&err),
        }
    }
}
