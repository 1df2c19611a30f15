//! Single-resolution result handles.
//!
//! Every queued channel operation hands back a [`Deferred`]. The caller registers reactions on
//! it (or awaits it) and the channel resolves it once, when the confirmation arrives, when the
//! frame cannot be sent, or when the channel goes away.
//!
//! ```no_run
//! # use metalmq_channel::{Channel, frame::QueueDeclareArgs};
//! # fn declare(channel: &Channel) {
//! channel
//!     .declare_queue(QueueDeclareArgs::default().name("orders"))
//!     .on_success(|queue| println!("{} has {} messages", queue.name, queue.message_count))
//!     .on_error(|err| eprintln!("declare failed {}", err))
//!     .on_finalize(|| println!("done"));
//! # }
//! ```

use crate::error::ClientError;
use log::{trace, warn};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Succeeded,
    Failed,
}

/// Result of `Queue.Declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Deferred of a queue declaration.
pub type DeferredQueue = Deferred<QueueInfo>;
/// Deferred of a queue purge or delete, the success value is the number of messages removed.
pub type DeferredDelete = Deferred<u32>;
/// Deferred of a consume, the success value is the consumer tag.
pub type DeferredConsumer = Deferred<String>;
/// Deferred of a cancel, the success value is the cancelled consumer tag.
pub type DeferredCancel = Deferred<String>;

type SuccessFn<T> = Box<dyn FnOnce(&T)>;
type ErrorFn = Box<dyn FnOnce(&ClientError)>;
type FinalizeFn = Box<dyn FnOnce()>;

enum Outcome<T> {
    Pending,
    Success(T),
    Error(ClientError),
}

struct Slots<T> {
    outcome: Outcome<T>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
    on_finalize: Option<FinalizeFn>,
    finalized: bool,
    /// Every task awaiting one of the clones.
    wakers: Vec<Waker>,
}

/// Handle of an operation result. Clones share the same result.
pub struct Deferred<T> {
    slots: Rc<RefCell<Slots<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub(crate) fn new() -> Self {
        Deferred {
            slots: Rc::new(RefCell::new(Slots {
                outcome: Outcome::Pending,
                on_success: None,
                on_error: None,
                on_finalize: None,
                finalized: false,
                wakers: vec![],
            })),
        }
    }

    pub(crate) fn failed(err: ClientError) -> Self {
        let deferred = Self::new();
        deferred.reject(err);
        deferred
    }

    pub fn state(&self) -> DeferredState {
        match self.slots.borrow().outcome {
            Outcome::Pending => DeferredState::Pending,
            Outcome::Success(_) => DeferredState::Succeeded,
            Outcome::Error(_) => DeferredState::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// Registers the success reaction, replacing the previous one. If the deferred already
    /// succeeded the reaction runs right away.
    pub fn on_success<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce(&T) + 'static,
    {
        let mut slots = self.slots.borrow_mut();

        let value = match &slots.outcome {
            Outcome::Pending => None,
            Outcome::Success(value) => Some(value.clone()),
            Outcome::Error(_) => return self,
        };

        match value {
            Some(value) => {
                drop(slots);
                reaction(&value);
            }
            None => slots.on_success = Some(Box::new(reaction)),
        }

        self
    }

    /// Registers the error reaction, replacing the previous one. If the deferred already failed
    /// the reaction runs right away.
    pub fn on_error<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce(&ClientError) + 'static,
    {
        let mut slots = self.slots.borrow_mut();

        let err = match &slots.outcome {
            Outcome::Pending => None,
            Outcome::Error(err) => Some(err.clone()),
            Outcome::Success(_) => return self,
        };

        match err {
            Some(err) => {
                drop(slots);
                reaction(&err);
            }
            None => slots.on_error = Some(Box::new(reaction)),
        }

        self
    }

    /// Registers the reaction which runs once after the deferred succeeded or failed.
    pub fn on_finalize<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce() + 'static,
    {
        let mut slots = self.slots.borrow_mut();

        if let Outcome::Pending = slots.outcome {
            slots.on_finalize = Some(Box::new(reaction));
            return self;
        }

        if slots.finalized {
            warn!("Finalize reaction is registered after finalization, it is dropped");
            return self;
        }

        slots.finalized = true;
        drop(slots);

        reaction();

        self
    }

    /// Resolves with success. Returns false and does nothing if the deferred was already
    /// resolved.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let (reaction, wakers) = {
            let mut slots = self.slots.borrow_mut();

            if !matches!(slots.outcome, Outcome::Pending) {
                warn!("Deferred is already resolved, success is ignored");
                return false;
            }

            slots.outcome = Outcome::Success(value.clone());
            slots.on_error = None;

            (slots.on_success.take(), std::mem::take(&mut slots.wakers))
        };

        trace!("Deferred resolved with success");

        if let Some(reaction) = reaction {
            reaction(&value);
        }

        for waker in wakers {
            waker.wake();
        }

        self.finalize();

        true
    }

    /// Resolves with error. Returns false and does nothing if the deferred was already resolved.
    pub(crate) fn reject(&self, err: ClientError) -> bool {
        let (reaction, wakers) = {
            let mut slots = self.slots.borrow_mut();

            if !matches!(slots.outcome, Outcome::Pending) {
                warn!("Deferred is already resolved, error {} is ignored", err);
                return false;
            }

            slots.outcome = Outcome::Error(err.clone());
            slots.on_success = None;

            (slots.on_error.take(), std::mem::take(&mut slots.wakers))
        };

        trace!("Deferred resolved with error {}", err);

        if let Some(reaction) = reaction {
            reaction(&err);
        }

        for waker in wakers {
            waker.wake();
        }

        self.finalize();

        true
    }

    fn finalize(&self) {
        let reaction = {
            let mut slots = self.slots.borrow_mut();

            if slots.finalized {
                return;
            }

            match slots.on_finalize.take() {
                Some(reaction) => {
                    slots.finalized = true;
                    reaction
                }
                None => return,
            }
        };

        reaction();
    }
}

impl<T: Clone + 'static> Future for Deferred<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slots = self.slots.borrow_mut();

        if let Outcome::Pending = slots.outcome {
            if !slots.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                slots.wakers.push(cx.waker().clone());
            }

            return Poll::Pending;
        }

        match &slots.outcome {
            Outcome::Success(value) => Poll::Ready(Ok(value.clone())),
            Outcome::Error(err) => Poll::Ready(Err(err.clone())),
            Outcome::Pending => unreachable!(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.slots.borrow().outcome {
            Outcome::Pending => "Pending",
            Outcome::Success(_) => "Succeeded",
            Outcome::Error(_) => "Failed",
        };

        write!(f, "Deferred {{ state={} }}", state)
    }
}
