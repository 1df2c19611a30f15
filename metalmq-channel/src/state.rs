//! `state` keeps what the channel knows about itself: the lifecycle phase, the transaction mode,
//! the active consumers and the delivery tags which still need an ack or a reject.
//!
//! The state changes by the requests the channel sent (`issued`) and by the confirmations the
//! broker sent back (`confirmed`). It never talks to the transport, the channel does that.

use crate::frame::{Confirmation, MethodFrame};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Opening,
    Open,
    Closing,
    Closed,
}

impl Phase {
    fn can_become(self, next: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, next),
            (Opening, Open) | (Opening, Closing) | (Opening, Closed) | (Open, Closing) | (Open, Closed) | (Closing, Closed)
        )
    }
}

/// What a confirmation did to the lifecycle.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    None,
    Opened,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Consumer {
    pub(crate) queue: String,
    pub(crate) no_ack: bool,
}

pub(crate) struct ChannelState {
    phase: Phase,
    /// `Tx.Select` was sent and didn't fail.
    pub(crate) transactional: bool,
    /// Active consumers by consumer tag (`Basic.Consume`).
    pub(crate) consumers: HashMap<String, Consumer>,
    /// The highest delivery tag the broker sent on this channel.
    pub(crate) last_delivery_tag: u64,
    /// Delivery tags of the messages which wait for ack or reject.
    outstanding: BTreeSet<u64>,
    /// The broker was asked to stop the deliveries by `Channel.Flow`.
    pub(crate) paused: bool,
    pub(crate) prefetch_count: u16,
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChannelState {{ phase={:?}, transactional={}, consumers={}, outstanding={} }}",
            self.phase,
            self.transactional,
            self.consumers.len(),
            self.outstanding.len()
        )
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            phase: Phase::Opening,
            transactional: false,
            consumers: HashMap::new(),
            last_delivery_tag: 0,
            outstanding: BTreeSet::new(),
            paused: false,
            prefetch_count: 0,
        }
    }
}

impl ChannelState {
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Operations can be requested while the channel is opening or open.
    pub(crate) fn accepts_operations(&self) -> bool {
        matches!(self.phase, Phase::Opening | Phase::Open)
    }

    /// Moves to the next phase. Returns false if the transition is not allowed, in that case the
    /// phase doesn't change.
    pub(crate) fn transition(&mut self, next: Phase) -> bool {
        if self.phase == next {
            return false;
        }

        if !self.phase.can_become(next) {
            warn!("Channel cannot go from {:?} to {:?}", self.phase, next);

            return false;
        }

        debug!("Channel phase {:?} -> {:?}", self.phase, next);

        self.phase = next;

        if next == Phase::Closed {
            self.consumers.clear();
            self.outstanding.clear();
        }

        true
    }

    /// Bookkeeping of a request which has just been sent.
    pub(crate) fn issued(&mut self, request: &MethodFrame) {
        match request {
            MethodFrame::TxSelect => self.transactional = true,
            MethodFrame::ChannelClose(_) => {
                self.transition(Phase::Closing);
            }
            MethodFrame::BasicAck(args) => self.settled(args.delivery_tag, args.multiple),
            MethodFrame::BasicReject(args) => self.settled(args.delivery_tag, false),
            MethodFrame::BasicNack(args) => self.settled(args.delivery_tag, args.multiple),
            _ => (),
        }
    }

    /// Bookkeeping of a request which has been confirmed by the broker (or by itself in case of
    /// no-wait).
    pub(crate) fn confirmed(&mut self, request: &MethodFrame, confirmation: &Confirmation) -> Transition {
        match (request, confirmation) {
            (MethodFrame::ChannelOpen, Confirmation::ChannelOpenOk) => {
                // A close could have been requested in the meantime, then the channel stays closing.
                if self.phase == Phase::Opening && self.transition(Phase::Open) {
                    return Transition::Opened;
                }
            }
            (MethodFrame::ChannelClose(_), Confirmation::ChannelCloseOk) => {
                self.transition(Phase::Closed);

                return Transition::Closed;
            }
            (MethodFrame::ChannelFlow(_), Confirmation::ChannelFlowOk(args)) => {
                self.paused = !args.active;
            }
            (MethodFrame::BasicQos(args), Confirmation::BasicQosOk) => {
                self.prefetch_count = args.prefetch_count;
            }
            (MethodFrame::BasicConsume(args), Confirmation::BasicConsumeOk(ok)) => {
                self.consumers.insert(
                    ok.consumer_tag.clone(),
                    Consumer {
                        queue: args.queue.clone(),
                        no_ack: args.flags.contains(crate::frame::BasicConsumeFlags::NO_ACK),
                    },
                );
            }
            (MethodFrame::BasicCancel(_), Confirmation::BasicCancelOk(ok)) => {
                self.consumers.remove(&ok.consumer_tag);
            }
            (MethodFrame::BasicRecover(_), Confirmation::BasicRecoverOk) => {
                // Every unacked message is going to be redelivered with a new tag.
                self.outstanding.clear();
            }
            _ => (),
        }

        Transition::None
    }

    /// `Tx.Select` failed, the channel didn't become transactional.
    pub(crate) fn select_failed(&mut self) {
        self.transactional = false;
    }

    /// Registers a message delivery. Messages of a no-ack consumer need no settlement.
    pub(crate) fn delivered(&mut self, consumer_tag: &str, delivery_tag: u64) {
        if delivery_tag > self.last_delivery_tag {
            self.last_delivery_tag = delivery_tag;
        }

        match self.consumers.get(consumer_tag) {
            Some(consumer) if consumer.no_ack => (),
            Some(_) => {
                self.outstanding.insert(delivery_tag);
            }
            None => warn!("Delivery {} to unknown consumer {}", delivery_tag, consumer_tag),
        }
    }

    /// The broker cancelled a consumer (queue deleted for example).
    pub(crate) fn consumer_cancelled(&mut self, consumer_tag: &str) -> bool {
        self.consumers.remove(consumer_tag).is_some()
    }

    /// True if an ack or reject of the delivery tag refers to at least one outstanding message.
    pub(crate) fn can_settle(&self, delivery_tag: u64, multiple: bool) -> bool {
        if multiple {
            // Tag 0 with multiple means everything outstanding.
            let upper = if delivery_tag == 0 { u64::MAX } else { delivery_tag };

            self.outstanding.range(..=upper).next().is_some()
        } else {
            self.outstanding.contains(&delivery_tag)
        }
    }

    fn settled(&mut self, delivery_tag: u64, multiple: bool) {
        if multiple {
            match delivery_tag.checked_add(1) {
                Some(above) if delivery_tag != 0 => self.outstanding = self.outstanding.split_off(&above),
                _ => self.outstanding.clear(),
            }
        } else {
            self.outstanding.remove(&delivery_tag);
        }
    }

    pub(crate) fn outstanding(&self) -> Vec<u64> {
        self.outstanding.iter().copied().collect()
    }
}
