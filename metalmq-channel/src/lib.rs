//! Client side AMQP 0-9-1 channel. A channel sends the requests of the application in order and
//! matches the confirmations of the broker with them, every request gets a [`Deferred`] which is
//! resolved exactly once.
//!
//! The crate doesn't touch the network. The connection implements [`Transmit`] to send the frames
//! and feeds the incoming ones into a [`ChannelTable`].
#[macro_use]
extern crate bitflags;

mod dev;
pub use dev::setup_logger;

mod channel;
pub use channel::{Channel, Transmit};

mod channel_api;

mod config;
pub use config::{parse_config, ChannelConfig, FailurePolicy};

mod deferred;
pub use deferred::{
    Deferred, DeferredCancel, DeferredConsumer, DeferredDelete, DeferredQueue, DeferredState, QueueInfo,
};

mod error;
pub use error::{ClientError, ErrorKind};

pub mod frame;

mod model;
pub use model::{ChannelError, ChannelNumber, ClassId, ClassMethod, ConnectionError, ExchangeType};

mod router;
pub use router::ChannelTable;

mod sequencer;

mod state;
pub use state::Phase;
