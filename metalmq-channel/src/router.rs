//! The connection side of the channels: allocates the channel numbers and routes the incoming
//! frames to the channel they belong to.

use crate::channel::{Channel, Transmit};
use crate::client_error;
use crate::config::ChannelConfig;
use crate::error::{ClientError, ErrorKind};
use crate::frame::{self, Confirmation};
use crate::model::{self, ChannelNumber};
use crate::state::Phase;
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::rc::Weak;

pub struct ChannelTable {
    transport: Weak<dyn Transmit>,
    config: ChannelConfig,
    channels: HashMap<ChannelNumber, Channel>,
}

impl ChannelTable {
    pub fn new(transport: Weak<dyn Transmit>, config: ChannelConfig) -> Self {
        ChannelTable {
            transport,
            config,
            channels: HashMap::new(),
        }
    }

    /// Opens a channel with the lowest free channel number. Numbers of closed channels are
    /// reused.
    pub fn open_channel(&mut self) -> Result<Channel> {
        self.reap();

        let id = (1..=self.config.channel_max).find(|id| !self.channels.contains_key(id));

        match id {
            Some(id) => self.open_channel_with_id(id),
            None => client_error!(
                ErrorKind::ChannelLimit,
                None,
                model::ConnectionError::ResourceError as u16,
                "RESOURCE_ERROR - no free channel number",
                frame::CHANNEL_OPEN
            ),
        }
    }

    /// Opens a channel with the given number.
    pub fn open_channel_with_id(&mut self, id: ChannelNumber) -> Result<Channel> {
        self.reap();

        if id == 0 || id > self.config.channel_max {
            return client_error!(
                ErrorKind::Misuse,
                Some(id),
                model::ConnectionError::ChannelError as u16,
                "CHANNEL_ERROR - channel number is out of range",
                frame::CHANNEL_OPEN
            );
        }

        if self.channels.contains_key(&id) {
            return client_error!(
                ErrorKind::Misuse,
                Some(id),
                model::ConnectionError::ChannelError as u16,
                "CHANNEL_ERROR - channel is already open",
                frame::CHANNEL_OPEN
            );
        }

        info!("Open channel {}", id);

        let channel = Channel::open(id, self.transport.clone(), self.config.clone());

        self.channels.insert(id, channel.clone());

        Ok(channel)
    }

    pub fn get(&self, id: ChannelNumber) -> Option<Channel> {
        self.channels.get(&id).cloned()
    }

    /// Number of channels which are not closed.
    pub fn len(&self) -> usize {
        self.channels.values().filter(|ch| ch.phase() != Phase::Closed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reap(&mut self) {
        self.channels.retain(|id, ch| {
            let open = ch.phase() != Phase::Closed;

            if !open {
                debug!("Channel number {} is free again", id);
            }

            open
        });
    }

    fn route(&self, id: ChannelNumber) -> Option<Channel> {
        let channel = self.get(id);

        if channel.is_none() {
            warn!("Frame to unknown channel {} is dropped", id);
        }

        channel
    }

    pub fn deliver_confirmation(&self, id: ChannelNumber, confirmation: Confirmation) {
        if let Some(ch) = self.route(id) {
            ch.on_confirmation(confirmation);
        }
    }

    /// The broker closed the channel by `Channel.Close`.
    pub fn deliver_channel_error(&self, id: ChannelNumber, err: ClientError) {
        if let Some(ch) = self.route(id) {
            ch.on_channel_error(err);
        }
    }

    /// The operation at the head of the channel failed.
    pub fn deliver_operation_error(&self, id: ChannelNumber, err: ClientError) {
        if let Some(ch) = self.route(id) {
            ch.on_operation_error(err);
        }
    }

    pub fn deliver_delivery(&self, id: ChannelNumber, consumer_tag: &str, delivery_tag: u64) {
        if let Some(ch) = self.route(id) {
            ch.on_delivery(consumer_tag, delivery_tag);
        }
    }

    /// The broker cancelled a consumer.
    pub fn deliver_cancel(&self, id: ChannelNumber, consumer_tag: &str) {
        if let Some(ch) = self.route(id) {
            ch.on_consumer_cancelled(consumer_tag);
        }
    }

    /// Fails every channel, the table becomes empty.
    pub fn connection_lost(&mut self, err: ClientError) {
        warn!("Connection is lost {}", err);

        let channels: Vec<Channel> = self.channels.drain().map(|(_, ch)| ch).collect();

        for ch in channels {
            ch.on_connection_lost(ClientError {
                kind: ErrorKind::ConnectionLost,
                ..err.clone()
            });
        }
    }
}
