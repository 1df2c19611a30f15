//! A tiny in-process broker which answers the method frames of the demo channels.

use metalmq_channel::frame::{
    BasicCancelOkArgs, BasicConsumeOkArgs, Confirmation, MethodFrame, QueueDeclareFlags, QueueDeclareOkArgs,
    QueueDeleteOkArgs, QueuePurgeOkArgs,
};
use metalmq_channel::{ChannelError, ChannelNumber, ClientError, ExchangeType};
use std::collections::{HashMap, HashSet};

pub enum Reply {
    Confirm(Confirmation),
    Deliver { consumer_tag: String, delivery_tag: u64 },
    Close(ClientError),
}

#[derive(Default)]
struct Queue {
    messages: u32,
    consumer: Option<String>,
}

#[derive(Default)]
pub struct ScriptedBroker {
    exchanges: HashMap<String, ExchangeType>,
    /// Exchange name to (queue, routing key) pairs.
    bindings: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, Queue>,
    closed: HashSet<ChannelNumber>,
    next_ctag: u32,
    next_delivery_tag: HashMap<ChannelNumber, u64>,
}

impl ScriptedBroker {
    pub fn answer(&mut self, channel: ChannelNumber, frame: MethodFrame) -> Vec<Reply> {
        if self.closed.contains(&channel) && frame != MethodFrame::ChannelOpen {
            return vec![];
        }

        let no_wait = frame.no_wait();

        let mut replies = match frame {
            MethodFrame::ChannelOpen => {
                self.closed.remove(&channel);

                vec![Reply::Confirm(Confirmation::ChannelOpenOk)]
            }
            MethodFrame::ChannelClose(_) => vec![Reply::Confirm(Confirmation::ChannelCloseOk)],
            MethodFrame::ChannelCloseOk => vec![],
            MethodFrame::ChannelFlow(args) => vec![Reply::Confirm(Confirmation::ChannelFlowOk(args))],
            MethodFrame::ExchangeDeclare(args) => {
                if args.flags.contains(metalmq_channel::frame::ExchangeDeclareFlags::PASSIVE)
                    && !self.exchanges.contains_key(&args.exchange_name)
                {
                    let text = format!("NOT_FOUND - no exchange '{}'", args.exchange_name);

                    return self.close(channel, ChannelError::NotFound, &text, metalmq_channel::frame::EXCHANGE_DECLARE);
                }

                self.exchanges.insert(args.exchange_name, args.exchange_type);

                vec![Reply::Confirm(Confirmation::ExchangeDeclareOk)]
            }
            MethodFrame::ExchangeDelete(args) => {
                self.exchanges.remove(&args.exchange_name);
                self.bindings.remove(&args.exchange_name);

                vec![Reply::Confirm(Confirmation::ExchangeDeleteOk)]
            }
            MethodFrame::ExchangeBind(_) => vec![Reply::Confirm(Confirmation::ExchangeBindOk)],
            MethodFrame::ExchangeUnbind(_) => vec![Reply::Confirm(Confirmation::ExchangeUnbindOk)],
            MethodFrame::QueueDeclare(args) => {
                let name = if args.name.is_empty() {
                    format!("amq.gen-{}", uuid::Uuid::new_v4())
                } else {
                    args.name
                };

                if args.flags.contains(QueueDeclareFlags::PASSIVE) && !self.queues.contains_key(&name) {
                    let text = format!("NOT_FOUND - no queue '{}'", name);

                    return self.close(channel, ChannelError::NotFound, &text, metalmq_channel::frame::QUEUE_DECLARE);
                }

                let queue = self.queues.entry(name.clone()).or_default();
                let ok = QueueDeclareOkArgs::default()
                    .name(&name)
                    .message_count(queue.messages)
                    .consumer_count(queue.consumer.iter().count() as u32);

                vec![Reply::Confirm(Confirmation::QueueDeclareOk(ok))]
            }
            MethodFrame::QueueBind(args) => {
                self.bindings
                    .entry(args.exchange_name)
                    .or_default()
                    .push((args.queue_name, args.routing_key));

                vec![Reply::Confirm(Confirmation::QueueBindOk)]
            }
            MethodFrame::QueueUnbind(args) => {
                if let Some(bindings) = self.bindings.get_mut(&args.exchange_name) {
                    bindings.retain(|(q, rk)| *q != args.queue_name || *rk != args.routing_key);
                }

                vec![Reply::Confirm(Confirmation::QueueUnbindOk)]
            }
            MethodFrame::QueuePurge(args) => {
                let purged = match self.queues.get_mut(&args.queue_name) {
                    Some(queue) => std::mem::take(&mut queue.messages),
                    None => 0,
                };

                vec![Reply::Confirm(Confirmation::QueuePurgeOk(
                    QueuePurgeOkArgs::default().message_count(purged),
                ))]
            }
            MethodFrame::QueueDelete(args) => {
                let deleted = self.queues.remove(&args.queue_name).map(|q| q.messages).unwrap_or_default();

                vec![Reply::Confirm(Confirmation::QueueDeleteOk(
                    QueueDeleteOkArgs::default().message_count(deleted),
                ))]
            }
            MethodFrame::BasicQos(_) => vec![Reply::Confirm(Confirmation::BasicQosOk)],
            MethodFrame::BasicConsume(args) => {
                let consumer_tag = if args.consumer_tag.is_empty() {
                    self.next_ctag += 1;

                    format!("amq.ctag-{}", self.next_ctag)
                } else {
                    args.consumer_tag
                };

                let queue = self.queues.entry(args.queue).or_default();
                queue.consumer = Some(consumer_tag.clone());
                let waiting = std::mem::take(&mut queue.messages);

                let mut replies = vec![Reply::Confirm(Confirmation::BasicConsumeOk(BasicConsumeOkArgs::new(
                    &consumer_tag,
                )))];

                for _ in 0..waiting {
                    replies.push(self.deliver(channel, &consumer_tag));
                }

                replies
            }
            MethodFrame::BasicCancel(args) => {
                for queue in self.queues.values_mut() {
                    if queue.consumer.as_deref() == Some(args.consumer_tag.as_str()) {
                        queue.consumer = None;
                    }
                }

                vec![Reply::Confirm(Confirmation::BasicCancelOk(BasicCancelOkArgs::new(
                    &args.consumer_tag,
                )))]
            }
            MethodFrame::BasicPublish(args) => self.route(channel, &args.exchange_name, &args.routing_key),
            MethodFrame::BasicAck(_) | MethodFrame::BasicReject(_) | MethodFrame::BasicNack(_) => vec![],
            MethodFrame::BasicRecover(_) => vec![Reply::Confirm(Confirmation::BasicRecoverOk)],
            MethodFrame::TxSelect => vec![Reply::Confirm(Confirmation::TxSelectOk)],
            MethodFrame::TxCommit => vec![Reply::Confirm(Confirmation::TxCommitOk)],
            MethodFrame::TxRollback => vec![Reply::Confirm(Confirmation::TxRollbackOk)],
        };

        if no_wait {
            replies.retain(|r| !matches!(r, Reply::Confirm(_)));
        }

        replies
    }

    fn close(&mut self, channel: ChannelNumber, code: ChannelError, text: &str, cm: u32) -> Vec<Reply> {
        self.closed.insert(channel);

        vec![Reply::Close(ClientError::broker(channel, code as u16, text, cm))]
    }

    fn route(&mut self, channel: ChannelNumber, exchange: &str, routing_key: &str) -> Vec<Reply> {
        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let fanout = self.exchanges.get(exchange) == Some(&ExchangeType::Fanout);

            self.bindings
                .get(exchange)
                .map(|bindings| {
                    bindings
                        .iter()
                        .filter(|(_, rk)| fanout || rk == routing_key)
                        .map(|(q, _)| q.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut replies = vec![];

        for name in targets {
            let consumer = match self.queues.get_mut(&name) {
                Some(queue) => match &queue.consumer {
                    Some(tag) => Some(tag.clone()),
                    None => {
                        queue.messages += 1;
                        None
                    }
                },
                None => None,
            };

            if let Some(tag) = consumer {
                replies.push(self.deliver(channel, &tag));
            }
        }

        replies
    }

    fn deliver(&mut self, channel: ChannelNumber, consumer_tag: &str) -> Reply {
        let tag = self.next_delivery_tag.entry(channel).or_default();
        *tag += 1;

        Reply::Deliver {
            consumer_tag: consumer_tag.to_string(),
            delivery_tag: *tag,
        }
    }
}
