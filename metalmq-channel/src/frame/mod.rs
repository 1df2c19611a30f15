//! Method frames a channel sends and the confirmations it expects back.
//!
//! Byte level encoding belongs to the codec, here the frames are only typed values. Every
//! request knows the class-method of the reply the broker sends when the request succeeds,
//! that is what the sequencer matches the incoming confirmations against.

mod basic;
mod channel;
mod exchange;
mod queue;
mod tx;

pub use self::{
    basic::{
        BasicAckArgs, BasicAckFlags, BasicCancelArgs, BasicCancelFlags, BasicCancelOkArgs, BasicConsumeArgs,
        BasicConsumeFlags, BasicConsumeOkArgs, BasicNackArgs, BasicPublishArgs, BasicPublishFlags, BasicQosArgs,
        BasicRecoverArgs, BasicRecoverFlags, BasicRejectArgs, BasicRejectFlags, Envelope,
    },
    channel::{channel_close_ok, channel_open, ChannelCloseArgs, ChannelFlowArgs},
    exchange::{ExchangeBindArgs, ExchangeDeclareArgs, ExchangeDeclareFlags, ExchangeDeleteArgs, ExchangeDeleteFlags},
    queue::{
        QueueBindArgs, QueueDeclareArgs, QueueDeclareFlags, QueueDeclareOkArgs, QueueDeleteArgs, QueueDeleteFlags,
        QueueDeleteOkArgs, QueuePurgeArgs, QueuePurgeFlags, QueuePurgeOkArgs, QueueUnbindArgs,
    },
    tx::{tx_commit, tx_rollback, tx_select},
};
use crate::model::{ClassId, ClassMethod};
use std::collections::BTreeMap;

pub const CHANNEL_OPEN: u32 = 0x0014000A;
pub const CHANNEL_OPEN_OK: u32 = 0x0014000B;
pub const CHANNEL_FLOW: u32 = 0x00140014;
pub const CHANNEL_FLOW_OK: u32 = 0x00140015;
pub const CHANNEL_CLOSE: u32 = 0x00140028;
pub const CHANNEL_CLOSE_OK: u32 = 0x00140029;

pub const EXCHANGE_DECLARE: u32 = 0x0028000A;
pub const EXCHANGE_DECLARE_OK: u32 = 0x0028000B;
pub const EXCHANGE_DELETE: u32 = 0x00280014;
pub const EXCHANGE_DELETE_OK: u32 = 0x00280015;
pub const EXCHANGE_BIND: u32 = 0x0028001E;
pub const EXCHANGE_BIND_OK: u32 = 0x0028001F;
pub const EXCHANGE_UNBIND: u32 = 0x00280028;
pub const EXCHANGE_UNBIND_OK: u32 = 0x00280033;

pub const QUEUE_DECLARE: u32 = 0x0032000A;
pub const QUEUE_DECLARE_OK: u32 = 0x0032000B;
pub const QUEUE_BIND: u32 = 0x00320014;
pub const QUEUE_BIND_OK: u32 = 0x00320015;
pub const QUEUE_PURGE: u32 = 0x0032001E;
pub const QUEUE_PURGE_OK: u32 = 0x0032001F;
pub const QUEUE_DELETE: u32 = 0x00320028;
pub const QUEUE_DELETE_OK: u32 = 0x00320029;
pub const QUEUE_UNBIND: u32 = 0x00320032;
pub const QUEUE_UNBIND_OK: u32 = 0x00320033;

pub const BASIC_QOS: u32 = 0x003C000A;
pub const BASIC_QOS_OK: u32 = 0x003C000B;
pub const BASIC_CONSUME: u32 = 0x003C0014;
pub const BASIC_CONSUME_OK: u32 = 0x003C0015;
pub const BASIC_CANCEL: u32 = 0x003C001E;
pub const BASIC_CANCEL_OK: u32 = 0x003C001F;
pub const BASIC_PUBLISH: u32 = 0x003C0028;
pub const BASIC_ACK: u32 = 0x003C0050;
pub const BASIC_REJECT: u32 = 0x003C005A;
pub const BASIC_RECOVER: u32 = 0x003C006E;
pub const BASIC_RECOVER_OK: u32 = 0x003C006F;
pub const BASIC_NACK: u32 = 0x003C0078;

pub const TX_SELECT: u32 = 0x005A000A;
pub const TX_SELECT_OK: u32 = 0x005A000B;
pub const TX_COMMIT: u32 = 0x005A0014;
pub const TX_COMMIT_OK: u32 = 0x005A0015;
pub const TX_ROLLBACK: u32 = 0x005A001E;
pub const TX_ROLLBACK_OK: u32 = 0x005A001F;

/// Argument table passed opaquely to the broker. Keys are kept ordered.
pub type FieldTable = BTreeMap<String, AMQPFieldValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPFieldValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    ShortString(String),
    LongString(String),
    Timestamp(u64),
    FieldArray(Vec<AMQPFieldValue>),
    FieldTable(Box<FieldTable>),
    Void,
}

/// Requests a channel can send to the broker.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodFrame {
    ChannelOpen,
    ChannelFlow(ChannelFlowArgs),
    ChannelClose(ChannelCloseArgs),
    ChannelCloseOk,
    ExchangeDeclare(ExchangeDeclareArgs),
    ExchangeDelete(ExchangeDeleteArgs),
    ExchangeBind(ExchangeBindArgs),
    ExchangeUnbind(ExchangeBindArgs),
    QueueDeclare(QueueDeclareArgs),
    QueueBind(QueueBindArgs),
    QueueUnbind(QueueUnbindArgs),
    QueuePurge(QueuePurgeArgs),
    QueueDelete(QueueDeleteArgs),
    BasicQos(BasicQosArgs),
    BasicConsume(BasicConsumeArgs),
    BasicCancel(BasicCancelArgs),
    BasicPublish(BasicPublishArgs),
    BasicAck(BasicAckArgs),
    BasicReject(BasicRejectArgs),
    BasicNack(BasicNackArgs),
    BasicRecover(BasicRecoverArgs),
    TxSelect,
    TxCommit,
    TxRollback,
}

/// Responses of the broker which settle a previously sent request.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation {
    ChannelOpenOk,
    ChannelFlowOk(ChannelFlowArgs),
    ChannelCloseOk,
    ExchangeDeclareOk,
    ExchangeDeleteOk,
    ExchangeBindOk,
    ExchangeUnbindOk,
    QueueDeclareOk(QueueDeclareOkArgs),
    QueueBindOk,
    QueueUnbindOk,
    QueuePurgeOk(QueuePurgeOkArgs),
    QueueDeleteOk(QueueDeleteOkArgs),
    BasicQosOk,
    BasicConsumeOk(BasicConsumeOkArgs),
    BasicCancelOk(BasicCancelOkArgs),
    BasicRecoverOk,
    TxSelectOk,
    TxCommitOk,
    TxRollbackOk,
}

impl MethodFrame {
    pub fn class_method(&self) -> ClassMethod {
        use MethodFrame::*;

        match self {
            ChannelOpen => CHANNEL_OPEN,
            ChannelFlow(_) => CHANNEL_FLOW,
            ChannelClose(_) => CHANNEL_CLOSE,
            ChannelCloseOk => CHANNEL_CLOSE_OK,
            ExchangeDeclare(_) => EXCHANGE_DECLARE,
            ExchangeDelete(_) => EXCHANGE_DELETE,
            ExchangeBind(_) => EXCHANGE_BIND,
            ExchangeUnbind(_) => EXCHANGE_UNBIND,
            QueueDeclare(_) => QUEUE_DECLARE,
            QueueBind(_) => QUEUE_BIND,
            QueueUnbind(_) => QUEUE_UNBIND,
            QueuePurge(_) => QUEUE_PURGE,
            QueueDelete(_) => QUEUE_DELETE,
            BasicQos(_) => BASIC_QOS,
            BasicConsume(_) => BASIC_CONSUME,
            BasicCancel(_) => BASIC_CANCEL,
            BasicPublish(_) => BASIC_PUBLISH,
            BasicAck(_) => BASIC_ACK,
            BasicReject(_) => BASIC_REJECT,
            BasicNack(_) => BASIC_NACK,
            BasicRecover(_) => BASIC_RECOVER,
            TxSelect => TX_SELECT,
            TxCommit => TX_COMMIT,
            TxRollback => TX_ROLLBACK,
        }
    }

    /// The class-method of the confirmation the broker answers with. `None` for the methods
    /// which are never answered (publish, ack, reject, nack, close-ok).
    pub fn reply(&self) -> Option<ClassMethod> {
        use MethodFrame::*;

        let cm = match self {
            ChannelOpen => CHANNEL_OPEN_OK,
            ChannelFlow(_) => CHANNEL_FLOW_OK,
            ChannelClose(_) => CHANNEL_CLOSE_OK,
            ExchangeDeclare(_) => EXCHANGE_DECLARE_OK,
            ExchangeDelete(_) => EXCHANGE_DELETE_OK,
            ExchangeBind(_) => EXCHANGE_BIND_OK,
            ExchangeUnbind(_) => EXCHANGE_UNBIND_OK,
            QueueDeclare(_) => QUEUE_DECLARE_OK,
            QueueBind(_) => QUEUE_BIND_OK,
            QueueUnbind(_) => QUEUE_UNBIND_OK,
            QueuePurge(_) => QUEUE_PURGE_OK,
            QueueDelete(_) => QUEUE_DELETE_OK,
            BasicQos(_) => BASIC_QOS_OK,
            BasicConsume(_) => BASIC_CONSUME_OK,
            BasicCancel(_) => BASIC_CANCEL_OK,
            BasicRecover(_) => BASIC_RECOVER_OK,
            TxSelect => TX_SELECT_OK,
            TxCommit => TX_COMMIT_OK,
            TxRollback => TX_ROLLBACK_OK,
            ChannelCloseOk | BasicPublish(_) | BasicAck(_) | BasicReject(_) | BasicNack(_) => return None,
        };

        Some(cm)
    }

    /// True if the request carries the no-wait bit, so the broker won't answer it.
    pub fn no_wait(&self) -> bool {
        use MethodFrame::*;

        match self {
            ExchangeDeclare(args) => args.flags.contains(ExchangeDeclareFlags::NO_WAIT),
            ExchangeDelete(args) => args.flags.contains(ExchangeDeleteFlags::NO_WAIT),
            ExchangeBind(args) | ExchangeUnbind(args) => args.no_wait,
            QueueDeclare(args) => args.flags.contains(QueueDeclareFlags::NO_WAIT),
            QueueBind(args) => args.no_wait,
            QueuePurge(args) => args.flags.contains(QueuePurgeFlags::NO_WAIT),
            QueueDelete(args) => args.flags.contains(QueueDeleteFlags::NO_WAIT),
            BasicConsume(args) => args.flags.contains(BasicConsumeFlags::NO_WAIT),
            BasicCancel(args) => args.flags.contains(BasicCancelFlags::NO_WAIT),
            _ => false,
        }
    }

    /// The confirmation a no-wait request is settled with, built from the request itself since
    /// the broker never sends one.
    pub fn assumed_reply(&self) -> Option<Confirmation> {
        use MethodFrame::*;

        let confirmation = match self {
            ExchangeDeclare(_) => Confirmation::ExchangeDeclareOk,
            ExchangeDelete(_) => Confirmation::ExchangeDeleteOk,
            ExchangeBind(_) => Confirmation::ExchangeBindOk,
            ExchangeUnbind(_) => Confirmation::ExchangeUnbindOk,
            QueueDeclare(args) => Confirmation::QueueDeclareOk(QueueDeclareOkArgs::default().name(&args.name)),
            QueueBind(_) => Confirmation::QueueBindOk,
            QueuePurge(_) => Confirmation::QueuePurgeOk(QueuePurgeOkArgs::default()),
            QueueDelete(_) => Confirmation::QueueDeleteOk(QueueDeleteOkArgs::default()),
            BasicConsume(args) => Confirmation::BasicConsumeOk(BasicConsumeOkArgs::new(&args.consumer_tag)),
            BasicCancel(args) => Confirmation::BasicCancelOk(BasicCancelOkArgs::new(&args.consumer_tag)),
            _ => return None,
        };

        Some(confirmation)
    }
}

impl Confirmation {
    pub fn class_method(&self) -> ClassMethod {
        use Confirmation::*;

        match self {
            ChannelOpenOk => CHANNEL_OPEN_OK,
            ChannelFlowOk(_) => CHANNEL_FLOW_OK,
            ChannelCloseOk => CHANNEL_CLOSE_OK,
            ExchangeDeclareOk => EXCHANGE_DECLARE_OK,
            ExchangeDeleteOk => EXCHANGE_DELETE_OK,
            ExchangeBindOk => EXCHANGE_BIND_OK,
            ExchangeUnbindOk => EXCHANGE_UNBIND_OK,
            QueueDeclareOk(_) => QUEUE_DECLARE_OK,
            QueueBindOk => QUEUE_BIND_OK,
            QueueUnbindOk => QUEUE_UNBIND_OK,
            QueuePurgeOk(_) => QUEUE_PURGE_OK,
            QueueDeleteOk(_) => QUEUE_DELETE_OK,
            BasicQosOk => BASIC_QOS_OK,
            BasicConsumeOk(_) => BASIC_CONSUME_OK,
            BasicCancelOk(_) => BASIC_CANCEL_OK,
            BasicRecoverOk => BASIC_RECOVER_OK,
            TxSelectOk => TX_SELECT_OK,
            TxCommitOk => TX_COMMIT_OK,
            TxRollbackOk => TX_ROLLBACK_OK,
        }
    }
}

/// Split class id and method id from `u32` combined code.
pub fn split_class_method(cm: ClassMethod) -> (ClassId, u16) {
    let method_id = (cm & 0x0000FFFF) as u16;
    let class_id = (cm >> 16) as u16;

    (class_id, method_id)
}
