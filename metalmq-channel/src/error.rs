use crate::model;
use std::fmt;

/// What went wrong, independently of the AMQP reply code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport didn't accept the frame, nothing was sent.
    LocalDispatch,
    /// The channel is closing or closed, nothing was sent.
    ChannelNotUsable,
    /// The broker refused the operation or closed the channel.
    Broker,
    /// A confirmation arrived which doesn't belong to the operation at the head of the queue.
    ProtocolMismatch,
    /// The connection went away.
    ConnectionLost,
    /// The operation was still waiting when the channel was closed by the client.
    ChannelClosed,
    /// All the channel numbers are in use.
    ChannelLimit,
    /// The caller used the channel in a wrong way, for example commit without a transaction.
    Misuse,
}

/// Represents a connection or channel error. If `channel` is `None` it is a
/// connection error.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientError {
    pub channel: Option<model::ChannelNumber>,
    pub code: u16,
    pub message: String,
    pub class_method: model::ClassMethod,
    pub kind: ErrorKind,
}

impl ClientError {
    pub fn new(
        kind: ErrorKind,
        channel: Option<model::ChannelNumber>,
        code: u16,
        message: &str,
        class_method: model::ClassMethod,
    ) -> Self {
        ClientError {
            channel,
            code,
            message: message.to_string(),
            class_method,
            kind,
        }
    }

    /// Error reported by the broker in a `Channel.Close`.
    pub fn broker(channel: model::ChannelNumber, code: u16, text: &str, class_method: model::ClassMethod) -> Self {
        Self::new(ErrorKind::Broker, Some(channel), code, text, class_method)
    }

    pub(crate) fn local_dispatch(channel: model::ChannelNumber, class_method: model::ClassMethod) -> Self {
        Self::new(
            ErrorKind::LocalDispatch,
            Some(channel),
            model::ConnectionError::ChannelError as u16,
            "Connection is not writable",
            class_method,
        )
    }

    pub(crate) fn not_usable(channel: model::ChannelNumber, class_method: model::ClassMethod) -> Self {
        Self::new(
            ErrorKind::ChannelNotUsable,
            Some(channel),
            model::ConnectionError::ChannelError as u16,
            "Channel is not usable",
            class_method,
        )
    }

    pub(crate) fn mismatch(
        channel: model::ChannelNumber,
        expected: model::ClassMethod,
        received: model::ClassMethod,
    ) -> Self {
        Self::new(
            ErrorKind::ProtocolMismatch,
            Some(channel),
            model::ConnectionError::UnexpectedFrame as u16,
            &format!("Expected {:08X} but {:08X} arrived", expected, received),
            received,
        )
    }

    pub(crate) fn closed(channel: model::ChannelNumber, class_method: model::ClassMethod) -> Self {
        Self::new(
            ErrorKind::ChannelClosed,
            Some(channel),
            model::ChannelError::Success as u16,
            "Channel has been closed",
            class_method,
        )
    }

    /// The same error reported on behalf of another operation.
    pub(crate) fn for_method(&self, class_method: model::ClassMethod) -> Self {
        ClientError {
            class_method,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientError")
            .field("channel", &self.channel)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("class_method", &format!("{:08X}", &self.class_method))
            .field("kind", &self.kind)
            .finish()
    }
}

impl std::error::Error for ClientError {}

/// Shorthand for creating errors at the synchronous call sites.
#[macro_export]
macro_rules! client_error {
    ($kind:expr, $channel:expr, $code:expr, $message:expr, $cm:expr) => {
        ::std::result::Result::Err(anyhow::Error::new($crate::ClientError {
            channel: $channel,
            code: $code,
            message: ::std::string::String::from($message),
            class_method: $cm,
            kind: $kind,
        }))
    };
}
