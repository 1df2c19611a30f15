use super::MethodFrame;
use crate::model::ClassMethod;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelCloseArgs {
    pub code: u16,
    pub text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl ChannelCloseArgs {
    pub fn new(code: u16, text: &str, cm: ClassMethod) -> Self {
        let (class_id, method_id) = super::split_class_method(cm);

        Self {
            code,
            text: text.to_string(),
            class_id,
            method_id,
        }
    }

    pub fn frame(self) -> MethodFrame {
        MethodFrame::ChannelClose(self)
    }
}

/// `Channel.Flow` pauses or resumes the deliveries, `active` is the desired state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelFlowArgs {
    pub active: bool,
}

impl ChannelFlowArgs {
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn frame(self) -> MethodFrame {
        MethodFrame::ChannelFlow(self)
    }
}

pub fn channel_open() -> MethodFrame {
    MethodFrame::ChannelOpen
}

pub fn channel_close_ok() -> MethodFrame {
    MethodFrame::ChannelCloseOk
}
