use anyhow::Result;
use metalmq_channel::frame::{Confirmation, MethodFrame};
use metalmq_channel::{Channel, ChannelConfig, ChannelNumber, ClassMethod, ClientError, Transmit};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Transport which keeps the frames instead of sending them.
pub struct RecordingTransport {
    frames: RefCell<Vec<(ChannelNumber, MethodFrame)>>,
    pub writable: Cell<bool>,
}

impl RecordingTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(RecordingTransport {
            frames: RefCell::new(vec![]),
            writable: Cell::new(true),
        })
    }

    pub fn weak(self: &Rc<Self>) -> Weak<dyn Transmit> {
        let transport: Rc<dyn Transmit> = self.clone();

        Rc::downgrade(&transport)
    }

    pub fn sent(&self) -> Vec<MethodFrame> {
        self.frames.borrow().iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn sent_to(&self, channel: ChannelNumber) -> Vec<ClassMethod> {
        self.frames
            .borrow()
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, f)| f.class_method())
            .collect()
    }

    pub fn class_methods(&self) -> Vec<ClassMethod> {
        self.frames.borrow().iter().map(|(_, f)| f.class_method()).collect()
    }

    pub fn clear(&self) {
        self.frames.borrow_mut().clear();
    }
}

impl Transmit for RecordingTransport {
    fn transmit(&self, channel: ChannelNumber, frame: MethodFrame) -> bool {
        if !self.writable.get() {
            return false;
        }

        self.frames.borrow_mut().push((channel, frame));

        true
    }
}

/// Opens channel 1 and confirms it, the recorded frames are cleared.
pub fn open_channel(transport: &Rc<RecordingTransport>, config: ChannelConfig) -> Channel {
    let ch = Channel::open(1, transport.weak(), config);

    ch.on_confirmation(Confirmation::ChannelOpenOk);
    transport.clear();

    ch
}

/// Closes the channel by the client side with the broker confirming it.
#[allow(dead_code)]
pub fn close_channel(ch: &Channel) {
    ch.close();
    ch.on_confirmation(Confirmation::ChannelCloseOk);
}

#[allow(dead_code)]
pub(crate) fn to_client_error<T: std::fmt::Debug>(result: Result<T>) -> ClientError {
    result.unwrap_err().downcast::<ClientError>().unwrap()
}

/// Collects what the reactions observed.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn log(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}
