/// Dispatcher is the frame handler registered on the power meter channel. Every frame runs
/// through the codec and the power page decoder, and each power reading found is reported
/// to the sink before the next frame is handled.
use crate::{
    device::powermeter::{self, PowerMainDataPage},
    message,
    node::FrameHandler,
};
use log::trace;

/// Receives every decoded power value, in the order the frames arrived.
pub trait Sink: Send {
    fn report(&mut self, power: u16);
}

impl<F> Sink for F
where
    F: FnMut(u16) + Send,
{
    fn report(&mut self, power: u16) {
        self(power)
    }
}

pub struct Dispatcher<S: Sink> {
    sink: S,
}

impl<S: Sink> Dispatcher<S> {
    pub fn new(sink: S) -> Self {
        Dispatcher { sink }
    }

    /// Handle one raw frame. Returns true if the sink was called.
    pub fn dispatch(&mut self, frame: &[u8]) -> bool {
        let mesg = match message::decode_broadcast(frame) {
            Some(mesg) => mesg,
            None => return false,
        };
        match powermeter::decode(&mesg) {
            Some(reading) => {
                if let Some(page) = PowerMainDataPage::parse(&mesg) {
                    trace!(
                        "Channel {} power {} W, cadence {:?}, event {}",
                        mesg.channel(),
                        reading.watts(),
                        page.cadence(),
                        page.event_count()
                    );
                }
                self.sink.report(reading.watts());
                true
            }
            None => {
                trace!("Ignoring data page {:#04x}", mesg.page());
                false
            }
        }
    }
}

impl<S: Sink + 'static> Dispatcher<S> {
    pub fn into_handler(mut self) -> FrameHandler {
        Box::new(move |frame: &[u8]| {
            self.dispatch(frame);
        })
    }
}
