use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, trace};

use super::Result;
use crate::{
    error::{AntError, RadioProtocolError, TransportError},
    message::{
        self, ChannelResponseCode, Message, Response, MESG_CAPABILITIES_ID, MESG_CLOSE_CHANNEL_ID,
        MESG_RESET,
    },
    network::NetworkKey,
    node::{Driver, FrameHandler, Node},
    usb::{Context, DeviceIdentity, Port, UsbContext, UsbDevice},
};

const RESET_ATTEMPTS: usize = 2;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

enum Request {
    Send(Message),
    Register(u8, FrameHandler),
    Unregister(u8),
    Quit,
}

/// Opens AntNodes on ANT USB sticks.
pub struct UsbDriver<T: UsbContext> {
    ctx: T,
}

impl UsbDriver<Context> {
    pub fn new() -> Result<Self> {
        Ok(UsbDriver {
            ctx: Context::new()?,
        })
    }
}

impl<T: UsbContext> UsbDriver<T> {
    pub fn with_context(ctx: T) -> Self {
        UsbDriver { ctx }
    }
}

impl<T: UsbContext + 'static> Driver for UsbDriver<T> {
    type Node = AntNode;

    fn open_node(&mut self, device: &str) -> Result<AntNode> {
        let identity = DeviceIdentity::parse(device)?;
        let usb_device = UsbDevice::init(&mut self.ctx, &identity)?;
        AntNode::start(usb_device)
    }
}

/// AntNode drives an ANT radio. A receive thread owns the port: it writes
/// queued commands, hands command responses back to the caller waiting on
/// them and calls the channel handlers with the frames received on each
/// channel. Commands block until the radio answers.
pub struct AntNode {
    requests: Sender<Request>,
    responses: Receiver<Result<Response>>,
    handle: Option<JoinHandle<Result<()>>>,
    channels: Vec<bool>,
    timeout: Duration,
}

impl AntNode {
    pub fn start<P: Port + 'static>(port: P) -> Result<AntNode> {
        AntNode::start_with_timeout(port, RESPONSE_TIMEOUT)
    }

    /// Start the receive thread, reset the radio and read its capabilities.
    /// `timeout` bounds the wait for each response.
    pub fn start_with_timeout<P: Port + 'static>(port: P, timeout: Duration) -> Result<AntNode> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let router = Router {
            port,
            requests: request_rx,
            responses: response_tx,
            handlers: HashMap::new(),
        };
        let handle = thread::Builder::new()
            .name("ant-node".to_string())
            .spawn(move || router.run())
            .map_err(TransportError::from)?;
        let mut node = AntNode {
            requests: request_tx,
            responses: response_rx,
            handle: Some(handle),
            channels: vec![],
            timeout,
        };
        node.reset()?;
        node.get_capabilities()?;
        Ok(node)
    }

    fn reset(&mut self) -> Result<()> {
        for attempt in 1..=RESET_ATTEMPTS {
            debug!("Sending reset command, attempt {}", attempt);
            self.send(message::reset())?;
            match self.wait_for(MESG_RESET, |r| matches!(r, Response::Startup(_))) {
                Ok(Response::Startup(mesg)) => {
                    debug!("Radio started: {:?}", mesg.reason());
                    return Ok(());
                }
                Ok(_) | Err(AntError::RadioProtocol(RadioProtocolError::ResponseTimeout(_))) => {}
                Err(e) => return Err(e),
            }
        }
        Err(TransportError::Reset.into())
    }

    fn get_capabilities(&mut self) -> Result<()> {
        self.send(message::get_capabilities())?;
        if let Response::Capabilities(caps) =
            self.wait_for(MESG_CAPABILITIES_ID, |r| matches!(r, Response::Capabilities(_)))?
        {
            info!(
                "ANT radio supports {} channels on {} networks",
                caps.max_channels(),
                caps.max_networks()
            );
            self.channels = vec![false; caps.max_channels() as usize];
        }
        Ok(())
    }

    fn send(&self, mesg: Message) -> Result<()> {
        // Anything left over belongs to a command that already gave up.
        while let Ok(stale) = self.responses.try_recv() {
            trace!("Dropping stale response: {:x?}", stale);
        }
        trace!("Sending {:?}", mesg);
        self.requests
            .send(Request::Send(mesg))
            .map_err(|_| TransportError::Disconnected.into())
    }

    /// Wait for the first response `matches` accepts, skipping others.
    fn wait_for<F>(&self, message_id: u8, mut matches: F) -> Result<Response>
    where
        F: FnMut(&Response) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(Ok(response)) if matches(&response) => return Ok(response),
                Ok(Ok(response)) => trace!("Skipping {:x?}", response),
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(RadioProtocolError::ResponseTimeout(message_id).into())
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected.into())
                }
            }
        }
    }

    /// Send a configuration command and wait for the radio to accept it.
    fn command(&self, mesg: Message) -> Result<()> {
        let message_id = mesg.id;
        self.send(mesg)?;
        let response = self.wait_for(message_id, |r| match r {
            Response::ChannelResponse(r) => !r.is_event() && r.message_id() == message_id,
            _ => false,
        })?;
        match response {
            Response::ChannelResponse(r) if r.code() == ChannelResponseCode::ResponseNoError => {
                Ok(())
            }
            Response::ChannelResponse(r) => {
                error!("{:?} received for message {:#04x}", r.code(), message_id);
                Err(RadioProtocolError::Rejected {
                    channel: r.channel(),
                    message_id,
                    code: r.raw_code(),
                }
                .into())
            }
            _ => Err(RadioProtocolError::ResponseTimeout(message_id).into()),
        }
    }
}

impl Node for AntNode {
    fn stop(&mut self) -> Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        debug!("Stopping receive thread");
        // The thread may already be gone if the port failed.
        let _ = self.requests.send(Request::Quit);
        handle
            .join()
            .map_err(|_| AntError::from(TransportError::Disconnected))?
    }

    fn free_channel(&mut self) -> Result<u8> {
        self.channels
            .iter()
            .position(|assigned| !assigned)
            .map(|channel| channel as u8)
            .ok_or_else(|| RadioProtocolError::NoFreeChannel.into())
    }

    fn set_network_key(&mut self, network: u8, key: &NetworkKey) -> Result<()> {
        debug!("Setting network key for network {}", network);
        self.command(message::set_network_key(network, key))
    }

    fn assign(&mut self, channel: u8, channel_type: u8, network: u8) -> Result<()> {
        self.command(message::assign_channel(channel, channel_type, network))?;
        if let Some(assigned) = self.channels.get_mut(channel as usize) {
            *assigned = true;
        }
        Ok(())
    }

    fn set_channel_id(
        &mut self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<()> {
        self.command(message::set_channel_id(
            channel,
            device_number,
            device_type,
            transmission_type,
        ))
    }

    fn set_search_timeout(&mut self, channel: u8, timeout: u8) -> Result<()> {
        self.command(message::set_search_timeout(channel, timeout))
    }

    fn set_period(&mut self, channel: u8, period: u16) -> Result<()> {
        self.command(message::set_channel_period(channel, period))
    }

    fn set_frequency(&mut self, channel: u8, frequency: u8) -> Result<()> {
        self.command(message::set_channel_frequency(channel, frequency))
    }

    fn open(&mut self, channel: u8) -> Result<()> {
        self.command(message::open_channel(channel))
    }

    fn close(&mut self, channel: u8) -> Result<()> {
        self.command(message::close_channel(channel))?;
        // The radio confirms with an event once the channel has actually closed.
        let closed = self.wait_for(MESG_CLOSE_CHANNEL_ID, |r| match r {
            Response::ChannelResponse(r) => {
                r.is_event()
                    && r.channel() == channel
                    && r.code() == ChannelResponseCode::EventChannelClosed
            }
            _ => false,
        });
        match closed {
            Ok(_) => debug!("Channel {} closed", channel),
            Err(e) => debug!("No channel closed event for channel {}: {}", channel, e),
        }
        Ok(())
    }

    fn unassign(&mut self, channel: u8) -> Result<()> {
        let _ = self.requests.send(Request::Unregister(channel));
        self.command(message::unassign_channel(channel))?;
        if let Some(assigned) = self.channels.get_mut(channel as usize) {
            *assigned = false;
        }
        Ok(())
    }

    fn on_broadcast(&mut self, channel: u8, handler: FrameHandler) -> Result<()> {
        self.requests
            .send(Request::Register(channel, handler))
            .map_err(|_| TransportError::Disconnected.into())
    }
}

impl Drop for AntNode {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error stopping ANT node: {}", e);
        }
    }
}

/// The receive loop run on the node's thread.
struct Router<P: Port> {
    port: P,
    requests: Receiver<Request>,
    responses: Sender<Result<Response>>,
    handlers: HashMap<u8, FrameHandler>,
}

impl<P: Port> Router<P> {
    fn run(mut self) -> Result<()> {
        loop {
            // See if there are any messages to read
            match self.port.read() {
                Ok(buffer) => {
                    for frame in buffer {
                        self.route(&frame);
                    }
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    error!("Error reading from ANT device: {}", e);
                    return Err(e);
                }
            }
            // Messages handled, now write out any queued requests.
            loop {
                match self.requests.try_recv() {
                    Ok(Request::Send(mesg)) => {
                        if let Err(e) = self.port.write(&mesg.encode()) {
                            error!("Error writing {:?}: {}", mesg, e);
                            let _ = self.responses.send(Err(e));
                        }
                    }
                    Ok(Request::Register(channel, handler)) => {
                        debug!("Registering handler for channel {}", channel);
                        self.handlers.insert(channel, handler);
                    }
                    Ok(Request::Unregister(channel)) => {
                        self.handlers.remove(&channel);
                    }
                    Ok(Request::Quit) | Err(TryRecvError::Disconnected) => return Ok(()),
                    Err(TryRecvError::Empty) => break,
                }
            }
        }
    }

    fn route(&mut self, frame: &[u8]) {
        let response = match Response::parse(frame) {
            Some(response) => response,
            None => {
                trace!("Unhandled frame: {:x?}", frame);
                return;
            }
        };
        match &response {
            Response::BroadcastData(mesg) => {
                self.deliver(mesg.channel(), frame);
                return;
            }
            Response::ChannelResponse(mesg) if mesg.is_event() => {
                trace!("Event received: {:x?}", mesg);
                self.deliver(mesg.channel(), frame);
                if mesg.code() != ChannelResponseCode::EventChannelClosed {
                    return;
                }
            }
            _ => {}
        }
        trace!("Routing response: {:x?}", response);
        let _ = self.responses.send(Ok(response));
    }

    fn deliver(&mut self, channel: u8, frame: &[u8]) {
        if let Some(handler) = self.handlers.get_mut(&channel) {
            handler(frame);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{
        BroadcastDataMessage, ChannelResponseMessage, ReadBuffer, EVENT_CHANNEL_CLOSED,
        MESG_ASSIGN_CHANNEL_ID, MESG_EVENT_ID, MESG_OPEN_CHANNEL_ID, MESG_REQUEST,
        MESG_STARTUP_MESG_ID,
    };
    use crate::network::ANT_PLUS_NETWORK_KEY;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const TEST_TIMEOUT: Duration = Duration::from_millis(200);

    #[derive(Default)]
    struct Radio {
        incoming: VecDeque<Vec<u8>>,
        written: Vec<Message>,
        reject: Option<u8>,
        silent: bool,
    }

    /// Port answering commands the way an ANT USB stick does.
    #[derive(Clone, Default)]
    struct FakePort(Arc<Mutex<Radio>>);

    impl FakePort {
        fn push(&self, mesg: Message) {
            self.0.lock().unwrap().incoming.push_back(mesg.encode());
        }

        fn written(&self) -> Vec<u8> {
            self.0.lock().unwrap().written.iter().map(|m| m.id).collect()
        }
    }

    impl Port for FakePort {
        fn read(&mut self) -> Result<ReadBuffer> {
            let next = self.0.lock().unwrap().incoming.pop_front();
            match next {
                Some(bytes) => Ok(ReadBuffer::new(&bytes)),
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Err(rusb::Error::Timeout.into())
                }
            }
        }

        fn write(&self, bytes: &[u8]) -> Result<usize> {
            let frame = ReadBuffer::new(bytes).next().unwrap();
            let mesg = Message::new(frame[2], &frame[3..frame.len() - 1]);
            let mut radio = self.0.lock().unwrap();
            radio.written.push(mesg.clone());
            if radio.silent {
                return Ok(bytes.len());
            }
            let replies = match mesg.id {
                MESG_RESET => vec![Message::new(MESG_STARTUP_MESG_ID, &[0x20])],
                MESG_REQUEST => vec![Message::new(MESG_CAPABILITIES_ID, &[8, 3, 0, 0])],
                id => {
                    let code = if radio.reject == Some(id) { 0x15 } else { 0 };
                    let mut replies =
                        vec![ChannelResponseMessage::new(mesg.data[0], id, code).to_message()];
                    if id == MESG_CLOSE_CHANNEL_ID {
                        replies.push(
                            ChannelResponseMessage::new(
                                mesg.data[0],
                                MESG_EVENT_ID,
                                EVENT_CHANNEL_CLOSED,
                            )
                            .to_message(),
                        );
                    }
                    replies
                }
            };
            for reply in replies {
                radio.incoming.push_back(reply.encode());
            }
            Ok(bytes.len())
        }
    }

    fn start(port: &FakePort) -> AntNode {
        AntNode::start_with_timeout(port.clone(), TEST_TIMEOUT).unwrap()
    }

    #[test]
    fn start_resets_radio() {
        let port = FakePort::default();
        let mut node = start(&port);
        assert_eq!(port.written(), vec![MESG_RESET, MESG_REQUEST]);
        assert_eq!(node.channels.len(), 8);
        node.stop().unwrap();
    }

    #[test]
    fn start_without_startup() {
        let port = FakePort::default();
        port.0.lock().unwrap().silent = true;
        match AntNode::start_with_timeout(port.clone(), TEST_TIMEOUT) {
            Err(AntError::Transport(TransportError::Reset)) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("node started without a radio"),
        }
        assert_eq!(port.written(), vec![MESG_RESET; RESET_ATTEMPTS]);
    }

    #[test]
    fn configure_channel() {
        let port = FakePort::default();
        let mut node = start(&port);
        node.set_network_key(0, &ANT_PLUS_NETWORK_KEY).unwrap();
        let channel = node.free_channel().unwrap();
        assert_eq!(channel, 0);
        node.assign(channel, 0x00, 0).unwrap();
        assert_eq!(node.free_channel().unwrap(), 1);
        node.set_channel_id(channel, 0, 11, 0).unwrap();
        node.set_search_timeout(channel, 0xFF).unwrap();
        node.set_period(channel, 8182).unwrap();
        node.set_frequency(channel, 57).unwrap();
        node.open(channel).unwrap();
        node.close(channel).unwrap();
        node.unassign(channel).unwrap();
        assert_eq!(node.free_channel().unwrap(), 0);
        assert_eq!(
            port.written()[2..],
            [0x46, 0x42, 0x51, 0x44, 0x43, 0x45, 0x4B, 0x4C, 0x41]
        );
        node.stop().unwrap();
    }

    #[test]
    fn no_free_channel() {
        let port = FakePort::default();
        let mut node = start(&port);
        for channel in 0..8 {
            node.assign(channel, 0x00, 0).unwrap();
        }
        match node.free_channel() {
            Err(AntError::RadioProtocol(e)) => assert_eq!(e, RadioProtocolError::NoFreeChannel),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejected_command() {
        let port = FakePort::default();
        port.0.lock().unwrap().reject = Some(MESG_OPEN_CHANNEL_ID);
        let mut node = start(&port);
        node.assign(0, 0x00, 0).unwrap();
        match node.open(0) {
            Err(AntError::RadioProtocol(e)) => assert_eq!(
                e,
                RadioProtocolError::Rejected {
                    channel: 0,
                    message_id: MESG_OPEN_CHANNEL_ID,
                    code: 0x15
                }
            ),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn unanswered_command() {
        let port = FakePort::default();
        let mut node = start(&port);
        port.0.lock().unwrap().silent = true;
        match node.assign(0, 0x00, 0) {
            Err(AntError::RadioProtocol(e)) => {
                assert_eq!(e, RadioProtocolError::ResponseTimeout(MESG_ASSIGN_CHANNEL_ID))
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(node.free_channel().unwrap(), 0);
    }

    #[test]
    fn broadcast_delivered_to_channel_handler() {
        let port = FakePort::default();
        let mut node = start(&port);
        let (tx, rx) = unbounded();
        node.on_broadcast(
            0,
            Box::new(move |frame: &[u8]| {
                let _ = tx.send(frame.to_vec());
            }),
        )
        .unwrap();
        node.assign(0, 0x00, 0).unwrap();

        let other_channel = BroadcastDataMessage::new(1, &[0x10, 0, 0, 0, 0, 0, 0x64, 0]);
        let page = BroadcastDataMessage::new(0, &[0x10, 1, 0xFF, 0xFF, 0, 0, 0x34, 0x01]);
        port.push(other_channel.to_message());
        port.push(page.to_message());

        let frame = rx.recv_timeout(TEST_TIMEOUT).unwrap();
        assert_eq!(message::decode_broadcast(&frame), Some(page));
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn stop_twice() {
        let port = FakePort::default();
        let mut node = start(&port);
        node.stop().unwrap();
        node.stop().unwrap();
        assert!(matches!(
            node.open(0),
            Err(AntError::Transport(TransportError::Disconnected))
        ));
    }
}
