/// Message module provides a way for creating messages to send to the ANT
/// USB device along with providing a way to decode frames received from the
/// ANT USB device or the ANT+ sensor sending data on a channel.
use crate::network::NetworkKey;
use log::trace;
use std::convert::TryInto;
use std::fmt;

pub const MESG_TX_SYNC: u8 = 0xA4;
pub const MESG_SYNC_SIZE: usize = 1;
pub const MESG_SIZE_SIZE: usize = 1;
pub const MESG_ID_SIZE: usize = 1;
pub const MESG_CHECKSUM_SIZE: usize = 1;
pub const MESG_DATA_SIZE: usize = 9;
pub const MESG_PAGE_SIZE: usize = 8;

pub const MESG_HEADER_SIZE: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE + MESG_ID_SIZE;
pub const MESG_FRAME_SIZE: usize = MESG_HEADER_SIZE + MESG_CHECKSUM_SIZE;
pub const MESG_SIZE_OFFSET: usize = MESG_SYNC_SIZE;
pub const MESG_ID_OFFSET: usize = MESG_SYNC_SIZE + MESG_SIZE_SIZE;
pub const MESG_DATA_OFFSET: usize = MESG_HEADER_SIZE;
// USB sticks expect outgoing frames to be padded with zeros.
const MESG_PADDING_SIZE: usize = 2;

pub const MESG_EVENT_ID: u8 = 0x01;
pub const MESG_RESPONSE_EVENT_ID: u8 = 0x40;
pub const MESG_UNASSIGN_CHANNEL_ID: u8 = 0x41;
pub const MESG_ASSIGN_CHANNEL_ID: u8 = 0x42;
pub const MESG_CHANNEL_MESG_PERIOD_ID: u8 = 0x43;
pub const MESG_CHANNEL_SEARCH_TIMEOUT_ID: u8 = 0x44;
pub const MESG_CHANNEL_RADIO_FREQ_ID: u8 = 0x45;
pub const MESG_NETWORK_KEY_ID: u8 = 0x46;
pub const MESG_RESET: u8 = 0x4A;
pub const MESG_OPEN_CHANNEL_ID: u8 = 0x4B;
pub const MESG_CLOSE_CHANNEL_ID: u8 = 0x4C;
pub const MESG_REQUEST: u8 = 0x4D;
pub const MESG_BROADCAST_DATA_ID: u8 = 0x4E;
pub const MESG_ACKNOWLEDGE_DATA_ID: u8 = 0x4F;
pub const MESG_CHANNEL_ID_ID: u8 = 0x51;
pub const MESG_CAPABILITIES_ID: u8 = 0x54;
pub const MESG_STARTUP_MESG_ID: u8 = 0x6F;

pub const EVENT_RX_SEARCH_TIMEOUT: u8 = 0x01;
pub const EVENT_CHANNEL_CLOSED: u8 = 0x07;
pub const CHANNEL_IN_WRONG_STATE: u8 = 0x15;

/// ReadBuffer walks the bytes read from the ANT USB device and yields every
/// well formed frame (sync byte through checksum) it finds.
pub struct ReadBuffer {
    index: usize,
    inner: Vec<u8>,
}

impl ReadBuffer {
    pub fn new(buffer: &[u8]) -> Self {
        ReadBuffer {
            index: 0,
            inner: buffer.to_vec(),
        }
    }
}

// Search for a sync byte, then check that the declared length fits in what
// was read and that the checksum of the frame is valid. Anything else is
// skipped one byte at a time until the next sync byte.
impl Iterator for ReadBuffer {
    type Item = Vec<u8>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.index >= self.inner.len() {
                return None;
            }
            let start = self.index;
            if self.inner[start] == MESG_TX_SYNC && start + MESG_SIZE_OFFSET < self.inner.len() {
                let end = start + self.inner[start + MESG_SIZE_OFFSET] as usize + MESG_FRAME_SIZE;
                if end <= self.inner.len() && checksum(&self.inner[start..end]) == 0 {
                    self.index = end;
                    return Some(self.inner[start..end].to_vec());
                }
            }
            self.index += 1;
        }
    }
}

fn checksum(buf: &[u8]) -> u8 {
    buf.iter().fold(0, |acc, b| acc ^ b)
}

/// Responses that can be received from the ANT USB device.
/// Startup is received after the radio is reset.
/// Capabilities answers a capabilities request.
/// ChannelResponse are responses to configuration commands or channel events.
/// BroadcastData is data received from the ANT+ sensor.
#[derive(Debug, PartialEq)]
pub enum Response {
    Startup(StartupMessage),
    Capabilities(CapabilitiesMessage),
    ChannelResponse(ChannelResponseMessage),
    BroadcastData(BroadcastDataMessage),
}

impl Response {
    /// Parse a frame yielded by a ReadBuffer. Message types that aren't
    /// modelled here, or frames with an unexpected data length, give None.
    pub fn parse(frame: &[u8]) -> Option<Response> {
        if frame.len() < MESG_FRAME_SIZE {
            return None;
        }
        let size = frame[MESG_SIZE_OFFSET] as usize;
        let data = frame.get(MESG_DATA_OFFSET..MESG_DATA_OFFSET + size)?;
        match frame[MESG_ID_OFFSET] {
            MESG_STARTUP_MESG_ID => data.first().map(|r| Response::Startup(StartupMessage(*r))),
            MESG_CAPABILITIES_ID => {
                CapabilitiesMessage::from_slice(data).map(Response::Capabilities)
            }
            MESG_RESPONSE_EVENT_ID => {
                ChannelResponseMessage::from_slice(data).map(Response::ChannelResponse)
            }
            MESG_BROADCAST_DATA_ID => {
                BroadcastDataMessage::from_slice(data).map(Response::BroadcastData)
            }
            id => {
                trace!("Dropping message {:#04x}: {:x?}", id, data);
                None
            }
        }
    }
}

/// Decode a raw frame as broadcast data. Everything else on the channel
/// (responses, events, acknowledged or burst data) gives None, as does a
/// broadcast frame whose data page isn't exactly 8 bytes.
pub fn decode_broadcast(frame: &[u8]) -> Option<BroadcastDataMessage> {
    match Response::parse(frame)? {
        Response::BroadcastData(mesg) => Some(mesg),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
pub struct StartupMessage(u8);

impl StartupMessage {
    pub fn reason(&self) -> StartupReason {
        match self.0 {
            0x00 => StartupReason::PowerOnReset,
            0x01 => StartupReason::HardwareResetLine,
            0x02 => StartupReason::WatchDogReset,
            0x20 => StartupReason::CommandReset,
            0x40 => StartupReason::SynchronousReset,
            0x80 => StartupReason::SuspendReset,
            _ => StartupReason::Error,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum StartupReason {
    PowerOnReset,
    HardwareResetLine,
    WatchDogReset,
    CommandReset,
    SynchronousReset,
    SuspendReset,
    Error,
}

/// Capabilities of the USB stick. Only the channel and network counts are
/// kept, the option bytes that follow vary between devices.
#[derive(Debug, PartialEq)]
pub struct CapabilitiesMessage {
    max_channels: u8,
    max_networks: u8,
}

impl CapabilitiesMessage {
    pub fn from_slice(mesg: &[u8]) -> Option<Self> {
        match mesg {
            [max_channels, max_networks, ..] => Some(CapabilitiesMessage {
                max_channels: *max_channels,
                max_networks: *max_networks,
            }),
            _ => None,
        }
    }

    pub fn max_channels(&self) -> u8 {
        self.max_channels
    }

    pub fn max_networks(&self) -> u8 {
        self.max_networks
    }
}

#[derive(Debug, PartialEq)]
pub enum ChannelResponseCode {
    ResponseNoError,
    EventRxSearchTimeout,
    EventRxFail,
    EventTx,
    EventTransferTxCompleted,
    EventTransferTxFailed,
    EventChannelClosed,
    EventRxFailGoToSearch,
    ChannelCollision,
    ChannelInWrongState,
    ChannelNotOpened,
    ChannelIdNotSet,
    InvalidMessage,
    InvalidNetworkNumber,
    Other(u8),
}

impl From<u8> for ChannelResponseCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => ChannelResponseCode::ResponseNoError,
            0x01 => ChannelResponseCode::EventRxSearchTimeout,
            0x02 => ChannelResponseCode::EventRxFail,
            0x03 => ChannelResponseCode::EventTx,
            0x05 => ChannelResponseCode::EventTransferTxCompleted,
            0x06 => ChannelResponseCode::EventTransferTxFailed,
            0x07 => ChannelResponseCode::EventChannelClosed,
            0x08 => ChannelResponseCode::EventRxFailGoToSearch,
            0x09 => ChannelResponseCode::ChannelCollision,
            0x15 => ChannelResponseCode::ChannelInWrongState,
            0x16 => ChannelResponseCode::ChannelNotOpened,
            0x18 => ChannelResponseCode::ChannelIdNotSet,
            0x28 => ChannelResponseCode::InvalidMessage,
            0x29 => ChannelResponseCode::InvalidNetworkNumber,
            other => ChannelResponseCode::Other(other),
        }
    }
}

/// Channel response or channel event: [channel, message id, code]. The
/// message id is MESG_EVENT_ID for events, otherwise the id of the command
/// being answered.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelResponseMessage([u8; 3]);

impl ChannelResponseMessage {
    pub fn new(channel: u8, message_id: u8, code: u8) -> Self {
        Self([channel, message_id, code])
    }

    pub fn from_slice(mesg: &[u8]) -> Option<Self> {
        mesg.get(..3)?.try_into().ok().map(Self)
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    pub fn message_id(&self) -> u8 {
        self.0[1]
    }

    pub fn raw_code(&self) -> u8 {
        self.0[2]
    }

    pub fn code(&self) -> ChannelResponseCode {
        ChannelResponseCode::from(self.0[2])
    }

    pub fn is_event(&self) -> bool {
        self.message_id() == MESG_EVENT_ID
    }

    pub fn to_message(&self) -> Message {
        Message::new(MESG_RESPONSE_EVENT_ID, &self.0)
    }
}

/// Broadcast data received on a channel: the channel number followed by the
/// 8 byte data page. Offsets used by the device decoders count the channel
/// number as byte 0, so the page number is byte 1.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastDataMessage([u8; MESG_DATA_SIZE]);

impl BroadcastDataMessage {
    pub fn new(channel_number: u8, data: &[u8; MESG_PAGE_SIZE]) -> Self {
        let mut buf = [0; MESG_DATA_SIZE];
        buf[0] = channel_number;
        buf[1..].copy_from_slice(data);
        Self(buf)
    }

    pub fn from_slice(mesg: &[u8]) -> Option<Self> {
        mesg.try_into().ok().map(Self)
    }

    pub fn channel(&self) -> u8 {
        self.0[0]
    }

    /// The data page without the channel number.
    pub fn data(&self) -> &[u8] {
        &self.0[1..]
    }

    /// Channel number and data page.
    pub fn payload(&self) -> &[u8; MESG_DATA_SIZE] {
        &self.0
    }

    pub fn page(&self) -> u8 {
        self.0[1]
    }

    pub fn to_message(&self) -> Message {
        Message::new(MESG_BROADCAST_DATA_ID, &self.0)
    }
}

#[derive(Clone, PartialEq)]
pub struct Message {
    pub id: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: u8, data: &[u8]) -> Message {
        Message {
            id,
            data: data.to_vec(),
        }
    }

    // Converts a message into something that can be written out
    pub fn encode(&self) -> Vec<u8> {
        let size = self.data.len();
        let total_size = MESG_HEADER_SIZE + size;
        let mut buf: Vec<u8> = vec![0; total_size + MESG_CHECKSUM_SIZE + MESG_PADDING_SIZE];
        buf[0] = MESG_TX_SYNC;
        buf[MESG_SIZE_OFFSET] = size as u8;
        buf[MESG_ID_OFFSET] = self.id;
        buf[MESG_DATA_OFFSET..total_size].copy_from_slice(&self.data);
        buf[total_size] = checksum(&buf[..total_size]);
        buf
    }

    fn id_as_str(&self) -> &'static str {
        match self.id {
            MESG_STARTUP_MESG_ID => "Startup",
            MESG_CAPABILITIES_ID => "Capabilities",
            MESG_RESPONSE_EVENT_ID => "Response Event",
            MESG_BROADCAST_DATA_ID => "Broadcast Data",
            MESG_ACKNOWLEDGE_DATA_ID => "Acknowledged Data",
            MESG_CHANNEL_ID_ID => "Channel ID",
            MESG_NETWORK_KEY_ID => "Set Network Key",
            MESG_ASSIGN_CHANNEL_ID => "Assign Channel",
            MESG_UNASSIGN_CHANNEL_ID => "Unassign Channel",
            MESG_CHANNEL_SEARCH_TIMEOUT_ID => "Search Timeout",
            MESG_CHANNEL_MESG_PERIOD_ID => "Channel Period",
            MESG_CHANNEL_RADIO_FREQ_ID => "Radio Frequency",
            MESG_OPEN_CHANNEL_ID => "Open Channel",
            MESG_CLOSE_CHANNEL_ID => "Close Channel",
            MESG_REQUEST => "Request",
            MESG_RESET => "Reset",
            _ => "Unknown",
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Key bytes stay out of the logs.
        if self.id == MESG_NETWORK_KEY_ID {
            return write!(
                f,
                "{} ({:#04x}) network {:?}",
                self.id_as_str(),
                self.id,
                self.data.first()
            );
        }
        write!(f, "{} ({:#04x}) {:x?}", self.id_as_str(), self.id, self.data)
    }
}

pub fn reset() -> Message {
    Message::new(MESG_RESET, &[0])
}

pub fn set_network_key(network_number: u8, key: &NetworkKey) -> Message {
    let mut data = vec![network_number];
    data.extend(key.as_bytes());
    Message::new(MESG_NETWORK_KEY_ID, &data)
}

pub fn get_capabilities() -> Message {
    Message::new(MESG_REQUEST, &[0, MESG_CAPABILITIES_ID])
}

pub fn get_channel_id(channel: u8) -> Message {
    Message::new(MESG_REQUEST, &[channel, MESG_CHANNEL_ID_ID])
}

pub fn assign_channel(channel: u8, channel_type: u8, network: u8) -> Message {
    Message::new(MESG_ASSIGN_CHANNEL_ID, &[channel, channel_type, network])
}

pub fn set_channel_id(
    channel: u8,
    device_number: u16,
    device_type: u8,
    transmission_type: u8,
) -> Message {
    let [lsb, msb] = device_number.to_le_bytes();
    Message::new(
        MESG_CHANNEL_ID_ID,
        &[channel, lsb, msb, device_type, transmission_type],
    )
}

pub fn set_search_timeout(channel: u8, timeout: u8) -> Message {
    Message::new(MESG_CHANNEL_SEARCH_TIMEOUT_ID, &[channel, timeout])
}

pub fn set_channel_period(channel: u8, period: u16) -> Message {
    let [lsb, msb] = period.to_le_bytes();
    Message::new(MESG_CHANNEL_MESG_PERIOD_ID, &[channel, lsb, msb])
}

pub fn set_channel_frequency(channel: u8, frequency: u8) -> Message {
    Message::new(MESG_CHANNEL_RADIO_FREQ_ID, &[channel, frequency])
}

pub fn open_channel(channel: u8) -> Message {
    Message::new(MESG_OPEN_CHANNEL_ID, &[channel])
}

pub fn close_channel(channel: u8) -> Message {
    Message::new(MESG_CLOSE_CHANNEL_ID, &[channel])
}

pub fn unassign_channel(channel: u8) -> Message {
    Message::new(MESG_UNASSIGN_CHANNEL_ID, &[channel])
}

// bytes_to_u16 takes a byte slice formatted in [LSB, MSB] and combines the two fields together
// into a single u16.
pub(crate) fn bytes_to_u16(b: &[u8]) -> u16 {
    match b {
        [] => 0,
        [lsb] => *lsb as u16,
        [lsb, msb, ..] => u16::from_le_bytes([*lsb, *msb]),
    }
}
