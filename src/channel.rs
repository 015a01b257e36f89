/// A channel is a means of communication for an ANT+ device. A channel gets mapped to a
/// single sensor: the first device found that matches the channel id is the one whose data
/// is routed through the channel. Config holds everything the radio needs to know to search
/// for that sensor.
use crate::device::powermeter;

/// Bidirectional slave channel, receiving data from a master sensor.
pub const CHANNEL_TYPE_TWOWAY_RECEIVE: u8 = 0x00;
/// Search timeout that never expires. The channel keeps searching until a
/// sensor is found.
pub const SEARCH_TIMEOUT_NEVER: u8 = 0xFF;
/// Device number and transmission type of 0 match any sensor.
pub const WILDCARD: u8 = 0;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    device_number: u16,
    device_type: u8,
    channel_type: u8,
    frequency: u8,
    period: u16,
    timeout: u8,
    transmission_type: u8,
}

impl Config {
    pub fn new() -> Self {
        Config {
            channel_type: CHANNEL_TYPE_TWOWAY_RECEIVE,
            timeout: SEARCH_TIMEOUT_NEVER,
            ..Default::default()
        }
    }

    /// Channel configuration for pairing with any power meter.
    pub fn power_meter() -> Self {
        Config::new()
            .device_type(powermeter::DEVICE_TYPE)
            .frequency(powermeter::RF_FREQUENCY)
            .period(powermeter::CHANNEL_PERIOD)
    }

    pub fn device_number(mut self, device_number: u16) -> Self {
        self.device_number = device_number;
        self
    }

    pub fn device_type(mut self, device_type: u8) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn channel_type(mut self, channel_type: u8) -> Self {
        self.channel_type = channel_type;
        self
    }

    /// RF frequency as an offset from 2400 MHz.
    pub fn frequency(mut self, frequency: u8) -> Self {
        self.frequency = frequency;
        self
    }

    /// Messaging period in 1/32768 s counts.
    pub fn period(mut self, period: u16) -> Self {
        self.period = period;
        self
    }

    pub fn timeout(mut self, timeout: u8) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transmission_type(mut self, transmission_type: u8) -> Self {
        self.transmission_type = transmission_type;
        self
    }

    pub fn get_device_number(&self) -> u16 {
        self.device_number
    }

    pub fn get_device_type(&self) -> u8 {
        self.device_type
    }

    pub fn get_channel_type(&self) -> u8 {
        self.channel_type
    }

    pub fn get_frequency(&self) -> u8 {
        self.frequency
    }

    pub fn get_period(&self) -> u16 {
        self.period
    }

    pub fn get_timeout(&self) -> u8 {
        self.timeout
    }

    pub fn get_transmission_type(&self) -> u8 {
        self.transmission_type
    }
}
