/// The radio node a session drives. A Driver opens a Node for a device
/// identity; the Node exposes the channel commands the session needs and
/// delivers raw frames received on a channel to a registered handler.
use super::Result;
use crate::network::NetworkKey;

/// Called with each raw frame received on a channel, one at a time.
pub type FrameHandler = Box<dyn FnMut(&[u8]) + Send>;

pub trait Driver {
    type Node: Node;

    /// Open and start the radio node. Blocks until the radio is ready to
    /// accept commands.
    fn open_node(&mut self, device: &str) -> Result<Self::Node>;
}

pub trait Node {
    /// Stop the radio node and release the device. No frames are delivered
    /// once this returns.
    fn stop(&mut self) -> Result<()>;

    /// First channel number not currently assigned.
    fn free_channel(&mut self) -> Result<u8>;

    fn set_network_key(&mut self, network: u8, key: &NetworkKey) -> Result<()>;

    fn assign(&mut self, channel: u8, channel_type: u8, network: u8) -> Result<()>;

    fn set_channel_id(
        &mut self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<()>;

    fn set_search_timeout(&mut self, channel: u8, timeout: u8) -> Result<()>;

    fn set_period(&mut self, channel: u8, period: u16) -> Result<()>;

    fn set_frequency(&mut self, channel: u8, frequency: u8) -> Result<()>;

    fn open(&mut self, channel: u8) -> Result<()>;

    fn close(&mut self, channel: u8) -> Result<()>;

    fn unassign(&mut self, channel: u8) -> Result<()>;

    /// Register the handler for frames received on the channel, replacing
    /// any previous one.
    fn on_broadcast(&mut self, channel: u8, handler: FrameHandler) -> Result<()>;
}
