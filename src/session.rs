/// PowerMeter owns the lifecycle of the single channel to a power meter: the node is opened,
/// the network key written and the channel configured and opened on start, and everything is
/// torn down again on stop. A session runs once; after stop a new one has to be created.
use std::ops::{Deref, DerefMut};

use log::{debug, info, warn};

use super::Result;
use crate::{
    channel::Config,
    dispatch::{Dispatcher, Sink},
    error::AntError,
    network::{NetworkKey, ANT_PLUS_NETWORK},
    node::{Driver, Node},
};

/// Identity of the ANT USB stick used when none is given: any Dynastream device.
pub const DEFAULT_DEVICE: &str = "0fcf";

/// Everything a session needs to know before it starts.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    device: String,
    network_key: NetworkKey,
    channel: Config,
}

impl Settings {
    pub fn new(device: impl Into<String>, network_key: NetworkKey) -> Self {
        Settings {
            device: device.into(),
            network_key,
            channel: Config::power_meter(),
        }
    }

    pub fn channel(mut self, channel: Config) -> Self {
        self.channel = channel;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new(DEFAULT_DEVICE, NetworkKey::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum State {
    Unconfigured,
    Assigned,
    Open,
    Closed,
}

pub struct PowerMeter<D: Driver, S: Sink + 'static> {
    driver: D,
    settings: Settings,
    state: State,
    sink: Option<S>,
    node: Option<D::Node>,
    channel: Option<u8>,
}

impl<D: Driver, S: Sink + 'static> PowerMeter<D, S> {
    pub fn new(driver: D, settings: Settings, sink: S) -> Self {
        PowerMeter {
            driver,
            settings,
            state: State::Unconfigured,
            sink: Some(sink),
            node: None,
            channel: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Channel number in use, once one has been acquired.
    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    /// Open the node and the power meter channel. Power readings are
    /// delivered to the sink from the node's receive loop once this returns.
    /// On error everything acquired so far is released and the session is
    /// closed.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Unconfigured => {}
            State::Closed => return Err(AntError::SessionClosed),
            State::Assigned | State::Open => return Err(AntError::AlreadyRunning),
        }
        info!("Starting node on {}", self.settings.device);
        if let Err(e) = self.open() {
            warn!("Failed to start power meter channel: {}", e);
            self.stop();
            return Err(e);
        }
        info!("Listening for power events");
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let settings = &self.settings;
        let config = &settings.channel;
        let node = self.node.insert(self.driver.open_node(&settings.device)?);

        node.set_network_key(ANT_PLUS_NETWORK, &settings.network_key)?;
        let channel = *self.channel.insert(node.free_channel()?);
        debug!("Assigning channel {}", channel);
        node.assign(channel, config.get_channel_type(), ANT_PLUS_NETWORK)?;
        self.state = State::Assigned;

        node.set_channel_id(
            channel,
            config.get_device_number(),
            config.get_device_type(),
            config.get_transmission_type(),
        )?;
        node.set_search_timeout(channel, config.get_timeout())?;
        node.set_period(channel, config.get_period())?;
        node.set_frequency(channel, config.get_frequency())?;

        // Registered before opening so no frame is missed once the sensor pairs.
        if let Some(sink) = self.sink.take() {
            node.on_broadcast(channel, Dispatcher::new(sink).into_handler())?;
        }
        node.open(channel)?;
        self.state = State::Open;
        info!("Channel {} is open", channel);
        Ok(())
    }

    /// Close and unassign the channel and stop the node. Every step is tried
    /// even if an earlier one failed; failures are logged, never returned.
    /// Safe to call any number of times, and before or after a failed start.
    pub fn stop(&mut self) {
        if let Some(node) = self.node.as_mut() {
            if let Some(channel) = self.channel.take() {
                debug!("Closing channel {}", channel);
                if let Err(e) = node.close(channel) {
                    warn!("Error closing channel {}: {}", channel, e);
                }
                if let Err(e) = node.unassign(channel) {
                    warn!("Error unassigning channel {}: {}", channel, e);
                }
            }
        }
        if let Some(mut node) = self.node.take() {
            debug!("Stopping node");
            if let Err(e) = node.stop() {
                warn!("Error stopping node: {}", e);
            }
            info!("Power meter stopped");
        }
        self.channel = None;
        self.state = State::Closed;
    }

    /// Start the session and hand back a guard that stops it when dropped,
    /// whichever way the caller's scope is left.
    pub fn session(&mut self) -> Result<Session<'_, D, S>> {
        self.start()?;
        Ok(Session { meter: self })
    }
}

impl<D: Driver, S: Sink + 'static> Drop for PowerMeter<D, S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A started PowerMeter, stopped on drop.
pub struct Session<'a, D: Driver, S: Sink + 'static> {
    meter: &'a mut PowerMeter<D, S>,
}

impl<'a, D: Driver, S: Sink + 'static> Deref for Session<'a, D, S> {
    type Target = PowerMeter<D, S>;

    fn deref(&self) -> &Self::Target {
        self.meter
    }
}

impl<'a, D: Driver, S: Sink + 'static> DerefMut for Session<'a, D, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.meter
    }
}

impl<'a, D: Driver, S: Sink + 'static> Drop for Session<'a, D, S> {
    fn drop(&mut self) {
        self.meter.stop();
    }
}
