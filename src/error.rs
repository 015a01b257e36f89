use rusb::Error as USBError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AntError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("radio protocol error: {0}")]
    RadioProtocol(#[from] RadioProtocolError),
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session is closed")]
    SessionClosed,
}

/// Failures reaching or starting the radio node.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    UsbDeviceError(#[from] USBError),
    #[error("no ANT USB device found matching {0}")]
    NoDevice(String),
    #[error("invalid device identity {0:?}, expected VVVV or VVVV:PPPP in hex")]
    InvalidDeviceIdentity(String),
    #[error("radio did not report startup after reset")]
    Reset,
    #[error("receive thread is no longer running")]
    Disconnected,
    #[error("failed to start receive thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// The radio answered a command with an error, or not at all.
#[derive(Error, Debug, PartialEq)]
pub enum RadioProtocolError {
    #[error("message {message_id:#04x} on channel {channel} rejected with code {code:#04x}")]
    Rejected { channel: u8, message_id: u8, code: u8 },
    #[error("no response to message {0:#04x}")]
    ResponseTimeout(u8),
    #[error("no free channel available")]
    NoFreeChannel,
}

impl From<USBError> for AntError {
    fn from(e: USBError) -> Self {
        AntError::Transport(TransportError::UsbDeviceError(e))
    }
}

impl AntError {
    /// True for read timeouts on the USB device, which the receive loop
    /// treats as "nothing to read".
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AntError::Transport(TransportError::UsbDeviceError(USBError::Timeout))
        )
    }
}
