pub mod ant;
pub mod channel;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod session;
pub mod usb;

pub type Result<T> = std::result::Result<T, error::AntError>;

pub use ant::{AntNode, UsbDriver};
pub use dispatch::Sink;
pub use error::AntError;
pub use network::NetworkKey;
pub use session::{PowerMeter, Settings};
