/// A UsbContext and UsbDevice for interacting with the physical
/// ANT USB stick.
use std::fmt;
use std::time::Duration;

pub use rusb::{Context, UsbContext};
use rusb::{DeviceHandle, Error};

use super::{
    error::{AntError, TransportError},
    message::ReadBuffer,
    Result,
};

// Dynastream Innovations, maker of the ANT USB sticks.
pub const VENDOR_ID: u16 = 0x0FCF;
const USB_ANT_INTERFACE: u8 = 0;
const USB_ANT_EP_IN: u8 = 0x81;
const USB_ANT_EP_OUT: u8 = 0x01;
const TX_BUF_SIZE: usize = 255;

/// Which USB device to open: a vendor id and optionally a product id,
/// written `VVVV` or `VVVV:PPPP` in hex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceIdentity {
    vendor_id: u16,
    product_id: Option<u16>,
}

impl DeviceIdentity {
    pub fn parse(identity: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidDeviceIdentity(identity.to_string());
        let hex = |s: &str| u16::from_str_radix(s.trim(), 16).map_err(|_| invalid());
        let mut parts = identity.splitn(2, ':');
        let vendor_id = match parts.next() {
            Some(vendor) if !vendor.trim().is_empty() => hex(vendor)?,
            _ => return Err(invalid().into()),
        };
        let product_id = match parts.next() {
            Some(product) => Some(hex(product)?),
            None => None,
        };
        Ok(DeviceIdentity {
            vendor_id,
            product_id,
        })
    }

    fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id.map_or(true, |p| p == product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}", self.vendor_id)?;
        if let Some(product_id) = self.product_id {
            write!(f, ":{:04x}", product_id)?;
        }
        Ok(())
    }
}

/// Raw byte access to the radio, as used by the node's receive loop.
pub trait Port: Send {
    fn read(&mut self) -> Result<ReadBuffer>;
    fn write(&self, message: &[u8]) -> Result<usize>;
}

/// UsbDevice struct that holds the device handle to the USB device
/// along with a buffer to read data from.
pub struct UsbDevice<T: UsbContext> {
    handle: DeviceHandle<T>,
    buffer: [u8; TX_BUF_SIZE],
}

impl<T: UsbContext> UsbDevice<T> {
    /// Open the first USB device matching the identity and claim its ANT
    /// interface.
    pub fn init(ctx: &mut T, identity: &DeviceIdentity) -> Result<UsbDevice<T>> {
        for device in ctx.devices()?.iter() {
            let device_desc = device.device_descriptor()?;
            if !identity.matches(device_desc.vendor_id(), device_desc.product_id()) {
                continue;
            }
            log::debug!(
                "Opening ANT device {:04x}:{:04x} on bus {} address {}",
                device_desc.vendor_id(),
                device_desc.product_id(),
                device.bus_number(),
                device.address()
            );
            let mut handle = device.open()?;
            match handle.reset() {
                Ok(_) => {}
                // Device re-enumerated after reset, open it again.
                Err(Error::NotFound) => handle = device.open()?,
                Err(e) => return Err(AntError::from(e)),
            }
            handle.claim_interface(USB_ANT_INTERFACE)?;
            return Ok(UsbDevice {
                handle,
                buffer: [0; TX_BUF_SIZE],
            });
        }
        Err(TransportError::NoDevice(identity.to_string()).into())
    }

    /// Read from the USB device with the specified timeout.
    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<ReadBuffer> {
        let buffer = &mut self.buffer;
        self.handle
            .read_bulk(USB_ANT_EP_IN, buffer, timeout)
            .map(|len| ReadBuffer::new(&buffer[..len]))
            .map_err(AntError::from)
    }

    /// Write message to the USB device with a specified timeout.
    pub fn write_with_timeout(&self, message: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(USB_ANT_EP_OUT, message, timeout)
            .map_err(AntError::from)
    }
}

impl<T: UsbContext> Port for UsbDevice<T> {
    /// Read from the USB device with a timeout of 10 milliseconds.
    fn read(&mut self) -> Result<ReadBuffer> {
        self.read_with_timeout(Duration::from_millis(10))
    }

    /// Write message to the USB device with a timeout of 1 second.
    fn write(&self, message: &[u8]) -> Result<usize> {
        self.write_with_timeout(message, Duration::from_secs(1))
    }
}

impl<T: UsbContext> Drop for UsbDevice<T> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(USB_ANT_INTERFACE) {
            log::debug!("Error releasing ANT interface: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_vendor() {
        let identity = DeviceIdentity::parse("0fcf").unwrap();
        assert_eq!(identity.vendor_id, VENDOR_ID);
        assert_eq!(identity.product_id, None);
        assert!(identity.matches(0x0FCF, 0x1008));
        assert!(identity.matches(0x0FCF, 0x1009));
        assert!(!identity.matches(0x1234, 0x1008));
    }

    #[test]
    fn parse_vendor_and_product() {
        let identity = DeviceIdentity::parse("0FCF:1009").unwrap();
        assert_eq!(identity.product_id, Some(0x1009));
        assert!(identity.matches(0x0FCF, 0x1009));
        assert!(!identity.matches(0x0FCF, 0x1008));
        assert_eq!(identity.to_string(), "0fcf:1009");
    }

    #[test]
    fn parse_invalid() {
        for identity in ["", "/dev/ttyUSB0", "0fcf:", "0fcf:zz", ":1008"].iter() {
            match DeviceIdentity::parse(identity) {
                Err(AntError::Transport(TransportError::InvalidDeviceIdentity(s))) => {
                    assert_eq!(s, *identity)
                }
                other => panic!("{:?} parsed as {:?}", identity, other),
            }
        }
    }
}
