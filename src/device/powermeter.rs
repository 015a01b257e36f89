/// Bicycle power meter. Only the Power Main Data Page (0x10) is decoded,
/// every other page the sensor interleaves (torque, calibration, manufacturer
/// and battery pages) is ignored.
use crate::message::{bytes_to_u16, BroadcastDataMessage};

pub const DEVICE_TYPE: u8 = 0x0B;
pub const RF_FREQUENCY: u8 = 0x39;
// The profile's 4 Hz period is 8182 counts. Some sensors are reported to
// want 4091 (8 Hz), so the session takes it from channel::Config.
pub const CHANNEL_PERIOD: u16 = 8182;

pub const POWER_MAIN_DATA_PAGE: u8 = 0x10;

// Offsets into the broadcast payload, channel number at 0.
const PAGE_OFFSET: usize = 1;
const POWER_LSB_OFFSET: usize = 7;
const POWER_MSB_OFFSET: usize = 8;

/// Instantaneous power in watts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerReading(u16);

impl PowerReading {
    pub fn watts(&self) -> u16 {
        self.0
    }
}

/// Power reading carried by a broadcast, if it is a Power Main Data Page.
/// The value is reported as sent: no clamping or smoothing.
pub fn decode(mesg: &BroadcastDataMessage) -> Option<PowerReading> {
    let payload = mesg.payload();
    if payload[PAGE_OFFSET] != POWER_MAIN_DATA_PAGE {
        return None;
    }
    Some(PowerReading(bytes_to_u16(
        &payload[POWER_LSB_OFFSET..=POWER_MSB_OFFSET],
    )))
}

/// All fields of the Power Main Data Page.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerMainDataPage {
    event_count: u8,
    pedal_power: u8,
    cadence: u8,
    accumulated_power: u16,
    instantaneous_power: u16,
}

impl PowerMainDataPage {
    pub fn parse(mesg: &BroadcastDataMessage) -> Option<Self> {
        let data = mesg.data();
        if data[0] != POWER_MAIN_DATA_PAGE {
            return None;
        }
        Some(PowerMainDataPage {
            event_count: data[1],
            pedal_power: data[2],
            cadence: data[3],
            accumulated_power: bytes_to_u16(&data[4..6]),
            instantaneous_power: bytes_to_u16(&data[6..8]),
        })
    }

    /// Incremented with each new power event, rolls over at 255.
    pub fn event_count(&self) -> u8 {
        self.event_count
    }

    /// Percentage of power from the right pedal, if the sensor reports it.
    pub fn right_pedal_power(&self) -> Option<u8> {
        match self.pedal_power {
            0xFF => None,
            p if p & 0x80 == 0x80 => Some(p & 0x7F),
            _ => None,
        }
    }

    /// Crank cadence in RPM, None when the sensor doesn't measure it.
    pub fn cadence(&self) -> Option<u8> {
        match self.cadence {
            0xFF => None,
            c => Some(c),
        }
    }

    /// Accumulated power in watts, rolls over at 65536.
    pub fn accumulated_power(&self) -> u16 {
        self.accumulated_power
    }

    pub fn instantaneous_power(&self) -> u16 {
        self.instantaneous_power
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn page(data: [u8; 8]) -> BroadcastDataMessage {
        BroadcastDataMessage::new(0, &data)
    }

    #[test]
    fn decode_power() {
        // payload [_, 0x10, _, _, _, _, _, 0x34, 0x01]
        let mesg = page([0x10, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x34, 0x01]);
        assert_eq!(decode(&mesg), Some(PowerReading(308)));
        assert_eq!(decode(&mesg).unwrap().watts(), 0x01 * 256 + 0x34);
    }

    #[test]
    fn decode_power_is_not_filtered() {
        assert_eq!(decode(&page([0x10, 0, 0, 0, 0, 0, 0, 0])), Some(PowerReading(0)));
        assert_eq!(
            decode(&page([0x10, 0, 0, 0, 0, 0, 0xFF, 0xFF])),
            Some(PowerReading(u16::MAX))
        );
    }

    #[test]
    fn decode_power_matches_payload_bytes() {
        for (lsb, msb) in [(0x00, 0x00), (0xFA, 0x00), (0x2C, 0x01), (0x00, 0x07)].iter() {
            let mesg = page([0x10, 1, 0xFF, 90, 0x10, 0x27, *lsb, *msb]);
            let payload = mesg.payload();
            let expected = payload[8] as u16 * 256 + payload[7] as u16;
            assert_eq!(decode(&mesg).map(|p| p.watts()), Some(expected));
        }
    }

    #[test]
    fn decode_other_pages() {
        // Torque effectiveness page
        assert_eq!(decode(&page([0x13, 0, 0, 0, 0, 0, 0x34, 0x01])), None);
        assert_eq!(decode(&page([0x19, 0, 0, 0, 0, 0, 0x34, 0x01])), None);
        for id in (0..=0xFFu8).filter(|id| *id != POWER_MAIN_DATA_PAGE) {
            assert_eq!(decode(&page([id, 0x10, 0x10, 0x10, 0x10, 0x10, 0x34, 0x01])), None);
        }
    }

    #[test]
    fn power_main_data_page() {
        let parsed =
            PowerMainDataPage::parse(&page([0x10, 7, 0xB2, 88, 0x10, 0x27, 0x34, 0x01])).unwrap();
        assert_eq!(parsed.event_count(), 7);
        assert_eq!(parsed.right_pedal_power(), Some(50));
        assert_eq!(parsed.cadence(), Some(88));
        assert_eq!(parsed.accumulated_power(), 10000);
        assert_eq!(parsed.instantaneous_power(), 308);
    }

    #[test]
    fn power_main_data_page_unused_fields() {
        let parsed = PowerMainDataPage::parse(&page([0x10, 0, 0xFF, 0xFF, 0, 0, 0, 0])).unwrap();
        assert_eq!(parsed.right_pedal_power(), None);
        assert_eq!(parsed.cadence(), None);
        assert_eq!(PowerMainDataPage::parse(&page([0x12, 0, 0, 0, 0, 0, 0, 0])), None);
    }
}
