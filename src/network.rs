/// Network key shared by every device on an ANT network. A channel can only
/// be assigned once the key for its network has been written to the radio.
use std::fmt;
use std::str::FromStr;

/// Network slot the power meter channel is assigned to.
pub const ANT_PLUS_NETWORK: u8 = 0;

/// Public ANT+ network key.
pub const ANT_PLUS_NETWORK_KEY: NetworkKey =
    NetworkKey([0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45]);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkKey([u8; 8]);

impl NetworkKey {
    pub fn new(key: [u8; 8]) -> Self {
        NetworkKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl Default for NetworkKey {
    fn default() -> Self {
        ANT_PLUS_NETWORK_KEY
    }
}

// Never print the key itself.
impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NetworkKey(********)")
    }
}

/// Parses 16 hex digits, optionally separated by `:`, `-` or spaces.
impl FromStr for NetworkKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();
        if digits.len() != 16 || !digits.is_ascii() {
            return Err(format!("network key must be 8 hex bytes, got {:?}", s));
        }
        let mut key = [0u8; 8];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid network key {:?}: {}", s, e))?;
        }
        Ok(NetworkKey(key))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_ant_plus() {
        assert_eq!(NetworkKey::default(), ANT_PLUS_NETWORK_KEY);
        assert_eq!(ANT_PLUS_NETWORK, 0);
    }

    #[test]
    fn parse() {
        let key: NetworkKey = "B9A521FBBD72C345".parse().unwrap();
        assert_eq!(key, ANT_PLUS_NETWORK_KEY);
        let key: NetworkKey = "b9:a5:21:fb:bd:72:c3:45".parse().unwrap();
        assert_eq!(key, ANT_PLUS_NETWORK_KEY);
    }

    #[test]
    fn parse_invalid() {
        assert!("B9A521".parse::<NetworkKey>().is_err());
        assert!("B9A521FBBD72C3ZZ".parse::<NetworkKey>().is_err());
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", ANT_PLUS_NETWORK_KEY), "NetworkKey(********)");
    }
}
