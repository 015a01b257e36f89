/// Device profiles. Each profile module holds the channel parameters for its device type
/// and decodes the data pages the device broadcasts.
pub mod powermeter;
