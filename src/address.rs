use crate::AvdtpError;

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(char::from(HEX[usize::from(byte >> 4)])).ok();
            result.push(char::from(HEX[usize::from(byte & 0x0F)])).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidAddress`] if the string is not six
    /// colon-separated hex octets
    pub fn from_hex(hex: &str) -> Result<Self, AvdtpError> {
        if hex.len() != 17 {
            return Err(AvdtpError::InvalidAddress);
        }

        let mut bytes = [0u8; 6];
        let mut parts = hex.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or(AvdtpError::InvalidAddress)?;
            if part.len() != 2 {
                return Err(AvdtpError::InvalidAddress);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AvdtpError::InvalidAddress)?;
        }
        if parts.next().is_some() {
            return Err(AvdtpError::InvalidAddress);
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = AvdtpError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluetooth_address_format_hex() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");

        let addr_mixed = BluetoothAddress::new([0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);
        assert_eq!(addr_mixed.format_hex().as_str(), "0A:B1:2C:D3:4E:F5");
    }

    #[test]
    fn test_bluetooth_address_parse() {
        let addr: BluetoothAddress = "12:34:56:78:9a:BC".try_into().unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert_eq!(
            BluetoothAddress::from_hex("12:34:56:78:9A"),
            Err(AvdtpError::InvalidAddress)
        );
        assert_eq!(
            BluetoothAddress::from_hex("12-34-56-78-9A-BC"),
            Err(AvdtpError::InvalidAddress)
        );
        assert_eq!(
            BluetoothAddress::from_hex("GG:34:56:78:9A:BC"),
            Err(AvdtpError::InvalidAddress)
        );
    }
}
