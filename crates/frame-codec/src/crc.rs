pub const CRC8_POLY: u8 = 0x07;
pub const CRC8_INIT: u8 = 0xFF;

/// CRC-8, MSB first, no reflection, no final XOR.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for b in data {
        crc ^= *b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_reference_values() {
        assert_eq!(crc8(&[0x00]), 0xF3);
        assert_eq!(crc8(b"123456789"), 0xFB);
        assert_eq!(crc8(&[0x01, 0x04, 0x06, 0x00, 0x00, 0x00, 0x01]), 0x73);
    }

    #[test]
    fn test_crc8_empty_is_init() {
        assert_eq!(crc8(&[]), CRC8_INIT);
    }

    #[test]
    fn test_crc8_detects_every_single_bit_flip() {
        let body = [0x10u8, 0x04, 0x03, 0x41, 0xC8, 0x00, 0x00, 0x02, 0x02, 0x4F, 0x4B];
        let reference = crc8(&body);
        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body;
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc8(&flipped), reference, "byte {byte} bit {bit}");
            }
        }
    }
}
