/// Modbus CRC16: init 0xFFFF, reflected polynomial 0xA001.
///
/// The result is transmitted low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC of an RTU frame whose last two bytes are the trailer (or a
/// placeholder for it), returned in wire byte order: the value the trailer
/// reads as when taken big-endian.
pub fn crc16_frame(frame: &[u8]) -> u16 {
    let payload = &frame[..frame.len().saturating_sub(2)];
    crc16(payload).swap_bytes()
}

/// Longitudinal redundancy check over raw (not hex encoded) address + PDU bytes.
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

/// Checks the trailing little-endian CRC of an RTU frame.
pub fn validate_crc16(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let tail = &frame[frame.len() - 2..];
    crc16_frame(frame) == u16::from_be_bytes([tail[0], tail[1]])
}

/// Checks the trailing LRC byte of raw (already hex-decoded) ASCII frame bytes.
pub fn validate_lrc(raw: &[u8]) -> bool {
    match raw.split_last() {
        Some((&received, payload)) => lrc(payload) == received,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_known_vectors() {
        assert_eq!(crc16(&[0x02, 0x07]), 0x1241);
        assert_eq!(crc16(&[0x02, 0x01, 0x00, 0x00, 0x00, 0x03]), 0x387C);
        assert_eq!(crc16(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x70C5);
    }

    #[test]
    fn crc16_frame_skips_placeholder_trailer() {
        assert_eq!(crc16_frame(&[0x02, 0x07, 0x00, 0x00]), 0x4112);
        assert_eq!(crc16_frame(&[0x02, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00]), 0x7C38);
        assert_eq!(crc16_frame(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC5, 0x70]), 0xC570);

        // low byte goes out first
        let trailer = crc16(&[0x02, 0x07]).to_le_bytes();
        assert_eq!(u16::from_be_bytes(trailer), crc16_frame(&[0x02, 0x07, 0xFF, 0xFF]));
    }

    #[test]
    fn crc16_of_empty_input_is_init_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn lrc_is_twos_complement_of_sum() {
        assert_eq!(lrc(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02]), 0xF1);
        assert_eq!(lrc(&[]), 0x00);
        assert_eq!(lrc(&[0xFF, 0x01]), 0x00);
        assert_eq!(lrc(&[0x01]), 0xFF);
    }

    #[test]
    fn validate_trailing_fields() {
        assert!(validate_crc16(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC5, 0x70]));
        assert!(!validate_crc16(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02, 0x70, 0xC5]));
        assert!(!validate_crc16(&[0x01]));

        assert!(validate_lrc(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02, 0xF1]));
        assert!(!validate_lrc(&[0x0A, 0x03, 0x00, 0x00, 0x00, 0x02, 0xF0]));
        assert!(!validate_lrc(&[]));
    }
}
