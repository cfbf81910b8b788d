use tracing::debug;

use super::*;

pub const MIN_RTU_FRAME: usize = 4;
pub const MAX_RTU_FRAME: usize = 1 + MAX_PDU_SIZE + 2;

/// Modbus-RTU application data unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtuAdu {
    /// 0 is broadcast, 1..=247 a slave.
    pub address: u8,
    pub pdu: Pdu,
    /// CRC as received (or as computed when encoding).
    pub crc: u16,
    /// Whether `crc` matches address + PDU. A mismatch is not an error:
    /// on a shared bus the frame is just dropped.
    pub crc_valid: bool,
}

impl RtuAdu {
    pub fn new(address: u8, pdu: Pdu) -> Self {
        let mut body = Vec::with_capacity(1 + pdu.len());
        body.push(address);
        pdu.write_to(&mut body);
        Self { address, crc: crc16(&body), pdu, crc_valid: true }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + self.pdu.len() + 2);
        frame.push(self.address);
        self.pdu.write_to(&mut frame);
        frame.extend_from_slice(&self.crc.to_le_bytes());
        frame
    }
}

/// `[address][pdu...][crc lo][crc hi]`
pub fn encode_rtu(address: u8, pdu: &Pdu) -> Result<Vec<u8>, ModbusFrameError> {
    if pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusFrameError::PduTooLarge(pdu.len()));
    }
    let adu = RtuAdu::new(address, pdu.clone());
    debug!(
        "Building RTU frame: unit_id={}, FC={:02X}, PDU_len={}, CRC={:04X}",
        address,
        pdu.function_code(),
        pdu.len(),
        adu.crc
    );
    Ok(adu.to_bytes())
}

pub fn decode_rtu(frame: &[u8]) -> Result<RtuAdu, ModbusFrameError> {
    if frame.len() < MIN_RTU_FRAME {
        return Err(ModbusFrameError::FrameTooShort { len: frame.len(), min: MIN_RTU_FRAME });
    }
    if frame.len() > MAX_RTU_FRAME {
        return Err(ModbusFrameError::FrameTooLong { len: frame.len(), max: MAX_RTU_FRAME });
    }

    let body = &frame[..frame.len() - 2];
    let crc = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    let crc_valid = crc16(body) == crc;

    Ok(RtuAdu {
        address: body[0],
        pdu: Pdu::from_bytes(&body[1..])?,
        crc,
        crc_valid,
    })
}
