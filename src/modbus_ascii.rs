use tracing::debug;

use super::*;

pub const ASCII_START: u8 = b':';
pub const ASCII_END: [u8; 2] = [b'\r', b'\n'];
/// `:` + address + function + one data byte + LRC + CRLF.
pub const MIN_ASCII_FRAME: usize = 11;
pub const MAX_ASCII_FRAME: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + 2;

/// Modbus-ASCII application data unit, held in raw (hex-decoded) form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsciiAdu {
    pub address: u8,
    pub pdu: Pdu,
    pub lrc: u8,
    pub lrc_valid: bool,
}

impl AsciiAdu {
    pub fn new(address: u8, pdu: Pdu) -> Self {
        let raw = raw_body(address, &pdu);
        Self { address, lrc: lrc(&raw), pdu, lrc_valid: true }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = raw_body(self.address, &self.pdu);
        raw.push(self.lrc);
        wrap_hex(&raw)
    }
}

fn raw_body(address: u8, pdu: &Pdu) -> Vec<u8> {
    let mut raw = Vec::with_capacity(2 + pdu.len());
    raw.push(address);
    pdu.write_to(&mut raw);
    raw
}

fn wrap_hex(raw: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + raw.len() * 2 + 2);
    frame.push(ASCII_START);
    frame.extend_from_slice(hex::encode_upper(raw).as_bytes());
    frame.extend_from_slice(&ASCII_END);
    frame
}

/// Strips the markers and hex-decodes the body, LRC byte included.
fn unwrap_hex(frame: &[u8]) -> Result<Vec<u8>, ModbusFrameError> {
    if frame.len() < MIN_ASCII_FRAME {
        return Err(ModbusFrameError::FrameTooShort { len: frame.len(), min: MIN_ASCII_FRAME });
    }
    if frame.len() > MAX_ASCII_FRAME {
        return Err(ModbusFrameError::FrameTooLong { len: frame.len(), max: MAX_ASCII_FRAME });
    }
    if frame[0] != ASCII_START {
        return Err(ModbusFrameError::MissingStartMarker);
    }
    if !frame.ends_with(&ASCII_END) {
        return Err(ModbusFrameError::MissingEndMarker);
    }
    Ok(hex::decode(&frame[1..frame.len() - 2])?)
}

/// `:` + hex(address + pdu) + hex(lrc) + CRLF, upper case.
pub fn encode_ascii(address: u8, pdu: &Pdu) -> Result<Vec<u8>, ModbusFrameError> {
    if pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusFrameError::PduTooLarge(pdu.len()));
    }
    let adu = AsciiAdu::new(address, pdu.clone());
    debug!(
        "Building ASCII frame: unit_id={}, FC={:02X}, PDU_len={}, LRC={:02X}",
        address,
        pdu.function_code(),
        pdu.len(),
        adu.lrc
    );
    Ok(adu.to_bytes())
}

pub fn decode_ascii(frame: &[u8]) -> Result<AsciiAdu, ModbusFrameError> {
    let raw = unwrap_hex(frame)?;
    // at least address + function code + lrc, guaranteed by MIN_ASCII_FRAME
    let lrc_valid = validate_lrc(&raw);
    let (&received_lrc, body) = raw.split_last().ok_or(ModbusFrameError::EmptyPdu)?;
    let (&address, pdu) = body.split_first().ok_or(ModbusFrameError::EmptyPdu)?;
    Ok(AsciiAdu {
        address,
        pdu: Pdu::from_bytes(pdu)?,
        lrc: received_lrc,
        lrc_valid,
    })
}

/// Re-frames an RTU frame as ASCII. The CRC is dropped, not checked, and a
/// fresh LRC is computed.
pub fn rtu_to_ascii(frame: &[u8]) -> Result<Vec<u8>, ModbusFrameError> {
    let adu = decode_rtu(frame)?;
    Ok(AsciiAdu::new(adu.address, adu.pdu).to_bytes())
}

/// Re-frames an ASCII frame as RTU with a freshly computed CRC.
pub fn ascii_to_rtu(frame: &[u8]) -> Result<Vec<u8>, ModbusFrameError> {
    let adu = decode_ascii(frame)?;
    Ok(RtuAdu::new(adu.address, adu.pdu).to_bytes())
}
