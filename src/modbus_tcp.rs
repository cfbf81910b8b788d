use tracing::debug;

use super::*;

pub const MBAP_HEADER_LEN: usize = 7;
pub const MIN_TCP_FRAME: usize = MBAP_HEADER_LEN + 1;
pub const MAX_TCP_FRAME: usize = MBAP_HEADER_LEN + MAX_PDU_SIZE;

/// Modbus Application Protocol header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus.
    pub protocol_id: u16,
    /// Unit id + PDU byte count.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    fn write_to(&self, frame: &mut Vec<u8>) {
        frame.extend_from_slice(&self.transaction_id.to_be_bytes());
        frame.extend_from_slice(&self.protocol_id.to_be_bytes());
        frame.extend_from_slice(&self.length.to_be_bytes());
        frame.push(self.unit_id);
    }
}

/// Modbus-TCP application data unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpAdu {
    pub header: MbapHeader,
    pub pdu: Pdu,
}

impl TcpAdu {
    pub fn new(transaction_id: u16, unit_id: u8, pdu: Pdu) -> Result<Self, ModbusFrameError> {
        if pdu.len() > MAX_PDU_SIZE {
            return Err(ModbusFrameError::PduTooLarge(pdu.len()));
        }
        let header = MbapHeader {
            transaction_id,
            protocol_id: 0,
            length: (pdu.len() + 1) as u16,
            unit_id,
        };
        Ok(Self { header, pdu })
    }

    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    pub fn unit_id(&self) -> u8 {
        self.header.unit_id
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + self.pdu.len());
        self.header.write_to(&mut frame);
        self.pdu.write_to(&mut frame);
        frame
    }
}

/// Wraps a PDU into an MBAP frame.
pub fn encode_tcp(transaction_id: u16, unit_id: u8, pdu: &Pdu) -> Result<Vec<u8>, ModbusFrameError> {
    let adu = TcpAdu::new(transaction_id, unit_id, pdu.clone())?;
    debug!(
        "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, PDU_len={}",
        transaction_id,
        unit_id,
        pdu.function_code(),
        pdu.len()
    );
    Ok(adu.to_bytes())
}

/// Parses one complete MBAP frame.
pub fn decode_tcp(frame: &[u8]) -> Result<TcpAdu, ModbusFrameError> {
    if frame.len() < MIN_TCP_FRAME {
        return Err(ModbusFrameError::FrameTooShort { len: frame.len(), min: MIN_TCP_FRAME });
    }
    if frame.len() > MAX_TCP_FRAME {
        return Err(ModbusFrameError::FrameTooLong { len: frame.len(), max: MAX_TCP_FRAME });
    }

    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    if protocol_id != 0 {
        return Err(ModbusFrameError::InvalidProtocolId(protocol_id));
    }

    let length = u16::from_be_bytes([frame[4], frame[5]]);
    if length as usize != frame.len() - 6 {
        return Err(ModbusFrameError::LengthMismatch { declared: length, observed: frame.len() - 6 });
    }

    let header = MbapHeader {
        transaction_id: u16::from_be_bytes([frame[0], frame[1]]),
        protocol_id,
        length,
        unit_id: frame[6],
    };
    let pdu = Pdu::from_bytes(&frame[MBAP_HEADER_LEN..])?;
    Ok(TcpAdu { header, pdu })
}
