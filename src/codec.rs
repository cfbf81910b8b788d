use serde::{Deserialize, Serialize};

use super::*;

/// Framing profile of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// MBAP header, also used for Modbus over UDP.
    Tcp,
    Rtu,
    Ascii,
}

impl Profile {
    pub fn is_serial(self) -> bool {
        !matches!(self, Profile::Tcp)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Adu {
    Tcp(TcpAdu),
    Rtu(RtuAdu),
    Ascii(AsciiAdu),
}

impl Adu {
    pub fn profile(&self) -> Profile {
        match self {
            Adu::Tcp(_) => Profile::Tcp,
            Adu::Rtu(_) => Profile::Rtu,
            Adu::Ascii(_) => Profile::Ascii,
        }
    }

    pub fn pdu(&self) -> &Pdu {
        match self {
            Adu::Tcp(adu) => &adu.pdu,
            Adu::Rtu(adu) => &adu.pdu,
            Adu::Ascii(adu) => &adu.pdu,
        }
    }

    /// Unit id (TCP) or slave address (serial).
    pub fn unit_id(&self) -> u8 {
        match self {
            Adu::Tcp(adu) => adu.header.unit_id,
            Adu::Rtu(adu) => adu.address,
            Adu::Ascii(adu) => adu.address,
        }
    }

    pub fn transaction_id(&self) -> Option<u16> {
        match self {
            Adu::Tcp(adu) => Some(adu.header.transaction_id),
            _ => None,
        }
    }

    /// TCP frames carry no checksum and are always considered intact.
    pub fn checksum_valid(&self) -> bool {
        match self {
            Adu::Tcp(_) => true,
            Adu::Rtu(adu) => adu.crc_valid,
            Adu::Ascii(adu) => adu.lrc_valid,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Adu::Tcp(adu) => adu.to_bytes(),
            Adu::Rtu(adu) => adu.to_bytes(),
            Adu::Ascii(adu) => adu.to_bytes(),
        }
    }
}

/// Encoder/decoder bound to a single profile.
#[derive(Copy, Clone, Debug)]
pub struct FrameCodec {
    profile: Profile,
}

impl FrameCodec {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// `transaction_id` is ignored by the serial profiles.
    pub fn encode(&self, transaction_id: u16, unit_id: u8, pdu: &Pdu) -> Result<Vec<u8>, ModbusFrameError> {
        match self.profile {
            Profile::Tcp => encode_tcp(transaction_id, unit_id, pdu),
            Profile::Rtu => encode_rtu(unit_id, pdu),
            Profile::Ascii => encode_ascii(unit_id, pdu),
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Adu, ModbusFrameError> {
        match self.profile {
            Profile::Tcp => decode_tcp(frame).map(Adu::Tcp),
            Profile::Rtu => decode_rtu(frame).map(Adu::Rtu),
            Profile::Ascii => decode_ascii(frame).map(Adu::Ascii),
        }
    }

    /// Encodes an already-built ADU, refusing one of another profile.
    pub fn encode_adu(&self, adu: &Adu) -> Result<Vec<u8>, ModbusFrameError> {
        if adu.profile() != self.profile {
            return Err(ModbusFrameError::ProfileMismatch { expected: self.profile, actual: adu.profile() });
        }
        Ok(adu.to_bytes())
    }
}
