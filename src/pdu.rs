use std::fmt;

use thiserror::Error;

use crate::ModbusFrameError;

/// Largest encodable PDU (function code + 252 data bytes).
pub const MAX_PDU_SIZE: usize = 253;

/// Set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    MaskWriteRegister = 0x16,
    ReadWriteMultipleRegisters = 0x17,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 10] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
        FunctionCode::MaskWriteRegister,
        FunctionCode::ReadWriteMultipleRegisters,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|fc| *fc as u8 == code)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            FunctionCode::MaskWriteRegister => "Mask Write Register",
            FunctionCode::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        }
    }
}

/// Modbus exception codes 1..=8.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    #[error("illegal function")]
    IllegalFunction = 0x01,
    #[error("illegal data address")]
    IllegalDataAddress = 0x02,
    #[error("illegal data value")]
    IllegalDataValue = 0x03,
    #[error("slave device failure")]
    SlaveDeviceFailure = 0x04,
    #[error("acknowledge")]
    Acknowledge = 0x05,
    #[error("slave device busy")]
    SlaveDeviceBusy = 0x06,
    #[error("negative acknowledge")]
    NegativeAcknowledge = 0x07,
    #[error("memory parity error")]
    MemoryParityError = 0x08,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x07 => ExceptionCode::NegativeAcknowledge,
            0x08 => ExceptionCode::MemoryParityError,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Function code plus data, independent of framing.
#[derive(Clone, PartialEq, Eq)]
pub struct Pdu {
    function_code: u8,
    data: Vec<u8>,
}

impl Pdu {
    pub fn new(function_code: u8, data: Vec<u8>) -> Self {
        Self { function_code, data }
    }

    pub fn exception(function_code: u8, exception: ExceptionCode) -> Self {
        Self {
            function_code: function_code | EXCEPTION_FLAG,
            data: vec![exception.as_u8()],
        }
    }

    /// Parses `[function code][data...]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModbusFrameError> {
        match bytes.split_first() {
            None => Err(ModbusFrameError::EmptyPdu),
            Some(_) if bytes.len() > MAX_PDU_SIZE => Err(ModbusFrameError::PduTooLarge(bytes.len())),
            Some((&function_code, data)) => Ok(Self { function_code, data: data.to_vec() }),
        }
    }

    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    /// Function code with the exception flag cleared.
    pub fn base_function_code(&self) -> u8 {
        self.function_code & !EXCEPTION_FLAG
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encoded length, function code included.
    pub fn len(&self) -> usize {
        1 + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// Raw exception byte of an exception response.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.data.first().copied()
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.write_to(&mut out);
        out
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.function_code);
        out.extend_from_slice(&self.data);
    }

    pub(crate) fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

impl fmt::Debug for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pdu(fc={:#04x}, data={})", self.function_code, hex::encode_upper(&self.data))
    }
}

/// Per-bit intent for Mask Write Register (FC22).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaskBit {
    /// Force the bit to 0.
    Clear,
    /// Force the bit to 1.
    Set,
    /// Leave the current value.
    Keep,
}

/// Builds `(and_mask, or_mask)` from per-bit intents, bit 0 first.
pub fn mask_from_bits(bits: &[MaskBit; 16]) -> (u16, u16) {
    let mut and_mask = 0u16;
    let mut or_mask = 0u16;
    for (i, bit) in bits.iter().enumerate() {
        match bit {
            MaskBit::Keep => and_mask |= 1 << i,
            MaskBit::Set => or_mask |= 1 << i,
            MaskBit::Clear => {}
        }
    }
    (and_mask, or_mask)
}

/// `(current & and_mask) | (or_mask & !and_mask)`
pub fn apply_mask(current: u16, and_mask: u16, or_mask: u16) -> u16 {
    (current & and_mask) | (or_mask & !and_mask)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn function_code_lookup() {
        assert_eq!(FunctionCode::from_u8(0x17), Some(FunctionCode::ReadWriteMultipleRegisters));
        assert_eq!(FunctionCode::from_u8(0x07), None);
        assert_eq!(FunctionCode::MaskWriteRegister.as_u8(), 22);
    }

    #[test]
    fn exception_pdu_shape() {
        let pdu = Pdu::exception(0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu.to_bytes(), vec![0x83, 0x02]);
        assert!(pdu.is_exception());
        assert_eq!(pdu.base_function_code(), 0x03);
        assert_eq!(pdu.exception_code(), Some(2));
    }

    #[test]
    fn pdu_from_bytes_limits() {
        assert!(matches!(Pdu::from_bytes(&[]), Err(ModbusFrameError::EmptyPdu)));
        assert!(matches!(Pdu::from_bytes(&[0u8; 254]), Err(ModbusFrameError::PduTooLarge(254))));
        assert_eq!(Pdu::from_bytes(&[0u8; 253]).unwrap().len(), 253);
    }

    #[test]
    fn mask_bits_follow_and_or_rule() {
        let mut bits = [MaskBit::Keep; 16];
        bits[0] = MaskBit::Set;
        bits[1] = MaskBit::Clear;
        let (and_mask, or_mask) = mask_from_bits(&bits);
        assert_eq!(and_mask, 0xFFFC);
        assert_eq!(or_mask, 0x0001);
        assert_eq!(apply_mask(0x0012, 0xF2, 0x25), 0x0017);
        assert_eq!(apply_mask(0xFFFE, and_mask, or_mask), 0xFFFD);
    }

    proptest! {
        #[test]
        fn mask_rule_holds_bitwise(current in any::<u16>(), and_mask in any::<u16>(), or_mask in any::<u16>()) {
            let result = apply_mask(current, and_mask, or_mask);
            prop_assert_eq!(result & and_mask, current & and_mask);
            prop_assert_eq!(result & !and_mask, or_mask & !and_mask);
        }

        #[test]
        fn mask_bits_round_trip(intents in prop::array::uniform16(prop_oneof![
            Just(MaskBit::Clear),
            Just(MaskBit::Set),
            Just(MaskBit::Keep),
        ]), current in any::<u16>()) {
            let (and_mask, or_mask) = mask_from_bits(&intents);
            let result = apply_mask(current, and_mask, or_mask);
            for (i, intent) in intents.iter().enumerate() {
                let bit = result >> i & 1;
                match intent {
                    MaskBit::Clear => {
                        prop_assert_eq!(bit, 0);
                    }
                    MaskBit::Set => {
                        prop_assert_eq!(bit, 1);
                    }
                    MaskBit::Keep => {
                        prop_assert_eq!(bit, current >> i & 1);
                    }
                }
            }
        }
    }
}
