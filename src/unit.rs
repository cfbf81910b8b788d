use thiserror::Error;

use crate::pdu::{mask_from_bits, FunctionCode, MaskBit, Pdu};

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_WRITE_WORDS: u16 = 123;
pub const MAX_READ_WRITE_WORDS: u16 = 121;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModbusUnitError {
    #[error("Start address is empty")]
    AddressIsEmpty,

    #[error("Invalid length: {0}, expected 1..={1}")]
    InvalidLength(u16, u16),

    #[error("Invalid range: {0} + {1} = {2} > 65536")]
    RangeToMatch(u16, u16, u32),

    #[error("Register type is empty")]
    InvalidRegisterType,

    #[error("Type {0:?} haven't write command")]
    InvalidRegisterTypeForWriteCommand(RegisterType),

    #[error("Invalid coil value {0} at index {1}, expected 0 or 1")]
    InvalidCoilValue(u16, usize),

    #[error("Empty response received")]
    EmptyResponse,

    #[error("Modbus exception: function code {0:#x}, exception code {1:#x}")]
    ModbusException(u8, u8),

    #[error("Unexpected function code: expected {0:#x}, got {1:#x}")]
    UnexpectedFunctionCode(u8, u8),

    #[error("Invalid response length")]
    InvalidResponseLength,

    #[error("Data length mismatch: expected max {expected}, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterType {
    CoilRegister,
    DiscreteRegister,
    HoldingRegister,
    InputRegister,
}

impl RegisterType {
    /// Coils and discrete inputs are single-bit points.
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterType::CoilRegister | RegisterType::DiscreteRegister)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, RegisterType::CoilRegister | RegisterType::HoldingRegister)
    }

    fn max_read(self) -> u16 {
        if self.is_bit() { MAX_READ_BITS } else { MAX_READ_WORDS }
    }
}

/// A contiguous block of points on a remote device, and the requests that
/// read or write it.
#[derive(Clone, Debug)]
pub struct ModbusUnit {
    start_addr: u16,
    length: u16,
    register_type: RegisterType,
    read_cmd: Option<u8>,
    write_cmd: Option<u8>,
    multi_write_cmd: Option<u8>,
}

#[derive(Default)]
pub struct ModbusUnitBuilder {
    start_addr: Option<u16>,
    length: Option<u16>,
    register_type: Option<RegisterType>,
    custom_read_cmd: Option<u8>,
    custom_write_cmd: Option<u8>,
    custom_multi_write_cmd: Option<u8>,
}

impl ModbusUnitBuilder {
    pub fn address(mut self, addr: u16) -> Self {
        self.start_addr = Some(addr);
        self
    }

    pub fn length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub fn register_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = Some(register_type);
        self
    }

    /// Overrides the read function code (vendor-specific functions).
    pub fn with_read_cmd(mut self, custom_read_cmd: u8) -> Self {
        self.custom_read_cmd = Some(custom_read_cmd);
        self
    }

    pub fn with_write_cmd(mut self, custom_write_cmd: u8) -> Self {
        self.custom_write_cmd = Some(custom_write_cmd);
        self
    }

    pub fn with_multi_write_cmd(mut self, multi_write_cmd: u8) -> Self {
        self.custom_multi_write_cmd = Some(multi_write_cmd);
        self
    }

    pub fn build(self) -> Result<ModbusUnit, ModbusUnitError> {
        let start_addr = self.start_addr.ok_or(ModbusUnitError::AddressIsEmpty)?;
        let register_type = self.register_type.ok_or(ModbusUnitError::InvalidRegisterType)?;
        let length = self.length.unwrap_or(1);

        let max = register_type.max_read();
        if length == 0 || length > max {
            return Err(ModbusUnitError::InvalidLength(length, max));
        }
        let end_addr = start_addr as u32 + length as u32;
        if end_addr > 65536 {
            return Err(ModbusUnitError::RangeToMatch(start_addr, length, end_addr));
        }

        Ok(ModbusUnit {
            start_addr,
            length,
            register_type,
            read_cmd: self.custom_read_cmd,
            write_cmd: self.custom_write_cmd,
            multi_write_cmd: self.custom_multi_write_cmd,
        })
    }
}

fn push_u16(body: &mut Vec<u8>, value: u16) {
    body.extend_from_slice(&value.to_be_bytes());
}

impl ModbusUnit {
    pub fn builder() -> ModbusUnitBuilder {
        ModbusUnitBuilder::default()
    }

    pub fn start_address(&self) -> u16 {
        self.start_addr
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn register_type(&self) -> RegisterType {
        self.register_type
    }

    pub fn create_read_request(&self) -> Pdu {
        let mut body = Vec::with_capacity(4);
        push_u16(&mut body, self.start_addr);
        push_u16(&mut body, self.length);
        Pdu::new(self.get_read_command(), body)
    }

    fn get_read_command(&self) -> u8 {
        if let Some(cmd) = self.read_cmd {
            return cmd;
        }
        match self.register_type {
            RegisterType::CoilRegister => FunctionCode::ReadCoils,
            RegisterType::DiscreteRegister => FunctionCode::ReadDiscreteInputs,
            RegisterType::HoldingRegister => FunctionCode::ReadHoldingRegisters,
            RegisterType::InputRegister => FunctionCode::ReadInputRegisters,
        }
        .as_u8()
    }

    /// One value uses the single-write function, more use the multiple-write one.
    pub fn create_write_request(&self, data: &[u16]) -> Result<Pdu, ModbusUnitError> {
        if data.is_empty() || data.len() > self.length as usize {
            return Err(ModbusUnitError::DataLengthMismatch {
                expected: self.length as usize,
                actual: data.len(),
            });
        }

        let cmd = self.get_write_command(data.len())?;

        match self.register_type {
            RegisterType::CoilRegister => self.get_body_for_coils_write(data, cmd),
            RegisterType::HoldingRegister => self.get_body_for_holding_write(data, cmd),
            _ => Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type)),
        }
    }

    fn get_write_command(&self, length: usize) -> Result<u8, ModbusUnitError> {
        let (single, multi) = match self.register_type {
            RegisterType::CoilRegister => (FunctionCode::WriteSingleCoil, FunctionCode::WriteMultipleCoils),
            RegisterType::HoldingRegister => {
                (FunctionCode::WriteSingleRegister, FunctionCode::WriteMultipleRegisters)
            }
            _ => return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type)),
        };
        Ok(match length {
            1 => self.write_cmd.unwrap_or(single.as_u8()),
            _ => self.multi_write_cmd.unwrap_or(multi.as_u8()),
        })
    }

    fn get_body_for_holding_write(&self, data: &[u16], cmd: u8) -> Result<Pdu, ModbusUnitError> {
        if data.len() > MAX_WRITE_WORDS as usize {
            return Err(ModbusUnitError::DataLengthMismatch {
                expected: MAX_WRITE_WORDS as usize,
                actual: data.len(),
            });
        }
        let mut body = Vec::with_capacity(5 + data.len() * 2);
        push_u16(&mut body, self.start_addr);

        if data.len() > 1 {
            push_u16(&mut body, data.len() as u16);
            body.push((data.len() * 2) as u8);
        }

        for &value in data {
            push_u16(&mut body, value);
        }
        Ok(Pdu::new(cmd, body))
    }

    fn get_body_for_coils_write(&self, data: &[u16], cmd: u8) -> Result<Pdu, ModbusUnitError> {
        for (i, &val) in data.iter().enumerate() {
            if val > 1 {
                return Err(ModbusUnitError::InvalidCoilValue(val, i));
            }
        }
        if data.len() > MAX_WRITE_BITS as usize {
            return Err(ModbusUnitError::DataLengthMismatch {
                expected: MAX_WRITE_BITS as usize,
                actual: data.len(),
            });
        }

        let mut body = Vec::with_capacity(5 + data.len().div_ceil(8));
        push_u16(&mut body, self.start_addr);

        if data.len() == 1 {
            // 0xFF00 is ON, 0x0000 is OFF
            push_u16(&mut body, if data[0] != 0 { 0xFF00 } else { 0x0000 });
        } else {
            push_u16(&mut body, data.len() as u16);
            let byte_count = data.len().div_ceil(8);
            body.push(byte_count as u8);

            let mut bytes = vec![0u8; byte_count];
            for (i, &bit) in data.iter().enumerate() {
                if bit != 0 {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            body.extend(bytes);
        }
        Ok(Pdu::new(cmd, body))
    }

    /// FC22 against the unit's start register.
    pub fn create_mask_write_request(&self, and_mask: u16, or_mask: u16) -> Result<Pdu, ModbusUnitError> {
        if self.register_type != RegisterType::HoldingRegister {
            return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type));
        }
        let mut body = Vec::with_capacity(6);
        push_u16(&mut body, self.start_addr);
        push_u16(&mut body, and_mask);
        push_u16(&mut body, or_mask);
        Ok(Pdu::new(FunctionCode::MaskWriteRegister.as_u8(), body))
    }

    pub fn create_mask_write_request_from_bits(&self, bits: &[MaskBit; 16]) -> Result<Pdu, ModbusUnitError> {
        let (and_mask, or_mask) = mask_from_bits(bits);
        self.create_mask_write_request(and_mask, or_mask)
    }

    /// FC23: writes `data` at `write_addr`, then reads this unit's range.
    pub fn create_read_write_request(&self, write_addr: u16, data: &[u16]) -> Result<Pdu, ModbusUnitError> {
        if self.register_type != RegisterType::HoldingRegister {
            return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type));
        }
        if data.is_empty() || data.len() > MAX_READ_WRITE_WORDS as usize {
            return Err(ModbusUnitError::DataLengthMismatch {
                expected: MAX_READ_WRITE_WORDS as usize,
                actual: data.len(),
            });
        }
        let mut body = Vec::with_capacity(9 + data.len() * 2);
        push_u16(&mut body, self.start_addr);
        push_u16(&mut body, self.length);
        push_u16(&mut body, write_addr);
        push_u16(&mut body, data.len() as u16);
        body.push((data.len() * 2) as u8);
        for &value in data {
            push_u16(&mut body, value);
        }
        Ok(Pdu::new(FunctionCode::ReadWriteMultipleRegisters.as_u8(), body))
    }

    /// Extracts values from a response PDU.
    ///
    /// Read responses (and FC23) yield one entry per point, bits as 0/1.
    /// Write acknowledgements yield an empty vector.
    pub fn parse_response(&self, pdu: &Pdu) -> Result<Vec<u16>, ModbusUnitError> {
        let function_code = pdu.function_code();

        if pdu.is_exception() {
            let exception_code = pdu.exception_code().unwrap_or(0);
            return Err(ModbusUnitError::ModbusException(function_code, exception_code));
        }

        let read_fc = self.get_read_command();
        if function_code == read_fc
            || (function_code == FunctionCode::ReadWriteMultipleRegisters.as_u8()
                && self.register_type == RegisterType::HoldingRegister)
        {
            return if self.register_type.is_bit() {
                self.parse_coils(pdu.data())
            } else {
                self.parse_holding_registers(pdu.data())
            };
        }

        let is_write_echo = self.register_type.is_writable()
            && [
                self.get_write_command(1).ok(),
                self.get_write_command(2).ok(),
                Some(FunctionCode::MaskWriteRegister.as_u8()),
            ]
            .contains(&Some(function_code));
        if is_write_echo {
            if pdu.data().len() < 4 {
                return Err(ModbusUnitError::InvalidResponseLength);
            }
            return Ok(Vec::new());
        }

        Err(ModbusUnitError::UnexpectedFunctionCode(read_fc, function_code))
    }

    fn parse_holding_registers(&self, data: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        let Some((&byte_count, values)) = data.split_first() else {
            return Err(ModbusUnitError::EmptyResponse);
        };
        let expected_bytes = self.length as usize * 2;
        if byte_count as usize != expected_bytes || values.len() < expected_bytes {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        Ok(values[..expected_bytes]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn parse_coils(&self, data: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        let Some((&byte_count, bits)) = data.split_first() else {
            return Err(ModbusUnitError::EmptyResponse);
        };
        let expected_bytes = (self.length as usize).div_ceil(8);
        if byte_count as usize != expected_bytes || bits.len() < expected_bytes {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        Ok((0..self.length as usize)
            .map(|i| ((bits[i / 8] >> (i % 8)) & 0x01) as u16)
            .collect())
    }
}
