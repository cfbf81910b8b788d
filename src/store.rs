use crate::pdu::ExceptionCode;
use crate::unit::RegisterType;

#[derive(Clone, Debug)]
struct Area {
    count: usize,
    bytes: Vec<u8>,
}

impl Area {
    fn bits(count: usize) -> Self {
        Self { count, bytes: vec![0; count.div_ceil(8)] }
    }

    fn words(count: usize) -> Self {
        Self { count, bytes: vec![0; count * 2] }
    }

    fn check(&self, start: u16, quantity: u16) -> Result<(), ExceptionCode> {
        if start as usize + quantity as usize > self.count {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(())
    }

    fn bit(&self, index: usize) -> bool {
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        if value {
            self.bytes[index / 8] |= 1 << (index % 8);
        } else {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
    }
}

/// Coils, discrete inputs, holding and input registers with sizes fixed at
/// construction.
///
/// Bit point `i` lives in byte `i / 8`, bit `i % 8`. Word register `r` lives
/// in bytes `[2r, 2r + 1]`, big-endian.
#[derive(Clone, Debug)]
pub struct RegisterStore {
    coils: Area,
    discrete_inputs: Area,
    holding_registers: Area,
    input_registers: Area,
}

impl RegisterStore {
    pub fn new(coils: usize, discrete_inputs: usize, holding_registers: usize, input_registers: usize) -> Self {
        Self {
            coils: Area::bits(coils),
            discrete_inputs: Area::bits(discrete_inputs),
            holding_registers: Area::words(holding_registers),
            input_registers: Area::words(input_registers),
        }
    }

    fn area(&self, register_type: RegisterType) -> &Area {
        match register_type {
            RegisterType::CoilRegister => &self.coils,
            RegisterType::DiscreteRegister => &self.discrete_inputs,
            RegisterType::HoldingRegister => &self.holding_registers,
            RegisterType::InputRegister => &self.input_registers,
        }
    }

    fn area_mut(&mut self, register_type: RegisterType) -> &mut Area {
        match register_type {
            RegisterType::CoilRegister => &mut self.coils,
            RegisterType::DiscreteRegister => &mut self.discrete_inputs,
            RegisterType::HoldingRegister => &mut self.holding_registers,
            RegisterType::InputRegister => &mut self.input_registers,
        }
    }

    fn bit_area(&self, register_type: RegisterType) -> Result<&Area, ExceptionCode> {
        if register_type.is_bit() {
            Ok(self.area(register_type))
        } else {
            Err(ExceptionCode::IllegalFunction)
        }
    }

    fn word_area(&self, register_type: RegisterType) -> Result<&Area, ExceptionCode> {
        if register_type.is_bit() {
            Err(ExceptionCode::IllegalFunction)
        } else {
            Ok(self.area(register_type))
        }
    }

    /// Number of points configured for an area.
    pub fn count(&self, register_type: RegisterType) -> usize {
        self.area(register_type).count
    }

    /// Checks that `[start, start + quantity)` lies inside the area.
    pub fn check_range(&self, register_type: RegisterType, start: u16, quantity: u16) -> Result<(), ExceptionCode> {
        self.area(register_type).check(start, quantity)
    }

    /// Backing bytes of an area.
    pub fn raw(&self, register_type: RegisterType) -> &[u8] {
        &self.area(register_type).bytes
    }

    pub fn raw_mut(&mut self, register_type: RegisterType) -> &mut [u8] {
        &mut self.area_mut(register_type).bytes
    }

    /// Packs `quantity` bits starting at `start`, LSB first. Unused high
    /// bits of the last byte are zero.
    pub fn read_bits(&self, register_type: RegisterType, start: u16, quantity: u16) -> Result<Vec<u8>, ExceptionCode> {
        let area = self.bit_area(register_type)?;
        area.check(start, quantity)?;
        let mut packed = vec![0u8; (quantity as usize).div_ceil(8)];
        for i in 0..quantity as usize {
            if area.bit(start as usize + i) {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(packed)
    }

    /// Unpacks `quantity` LSB-first bits from `packed` into the area.
    pub fn write_bits(&mut self, register_type: RegisterType, start: u16, quantity: u16, packed: &[u8]) -> Result<(), ExceptionCode> {
        self.bit_area(register_type)?.check(start, quantity)?;
        if packed.len() < (quantity as usize).div_ceil(8) {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let area = self.area_mut(register_type);
        for i in 0..quantity as usize {
            area.set_bit(start as usize + i, packed[i / 8] & (1 << (i % 8)) != 0);
        }
        Ok(())
    }

    /// Big-endian bytes of `quantity` registers starting at `start`.
    pub fn read_words(&self, register_type: RegisterType, start: u16, quantity: u16) -> Result<Vec<u8>, ExceptionCode> {
        let area = self.word_area(register_type)?;
        area.check(start, quantity)?;
        let from = start as usize * 2;
        Ok(area.bytes[from..from + quantity as usize * 2].to_vec())
    }

    /// Copies big-endian register bytes into the area. `bytes` must hold a
    /// whole number of registers.
    pub fn write_words(&mut self, register_type: RegisterType, start: u16, bytes: &[u8]) -> Result<(), ExceptionCode> {
        if bytes.len() % 2 != 0 || bytes.len() / 2 > u16::MAX as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.word_area(register_type)?.check(start, (bytes.len() / 2) as u16)?;
        let from = start as usize * 2;
        self.area_mut(register_type).bytes[from..from + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn get_bit(&self, register_type: RegisterType, address: u16) -> Result<bool, ExceptionCode> {
        let area = self.bit_area(register_type)?;
        area.check(address, 1)?;
        Ok(area.bit(address as usize))
    }

    fn put_bit(&mut self, register_type: RegisterType, address: u16, value: bool) -> Result<(), ExceptionCode> {
        self.bit_area(register_type)?.check(address, 1)?;
        self.area_mut(register_type).set_bit(address as usize, value);
        Ok(())
    }

    fn get_word(&self, register_type: RegisterType, address: u16) -> Result<u16, ExceptionCode> {
        let bytes = self.read_words(register_type, address, 1)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn coil(&self, address: u16) -> Result<bool, ExceptionCode> {
        self.get_bit(RegisterType::CoilRegister, address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        self.put_bit(RegisterType::CoilRegister, address, value)
    }

    pub fn discrete_input(&self, address: u16) -> Result<bool, ExceptionCode> {
        self.get_bit(RegisterType::DiscreteRegister, address)
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        self.put_bit(RegisterType::DiscreteRegister, address, value)
    }

    pub fn holding_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        self.get_word(RegisterType::HoldingRegister, address)
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        self.write_words(RegisterType::HoldingRegister, address, &value.to_be_bytes())
    }

    pub fn input_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        self.get_word(RegisterType::InputRegister, address)
    }

    pub fn set_input_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        self.write_words(RegisterType::InputRegister, address, &value.to_be_bytes())
    }
}
