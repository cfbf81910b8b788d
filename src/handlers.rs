use std::fmt;

use crate::event::ModbusEvent;
use crate::pdu::{apply_mask, ExceptionCode, FunctionCode, Pdu};
use crate::store::RegisterStore;
use crate::unit::{
    RegisterType, MAX_READ_BITS, MAX_READ_WORDS, MAX_READ_WRITE_WORDS, MAX_WRITE_BITS, MAX_WRITE_WORDS,
};

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Successful outcome of a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handled {
    pub response: Pdu,
    pub event: Option<ModbusEvent>,
}

impl Handled {
    pub fn read(response: Pdu) -> Self {
        Self { response, event: None }
    }

    pub fn write(response: Pdu, event: ModbusEvent) -> Self {
        Self { response, event: Some(event) }
    }
}

pub type HandlerFn = fn(&mut RegisterStore, &Pdu) -> Result<Handled, ExceptionCode>;

/// User-supplied handler for an extra (or overridden) function code.
pub type CustomHandler = Box<dyn Fn(&mut RegisterStore, &Pdu) -> Result<Handled, ExceptionCode> + Send>;

/// Entry of the dispatch table.
pub enum Handler {
    Builtin(FunctionCode),
    Custom(CustomHandler),
}

impl Handler {
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&mut RegisterStore, &Pdu) -> Result<Handled, ExceptionCode> + Send + 'static,
    {
        Handler::Custom(Box::new(handler))
    }

    pub fn call(&self, store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
        match self {
            Handler::Builtin(function_code) => builtin(*function_code)(store, pdu),
            Handler::Custom(handler) => handler(store, pdu),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Builtin(function_code) => f.debug_tuple("Builtin").field(function_code).finish(),
            Handler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub fn builtin(function_code: FunctionCode) -> HandlerFn {
    match function_code {
        FunctionCode::ReadCoils => read_coils,
        FunctionCode::ReadDiscreteInputs => read_discrete_inputs,
        FunctionCode::ReadHoldingRegisters => read_holding_registers,
        FunctionCode::ReadInputRegisters => read_input_registers,
        FunctionCode::WriteSingleCoil => write_single_coil,
        FunctionCode::WriteSingleRegister => write_single_register,
        FunctionCode::WriteMultipleCoils => write_multiple_coils,
        FunctionCode::WriteMultipleRegisters => write_multiple_registers,
        FunctionCode::MaskWriteRegister => mask_write_register,
        FunctionCode::ReadWriteMultipleRegisters => read_write_multiple_registers,
    }
}

fn field(pdu: &Pdu, offset: usize) -> Result<u16, ExceptionCode> {
    pdu.u16_at(offset).ok_or(ExceptionCode::IllegalDataValue)
}

fn expect_len(pdu: &Pdu, len: usize) -> Result<(), ExceptionCode> {
    if pdu.data().len() != len {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn quantity(pdu: &Pdu, offset: usize, max: u16) -> Result<u16, ExceptionCode> {
    let quantity = field(pdu, offset)?;
    if quantity == 0 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(quantity)
}

fn start_and_quantity(pdu: &Pdu) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&pdu.data()[..4]);
    out
}

fn read_bits(register_type: RegisterType, store: &RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    expect_len(pdu, 4)?;
    let start = field(pdu, 0)?;
    let quantity = quantity(pdu, 2, MAX_READ_BITS)?;
    let packed = store.read_bits(register_type, start, quantity)?;

    let mut data = Vec::with_capacity(1 + packed.len());
    data.push(packed.len() as u8);
    data.extend(packed);
    Ok(Handled::read(Pdu::new(pdu.function_code(), data)))
}

fn read_words(register_type: RegisterType, store: &RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    expect_len(pdu, 4)?;
    let start = field(pdu, 0)?;
    let quantity = quantity(pdu, 2, MAX_READ_WORDS)?;
    let words = store.read_words(register_type, start, quantity)?;

    let mut data = Vec::with_capacity(1 + words.len());
    data.push(words.len() as u8);
    data.extend(words);
    Ok(Handled::read(Pdu::new(pdu.function_code(), data)))
}

pub fn read_coils(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    read_bits(RegisterType::CoilRegister, store, pdu)
}

pub fn read_discrete_inputs(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    read_bits(RegisterType::DiscreteRegister, store, pdu)
}

pub fn read_holding_registers(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    read_words(RegisterType::HoldingRegister, store, pdu)
}

pub fn read_input_registers(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    read_words(RegisterType::InputRegister, store, pdu)
}

/// FC5. The value must be exactly 0xFF00 or 0x0000; the response echoes the request.
pub fn write_single_coil(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    expect_len(pdu, 4)?;
    let address = field(pdu, 0)?;
    let value = match field(pdu, 2)? {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    store.set_coil(address, value)?;
    Ok(Handled::write(pdu.clone(), ModbusEvent::WriteCoils { address, quantity: 1 }))
}

pub fn write_single_register(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    expect_len(pdu, 4)?;
    let address = field(pdu, 0)?;
    store.set_holding_register(address, field(pdu, 2)?)?;
    Ok(Handled::write(pdu.clone(), ModbusEvent::WriteRegisters { address, quantity: 1 }))
}

pub fn write_multiple_coils(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    let address = field(pdu, 0)?;
    let quantity = quantity(pdu, 2, MAX_WRITE_BITS)?;
    let byte_count = *pdu.data().get(4).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    if byte_count != (quantity as usize).div_ceil(8) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    expect_len(pdu, 5 + byte_count)?;

    store.write_bits(RegisterType::CoilRegister, address, quantity, &pdu.data()[5..])?;
    Ok(Handled::write(
        Pdu::new(pdu.function_code(), start_and_quantity(pdu).to_vec()),
        ModbusEvent::WriteCoils { address, quantity },
    ))
}

pub fn write_multiple_registers(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    let address = field(pdu, 0)?;
    let quantity = quantity(pdu, 2, MAX_WRITE_WORDS)?;
    let byte_count = *pdu.data().get(4).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    if byte_count != quantity as usize * 2 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    expect_len(pdu, 5 + byte_count)?;

    store.write_words(RegisterType::HoldingRegister, address, &pdu.data()[5..])?;
    Ok(Handled::write(
        Pdu::new(pdu.function_code(), start_and_quantity(pdu).to_vec()),
        ModbusEvent::WriteRegisters { address, quantity },
    ))
}

/// FC22: `(current & and_mask) | (or_mask & !and_mask)`.
pub fn mask_write_register(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    expect_len(pdu, 6)?;
    let address = field(pdu, 0)?;
    let and_mask = field(pdu, 2)?;
    let or_mask = field(pdu, 4)?;

    let current = store.holding_register(address)?;
    store.set_holding_register(address, apply_mask(current, and_mask, or_mask))?;
    Ok(Handled::write(pdu.clone(), ModbusEvent::WriteRegisters { address, quantity: 1 }))
}

/// FC23: the write is applied before the read, so an overlapping read sees
/// the new values.
pub fn read_write_multiple_registers(store: &mut RegisterStore, pdu: &Pdu) -> Result<Handled, ExceptionCode> {
    let read_start = field(pdu, 0)?;
    let read_quantity = quantity(pdu, 2, MAX_READ_WORDS)?;
    let write_start = field(pdu, 4)?;
    let write_quantity = quantity(pdu, 6, MAX_READ_WRITE_WORDS)?;
    let byte_count = *pdu.data().get(8).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    if byte_count != write_quantity as usize * 2 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    expect_len(pdu, 9 + byte_count)?;

    // both ranges are checked up front so a bad read leaves memory untouched
    store.check_range(RegisterType::HoldingRegister, write_start, write_quantity)?;
    store.check_range(RegisterType::HoldingRegister, read_start, read_quantity)?;

    store.write_words(RegisterType::HoldingRegister, write_start, &pdu.data()[9..])?;
    let words = store.read_words(RegisterType::HoldingRegister, read_start, read_quantity)?;

    let mut data = Vec::with_capacity(1 + words.len());
    data.push(words.len() as u8);
    data.extend(words);
    Ok(Handled::write(
        Pdu::new(pdu.function_code(), data),
        ModbusEvent::WriteRegisters { address: write_start, quantity: write_quantity },
    ))
}
