use std::collections::VecDeque;
use std::sync::mpsc::Sender;

use crate::pdu::{ExceptionCode, Pdu};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModbusEvent {
    /// Server: a request addressed to this device arrived.
    /// Client: a request frame was handed to the transport.
    Request { unit_id: u8, transaction_id: Option<u16>, pdu: Pdu },
    /// Server: a response frame was produced.
    /// Client: a correlated response arrived.
    Response { unit_id: u8, transaction_id: Option<u16>, pdu: Pdu },
    /// Client: a request and its response were matched.
    Transaction { unit_id: u8, transaction_id: Option<u16>, request: Pdu, response: Pdu },
    /// Server: an exception response was produced.
    /// Client: an exception response was received.
    Exception { function_code: u8, exception: ExceptionCode },
    WriteCoils { address: u16, quantity: u16 },
    WriteRegisters { address: u16, quantity: u16 },
    /// TCP client: no response before the deadline.
    Timeout { unit_id: u8, transaction_id: u16, request: Pdu },
    /// Serial client: no response before the deadline.
    RequestTimeout { unit_id: u8, request: Pdu, attempt: u32, will_retry: bool },
    /// Serial client: the turn-around delay after a broadcast elapsed.
    BroadcastTimeout { request: Pdu },
}

impl ModbusEvent {
    /// Historical event name, for hosts that route on strings.
    pub fn name(&self) -> &'static str {
        match self {
            ModbusEvent::Request { .. } => "request",
            ModbusEvent::Response { .. } => "response",
            ModbusEvent::Transaction { .. } => "transaction",
            ModbusEvent::Exception { .. } => "exception",
            ModbusEvent::WriteCoils { .. } => "write-coils",
            ModbusEvent::WriteRegisters { .. } => "write-registers",
            ModbusEvent::Timeout { .. } => "timeout",
            ModbusEvent::RequestTimeout { .. } => "req-timeout",
            ModbusEvent::BroadcastTimeout { .. } => "broadcast-timeout",
        }
    }
}

/// Receives every event a server or client produces.
pub trait EventSink {
    fn emit(&mut self, event: ModbusEvent);
}

impl EventSink for Vec<ModbusEvent> {
    fn emit(&mut self, event: ModbusEvent) {
        self.push(event);
    }
}

impl EventSink for VecDeque<ModbusEvent> {
    fn emit(&mut self, event: ModbusEvent) {
        self.push_back(event);
    }
}

impl EventSink for Sender<ModbusEvent> {
    fn emit(&mut self, event: ModbusEvent) {
        // a dropped receiver means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Outbound half of a socket or serial port.
pub trait Transport {
    /// Queues a complete frame. `false` means the frame was not accepted.
    fn write(&mut self, frame: &[u8]) -> bool;
}

impl Transport for Vec<Vec<u8>> {
    fn write(&mut self, frame: &[u8]) -> bool {
        self.push(frame.to_vec());
        true
    }
}
