//! Slave side: function dispatch over a register store, with per-profile
//! framing of requests and responses.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::codec::{FrameCodec, Profile};
use crate::config::ServerConfig;
use crate::demux::StreamDemux;
use crate::event::{EventSink, ModbusEvent};
use crate::handlers::{Handled, Handler};
use crate::modbus_tcp::{decode_tcp, encode_tcp};
use crate::pdu::{ExceptionCode, FunctionCode, Pdu};
use crate::store::RegisterStore;
use crate::ModbusFrameError;

/// Serial line diagnostic counters. All counters wrap at 16 bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Frames with a valid checksum seen on the bus.
    pub bus_message_count: u16,
    /// Frames dropped for a bad checksum or length.
    pub bus_communication_error_count: u16,
    /// Requests addressed to this device, broadcasts excluded.
    pub slave_message_count: u16,
    /// Broadcasts executed without a reply.
    pub slave_no_response_count: u16,
    /// Exception responses sent.
    pub slave_exception_error_count: u16,
    pub slave_nak_count: u16,
    pub slave_busy_count: u16,
    pub bus_character_overrun_count: u16,
}

impl Diagnostics {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn bump(counter: &mut u16) {
    *counter = counter.wrapping_add(1);
}

pub struct ModbusServer<S: EventSink> {
    codec: FrameCodec,
    unit_id: u8,
    store: RegisterStore,
    handlers: HashMap<u8, Handler>,
    diagnostics: Diagnostics,
    demux: StreamDemux,
    sink: S,
}

impl<S: EventSink> ModbusServer<S> {
    /// A server answering as `unit_id` on serial profiles. TCP servers
    /// answer every unit id.
    pub fn new(profile: Profile, unit_id: u8, store: RegisterStore, sink: S) -> Self {
        let handlers = FunctionCode::ALL
            .into_iter()
            .map(|fc| (fc.as_u8(), Handler::Builtin(fc)))
            .collect();
        Self {
            codec: FrameCodec::new(profile),
            unit_id,
            store,
            handlers,
            diagnostics: Diagnostics::default(),
            demux: StreamDemux::default(),
            sink,
        }
    }

    pub fn from_config(config: &ServerConfig, sink: S) -> Self {
        let store = RegisterStore::new(
            config.coils,
            config.discrete_inputs,
            config.holding_registers,
            config.input_registers,
        );
        let mut server = Self::new(config.profile, config.unit_id, store, sink);
        server.demux = StreamDemux::new(config.partial_frames);
        server
    }

    pub fn profile(&self) -> Profile {
        self.codec.profile()
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn clear_diagnostics(&mut self) {
        self.diagnostics.clear();
    }

    /// Called by the serial transport when the UART reports an overrun.
    pub fn record_character_overrun(&mut self) {
        bump(&mut self.diagnostics.bus_character_overrun_count);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Installs a handler, returning the one it replaces.
    pub fn register_handler(&mut self, function_code: u8, handler: Handler) -> Option<Handler> {
        debug!("Registering handler for FC={:02X}", function_code);
        self.handlers.insert(function_code, handler)
    }

    pub fn unregister_handler(&mut self, function_code: u8) -> Option<Handler> {
        self.handlers.remove(&function_code)
    }

    pub fn supports(&self, function_code: u8) -> bool {
        self.handlers.contains_key(&function_code)
    }

    /// Runs one request PDU against the store. Protocol faults come back as
    /// exception PDUs, each with one `Exception` event.
    pub fn process_request_pdu(&mut self, pdu: &Pdu) -> Pdu {
        let function_code = pdu.function_code();
        let outcome = match self.handlers.get(&function_code) {
            Some(handler) => handler.call(&mut self.store, pdu),
            None => Err(ExceptionCode::IllegalFunction),
        };

        match outcome {
            Ok(Handled { response, event }) => {
                debug!("FC={:02X} handled, response_len={}", function_code, response.len());
                if let Some(event) = event {
                    self.sink.emit(event);
                }
                response
            }
            Err(exception) => {
                debug!("FC={:02X} rejected: {}", function_code, exception);
                self.sink.emit(ModbusEvent::Exception { function_code, exception });
                Pdu::exception(function_code, exception)
            }
        }
    }

    /// Answers one complete inbound frame.
    ///
    /// TCP: malformed frames are returned as errors. Serial: malformed or
    /// corrupt frames are counted and dropped, broadcasts and frames for
    /// other slaves produce no response.
    pub fn get_response_adu(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ModbusFrameError> {
        match self.codec.profile() {
            Profile::Tcp => self.tcp_response(frame).map(Some),
            Profile::Rtu | Profile::Ascii => Ok(self.serial_response(frame)),
        }
    }

    /// Splits a stream chunk into frames (TCP) and answers each of them in
    /// order. Serial chunks are treated as one frame.
    pub fn process_stream(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let frames: Vec<Vec<u8>> = match self.codec.profile() {
            Profile::Tcp => self.demux.push(chunk).into_iter().map(|frame| frame.to_vec()).collect(),
            Profile::Rtu | Profile::Ascii => vec![chunk.to_vec()],
        };

        let mut responses = Vec::new();
        for frame in frames {
            match self.get_response_adu(&frame) {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(err) => warn!("Dropping malformed frame: {}", err),
            }
        }
        responses
    }

    /// Drops any partially received stream data.
    pub fn reset_stream(&mut self) {
        self.demux.reset();
    }

    fn tcp_response(&mut self, frame: &[u8]) -> Result<Vec<u8>, ModbusFrameError> {
        let adu = decode_tcp(frame)?;
        let transaction_id = adu.header.transaction_id;
        let unit_id = adu.header.unit_id;
        self.sink.emit(ModbusEvent::Request { unit_id, transaction_id: Some(transaction_id), pdu: adu.pdu.clone() });

        let response = self.process_request_pdu(&adu.pdu);
        let out = encode_tcp(transaction_id, unit_id, &response)?;
        self.sink.emit(ModbusEvent::Response { unit_id, transaction_id: Some(transaction_id), pdu: response });
        Ok(out)
    }

    fn serial_response(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let adu = match self.codec.decode(frame) {
            Ok(adu) if adu.checksum_valid() => adu,
            Ok(_) => {
                trace!("Dropping frame with bad checksum");
                bump(&mut self.diagnostics.bus_communication_error_count);
                return None;
            }
            Err(err) => {
                trace!("Dropping unreadable frame: {}", err);
                bump(&mut self.diagnostics.bus_communication_error_count);
                return None;
            }
        };
        bump(&mut self.diagnostics.bus_message_count);

        let address = adu.unit_id();
        if address == 0 {
            self.sink.emit(ModbusEvent::Request { unit_id: 0, transaction_id: None, pdu: adu.pdu().clone() });
            self.process_request_pdu(adu.pdu());
            bump(&mut self.diagnostics.slave_no_response_count);
            return None;
        }
        if address != self.unit_id {
            trace!("Ignoring frame for slave {}", address);
            return None;
        }

        bump(&mut self.diagnostics.slave_message_count);
        self.sink.emit(ModbusEvent::Request { unit_id: address, transaction_id: None, pdu: adu.pdu().clone() });

        let response = self.process_request_pdu(adu.pdu());
        if response.is_exception() {
            bump(&mut self.diagnostics.slave_exception_error_count);
            match response.exception_code().and_then(ExceptionCode::from_u8) {
                Some(ExceptionCode::Acknowledge) => bump(&mut self.diagnostics.slave_nak_count),
                Some(ExceptionCode::SlaveDeviceBusy) => bump(&mut self.diagnostics.slave_busy_count),
                _ => {}
            }
        }

        match self.codec.encode(0, address, &response) {
            Ok(out) => {
                self.sink.emit(ModbusEvent::Response { unit_id: address, transaction_id: None, pdu: response });
                Some(out)
            }
            Err(err) => {
                warn!("Failed to encode response: {}", err);
                None
            }
        }
    }
}
