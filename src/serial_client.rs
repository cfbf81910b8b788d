//! Master side on a half-duplex serial bus (RTU or ASCII framing).
//!
//! At most one request is in flight. A second request while one is
//! outstanding is refused, never queued: the caller serialises.

use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::codec::{FrameCodec, Profile};
use crate::config::ClientConfig;
use crate::event::{EventSink, ModbusEvent, Transport};
use crate::pdu::{ExceptionCode, Pdu};
use crate::timer::{TimerHandle, TimerQueue};
use crate::ClientError;

pub const BROADCAST_ADDRESS: u8 = 0;
pub const MAX_SLAVE_ADDRESS: u8 = 247;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SerialState {
    Idle,
    AwaitingResponse,
    /// Broadcast sent; waiting out the turn-around delay.
    TurnaroundDelay,
    /// ACKNOWLEDGE received; waiting to re-send.
    AckRetryDelay,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SerialTimer {
    Response,
    Turnaround,
    AckRetry,
}

#[derive(Debug)]
struct ActiveRequest {
    address: u8,
    pdu: Pdu,
    frame: Vec<u8>,
    /// 1 for the first transmission.
    attempt: u32,
    ack_retried: bool,
    timer: TimerHandle,
    kind: SerialTimer,
}

pub struct SerialClient<T: Transport, S: EventSink> {
    config: ClientConfig,
    codec: FrameCodec,
    transport: T,
    sink: S,
    active: Option<ActiveRequest>,
    timers: TimerQueue<SerialTimer>,
    connected: bool,
}

impl<T: Transport, S: EventSink> SerialClient<T, S> {
    pub fn new(config: ClientConfig, transport: T, sink: S) -> Result<Self, ClientError> {
        if !config.profile.is_serial() {
            return Err(ClientError::UnsupportedProfile(config.profile));
        }
        Ok(Self {
            codec: FrameCodec::new(config.profile),
            config,
            transport,
            sink,
            active: None,
            timers: TimerQueue::new(),
            connected: true,
        })
    }

    pub fn profile(&self) -> Profile {
        self.codec.profile()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> SerialState {
        match self.active.as_ref().map(|active| active.kind) {
            None => SerialState::Idle,
            Some(SerialTimer::Response) => SerialState::AwaitingResponse,
            Some(SerialTimer::Turnaround) => SerialState::TurnaroundDelay,
            Some(SerialTimer::AckRetry) => SerialState::AckRetryDelay,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Sends a request to `address` (0 broadcasts).
    pub fn send(&mut self, address: u8, pdu: &Pdu, now: Instant) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::Disconnected);
        }
        if address > MAX_SLAVE_ADDRESS {
            return Err(ClientError::InvalidUnitId(address));
        }
        if self.active.is_some() {
            debug!("Bus busy, refusing request to slave {}", address);
            return Err(ClientError::Busy);
        }

        let frame = self.codec.encode(0, address, pdu)?;
        if !self.transport.write(&frame) {
            warn!("Transport rejected request to slave {}", address);
            return Err(ClientError::TransportRejected);
        }

        let (kind, delay) = if address == BROADCAST_ADDRESS {
            (SerialTimer::Turnaround, self.config.turnaround_delay())
        } else {
            (SerialTimer::Response, self.config.response_timeout())
        };
        let timer = self.timers.arm(now, delay, kind);
        self.active = Some(ActiveRequest {
            address,
            pdu: pdu.clone(),
            frame,
            attempt: 1,
            ack_retried: false,
            timer,
            kind,
        });

        debug!("Sent request to slave {}, FC={:02X}", address, pdu.function_code());
        self.sink.emit(ModbusEvent::Request { unit_id: address, transaction_id: None, pdu: pdu.clone() });
        Ok(())
    }

    /// Correlates one inbound frame with the active request. Returns `true`
    /// when it completed the transaction. Corrupt frames are dropped
    /// silently.
    pub fn process_res_adu(&mut self, frame: &[u8], now: Instant) -> bool {
        let adu = match self.codec.decode(frame) {
            Ok(adu) if adu.checksum_valid() => adu,
            Ok(_) => {
                trace!("Dropping response with bad checksum");
                return false;
            }
            Err(err) => {
                trace!("Dropping unreadable response: {}", err);
                return false;
            }
        };
        if !self.connected {
            return false;
        }

        let response = adu.pdu();
        let Some(active) = self.active.as_mut() else {
            trace!("Ignoring unsolicited response from slave {}", adu.unit_id());
            return false;
        };
        if active.kind != SerialTimer::Response
            || active.address != adu.unit_id()
            || active.pdu.function_code() != response.base_function_code()
        {
            trace!(
                "Ignoring response from slave {} FC={:02X}",
                adu.unit_id(),
                response.function_code()
            );
            return false;
        }

        let exception = response.exception_code().and_then(ExceptionCode::from_u8);
        if exception == Some(ExceptionCode::Acknowledge) && !active.ack_retried {
            debug!("Slave {} acknowledged, re-sending later", active.address);
            self.timers.cancel(active.timer);
            active.ack_retried = true;
            active.kind = SerialTimer::AckRetry;
            active.timer = self.timers.arm(now, self.config.ack_retry_delay(), SerialTimer::AckRetry);
            return false;
        }

        let Some(active) = self.active.take() else {
            return false;
        };
        self.timers.cancel(active.timer);

        self.sink.emit(ModbusEvent::Response { unit_id: active.address, transaction_id: None, pdu: response.clone() });
        if let Some(exception) = exception {
            self.sink.emit(ModbusEvent::Exception { function_code: response.function_code(), exception });
        }
        self.sink.emit(ModbusEvent::Transaction {
            unit_id: active.address,
            transaction_id: None,
            request: active.pdu,
            response: response.clone(),
        });
        true
    }

    /// Fires the active request's timer if it is due.
    pub fn poll_timers(&mut self, now: Instant) {
        for (handle, kind) in self.timers.expire(now) {
            let Some(active) = self.active.as_ref() else {
                continue;
            };
            if active.timer != handle {
                continue;
            }
            match kind {
                SerialTimer::Response => self.on_response_timeout(now),
                SerialTimer::Turnaround => self.on_turnaround_elapsed(),
                SerialTimer::AckRetry => self.retransmit(now),
            }
        }
    }

    fn on_response_timeout(&mut self, now: Instant) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let will_retry = active.attempt <= self.config.retries;
        warn!(
            "Slave {} did not answer (attempt {}){}",
            active.address,
            active.attempt,
            if will_retry { ", retrying" } else { "" }
        );
        self.sink.emit(ModbusEvent::RequestTimeout {
            unit_id: active.address,
            request: active.pdu.clone(),
            attempt: active.attempt,
            will_retry,
        });

        if will_retry {
            if let Some(active) = self.active.as_mut() {
                active.attempt += 1;
            }
            self.retransmit(now);
        } else {
            self.active = None;
        }
    }

    fn on_turnaround_elapsed(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Broadcast turn-around elapsed");
            self.sink.emit(ModbusEvent::BroadcastTimeout { request: active.pdu });
        }
    }

    /// Re-sends the active frame. A refused write ends the request with a
    /// final `RequestTimeout`.
    fn retransmit(&mut self, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !self.transport.write(&active.frame) {
            warn!("Transport rejected re-send to slave {}, giving up", active.address);
            if let Some(active) = self.active.take() {
                self.sink.emit(ModbusEvent::RequestTimeout {
                    unit_id: active.address,
                    request: active.pdu,
                    attempt: active.attempt,
                    will_retry: false,
                });
            }
            return;
        }
        active.kind = SerialTimer::Response;
        active.timer = self.timers.arm(now, self.config.response_timeout(), SerialTimer::Response);
    }

    pub fn connect(&mut self) {
        self.connected = true;
    }

    /// Abandons the active request without events.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.timers.clear();
        self.active = None;
    }
}
