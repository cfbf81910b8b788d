//! Master side over TCP/UDP: many outstanding requests per channel,
//! correlated by MBAP transaction id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::Profile;
use crate::config::ClientConfig;
use crate::demux::StreamDemux;
use crate::event::{EventSink, ModbusEvent, Transport};
use crate::modbus_tcp::{decode_tcp, TcpAdu};
use crate::pdu::{ExceptionCode, Pdu};
use crate::timer::{TimerHandle, TimerQueue};
use crate::{ClientError, ModbusFrameError};

#[derive(Debug)]
struct PendingTransaction {
    adu: TcpAdu,
    frame: Vec<u8>,
    timer: Option<TimerHandle>,
    created_at: Instant,
    ack_retried: bool,
}

#[derive(Copy, Clone, Debug)]
enum TcpTimer {
    Response(u16),
    AckRetry(u16),
}

pub struct TcpClient<T: Transport, S: EventSink> {
    config: ClientConfig,
    transport: T,
    sink: S,
    /// Last issued id; the next one is this plus one, skipping 0.
    last_transaction_id: u16,
    pending: HashMap<u16, PendingTransaction>,
    timers: TimerQueue<TcpTimer>,
    demux: StreamDemux,
    connected: bool,
}

impl<T: Transport, S: EventSink> TcpClient<T, S> {
    /// Creates a client on a live channel.
    pub fn new(config: ClientConfig, transport: T, sink: S) -> Result<Self, ClientError> {
        if config.profile != Profile::Tcp {
            return Err(ClientError::UnsupportedProfile(config.profile));
        }
        Ok(Self {
            demux: StreamDemux::new(config.partial_frames),
            config,
            transport,
            sink,
            last_transaction_id: 0,
            pending: HashMap::new(),
            timers: TimerQueue::new(),
            connected: true,
        })
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

    /// Number of requests awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, transaction_id: u16) -> bool {
        self.pending.contains_key(&transaction_id)
    }

    /// When the outstanding request was stored.
    pub fn pending_since(&self, transaction_id: u16) -> Option<Instant> {
        self.pending.get(&transaction_id).map(|tx| tx.created_at)
    }

    /// Seeds the id allocator: the next request gets `value + 1` (or 1
    /// after 65535).
    pub fn set_transaction_counter(&mut self, value: u16) {
        self.last_transaction_id = value;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn allocate_transaction_id(&mut self) -> Result<u16, ClientError> {
        for _ in 0..u16::MAX {
            let id = match self.last_transaction_id.wrapping_add(1) {
                0 => 1,
                id => id,
            };
            self.last_transaction_id = id;
            if !self.pending.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(ClientError::PoolFull(self.pending.len()))
    }

    /// Builds the request ADU with a fresh transaction id.
    pub fn make_request(&mut self, unit_id: u8, pdu: &Pdu) -> Result<TcpAdu, ClientError> {
        // validate before an id is consumed
        TcpAdu::new(0, unit_id, pdu.clone())?;
        let transaction_id = self.allocate_transaction_id()?;
        Ok(TcpAdu::new(transaction_id, unit_id, pdu.clone())?)
    }

    /// Adds a built request to the outstanding pool. A full pool is
    /// backpressure: nothing is evicted.
    pub fn store_request(&mut self, adu: TcpAdu, now: Instant) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::Disconnected);
        }
        if self.pending.len() >= self.config.max_concurrent {
            warn!("Transaction pool full ({}), rejecting request", self.config.max_concurrent);
            return Err(ClientError::PoolFull(self.config.max_concurrent));
        }
        let transaction_id = adu.transaction_id();
        if self.pending.contains_key(&transaction_id) {
            return Err(ClientError::DuplicateTransaction(transaction_id));
        }
        let frame = adu.to_bytes();
        self.pending.insert(
            transaction_id,
            PendingTransaction { adu, frame, timer: None, created_at: now, ack_retried: false },
        );
        Ok(())
    }

    /// Arms (or re-arms) the response timer of an outstanding request.
    /// `None` if the id is unknown or the timeout is zero.
    pub fn set_req_timer(&mut self, transaction_id: u16, timeout: Duration, now: Instant) -> Option<TimerHandle> {
        if timeout.is_zero() {
            return None;
        }
        let tx = self.pending.get_mut(&transaction_id)?;
        if let Some(previous) = tx.timer.take() {
            self.timers.cancel(previous);
        }
        let handle = self.timers.arm(now, timeout, TcpTimer::Response(transaction_id));
        tx.timer = Some(handle);
        Some(handle)
    }

    /// Builds, stores, writes and arms a request. Returns its transaction id.
    pub fn send(&mut self, unit_id: u8, pdu: &Pdu, now: Instant) -> Result<u16, ClientError> {
        if !self.connected {
            return Err(ClientError::Disconnected);
        }
        if self.pending.len() >= self.config.max_concurrent {
            warn!("Transaction pool full ({}), rejecting request", self.config.max_concurrent);
            return Err(ClientError::PoolFull(self.config.max_concurrent));
        }

        let adu = self.make_request(unit_id, pdu)?;
        let transaction_id = adu.transaction_id();
        self.store_request(adu, now)?;

        let written = match self.pending.get(&transaction_id) {
            Some(tx) => self.transport.write(&tx.frame),
            None => false,
        };
        if !written {
            warn!("Transport rejected request trans_id={:04X}", transaction_id);
            self.pending.remove(&transaction_id);
            return Err(ClientError::TransportRejected);
        }

        self.set_req_timer(transaction_id, self.config.response_timeout(), now);
        debug!("Sent request trans_id={:04X}, unit_id={}, FC={:02X}", transaction_id, unit_id, pdu.function_code());
        self.sink.emit(ModbusEvent::Request { unit_id, transaction_id: Some(transaction_id), pdu: pdu.clone() });
        Ok(transaction_id)
    }

    /// Correlates one response frame. Returns the id of the transaction it
    /// completed; unknown and late ids are ignored.
    pub fn process_res_adu(&mut self, frame: &[u8], now: Instant) -> Result<Option<u16>, ModbusFrameError> {
        let response = decode_tcp(frame)?;
        if !self.connected {
            trace!("Ignoring response on disconnected channel");
            return Ok(None);
        }

        let transaction_id = response.transaction_id();
        let Some(tx) = self.pending.get_mut(&transaction_id) else {
            trace!("Ignoring response for unknown or expired trans_id={:04X}", transaction_id);
            return Ok(None);
        };
        if tx.adu.unit_id() != response.unit_id() {
            debug!(
                "Response trans_id={:04X} from unit {} for request to unit {}",
                transaction_id,
                response.unit_id(),
                tx.adu.unit_id()
            );
        }

        let exception = response.pdu.exception_code().and_then(ExceptionCode::from_u8);
        if exception == Some(ExceptionCode::Acknowledge) && !tx.ack_retried {
            debug!("Slave acknowledged trans_id={:04X}, re-sending later", transaction_id);
            tx.ack_retried = true;
            if let Some(timer) = tx.timer.take() {
                self.timers.cancel(timer);
            }
            let handle = self.timers.arm(now, self.config.ack_retry_delay(), TcpTimer::AckRetry(transaction_id));
            tx.timer = Some(handle);
            return Ok(None);
        }

        let Some(tx) = self.pending.remove(&transaction_id) else {
            return Ok(None);
        };
        if let Some(timer) = tx.timer {
            self.timers.cancel(timer);
        }
        debug!(
            "Transaction trans_id={:04X} complete after {:?}",
            transaction_id,
            now.saturating_duration_since(tx.created_at)
        );

        let unit_id = response.unit_id();
        self.sink.emit(ModbusEvent::Response {
            unit_id,
            transaction_id: Some(transaction_id),
            pdu: response.pdu.clone(),
        });
        if let Some(exception) = exception {
            self.sink.emit(ModbusEvent::Exception { function_code: response.pdu.function_code(), exception });
        }
        self.sink.emit(ModbusEvent::Transaction {
            unit_id,
            transaction_id: Some(transaction_id),
            request: tx.adu.pdu,
            response: response.pdu,
        });
        Ok(Some(transaction_id))
    }

    /// Feeds raw bytes from the socket. Malformed frames are logged and
    /// skipped. Returns the ids of completed transactions.
    pub fn on_data(&mut self, chunk: &[u8], now: Instant) -> Vec<u16> {
        let mut completed = Vec::new();
        for frame in self.demux.push(chunk) {
            match self.process_res_adu(&frame, now) {
                Ok(Some(transaction_id)) => completed.push(transaction_id),
                Ok(None) => {}
                Err(err) => warn!("Dropping malformed response: {}", err),
            }
        }
        completed
    }

    /// Fires every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for (_, timer) in self.timers.expire(now) {
            match timer {
                TcpTimer::Response(transaction_id) => self.expire(transaction_id),
                TcpTimer::AckRetry(transaction_id) => self.resend(transaction_id, now),
            }
        }
    }

    fn expire(&mut self, transaction_id: u16) {
        let Some(tx) = self.pending.remove(&transaction_id) else {
            return;
        };
        warn!("Request trans_id={:04X} timed out", transaction_id);
        self.sink.emit(ModbusEvent::Timeout {
            unit_id: tx.adu.unit_id(),
            transaction_id,
            request: tx.adu.pdu,
        });
    }

    fn resend(&mut self, transaction_id: u16, now: Instant) {
        let written = match self.pending.get(&transaction_id) {
            Some(tx) => self.transport.write(&tx.frame),
            None => return,
        };
        if !written {
            warn!("Transport rejected re-send of trans_id={:04X}", transaction_id);
            self.expire(transaction_id);
            return;
        }
        debug!("Re-sent trans_id={:04X} after acknowledge", transaction_id);
        self.set_req_timer(transaction_id, self.config.response_timeout(), now);
    }

    pub fn connect(&mut self) {
        self.connected = true;
    }

    /// Cancels every outstanding transaction without events. Responses that
    /// arrive afterwards are ignored.
    pub fn disconnect(&mut self) {
        if !self.pending.is_empty() {
            debug!("Disconnect cancels {} outstanding transactions", self.pending.len());
        }
        self.connected = false;
        self.timers.clear();
        self.pending.clear();
        self.demux.reset();
    }
}
