// lib.rs

mod checksum;
mod codec;
mod config;
mod demux;
mod event;
pub mod handlers;
mod modbus_ascii;
mod modbus_rtu;
mod modbus_tcp;
mod pdu;
mod serial_client;
mod server;
mod store;
mod tcp_client;
mod timer;
mod unit;

pub use checksum::{crc16, crc16_frame, lrc, validate_crc16, validate_lrc};
pub use codec::{Adu, FrameCodec, Profile};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use demux::{split_frames, PartialFrameMode, StreamDemux};
pub use event::{EventSink, ModbusEvent, Transport};
pub use handlers::{CustomHandler, Handled, Handler};
pub use modbus_ascii::{ascii_to_rtu, decode_ascii, encode_ascii, rtu_to_ascii, AsciiAdu};
pub use modbus_rtu::{decode_rtu, encode_rtu, RtuAdu};
pub use modbus_tcp::{decode_tcp, encode_tcp, MbapHeader, TcpAdu};
pub use pdu::{
    apply_mask, mask_from_bits, ExceptionCode, FunctionCode, MaskBit, Pdu, EXCEPTION_FLAG,
    MAX_PDU_SIZE,
};
pub use serial_client::{SerialClient, SerialState, BROADCAST_ADDRESS, MAX_SLAVE_ADDRESS};
pub use server::{Diagnostics, ModbusServer};
pub use store::RegisterStore;
pub use tcp_client::TcpClient;
pub use timer::{TimerHandle, TimerQueue};
pub use unit::{ModbusUnit, ModbusUnitBuilder, ModbusUnitError, RegisterType};

/// Structural faults at the frame codec boundary.
///
/// These indicate a transport glue bug or line noise, never a protocol
/// exception; those travel as exception PDUs.
#[derive(Debug, thiserror::Error)]
pub enum ModbusFrameError {
    #[error("Frame too short: {len} bytes, minimum {min}")]
    FrameTooShort { len: usize, min: usize },

    #[error("Frame too long: {len} bytes, maximum {max}")]
    FrameTooLong { len: usize, max: usize },

    #[error("Invalid protocol ID: {0}")]
    InvalidProtocolId(u16),

    #[error("MBAP length mismatch: declared {declared}, observed {observed}")]
    LengthMismatch { declared: u16, observed: usize },

    #[error("PDU too large: {0} bytes, maximum {max}", max = MAX_PDU_SIZE)]
    PduTooLarge(usize),

    #[error("Empty PDU")]
    EmptyPdu,

    #[error("ASCII frame does not start with ':'")]
    MissingStartMarker,

    #[error("ASCII frame does not end with CR LF")]
    MissingEndMarker,

    #[error("Invalid hex payload in ASCII frame")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Frame profile {actual:?} does not match codec profile {expected:?}")]
    ProfileMismatch { expected: Profile, actual: Profile },
}

/// Client-side request errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Frame error: {0}")]
    Frame(#[from] ModbusFrameError),

    #[error("Invalid unit ID {0} for this profile")]
    InvalidUnitId(u8),

    #[error("Too many outstanding transactions (max {0})")]
    PoolFull(usize),

    #[error("Transaction {0} is already outstanding")]
    DuplicateTransaction(u16),

    #[error("A request is already outstanding on this bus")]
    Busy,

    #[error("Channel is disconnected")]
    Disconnected,

    #[error("Transport refused the frame")]
    TransportRejected,

    #[error("Profile {0:?} is not usable by this client")]
    UnsupportedProfile(Profile),
}
