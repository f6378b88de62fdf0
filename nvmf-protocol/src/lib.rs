//! # nvmf-protocol
//!
//! Wire protocol for NVMe over Fabrics on the TCP transport.
//!
//! This crate provides:
//! - PDU framing with optional CRC32C header/data digests
//! - Submission and completion queue entry packing
//! - Status code decoding with human-readable descriptions
//! - Decoders for Identify, ANA, Discovery, Reservation Report, and
//!   asynchronous event payloads
//!
//! Everything here is pure computation over byte buffers; no I/O.

pub mod ana;
pub mod command;
pub mod completion;
pub mod discovery;
pub mod error;
pub mod event;
mod fields;
pub mod identify;
pub mod pdu;
pub mod properties;
pub mod reservation;
pub mod status;

pub use ana::{AnaGroup, AnaLogPage, AnaState};
pub use command::{
    connect_data, reservation_acquire_data, reservation_register_data, SglDescriptor, Sqe,
    CONNECT_DATA_SIZE, SQE_SIZE,
};
pub use completion::{Cqe, StatusField, CQE_SIZE};
pub use discovery::{DiscoveryEntry, DiscoveryLogPage, DISCOVERY_ENTRY_SIZE};
pub use error::ProtocolError;
pub use event::{AsyncEvent, AsyncEventType};
pub use identify::{
    parse_changed_namespace_list, parse_namespace_list, ControllerInfo, LbaFormat, NamespaceInfo,
};
pub use pdu::{CommonHeader, Pdu, PduCodec, PduFlags, PduType, COMMON_HEADER_SIZE, IC_PDU_SIZE};
pub use properties::{ControllerCaps, ControllerVersion, Property};
pub use reservation::{
    AcquireAction, RegisterAction, Registrant, ReleaseAction, ReservationReport, ReservationType,
};

/// Default NVMe/TCP port.
pub const NVME_TCP_PORT: u16 = 4420;

/// Conventional port for discovery controllers.
pub const NVME_DISCOVERY_PORT: u16 = 8009;

/// PDU Format Version 1.0, the only version this crate speaks.
pub const NVME_TCP_PFV: u16 = 0x0000;

/// The well-known discovery subsystem NQN.
pub const DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";

/// Maximum NQN length in bytes (NVMe base spec); wire fields pad to 256.
pub const NQN_MAX_LEN: usize = 223;

/// Fixed size of NQN fields in wire structures.
pub const NQN_FIELD_SIZE: usize = 256;

/// CRC32C digest length in bytes.
pub const DIGEST_SIZE: usize = 4;

/// Default cap on a single PDU, header and digests included (16 MiB).
pub const MAX_PDU_SIZE: u32 = 16 * 1024 * 1024;

/// Identify data structure size (controller and namespace).
pub const IDENTIFY_DATA_SIZE: usize = 4096;

/// Digest negotiation bit: header digest (ICReq/ICResp DGST field).
pub const DIGEST_HDGST: u8 = 0x01;

/// Digest negotiation bit: data digest (ICReq/ICResp DGST field).
pub const DIGEST_DDGST: u8 = 0x02;
