//! Connection initialisation: ICReq/ICResp, Fabric Connect, and the
//! initial property reads. Runs directly against the transport, before
//! the receiver task exists.

use crate::config::ClientConfig;
use crate::error::{CommandFailure, Error};
use crate::transport::Transport;
use bytes::Bytes;
use nvmf_protocol::{
    command, connect_data, ControllerCaps, ControllerVersion, Pdu, Property, ProtocolError, Sqe,
    DIGEST_DDGST, DIGEST_HDGST, NVME_TCP_PFV,
};
use std::time::Duration;

/// Parameters negotiated by the ICReq/ICResp exchange.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Negotiated {
    pub header_digest: bool,
    pub data_digest: bool,
    pub cpda: u8,
    /// Largest H2CData payload the controller accepts per PDU.
    pub maxh2cdata: u32,
}

/// Sends ICReq, processes ICResp, and arms the transport codec with the
/// negotiated digests and data alignment.
pub(crate) async fn initialize(
    transport: &Transport,
    config: &ClientConfig,
) -> Result<Negotiated, Error> {
    let mut offered = 0u8;
    if config.header_digest {
        offered |= DIGEST_HDGST;
    }
    if config.data_digest {
        offered |= DIGEST_DDGST;
    }

    transport
        .send_pdu(&Pdu::IcReq {
            pfv: NVME_TCP_PFV,
            hpda: 0,
            digest: offered,
            maxr2t: 0,
        })
        .await?;

    let pdu = transport.recv_pdu_timeout(config.timeout).await?;
    let (pfv, cpda, granted, maxh2cdata) = match pdu {
        Pdu::IcResp {
            pfv,
            cpda,
            digest,
            maxh2cdata,
        } => (pfv, cpda, digest, maxh2cdata),
        other => {
            return Err(Error::Protocol(ProtocolError::UnexpectedPdu {
                expected: "ICResp",
                got: other.pdu_type() as u8,
            }))
        }
    };

    if pfv != NVME_TCP_PFV {
        // An incompatible controller means the connection cannot be used.
        return Err(Error::conn(format!(
            "controller speaks PDU format version {pfv:#06x}, expected {NVME_TCP_PFV:#06x}"
        )));
    }

    let header_digest = config.header_digest && granted & DIGEST_HDGST != 0;
    let data_digest = config.data_digest && granted & DIGEST_DDGST != 0;
    transport.set_negotiated(header_digest, data_digest, cpda);

    // A controller advertising 0 gives no limit hint; fall back to one page.
    let maxh2cdata = if maxh2cdata == 0 { 4096 } else { maxh2cdata };

    tracing::debug!(
        header_digest,
        data_digest,
        cpda,
        maxh2cdata,
        "connection parameters negotiated"
    );

    Ok(Negotiated {
        header_digest,
        data_digest,
        cpda,
        maxh2cdata,
    })
}

/// Fabric Connect for the admin queue. Returns the controller id the
/// target assigned (CQE dword 0, low 16 bits).
pub(crate) async fn fabric_connect(
    transport: &Transport,
    config: &ClientConfig,
    host_nqn: &str,
    host_id: &[u8; 16],
    subsys_nqn: &str,
) -> Result<u16, Error> {
    let cid = 0;
    let sqe = Sqe::fabric_connect(cid, 0, config.queue_size - 1, config.kato_ms);
    let data = connect_data(host_id, host_nqn, subsys_nqn)?;

    tracing::debug!(subsys_nqn, host_nqn, "sending Fabric Connect");
    transport
        .send_pdu(&Pdu::CapsuleCmd {
            sqe,
            data: Bytes::from(data),
        })
        .await?;

    let cqe = expect_response(transport, config.timeout, cid).await?;
    if !cqe.is_success() {
        return Err(Error::Command(CommandFailure {
            opcode: command::opcode::FABRICS,
            cid,
            status: cqe.status_field(),
            dw0: cqe.dw0,
        }));
    }
    let controller_id = (cqe.dw0 & 0xFFFF) as u16;
    tracing::debug!(controller_id, "Fabric Connect complete");
    Ok(controller_id)
}

/// Reads CAP and VS over the freshly connected admin queue.
pub(crate) async fn read_properties(
    transport: &Transport,
    timeout: Duration,
) -> Result<(ControllerCaps, ControllerVersion), Error> {
    let cap = property_get(transport, timeout, 1, Property::Cap).await?;
    let vs = property_get(transport, timeout, 2, Property::Vs).await?;
    Ok((
        ControllerCaps::parse(cap),
        ControllerVersion::parse(vs as u32),
    ))
}

async fn property_get(
    transport: &Transport,
    timeout: Duration,
    cid: u16,
    property: Property,
) -> Result<u64, Error> {
    let sqe = Sqe::property_get(cid, property as u32, property.is_eight_byte());
    transport
        .send_pdu(&Pdu::CapsuleCmd {
            sqe,
            data: Bytes::new(),
        })
        .await?;
    let cqe = expect_response(transport, timeout, cid).await?;
    if !cqe.is_success() {
        return Err(Error::Command(CommandFailure {
            opcode: command::opcode::FABRICS,
            cid,
            status: cqe.status_field(),
            dw0: cqe.dw0,
        }));
    }
    Ok(cqe.dw0 as u64 | (cqe.dw1 as u64) << 32)
}

async fn expect_response(
    transport: &Transport,
    timeout: Duration,
    cid: u16,
) -> Result<nvmf_protocol::Cqe, Error> {
    match transport.recv_pdu_timeout(timeout).await? {
        Pdu::CapsuleResp { cqe } => {
            if cqe.cid != cid {
                return Err(Error::Protocol(ProtocolError::InvalidField {
                    field: "cid",
                    value: cqe.cid as u64,
                }));
            }
            Ok(cqe)
        }
        other => Err(Error::Protocol(ProtocolError::UnexpectedPdu {
            expected: "CapsuleResp",
            got: other.pdu_type() as u8,
        })),
    }
}
