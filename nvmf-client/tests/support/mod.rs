//! In-process NVMe/TCP target used by the integration tests.
//!
//! Speaks just enough of the protocol to exercise the client end to end:
//! ICReq/ICResp with digest negotiation, Fabric Connect, properties,
//! Identify, log pages, block read/write with both in-capsule and
//! R2T-driven data, reservations, and asynchronous events.

#![allow(dead_code)]

use bytes::Bytes;
use nvmf_protocol::command::{cns, fabrics, log_page, opcode};
use nvmf_protocol::{
    CommonHeader, Cqe, Pdu, PduCodec, Property, Sqe, StatusField, DIGEST_DDGST, DIGEST_HDGST,
    IDENTIFY_DATA_SIZE,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const CONTROLLER_ID: u16 = 1;
pub const NSID: u32 = 1;
pub const BLOCK_SIZE: usize = 512;
pub const NS_BLOCKS: u64 = 2048;
pub const SUBNQN: &str = "nqn.2024-01.com.example:s1";

/// Tunable target behaviour.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Digest bits the target grants out of what the host offers.
    pub accept_digests: u8,
    /// PDU format version answered in ICResp.
    pub pfv: u16,
    pub maxh2cdata: u32,
    /// IOCCSZ advertised by Identify Controller, in 16-byte units.
    /// The default of 36 puts the in-capsule write limit at one block.
    pub ioccsz: u32,
    /// Send the CapsuleResp before the C2HData PDUs of a read.
    pub cqe_before_data: bool,
    /// Split read data into two C2HData PDUs, high offset first.
    pub split_c2h: bool,
    /// Never answer Flush commands (for timeout tests).
    pub ignore_flush: bool,
    /// Answer Flush with a termination request (for teardown tests).
    pub term_on_flush: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            accept_digests: DIGEST_HDGST | DIGEST_DDGST,
            pfv: 0,
            maxh2cdata: 0x20000,
            ioccsz: 36,
            cqe_before_data: false,
            split_c2h: false,
            ignore_flush: false,
            term_on_flush: false,
        }
    }
}

#[derive(Default)]
struct ReservationState {
    /// (reservation key, holds_reservation)
    registrants: Vec<(u64, bool)>,
    rtype: u8,
    generation: u32,
}

struct TargetState {
    behavior: Behavior,
    namespaces: Mutex<HashMap<u32, Vec<u8>>>,
    features: Mutex<HashMap<u8, u32>>,
    reservation: Mutex<ReservationState>,
}

pub struct MockTarget {
    addr: SocketAddr,
    state: Arc<TargetState>,
    events: mpsc::UnboundedSender<u32>,
}

impl MockTarget {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut namespaces = HashMap::new();
        namespaces.insert(NSID, vec![0u8; NS_BLOCKS as usize * BLOCK_SIZE]);
        let state = Arc::new(TargetState {
            behavior,
            namespaces: Mutex::new(namespaces),
            features: Mutex::new(HashMap::new()),
            reservation: Mutex::new(ReservationState::default()),
        });
        let (events, event_rx) = mpsc::unbounded_channel();

        let accept_state = state.clone();
        tokio::spawn(async move {
            let mut event_rx = Some(event_rx);
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = accept_state.clone();
                let rx = event_rx.take();
                tokio::spawn(async move {
                    let _ = serve(stream, state, rx).await;
                });
            }
        });

        Self {
            addr,
            state,
            events,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Completes one outstanding Asynchronous Event Request with `dw0`.
    pub fn trigger_event(&self, dw0: u32) {
        self.events.send(dw0).unwrap();
    }

    /// Raw namespace contents for assertions.
    pub fn namespace_bytes(&self, nsid: u32, offset: usize, len: usize) -> Vec<u8> {
        let namespaces = self.state.namespaces.lock().unwrap();
        namespaces[&nsid][offset..offset + len].to_vec()
    }
}

async fn read_pdu(rd: &mut OwnedReadHalf, codec: &PduCodec) -> io::Result<Pdu> {
    let mut header = [0u8; 8];
    rd.read_exact(&mut header).await?;
    let common = CommonHeader::parse(&header).map_err(to_io)?;
    let mut buf = vec![0u8; common.plen as usize];
    buf[..8].copy_from_slice(&header);
    rd.read_exact(&mut buf[8..]).await?;
    codec.decode(&buf).map_err(to_io)
}

async fn write_pdu(wr: &mut OwnedWriteHalf, codec: &PduCodec, pdu: &Pdu) -> io::Result<()> {
    let encoded = codec.encode(pdu).map_err(to_io)?;
    wr.write_all(&encoded).await
}

fn to_io(err: nvmf_protocol::ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn response(cid: u16, dw0: u32) -> Pdu {
    Pdu::CapsuleResp {
        cqe: Cqe {
            dw0,
            dw1: 0,
            sq_head: 0,
            sq_id: 0,
            cid,
            status: 0,
        },
    }
}

fn error_response(cid: u16, sct: u8, sc: u8, dnr: bool) -> Pdu {
    let mut status = StatusField::from_parts(sct, sc).0;
    if dnr {
        status |= 1 << 15;
    }
    Pdu::CapsuleResp {
        cqe: Cqe {
            dw0: 0,
            dw1: 0,
            sq_head: 0,
            sq_id: 0,
            cid,
            status,
        },
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<TargetState>,
    event_rx: Option<mpsc::UnboundedReceiver<u32>>,
) -> io::Result<()> {
    stream.set_nodelay(true).ok();
    let (mut rd, mut wr) = stream.into_split();
    let mut codec = PduCodec::default();
    let mut aer_cids: Vec<u16> = Vec::new();
    let mut pending_events: Vec<u32> = Vec::new();
    let mut event_rx = event_rx;
    let mut events_open = event_rx.is_some();

    loop {
        let pdu = if events_open {
            let rx = event_rx.as_mut().unwrap();
            tokio::select! {
                result = read_pdu(&mut rd, &codec) => result?,
                event = rx.recv() => {
                    match event {
                        Some(dw0) => {
                            if let Some(cid) = aer_cids.pop() {
                                write_pdu(&mut wr, &codec, &response(cid, dw0)).await?;
                            } else {
                                pending_events.push(dw0);
                            }
                        }
                        None => events_open = false,
                    }
                    continue;
                }
            }
        } else {
            read_pdu(&mut rd, &codec).await?
        };

        match pdu {
            Pdu::IcReq { digest, .. } => {
                let granted = digest & state.behavior.accept_digests;
                write_pdu(
                    &mut wr,
                    &codec,
                    &Pdu::IcResp {
                        pfv: state.behavior.pfv,
                        cpda: 0,
                        digest: granted,
                        maxh2cdata: state.behavior.maxh2cdata,
                    },
                )
                .await?;
                codec.header_digest = granted & DIGEST_HDGST != 0;
                codec.data_digest = granted & DIGEST_DDGST != 0;
            }
            Pdu::CapsuleCmd { sqe, data } => {
                handle_command(
                    &state,
                    &mut rd,
                    &mut wr,
                    &codec,
                    sqe,
                    data,
                    &mut aer_cids,
                    &mut pending_events,
                )
                .await?;
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected PDU from host: {other:?}"),
                ));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    state: &TargetState,
    rd: &mut OwnedReadHalf,
    wr: &mut OwnedWriteHalf,
    codec: &PduCodec,
    sqe: Sqe,
    data: Bytes,
    aer_cids: &mut Vec<u16>,
    pending_events: &mut Vec<u32>,
) -> io::Result<()> {
    let cid = sqe.cid;
    match sqe.opcode {
        opcode::FABRICS => match sqe.fctype() {
            fabrics::CONNECT => {
                write_pdu(wr, codec, &response(cid, CONTROLLER_ID as u32)).await?;
            }
            fabrics::PROPERTY_GET => {
                let value: u64 = match sqe.cdw11 {
                    x if x == Property::Cap as u32 => {
                        // MQES=63 (0-based), CQR, TO=30
                        63 | 1 << 16 | 30 << 24
                    }
                    x if x == Property::Vs as u32 => 0x0001_0400,
                    _ => 0,
                };
                let cqe = Cqe {
                    dw0: value as u32,
                    dw1: (value >> 32) as u32,
                    sq_head: 0,
                    sq_id: 0,
                    cid,
                    status: 0,
                };
                write_pdu(wr, codec, &Pdu::CapsuleResp { cqe }).await?;
            }
            _ => {
                write_pdu(wr, codec, &response(cid, 0)).await?;
            }
        },
        opcode::IDENTIFY => {
            let payload = match sqe.cdw10 as u8 {
                cns::CONTROLLER => build_identify_controller(state.behavior.ioccsz),
                cns::NAMESPACE => build_identify_namespace(),
                cns::ACTIVE_NAMESPACE_LIST => {
                    let mut list = vec![0u8; IDENTIFY_DATA_SIZE];
                    list[0..4].copy_from_slice(&NSID.to_le_bytes());
                    list
                }
                _ => vec![0u8; IDENTIFY_DATA_SIZE],
            };
            send_data_in(state, wr, codec, cid, payload, sqe.sgl.len as usize).await?;
        }
        // Get Log Page and Read share opcode 02h; a real target tells them
        // apart by queue. This mock serves log pages for nsid 0 and block
        // reads otherwise.
        x if x == opcode::GET_LOG_PAGE && sqe.nsid == 0 => {
            let lid = sqe.cdw10 as u8;
            let payload = match lid {
                log_page::DISCOVERY => build_discovery_log(),
                log_page::ANA => build_ana_log(),
                log_page::CHANGED_NAMESPACE_LIST => {
                    let mut list = vec![0u8; 4096];
                    list[0..4].copy_from_slice(&NSID.to_le_bytes());
                    list
                }
                _ => vec![0u8; sqe.sgl.len as usize],
            };
            send_data_in(state, wr, codec, cid, payload, sqe.sgl.len as usize).await?;
        }
        opcode::SET_FEATURES => {
            let fid = sqe.cdw10 as u8;
            state.features.lock().unwrap().insert(fid, sqe.cdw11);
            write_pdu(wr, codec, &response(cid, 0)).await?;
        }
        opcode::GET_FEATURES => {
            let fid = sqe.cdw10 as u8;
            let value = state.features.lock().unwrap().get(&fid).copied().unwrap_or(0);
            write_pdu(wr, codec, &response(cid, value)).await?;
        }
        opcode::KEEP_ALIVE => {
            write_pdu(wr, codec, &response(cid, 0)).await?;
        }
        opcode::ASYNC_EVENT_REQUEST => {
            if let Some(dw0) = pending_events.pop() {
                write_pdu(wr, codec, &response(cid, dw0)).await?;
            } else {
                aer_cids.push(cid);
            }
        }
        x if x == opcode::READ => {
            handle_read(state, wr, codec, &sqe).await?;
        }
        opcode::WRITE => {
            handle_write(state, rd, wr, codec, &sqe, data).await?;
        }
        opcode::WRITE_ZEROES => {
            let slba = sqe.cdw10 as u64 | (sqe.cdw11 as u64) << 32;
            let nlb = (sqe.cdw12 & 0xFFFF) as u64 + 1;
            if slba + nlb > NS_BLOCKS {
                write_pdu(wr, codec, &error_response(cid, 0x2, 0x80, true)).await?;
            } else {
                {
                    let mut namespaces = state.namespaces.lock().unwrap();
                    let ns = namespaces.get_mut(&sqe.nsid).unwrap();
                    let start = slba as usize * BLOCK_SIZE;
                    ns[start..start + nlb as usize * BLOCK_SIZE].fill(0);
                }
                write_pdu(wr, codec, &response(cid, 0)).await?;
            }
        }
        opcode::FLUSH => {
            if state.behavior.ignore_flush {
                // Swallow the command: the host's deadline has to fire.
            } else if state.behavior.term_on_flush {
                write_pdu(
                    wr,
                    codec,
                    &Pdu::C2hTermReq {
                        fes: 0x02,
                        fei: 0,
                        data: Bytes::new(),
                    },
                )
                .await?;
            } else {
                write_pdu(wr, codec, &response(cid, 0)).await?;
            }
        }
        opcode::RESERVATION_REGISTER => {
            let nrkey = u64::from_le_bytes(data[8..16].try_into().unwrap());
            {
                let mut reservation = state.reservation.lock().unwrap();
                reservation.registrants.push((nrkey, false));
                reservation.generation += 1;
            }
            write_pdu(wr, codec, &response(cid, 0)).await?;
        }
        opcode::RESERVATION_ACQUIRE => {
            let crkey = u64::from_le_bytes(data[0..8].try_into().unwrap());
            let rtype = (sqe.cdw10 >> 8) as u8;
            let known = {
                let mut reservation = state.reservation.lock().unwrap();
                let known = reservation.registrants.iter().any(|(key, _)| *key == crkey);
                if known {
                    for (key, holder) in reservation.registrants.iter_mut() {
                        *holder = *key == crkey;
                    }
                    reservation.rtype = rtype;
                }
                known
            };
            if known {
                write_pdu(wr, codec, &response(cid, 0)).await?;
            } else {
                write_pdu(wr, codec, &error_response(cid, 0x0, 0x83, true)).await?;
            }
        }
        opcode::RESERVATION_RELEASE => {
            {
                let mut reservation = state.reservation.lock().unwrap();
                for (_, holder) in reservation.registrants.iter_mut() {
                    *holder = false;
                }
                reservation.rtype = 0;
                reservation.generation += 1;
            }
            write_pdu(wr, codec, &response(cid, 0)).await?;
        }
        opcode::RESERVATION_REPORT => {
            let payload = build_reservation_report(state);
            send_data_in(state, wr, codec, cid, payload, sqe.sgl.len as usize).await?;
        }
        other => {
            let _ = other;
            write_pdu(wr, codec, &error_response(cid, 0x0, 0x01, true)).await?;
        }
    }
    Ok(())
}

async fn handle_read(
    state: &TargetState,
    wr: &mut OwnedWriteHalf,
    codec: &PduCodec,
    sqe: &Sqe,
) -> io::Result<()> {
    let cid = sqe.cid;
    let slba = sqe.cdw10 as u64 | (sqe.cdw11 as u64) << 32;
    let nlb = (sqe.cdw12 & 0xFFFF) as u64 + 1;
    if slba + nlb > NS_BLOCKS {
        return write_pdu(wr, codec, &error_response(cid, 0x2, 0x80, true)).await;
    }

    let payload = {
        let namespaces = state.namespaces.lock().unwrap();
        let ns = &namespaces[&sqe.nsid];
        let start = slba as usize * BLOCK_SIZE;
        Bytes::copy_from_slice(&ns[start..start + nlb as usize * BLOCK_SIZE])
    };

    if state.behavior.cqe_before_data {
        write_pdu(wr, codec, &response(cid, 0)).await?;
        send_c2h(state, wr, codec, cid, payload).await?;
    } else {
        send_c2h(state, wr, codec, cid, payload).await?;
        write_pdu(wr, codec, &response(cid, 0)).await?;
    }
    Ok(())
}

async fn send_c2h(
    state: &TargetState,
    wr: &mut OwnedWriteHalf,
    codec: &PduCodec,
    cid: u16,
    payload: Bytes,
) -> io::Result<()> {
    if state.behavior.split_c2h && payload.len() >= 2 {
        let half = payload.len() / 2;
        // High-offset chunk first: the host assembles by offset.
        write_pdu(
            wr,
            codec,
            &Pdu::C2hData {
                cccid: cid,
                datao: half as u32,
                data: payload.slice(half..),
                last: false,
                success: false,
            },
        )
        .await?;
        write_pdu(
            wr,
            codec,
            &Pdu::C2hData {
                cccid: cid,
                datao: 0,
                data: payload.slice(..half),
                last: true,
                success: false,
            },
        )
        .await
    } else {
        write_pdu(
            wr,
            codec,
            &Pdu::C2hData {
                cccid: cid,
                datao: 0,
                data: payload,
                last: true,
                success: false,
            },
        )
        .await
    }
}

async fn send_data_in(
    state: &TargetState,
    wr: &mut OwnedWriteHalf,
    codec: &PduCodec,
    cid: u16,
    mut payload: Vec<u8>,
    requested: usize,
) -> io::Result<()> {
    payload.resize(requested, 0);
    send_c2h(state, wr, codec, cid, Bytes::from(payload)).await?;
    write_pdu(wr, codec, &response(cid, 0)).await
}

async fn handle_write(
    state: &TargetState,
    rd: &mut OwnedReadHalf,
    wr: &mut OwnedWriteHalf,
    codec: &PduCodec,
    sqe: &Sqe,
    in_capsule: Bytes,
) -> io::Result<()> {
    let cid = sqe.cid;
    let slba = sqe.cdw10 as u64 | (sqe.cdw11 as u64) << 32;
    let nlb = (sqe.cdw12 & 0xFFFF) as u64 + 1;
    let len = nlb as usize * BLOCK_SIZE;
    if slba + nlb > NS_BLOCKS {
        return write_pdu(wr, codec, &error_response(cid, 0x2, 0x80, true)).await;
    }

    let payload = if !in_capsule.is_empty() {
        in_capsule.to_vec()
    } else {
        // Ask for the whole transfer and collect H2CData until LAST_PDU.
        write_pdu(
            wr,
            codec,
            &Pdu::R2t {
                cccid: cid,
                ttag: 0x77,
                r2to: 0,
                r2tl: len as u32,
            },
        )
        .await?;
        let mut buf = vec![0u8; len];
        loop {
            match read_pdu(rd, codec).await? {
                Pdu::H2cData {
                    cccid,
                    ttag,
                    datao,
                    data,
                    last,
                } => {
                    assert_eq!(cccid, cid);
                    assert_eq!(ttag, 0x77);
                    let start = datao as usize;
                    buf[start..start + data.len()].copy_from_slice(&data);
                    if last {
                        break;
                    }
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("expected H2CData, got {other:?}"),
                    ));
                }
            }
        }
        buf
    };

    {
        let mut namespaces = state.namespaces.lock().unwrap();
        let ns = namespaces.get_mut(&sqe.nsid).unwrap();
        let start = slba as usize * BLOCK_SIZE;
        ns[start..start + payload.len()].copy_from_slice(&payload);
    }
    write_pdu(wr, codec, &response(cid, 0)).await
}

// ----------------------------------------------------------------------
// Payload builders
// ----------------------------------------------------------------------

fn put_ascii(data: &mut [u8], offset: usize, len: usize, text: &str) {
    let field = &mut data[offset..offset + len];
    field.fill(b' ');
    field[..text.len()].copy_from_slice(text.as_bytes());
}

pub fn build_identify_controller(ioccsz: u32) -> Vec<u8> {
    let mut data = vec![0u8; IDENTIFY_DATA_SIZE];
    data[0..2].copy_from_slice(&0x1B36u16.to_le_bytes());
    put_ascii(&mut data, 4, 20, "MOCKSN01");
    put_ascii(&mut data, 24, 40, "Mock NVMe Controller");
    put_ascii(&mut data, 64, 8, "1.0");
    data[78..80].copy_from_slice(&CONTROLLER_ID.to_le_bytes());
    data[80..84].copy_from_slice(&0x0001_0400u32.to_le_bytes());
    // OAES: namespace attribute and ANA change notices
    data[92..96].copy_from_slice(&(1u32 << 8 | 1 << 11).to_le_bytes());
    data[259] = 3; // AERL: up to 4 outstanding
    data[514..516].copy_from_slice(&64u16.to_le_bytes());
    data[516..520].copy_from_slice(&1u32.to_le_bytes());
    data[768..768 + SUBNQN.len()].copy_from_slice(SUBNQN.as_bytes());
    data[1792..1796].copy_from_slice(&ioccsz.to_le_bytes());
    data[1796..1800].copy_from_slice(&1u32.to_le_bytes());
    data
}

pub fn build_identify_namespace() -> Vec<u8> {
    let mut data = vec![0u8; IDENTIFY_DATA_SIZE];
    data[0..8].copy_from_slice(&NS_BLOCKS.to_le_bytes());
    data[8..16].copy_from_slice(&NS_BLOCKS.to_le_bytes());
    data[16..24].copy_from_slice(&NS_BLOCKS.to_le_bytes());
    data[31] = 0xFF; // RESCAP: all reservation types
    data[92..96].copy_from_slice(&1u32.to_le_bytes());
    // LBAF0: 512-byte blocks, no metadata
    data[128..132].copy_from_slice(&(9u32 << 16).to_le_bytes());
    data
}

pub fn build_ana_log() -> Vec<u8> {
    let mut data = vec![0u8; 16];
    data[0..8].copy_from_slice(&1u64.to_le_bytes());
    data[8..10].copy_from_slice(&2u16.to_le_bytes());
    // Group 1: optimized, namespace 1
    let mut desc = vec![0u8; 32];
    desc[0..4].copy_from_slice(&1u32.to_le_bytes());
    desc[4..8].copy_from_slice(&1u32.to_le_bytes());
    desc[16] = 0x01;
    data.extend_from_slice(&desc);
    data.extend_from_slice(&1u32.to_le_bytes());
    // Group 2: inaccessible, namespaces 2 and 3
    let mut desc = vec![0u8; 32];
    desc[0..4].copy_from_slice(&2u32.to_le_bytes());
    desc[4..8].copy_from_slice(&2u32.to_le_bytes());
    desc[16] = 0x03;
    data.extend_from_slice(&desc);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&3u32.to_le_bytes());
    data
}

pub fn build_discovery_log() -> Vec<u8> {
    let mut data = vec![0u8; 1024];
    data[0..8].copy_from_slice(&7u64.to_le_bytes());
    data[8..16].copy_from_slice(&2u64.to_le_bytes());

    let mut entry = vec![0u8; 1024];
    entry[0] = 3; // TCP
    entry[1] = 1; // IPv4
    entry[2] = 2; // NVMe subsystem
    entry[4..6].copy_from_slice(&1u16.to_le_bytes());
    entry[6..8].copy_from_slice(&0xFFFFu16.to_le_bytes());
    entry[32..36].copy_from_slice(b"4420");
    entry[256..256 + SUBNQN.len()].copy_from_slice(SUBNQN.as_bytes());
    entry[512..520].copy_from_slice(b"10.0.0.1");
    data.extend_from_slice(&entry);

    let mut entry = vec![0u8; 1024];
    entry[0] = 3;
    entry[1] = 1;
    entry[2] = 3; // current discovery subsystem
    entry[4..6].copy_from_slice(&2u16.to_le_bytes());
    entry[6..8].copy_from_slice(&0xFFFFu16.to_le_bytes());
    entry[32..36].copy_from_slice(b"8009");
    let discovery = nvmf_protocol::DISCOVERY_NQN.as_bytes();
    entry[256..256 + discovery.len()].copy_from_slice(discovery);
    entry[512..520].copy_from_slice(b"10.0.0.1");
    data.extend_from_slice(&entry);

    data
}

fn build_reservation_report(state: &TargetState) -> Vec<u8> {
    let reservation = state.reservation.lock().unwrap();
    let mut data = vec![0u8; 64 + reservation.registrants.len() * 64];
    data[0..4].copy_from_slice(&reservation.generation.to_le_bytes());
    data[4] = reservation.rtype;
    data[5..7].copy_from_slice(&(reservation.registrants.len() as u16).to_le_bytes());
    for (i, (rkey, holder)) in reservation.registrants.iter().enumerate() {
        let entry = &mut data[64 + i * 64..64 + (i + 1) * 64];
        entry[0..2].copy_from_slice(&CONTROLLER_ID.to_le_bytes());
        entry[2] = *holder as u8;
        entry[8..16].copy_from_slice(&rkey.to_le_bytes());
        entry[16..32].copy_from_slice(&0xDEAD_BEEFu128.to_le_bytes());
    }
    data
}
