//! NVMe/TCP PDU framing.
//!
//! Every PDU starts with an 8-byte common header:
//!
//! ```text
//! +------+-------+------+-----+---------+
//! | type | flags | hlen | pdo |  plen   |
//! |1 byte|1 byte |1 byte|1byte| 4 bytes |
//! +------+-------+------+-----+---------+
//! ```
//!
//! When the header digest is negotiated, `hlen` includes the 4 trailing
//! CRC32C bytes and the digest covers the preceding `hlen - 4` bytes.
//! The data digest trails the data region and is included in `plen`.
//! `plen` accounts for every transmitted byte of the PDU.

use crate::command::{Sqe, SQE_SIZE};
use crate::completion::{Cqe, CQE_SIZE};
use crate::error::{ensure_len, ProtocolError};
use crate::{DIGEST_SIZE, MAX_PDU_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the PDU common header in bytes.
pub const COMMON_HEADER_SIZE: usize = 8;

/// Fixed header length of ICReq/ICResp PDUs.
pub const IC_PDU_SIZE: usize = 128;

/// Header length of a CapsuleCmd PDU without digest.
pub const CAPSULE_CMD_HLEN: usize = COMMON_HEADER_SIZE + SQE_SIZE;

/// Header length of CapsuleResp, Data, and R2T PDUs without digest.
pub const SHORT_HLEN: usize = 24;

/// PDU types of the NVMe/TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    IcReq = 0x00,
    IcResp = 0x01,
    H2cTermReq = 0x02,
    C2hTermReq = 0x03,
    CapsuleCmd = 0x04,
    CapsuleResp = 0x05,
    H2cData = 0x06,
    C2hData = 0x07,
    R2t = 0x09,
}

impl PduType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(PduType::IcReq),
            0x01 => Ok(PduType::IcResp),
            0x02 => Ok(PduType::H2cTermReq),
            0x03 => Ok(PduType::C2hTermReq),
            0x04 => Ok(PduType::CapsuleCmd),
            0x05 => Ok(PduType::CapsuleResp),
            0x06 => Ok(PduType::H2cData),
            0x07 => Ok(PduType::C2hData),
            0x09 => Ok(PduType::R2t),
            other => Err(ProtocolError::UnknownPduType(other)),
        }
    }
}

/// PDU flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PduFlags(u8);

impl PduFlags {
    /// Header digest present.
    pub const HDGST: u8 = 0x01;
    /// Data digest present.
    pub const DDGST: u8 = 0x02;
    /// Last data PDU of a transfer.
    pub const LAST_PDU: u8 = 0x04;
    /// C2HData success optimisation: no CapsuleResp follows.
    pub const SUCCESS: u8 = 0x08;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn has_hdgst(&self) -> bool {
        self.0 & Self::HDGST != 0
    }

    pub fn has_ddgst(&self) -> bool {
        self.0 & Self::DDGST != 0
    }

    pub fn is_last(&self) -> bool {
        self.0 & Self::LAST_PDU != 0
    }

    pub fn is_success(&self) -> bool {
        self.0 & Self::SUCCESS != 0
    }
}

/// The parsed 8-byte common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub pdu_type: PduType,
    pub flags: PduFlags,
    pub hlen: u8,
    pub pdo: u8,
    pub plen: u32,
}

impl CommonHeader {
    /// Parses the common header from the first 8 bytes of a PDU.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(data, COMMON_HEADER_SIZE, "PDU common header")?;
        let mut buf = &data[..COMMON_HEADER_SIZE];
        let pdu_type = PduType::from_u8(buf.get_u8())?;
        let flags = PduFlags::from_bits(buf.get_u8());
        let hlen = buf.get_u8();
        let pdo = buf.get_u8();
        let plen = buf.get_u32_le();
        if (plen as usize) < COMMON_HEADER_SIZE {
            return Err(ProtocolError::LengthMismatch {
                plen,
                expected: COMMON_HEADER_SIZE as u32,
            });
        }
        Ok(Self {
            pdu_type,
            flags,
            hlen,
            pdo,
            plen,
        })
    }
}

/// A decoded PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    IcReq {
        pfv: u16,
        hpda: u8,
        digest: u8,
        maxr2t: u32,
    },
    IcResp {
        pfv: u16,
        cpda: u8,
        digest: u8,
        maxh2cdata: u32,
    },
    CapsuleCmd {
        sqe: Sqe,
        data: Bytes,
    },
    CapsuleResp {
        cqe: Cqe,
    },
    H2cData {
        cccid: u16,
        ttag: u16,
        datao: u32,
        data: Bytes,
        last: bool,
    },
    C2hData {
        cccid: u16,
        datao: u32,
        data: Bytes,
        last: bool,
        success: bool,
    },
    R2t {
        cccid: u16,
        ttag: u16,
        r2to: u32,
        r2tl: u32,
    },
    H2cTermReq {
        fes: u16,
        fei: u32,
        data: Bytes,
    },
    C2hTermReq {
        fes: u16,
        fei: u32,
        data: Bytes,
    },
}

impl Pdu {
    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::IcReq { .. } => PduType::IcReq,
            Pdu::IcResp { .. } => PduType::IcResp,
            Pdu::CapsuleCmd { .. } => PduType::CapsuleCmd,
            Pdu::CapsuleResp { .. } => PduType::CapsuleResp,
            Pdu::H2cData { .. } => PduType::H2cData,
            Pdu::C2hData { .. } => PduType::C2hData,
            Pdu::R2t { .. } => PduType::R2t,
            Pdu::H2cTermReq { .. } => PduType::H2cTermReq,
            Pdu::C2hTermReq { .. } => PduType::C2hTermReq,
        }
    }
}

/// PDU encoder/decoder carrying the negotiated connection parameters.
///
/// Digests and data alignment start disabled and are switched on after the
/// ICReq/ICResp exchange. ICReq, ICResp, and termination PDUs never carry
/// digests regardless of negotiation.
#[derive(Debug, Clone, Copy)]
pub struct PduCodec {
    pub header_digest: bool,
    pub data_digest: bool,
    /// Controller PDU data alignment (CPDA) in 0-based dwords.
    pub cpda: u8,
    pub max_pdu_size: u32,
}

impl Default for PduCodec {
    fn default() -> Self {
        Self {
            header_digest: false,
            data_digest: false,
            cpda: 0,
            max_pdu_size: MAX_PDU_SIZE,
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl PduCodec {
    fn alignment(&self) -> usize {
        (self.cpda as usize + 1) * 4
    }

    fn hdgst_len(&self) -> usize {
        if self.header_digest {
            DIGEST_SIZE
        } else {
            0
        }
    }

    /// Encodes a PDU into a contiguous buffer of exactly `plen` bytes.
    pub fn encode(&self, pdu: &Pdu) -> Result<BytesMut, ProtocolError> {
        match pdu {
            Pdu::IcReq {
                pfv,
                hpda,
                digest,
                maxr2t,
            } => Ok(encode_ic(PduType::IcReq, *pfv, *hpda, *digest, *maxr2t)),
            Pdu::IcResp {
                pfv,
                cpda,
                digest,
                maxh2cdata,
            } => Ok(encode_ic(PduType::IcResp, *pfv, *cpda, *digest, *maxh2cdata)),
            Pdu::CapsuleCmd { sqe, data } => self.encode_capsule_cmd(sqe, data),
            Pdu::CapsuleResp { cqe } => Ok(self.encode_capsule_resp(cqe)),
            Pdu::H2cData {
                cccid,
                ttag,
                datao,
                data,
                last,
            } => self.encode_data(PduType::H2cData, *cccid, *ttag, *datao, data, *last, false),
            Pdu::C2hData {
                cccid,
                datao,
                data,
                last,
                success,
            } => {
                if *success && !*last {
                    return Err(ProtocolError::SuccessWithoutLast(PduFlags::SUCCESS));
                }
                self.encode_data(PduType::C2hData, *cccid, 0, *datao, data, *last, *success)
            }
            Pdu::R2t {
                cccid,
                ttag,
                r2to,
                r2tl,
            } => Ok(self.encode_r2t(*cccid, *ttag, *r2to, *r2tl)),
            Pdu::H2cTermReq { fes, fei, data } => {
                Ok(encode_term(PduType::H2cTermReq, *fes, *fei, data))
            }
            Pdu::C2hTermReq { fes, fei, data } => {
                Ok(encode_term(PduType::C2hTermReq, *fes, *fei, data))
            }
        }
    }

    fn encode_capsule_cmd(&self, sqe: &Sqe, data: &Bytes) -> Result<BytesMut, ProtocolError> {
        let hd = self.hdgst_len();
        let hlen = CAPSULE_CMD_HLEN + hd;
        let (pdo, dd, plen) = if data.is_empty() {
            (0, 0, hlen)
        } else {
            let pdo = align_up(hlen, self.alignment());
            let dd = if self.data_digest { DIGEST_SIZE } else { 0 };
            (pdo, dd, pdo + data.len() + dd)
        };
        if plen as u32 > self.max_pdu_size {
            return Err(ProtocolError::PduTooLarge {
                plen: plen as u32,
                max: self.max_pdu_size,
            });
        }

        let mut buf = BytesMut::with_capacity(plen);
        let mut flags = 0u8;
        if hd > 0 {
            flags |= PduFlags::HDGST;
        }
        if dd > 0 {
            flags |= PduFlags::DDGST;
        }
        put_common(
            &mut buf,
            PduType::CapsuleCmd,
            flags,
            hlen as u8,
            pdo as u8,
            plen as u32,
        );
        buf.put_slice(&sqe.encode());
        if hd > 0 {
            let digest = crc32c::crc32c(&buf[..hlen - DIGEST_SIZE]);
            buf.put_u32_le(digest);
        }
        if !data.is_empty() {
            buf.put_bytes(0, pdo - hlen);
            buf.put_slice(data);
            if dd > 0 {
                buf.put_u32_le(crc32c::crc32c(data));
            }
        }
        Ok(buf)
    }

    fn encode_capsule_resp(&self, cqe: &Cqe) -> BytesMut {
        let hd = self.hdgst_len();
        let hlen = SHORT_HLEN + hd;
        let mut buf = BytesMut::with_capacity(hlen);
        let flags = if hd > 0 { PduFlags::HDGST } else { 0 };
        put_common(
            &mut buf,
            PduType::CapsuleResp,
            flags,
            hlen as u8,
            0,
            hlen as u32,
        );
        buf.put_slice(&cqe.encode());
        if hd > 0 {
            let digest = crc32c::crc32c(&buf[..hlen - DIGEST_SIZE]);
            buf.put_u32_le(digest);
        }
        buf
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_data(
        &self,
        pdu_type: PduType,
        cccid: u16,
        ttag: u16,
        datao: u32,
        data: &Bytes,
        last: bool,
        success: bool,
    ) -> Result<BytesMut, ProtocolError> {
        let hd = self.hdgst_len();
        let hlen = SHORT_HLEN + hd;
        let (pdo, dd, plen) = if data.is_empty() {
            (0, 0, hlen)
        } else {
            let pdo = align_up(hlen, self.alignment());
            let dd = if self.data_digest { DIGEST_SIZE } else { 0 };
            (pdo, dd, pdo + data.len() + dd)
        };
        if plen as u32 > self.max_pdu_size {
            return Err(ProtocolError::PduTooLarge {
                plen: plen as u32,
                max: self.max_pdu_size,
            });
        }

        let mut flags = 0u8;
        if hd > 0 {
            flags |= PduFlags::HDGST;
        }
        if dd > 0 {
            flags |= PduFlags::DDGST;
        }
        if last {
            flags |= PduFlags::LAST_PDU;
        }
        if success {
            flags |= PduFlags::SUCCESS;
        }

        let mut buf = BytesMut::with_capacity(plen);
        put_common(&mut buf, pdu_type, flags, hlen as u8, pdo as u8, plen as u32);
        buf.put_u16_le(cccid);
        buf.put_u16_le(ttag);
        buf.put_u32_le(datao);
        buf.put_u32_le(data.len() as u32);
        buf.put_u32_le(0);
        if hd > 0 {
            let digest = crc32c::crc32c(&buf[..hlen - DIGEST_SIZE]);
            buf.put_u32_le(digest);
        }
        if !data.is_empty() {
            buf.put_bytes(0, pdo - hlen);
            buf.put_slice(data);
            if dd > 0 {
                buf.put_u32_le(crc32c::crc32c(data));
            }
        }
        Ok(buf)
    }

    fn encode_r2t(&self, cccid: u16, ttag: u16, r2to: u32, r2tl: u32) -> BytesMut {
        let hd = self.hdgst_len();
        let hlen = SHORT_HLEN + hd;
        let mut buf = BytesMut::with_capacity(hlen);
        let flags = if hd > 0 { PduFlags::HDGST } else { 0 };
        put_common(&mut buf, PduType::R2t, flags, hlen as u8, 0, hlen as u32);
        buf.put_u16_le(cccid);
        buf.put_u16_le(ttag);
        buf.put_u32_le(r2to);
        buf.put_u32_le(r2tl);
        buf.put_u32_le(0);
        if hd > 0 {
            let digest = crc32c::crc32c(&buf[..hlen - DIGEST_SIZE]);
            buf.put_u32_le(digest);
        }
        buf
    }

    /// Decodes a complete PDU from exactly `plen` bytes.
    pub fn decode(&self, buf: &[u8]) -> Result<Pdu, ProtocolError> {
        let header = CommonHeader::parse(buf)?;
        if header.plen > self.max_pdu_size {
            return Err(ProtocolError::PduTooLarge {
                plen: header.plen,
                max: self.max_pdu_size,
            });
        }
        if header.plen as usize != buf.len() {
            return Err(ProtocolError::LengthMismatch {
                plen: header.plen,
                expected: buf.len() as u32,
            });
        }

        let hd = if header.flags.has_hdgst() {
            DIGEST_SIZE
        } else {
            0
        };
        let expected_hlen = match header.pdu_type {
            PduType::IcReq | PduType::IcResp => IC_PDU_SIZE,
            PduType::CapsuleCmd => CAPSULE_CMD_HLEN + hd,
            PduType::H2cTermReq | PduType::C2hTermReq => SHORT_HLEN,
            _ => SHORT_HLEN + hd,
        };
        if header.hlen as usize != expected_hlen {
            return Err(ProtocolError::InvalidHeaderLength {
                pdu_type: header.pdu_type as u8,
                hlen: header.hlen,
            });
        }
        ensure_len(buf, expected_hlen, "PDU header")?;
        if hd > 0 && !matches!(header.pdu_type, PduType::IcReq | PduType::IcResp) {
            let covered = expected_hlen - DIGEST_SIZE;
            let expected = u32::from_le_bytes(buf[covered..expected_hlen].try_into().unwrap());
            let actual = crc32c::crc32c(&buf[..covered]);
            if expected != actual {
                return Err(ProtocolError::HeaderDigestMismatch { expected, actual });
            }
        }

        match header.pdu_type {
            PduType::IcReq => {
                let (pfv, pda, digest, max) = parse_ic(&header, buf)?;
                Ok(Pdu::IcReq {
                    pfv,
                    hpda: pda,
                    digest,
                    maxr2t: max,
                })
            }
            PduType::IcResp => {
                let (pfv, pda, digest, max) = parse_ic(&header, buf)?;
                Ok(Pdu::IcResp {
                    pfv,
                    cpda: pda,
                    digest,
                    maxh2cdata: max,
                })
            }
            PduType::CapsuleCmd => {
                let sqe = Sqe::decode(&buf[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + SQE_SIZE])?;
                let data = self.data_region(&header, buf, expected_hlen)?;
                Ok(Pdu::CapsuleCmd { sqe, data })
            }
            PduType::CapsuleResp => {
                let cqe = Cqe::decode(&buf[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + CQE_SIZE])?;
                Ok(Pdu::CapsuleResp { cqe })
            }
            PduType::H2cData | PduType::C2hData => {
                let mut psh = &buf[COMMON_HEADER_SIZE..];
                let cccid = psh.get_u16_le();
                let ttag = psh.get_u16_le();
                let datao = psh.get_u32_le();
                let datal = psh.get_u32_le();
                let data = self.data_region(&header, buf, expected_hlen)?;
                if data.len() as u32 != datal {
                    return Err(ProtocolError::InvalidField {
                        field: "datal",
                        value: datal as u64,
                    });
                }
                if header.pdu_type == PduType::H2cData {
                    Ok(Pdu::H2cData {
                        cccid,
                        ttag,
                        datao,
                        data,
                        last: header.flags.is_last(),
                    })
                } else {
                    if header.flags.is_success() && !header.flags.is_last() {
                        return Err(ProtocolError::SuccessWithoutLast(header.flags.bits()));
                    }
                    Ok(Pdu::C2hData {
                        cccid,
                        datao,
                        data,
                        last: header.flags.is_last(),
                        success: header.flags.is_success(),
                    })
                }
            }
            PduType::R2t => {
                let mut psh = &buf[COMMON_HEADER_SIZE..];
                Ok(Pdu::R2t {
                    cccid: psh.get_u16_le(),
                    ttag: psh.get_u16_le(),
                    r2to: psh.get_u32_le(),
                    r2tl: psh.get_u32_le(),
                })
            }
            PduType::H2cTermReq | PduType::C2hTermReq => {
                let mut psh = &buf[COMMON_HEADER_SIZE..];
                let fes = psh.get_u16_le();
                let fei = psh.get_u32_le();
                let data = Bytes::copy_from_slice(&buf[SHORT_HLEN..]);
                if header.pdu_type == PduType::H2cTermReq {
                    Ok(Pdu::H2cTermReq { fes, fei, data })
                } else {
                    Ok(Pdu::C2hTermReq { fes, fei, data })
                }
            }
        }
    }

    /// Extracts and digest-checks the data region of a PDU carrying data.
    fn data_region(
        &self,
        header: &CommonHeader,
        buf: &[u8],
        hlen: usize,
    ) -> Result<Bytes, ProtocolError> {
        let plen = header.plen as usize;
        if plen == hlen {
            return Ok(Bytes::new());
        }
        let start = if header.pdo as usize >= hlen {
            header.pdo as usize
        } else {
            hlen
        };
        let dd = if header.flags.has_ddgst() {
            DIGEST_SIZE
        } else {
            0
        };
        if start + dd > plen {
            return Err(ProtocolError::LengthMismatch {
                plen: header.plen,
                expected: (start + dd) as u32,
            });
        }
        let data = &buf[start..plen - dd];
        if dd > 0 {
            let expected = u32::from_le_bytes(buf[plen - dd..].try_into().unwrap());
            let actual = crc32c::crc32c(data);
            if expected != actual {
                return Err(ProtocolError::DataDigestMismatch { expected, actual });
            }
        }
        Ok(Bytes::copy_from_slice(data))
    }
}

fn put_common(buf: &mut BytesMut, pdu_type: PduType, flags: u8, hlen: u8, pdo: u8, plen: u32) {
    buf.put_u8(pdu_type as u8);
    buf.put_u8(flags);
    buf.put_u8(hlen);
    buf.put_u8(pdo);
    buf.put_u32_le(plen);
}

fn encode_ic(pdu_type: PduType, pfv: u16, pda: u8, digest: u8, max: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(IC_PDU_SIZE);
    put_common(
        &mut buf,
        pdu_type,
        0,
        IC_PDU_SIZE as u8,
        0,
        IC_PDU_SIZE as u32,
    );
    buf.put_u16_le(pfv);
    buf.put_u8(pda);
    buf.put_u8(digest);
    buf.put_u32_le(max);
    buf.put_bytes(0, IC_PDU_SIZE - buf.len());
    buf
}

fn parse_ic(header: &CommonHeader, buf: &[u8]) -> Result<(u16, u8, u8, u32), ProtocolError> {
    if header.plen as usize != IC_PDU_SIZE {
        return Err(ProtocolError::LengthMismatch {
            plen: header.plen,
            expected: IC_PDU_SIZE as u32,
        });
    }
    let mut body = &buf[COMMON_HEADER_SIZE..];
    let pfv = body.get_u16_le();
    let pda = body.get_u8();
    let digest = body.get_u8();
    let max = body.get_u32_le();
    Ok((pfv, pda, digest, max))
}

fn encode_term(pdu_type: PduType, fes: u16, fei: u32, data: &Bytes) -> BytesMut {
    let plen = SHORT_HLEN + data.len();
    let mut buf = BytesMut::with_capacity(plen);
    put_common(&mut buf, pdu_type, 0, SHORT_HLEN as u8, 0, plen as u32);
    buf.put_u16_le(fes);
    buf.put_u32_le(fei);
    buf.put_bytes(0, SHORT_HLEN - buf.len());
    buf.put_slice(data);
    buf
}
