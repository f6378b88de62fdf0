//! TCP transport: framed PDU reads and writes over one socket.
//!
//! The socket is split once at connect time. Writers serialise on the
//! write-half mutex; the read half has a single consumer at any time
//! (the session during setup, the receiver task afterwards).

use crate::error::Error;
use nvmf_protocol::{CommonHeader, Pdu, PduCodec, ProtocolError, COMMON_HEADER_SIZE};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub(crate) struct Transport {
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<OwnedReadHalf>,
    codec: StdMutex<PduCodec>,
    closed: AtomicBool,
}

impl Transport {
    /// Establishes the TCP connection within `timeout`.
    pub(crate) async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::timeout(format!("connect to {host}:{port}")))?
            .map_err(|e| Error::conn(format!("connect to {host}:{port}: {e}")))?;
        stream.set_nodelay(true).ok();
        let (reader, writer) = stream.into_split();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            codec: StdMutex::new(PduCodec::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Applies the parameters negotiated by ICReq/ICResp.
    pub(crate) fn set_negotiated(&self, header_digest: bool, data_digest: bool, cpda: u8) {
        let mut codec = self.codec.lock().unwrap();
        codec.header_digest = header_digest;
        codec.data_digest = data_digest;
        codec.cpda = cpda;
    }

    pub(crate) fn codec(&self) -> PduCodec {
        *self.codec.lock().unwrap()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encodes and writes one PDU. Writes are atomic per PDU.
    pub(crate) async fn send_pdu(&self, pdu: &Pdu) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::conn("connection closed"));
        }
        let encoded = self.codec().encode(pdu)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            Error::conn(format!("send failed: {e}"))
        })
    }

    /// Reads one complete PDU: the 8-byte common header first, then the
    /// remaining `plen - 8` bytes.
    pub(crate) async fn recv_pdu(&self) -> Result<Pdu, Error> {
        let codec = self.codec();
        let mut reader = self.reader.lock().await;

        let mut buf = vec![0u8; COMMON_HEADER_SIZE];
        read_exact(&mut reader, &mut buf).await?;
        let header = CommonHeader::parse(&buf)?;
        if header.plen > codec.max_pdu_size {
            return Err(Error::Protocol(ProtocolError::PduTooLarge {
                plen: header.plen,
                max: codec.max_pdu_size,
            }));
        }
        buf.resize(header.plen as usize, 0);
        if header.plen as usize > COMMON_HEADER_SIZE {
            read_exact(&mut reader, &mut buf[COMMON_HEADER_SIZE..]).await?;
        }
        drop(reader);

        Ok(codec.decode(&buf)?)
    }

    /// `recv_pdu` with a deadline; used during session setup.
    pub(crate) async fn recv_pdu_timeout(&self, timeout: Duration) -> Result<Pdu, Error> {
        tokio::time::timeout(timeout, self.recv_pdu())
            .await
            .map_err(|_| Error::timeout("waiting for PDU"))?
    }

    /// Shuts the write side down; the peer observes FIN and closes.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.ok();
    }
}

async fn read_exact(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<(), Error> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(Error::conn("connection closed by peer"))
        }
        Err(e) => Err(Error::conn(format!("read failed: {e}"))),
    }
}
