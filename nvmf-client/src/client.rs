//! High-level client API.

use crate::config::ClientConfig;
use crate::engine::{ConnectionState, Engine, Submission};
use crate::error::Error;
use crate::session;
use crate::transport::Transport;
use crate::{hostid, Result};
use bytes::Bytes;
use nvmf_protocol::command::{cns, feature, log_page};
use nvmf_protocol::{
    identify, reservation_acquire_data, reservation_register_data, AcquireAction, AnaLogPage,
    AsyncEvent, ControllerCaps, ControllerInfo, ControllerVersion, DiscoveryEntry,
    DiscoveryLogPage, NamespaceInfo, ProtocolError, RegisterAction, ReleaseAction,
    ReservationReport, ReservationType, Sqe, DISCOVERY_NQN, NQN_MAX_LEN,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Largest NLB a single read/write may carry (the field is 16 bits,
/// 0-based).
const MAX_BLOCKS_PER_COMMAND: u64 = 65536;

struct Inner {
    engine: Arc<Engine>,
    controller_id: u16,
    caps: ControllerCaps,
    version: ControllerVersion,
    subsystem_nqn: String,
    is_discovery: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    controller_info: Mutex<Option<ControllerInfo>>,
    block_sizes: Mutex<HashMap<u32, u32>>,
    aen_enabled: std::sync::atomic::AtomicBool,
}

/// An NVMe over Fabrics TCP host connection.
///
/// One `Client` drives one controller association: an admin queue that
/// also carries I/O, exactly as negotiated by the Fabric Connect. All
/// operations are plain request/response; asynchronous events are the
/// exception and flow through [`Client::poll_async_events`].
pub struct Client {
    config: ClientConfig,
    host_nqn: String,
    host_id: [u8; 16],
    inner: Mutex<Option<Arc<Inner>>>,
}

impl Client {
    /// Creates a client for the given configuration. No I/O happens until
    /// [`Client::connect`].
    pub fn new(config: ClientConfig) -> Self {
        let host_nqn = config
            .host_nqn
            .clone()
            .unwrap_or_else(hostid::generate_host_nqn);
        let host_id = config
            .host_id
            .unwrap_or_else(|| hostid::derive_host_id(&host_nqn));
        Self {
            config,
            host_nqn,
            host_id,
            inner: Mutex::new(None),
        }
    }

    /// Establishes the TCP connection, performs ICReq/ICResp, Fabric
    /// Connect, and the initial property reads, then starts the receiver,
    /// timeout, and keep-alive tasks.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.lock().unwrap().is_some() {
            return Err(Error::conn("already connected"));
        }
        if self.host_nqn.len() > NQN_MAX_LEN {
            return Err(Error::invalid(format!(
                "host NQN is {} bytes (max {NQN_MAX_LEN})",
                self.host_nqn.len()
            )));
        }
        let subsystem_nqn = self
            .config
            .subsystem_nqn
            .clone()
            .unwrap_or_else(|| DISCOVERY_NQN.to_string());
        if subsystem_nqn.len() > NQN_MAX_LEN {
            return Err(Error::invalid(format!(
                "subsystem NQN is {} bytes (max {NQN_MAX_LEN})",
                subsystem_nqn.len()
            )));
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            subsystem = %subsystem_nqn,
            "connecting"
        );
        let transport = Arc::new(
            Transport::connect(&self.config.host, self.config.port, self.config.timeout).await?,
        );
        tracing::debug!(state = ?ConnectionState::TcpConnected, "connection state");

        let negotiated = session::initialize(&transport, &self.config).await?;
        tracing::debug!(state = ?ConnectionState::IcComplete, "connection state");

        let controller_id = session::fabric_connect(
            &transport,
            &self.config,
            &self.host_nqn,
            &self.host_id,
            &subsystem_nqn,
        )
        .await?;
        tracing::debug!(state = ?ConnectionState::AdminReady, "connection state");

        let (caps, version) = session::read_properties(&transport, self.config.timeout).await?;
        tracing::debug!(state = ?ConnectionState::Active, "connection state");

        let depth = u32::from(self.config.queue_size).min(caps.mqes);
        let engine = Engine::new(
            transport,
            depth,
            self.config.timeout,
            negotiated.maxh2cdata,
            self.config.queue_full,
        );

        let mut tasks = vec![
            tokio::spawn(engine.clone().receiver_loop()),
            tokio::spawn(engine.clone().sweeper_loop()),
        ];
        if self.config.kato_ms > 0 {
            tasks.push(tokio::spawn(engine.clone().keepalive_loop(self.config.kato_ms)));
        }

        let inner = Arc::new(Inner {
            engine,
            controller_id,
            caps,
            version,
            is_discovery: subsystem_nqn == DISCOVERY_NQN,
            subsystem_nqn,
            tasks: Mutex::new(tasks),
            controller_info: Mutex::new(None),
            block_sizes: Mutex::new(HashMap::new()),
            aen_enabled: std::sync::atomic::AtomicBool::new(false),
        });
        tracing::info!(
            controller_id,
            version = %inner.version,
            mqes = inner.caps.mqes,
            header_digest = negotiated.header_digest,
            data_digest = negotiated.data_digest,
            cpda = negotiated.cpda,
            "session active"
        );
        *self.inner.lock().unwrap() = Some(inner);
        Ok(())
    }

    /// Closes the connection. Every outstanding command fails with a
    /// connection error before this returns; the background tasks are
    /// joined. No termination PDU is sent for a graceful disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(inner) = self.inner.lock().unwrap().take() else {
            return Ok(());
        };
        inner.engine.shutdown().await;
        let tasks: Vec<JoinHandle<()>> = inner.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        tracing::info!("disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|inner| inner.engine.is_active())
    }

    /// The controller id assigned by the Fabric Connect response.
    pub fn controller_id(&self) -> Option<u16> {
        self.inner.lock().unwrap().as_ref().map(|i| i.controller_id)
    }

    pub fn host_nqn(&self) -> &str {
        &self.host_nqn
    }

    pub fn subsystem_nqn(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|i| i.subsystem_nqn.clone())
    }

    /// Controller capabilities read during connect.
    pub fn controller_caps(&self) -> Option<ControllerCaps> {
        self.inner.lock().unwrap().as_ref().map(|i| i.caps)
    }

    /// NVMe version reported by the VS property.
    pub fn controller_version(&self) -> Option<ControllerVersion> {
        self.inner.lock().unwrap().as_ref().map(|i| i.version)
    }

    fn inner(&self) -> Result<Arc<Inner>> {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::conn("not connected"))
    }

    // ======================================================================
    // Identify
    // ======================================================================

    /// Identify Controller (CNS 01h). The result is cached for AERL and
    /// in-capsule sizing.
    pub async fn identify_controller(&self) -> Result<ControllerInfo> {
        let inner = self.inner()?;
        let (_, data) = inner
            .engine
            .submit(Submission::new(Sqe::identify(0, cns::CONTROLLER, 0)).with_data_in())
            .await?;
        let info = ControllerInfo::parse(&data)?;
        if info.ioccsz >= 4 {
            inner.engine.set_in_capsule_limit(info.in_capsule_data_limit());
        }
        *inner.controller_info.lock().unwrap() = Some(info.clone());
        Ok(info)
    }

    /// Identify Namespace (CNS 00h).
    pub async fn identify_namespace(&self, nsid: u32) -> Result<NamespaceInfo> {
        if nsid == 0 {
            return Err(Error::invalid("nsid must be non-zero"));
        }
        let inner = self.inner()?;
        let (_, data) = inner
            .engine
            .submit(Submission::new(Sqe::identify(0, cns::NAMESPACE, nsid)).with_data_in())
            .await?;
        let info = NamespaceInfo::parse(&data)?;
        inner
            .block_sizes
            .lock()
            .unwrap()
            .insert(nsid, info.block_size);
        Ok(info)
    }

    /// Active namespace list (CNS 02h), ascending NSIDs.
    pub async fn list_namespaces(&self) -> Result<Vec<u32>> {
        let inner = self.inner()?;
        let (_, data) = inner
            .engine
            .submit(
                Submission::new(Sqe::identify(0, cns::ACTIVE_NAMESPACE_LIST, 0)).with_data_in(),
            )
            .await?;
        Ok(identify::parse_namespace_list(&data)?)
    }

    // ======================================================================
    // Log pages
    // ======================================================================

    /// Get Log Page, returning the raw bytes.
    pub async fn get_log_page(&self, lid: u8, nsid: u32, len: u32) -> Result<Bytes> {
        if len == 0 || len % 4 != 0 {
            return Err(Error::invalid(format!(
                "log page length {len} must be a non-zero multiple of 4"
            )));
        }
        let inner = self.inner()?;
        let (_, data) = inner
            .engine
            .submit(Submission::new(Sqe::get_log_page(0, lid, nsid, len)).with_data_in())
            .await?;
        Ok(data)
    }

    /// ANA log page (LID 0Ch), parsed.
    pub async fn get_ana_log_page(&self) -> Result<AnaLogPage> {
        let data = self.get_log_page(log_page::ANA, 0, 4096).await?;
        Ok(AnaLogPage::parse(&data)?)
    }

    /// Changed Namespace List log page (LID 04h).
    pub async fn get_changed_namespace_list(&self) -> Result<Vec<u32>> {
        let data = self
            .get_log_page(log_page::CHANGED_NAMESPACE_LIST, 0, 4096)
            .await?;
        Ok(identify::parse_changed_namespace_list(&data)?)
    }

    /// Discovery log entries, up to `max_entries`. Only valid on a
    /// discovery-subsystem connection. The header is fetched first so the
    /// full fetch covers exactly the advertised record count.
    pub async fn get_discovery_entries(&self, max_entries: usize) -> Result<Vec<DiscoveryEntry>> {
        let inner = self.inner()?;
        if !inner.is_discovery {
            return Err(Error::conn(
                "discovery requires a connection to the discovery subsystem",
            ));
        }
        let header = self.get_log_page(log_page::DISCOVERY, 0, 16).await?;
        let head = DiscoveryLogPage::parse(&header)?;
        let count = head.num_records.min(max_entries as u64) as u32;
        if count == 0 {
            return Ok(Vec::new());
        }
        let len = 1024 + count * 1024;
        let data = self.get_log_page(log_page::DISCOVERY, 0, len).await?;
        let log = DiscoveryLogPage::parse(&data)?;
        tracing::debug!(
            generation = log.generation,
            records = log.num_records,
            fetched = log.entries.len(),
            "discovery log read"
        );
        Ok(log.entries)
    }

    // ======================================================================
    // I/O
    // ======================================================================

    /// Reads `nblocks` logical blocks starting at `lba`.
    pub async fn read_data(&self, nsid: u32, lba: u64, nblocks: u32) -> Result<Bytes> {
        let block_size = self.io_block_size(nsid, u64::from(nblocks)).await?;
        let len = u64::from(nblocks) * u64::from(block_size);
        if len > u32::MAX as u64 {
            return Err(Error::invalid(format!(
                "transfer of {len} bytes exceeds the per-command limit"
            )));
        }
        let inner = self.inner()?;
        let sqe = Sqe::read(0, nsid, lba, (nblocks - 1) as u16, len as u32);
        let (_, data) = inner
            .engine
            .submit(Submission::new(sqe).with_data_in())
            .await?;
        if data.len() as u64 != len {
            return Err(Error::Protocol(ProtocolError::TruncatedPayload {
                what: "read data",
                needed: len as usize,
                got: data.len(),
            }));
        }
        Ok(data)
    }

    /// Writes `data` starting at `lba`; the length must be a non-zero
    /// multiple of the namespace block size.
    pub async fn write_data(&self, nsid: u32, lba: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::invalid("write of zero blocks"));
        }
        let inner = self.inner()?;
        let block_size = self.block_size(&inner, nsid).await?;
        if data.len() as u64 % u64::from(block_size) != 0 {
            return Err(Error::invalid(format!(
                "write length {} is not a multiple of the {block_size}-byte block size",
                data.len()
            )));
        }
        let nblocks = data.len() as u64 / u64::from(block_size);
        if nblocks > MAX_BLOCKS_PER_COMMAND {
            return Err(Error::invalid(format!(
                "{nblocks} blocks exceeds the {MAX_BLOCKS_PER_COMMAND}-block command limit"
            )));
        }
        let sqe = Sqe::write(0, nsid, lba, (nblocks - 1) as u16, data.len() as u32);
        inner
            .engine
            .submit(Submission::new(sqe).with_data_out(Bytes::copy_from_slice(data)))
            .await?;
        Ok(())
    }

    /// Write Zeroes over `nblocks` blocks starting at `lba`.
    pub async fn write_zeroes(&self, nsid: u32, lba: u64, nblocks: u32) -> Result<()> {
        if nblocks == 0 {
            return Err(Error::invalid("write-zeroes of zero blocks"));
        }
        if u64::from(nblocks) > MAX_BLOCKS_PER_COMMAND {
            return Err(Error::invalid(format!(
                "{nblocks} blocks exceeds the {MAX_BLOCKS_PER_COMMAND}-block command limit"
            )));
        }
        let inner = self.inner()?;
        let sqe = Sqe::write_zeroes(0, nsid, lba, (nblocks - 1) as u16);
        inner.engine.submit(Submission::new(sqe)).await?;
        Ok(())
    }

    /// Flush: commits volatile writes for the namespace to media.
    pub async fn flush_namespace(&self, nsid: u32) -> Result<()> {
        let inner = self.inner()?;
        inner
            .engine
            .submit(Submission::new(Sqe::flush(0, nsid)))
            .await?;
        Ok(())
    }

    // ======================================================================
    // Features
    // ======================================================================

    /// Get Features; returns completion dword 0.
    pub async fn get_features(&self, fid: u8, nsid: u32) -> Result<u32> {
        let inner = self.inner()?;
        let (cqe, _) = inner
            .engine
            .submit(Submission::new(Sqe::get_features(0, fid, nsid)))
            .await?;
        Ok(cqe.dw0)
    }

    /// Set Features; returns completion dword 0.
    pub async fn set_features(&self, fid: u8, value: u32, nsid: u32) -> Result<u32> {
        let inner = self.inner()?;
        let (cqe, _) = inner
            .engine
            .submit(Submission::new(Sqe::set_features(0, fid, value, nsid, false)))
            .await?;
        Ok(cqe.dw0)
    }

    // ======================================================================
    // Reservations
    // ======================================================================

    /// Reservation Register: register, unregister, or replace a key.
    pub async fn reservation_register(
        &self,
        nsid: u32,
        action: RegisterAction,
        current_key: u64,
        new_key: u64,
        cptpl: u8,
    ) -> Result<()> {
        let inner = self.inner()?;
        let sqe = Sqe::reservation_register(0, nsid, action as u8, false, cptpl);
        let payload = reservation_register_data(current_key, new_key);
        inner
            .engine
            .submit(Submission::new(sqe).with_data_out(Bytes::copy_from_slice(&payload)))
            .await?;
        Ok(())
    }

    /// Reservation Acquire with the given type; `preempt_key` is only
    /// meaningful for the preempt actions.
    pub async fn reservation_acquire(
        &self,
        nsid: u32,
        action: AcquireAction,
        rtype: ReservationType,
        current_key: u64,
        preempt_key: u64,
    ) -> Result<()> {
        let inner = self.inner()?;
        let sqe = Sqe::reservation_acquire(0, nsid, action as u8, rtype as u8);
        let payload = reservation_acquire_data(current_key, preempt_key);
        inner
            .engine
            .submit(Submission::new(sqe).with_data_out(Bytes::copy_from_slice(&payload)))
            .await?;
        Ok(())
    }

    /// Reservation Release (or Clear) with the current key.
    pub async fn reservation_release(
        &self,
        nsid: u32,
        action: ReleaseAction,
        rtype: ReservationType,
        current_key: u64,
    ) -> Result<()> {
        let inner = self.inner()?;
        let sqe = Sqe::reservation_release(0, nsid, action as u8, rtype as u8);
        inner
            .engine
            .submit(
                Submission::new(sqe)
                    .with_data_out(Bytes::copy_from_slice(&current_key.to_le_bytes())),
            )
            .await?;
        Ok(())
    }

    /// Reservation Report in the extended (EDS=1) format.
    pub async fn reservation_report(&self, nsid: u32) -> Result<ReservationReport> {
        let inner = self.inner()?;
        let sqe = Sqe::reservation_report(0, nsid, 4096, true);
        let (_, data) = inner
            .engine
            .submit(Submission::new(sqe).with_data_in())
            .await?;
        Ok(ReservationReport::parse(&data, true)?)
    }

    // ======================================================================
    // Asynchronous events
    // ======================================================================

    /// Enables asynchronous event reporting via Set Features. With no
    /// mask, everything the controller advertises in OAES is enabled.
    pub async fn enable_async_events(&self, mask: Option<u32>) -> Result<()> {
        let inner = self.inner()?;
        let mask = match mask {
            Some(mask) => mask,
            None => {
                let info = self.cached_controller_info(&inner).await?;
                info.oaes & 0xFFFF_FF00
            }
        };
        self.set_features(feature::ASYNC_EVENT_CONFIG, mask, 0).await?;
        inner
            .aen_enabled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        tracing::debug!("async events enabled, mask {mask:#010x}");
        Ok(())
    }

    /// Pre-posts `count` Asynchronous Event Request commands. Their
    /// completions surface through [`Client::poll_async_events`]; the
    /// engine never re-posts on its own.
    pub async fn request_async_events(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid("count must be non-zero"));
        }
        let inner = self.inner()?;
        if !inner
            .aen_enabled
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::invalid(
                "async events not enabled; call enable_async_events first",
            ));
        }
        let info = self.cached_controller_info(&inner).await?;
        let limit = info.aerl as usize + 1;
        let outstanding = inner.engine.outstanding_async_requests();
        if outstanding + count > limit {
            return Err(Error::invalid(format!(
                "{count} requests would exceed the AERL limit of {limit} ({outstanding} outstanding)"
            )));
        }
        for _ in 0..count {
            inner.engine.post_async_event_request().await?;
        }
        Ok(())
    }

    /// Drains decoded asynchronous events, waiting up to `timeout` when
    /// the queue is empty.
    pub async fn poll_async_events(&self, timeout: Duration) -> Result<Vec<AsyncEvent>> {
        let inner = self.inner()?;
        Ok(inner.engine.poll_async_events(timeout).await)
    }

    /// Events discarded because the bounded event queue overflowed.
    pub fn async_events_dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |i| i.engine.async_events_dropped())
    }

    // ======================================================================
    // Helpers
    // ======================================================================

    async fn cached_controller_info(&self, inner: &Arc<Inner>) -> Result<ControllerInfo> {
        if let Some(info) = inner.controller_info.lock().unwrap().clone() {
            return Ok(info);
        }
        self.identify_controller().await
    }

    async fn block_size(&self, inner: &Arc<Inner>, nsid: u32) -> Result<u32> {
        if let Some(size) = inner.block_sizes.lock().unwrap().get(&nsid).copied() {
            return Ok(size);
        }
        let info = self.identify_namespace(nsid).await?;
        Ok(info.block_size)
    }

    /// Validates an I/O block count and returns the namespace block size.
    async fn io_block_size(&self, nsid: u32, nblocks: u64) -> Result<u32> {
        if nblocks == 0 {
            return Err(Error::invalid("read of zero blocks"));
        }
        if nblocks > MAX_BLOCKS_PER_COMMAND {
            return Err(Error::invalid(format!(
                "{nblocks} blocks exceeds the {MAX_BLOCKS_PER_COMMAND}-block command limit"
            )));
        }
        let inner = self.inner()?;
        self.block_size(&inner, nsid).await
    }
}
