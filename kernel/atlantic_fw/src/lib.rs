//! Firmware coordination core for Aquantia AQtion NICs.
//!
//! The card's management co-processor (MCP) owns the PHY: link rates,
//! flow control, energy-efficient ethernet, thermal limits, and
//! wake-on-LAN are all negotiated with the firmware through a set of
//! scratch registers and a shared-memory mailbox rather than programmed
//! directly. Two incompatible firmware protocol generations are in the
//! field; this crate drives both behind one operations table selected
//! from the version word at init.
//!
//! All firmware transactions are polled register handshakes with bounded
//! retries, serialized by a single session lock: the mailbox is one
//! non-reentrant resource. The datapath layers (PCI probe, rings,
//! interrupts, netdevice glue) live elsewhere and call in through
//! [`FwSession`].

#![no_std]

#[macro_use]
extern crate log;
extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

pub mod link;
pub mod mailbox;
pub mod regs;
pub mod thermal;
pub mod watchdog;

mod fw1;
mod fw2;

#[cfg(test)]
mod test;

use fw1::Fw1;
use fw2::Fw2;
use link::{FcMode, LinkState, LinkType, RateMask, LINK_TYPES};
use mailbox::{Mailbox, McpHal};
use regs::*;
use thermal::{ThermalConfig, ThermalFlag, ThermalFlags};
use watchdog::{WatchdogState, ATL_WDOG_PERIOD_MS};

/// Errors surfaced by firmware operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwError {
    /// A bounded poll exhausted its attempts. Recoverable by retry or,
    /// ultimately, a hardware reset.
    Timeout,
    /// The firmware never reached its ready state during bring-up.
    FirmwareInitTimeout,
    /// A configuration push was never acknowledged; the previous state
    /// was preserved.
    FirmwareAckTimeout,
    /// The firmware reports a major version this driver cannot drive.
    /// Fatal to bring-up.
    UnsupportedFirmware(u8),
    /// The selected firmware generation lacks this capability. A
    /// documented rejection, not a failure.
    OperationNotSupported,
    /// A thermal threshold was out of range, or a flag combination
    /// violated the monitor/throttle dependency.
    InvalidThermalConfig,
}

impl fmt::Display for FwError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FwError::Timeout => write!(f, "timeout waiting for firmware"),
            FwError::FirmwareInitTimeout => write!(f, "timeout waiting for firmware init"),
            FwError::FirmwareAckTimeout => {
                write!(f, "firmware did not acknowledge a configuration request")
            }
            FwError::UnsupportedFirmware(major) => {
                write!(f, "unsupported firmware major version: {}", major)
            }
            FwError::OperationNotSupported => {
                write!(f, "operation not supported by this firmware generation")
            }
            FwError::InvalidThermalConfig => write!(f, "invalid thermal configuration"),
        }
    }
}

impl From<FwError> for &'static str {
    fn from(e: FwError) -> Self {
        match e {
            FwError::Timeout => "timeout waiting for firmware",
            FwError::FirmwareInitTimeout => "timeout waiting for firmware init",
            FwError::FirmwareAckTimeout => "firmware did not acknowledge a configuration request",
            FwError::UnsupportedFirmware(_) => "unsupported firmware major version",
            FwError::OperationNotSupported => "operation not supported by this firmware generation",
            FwError::InvalidThermalConfig => "invalid thermal configuration",
        }
    }
}

// Device state bits, shared between the worker, the interrupt path, and
// firmware operations without taking the session lock.
pub const ST_ENABLED: u32 = 1 << 0;
pub const ST_RESETTING: u32 = 1 << 1;
pub const ST_RESET_NEEDED: u32 = 1 << 2;
pub const ST_UPDATE_LINK: u32 = 1 << 3;

/// Lock-free device status: state bits plus a staleness-tolerant
/// snapshot of the resolved link speed for reporting paths that must
/// not block on the session lock.
pub struct HwState {
    bits: AtomicU32,
    link_speed: AtomicU32,
}

impl HwState {
    fn new() -> HwState {
        HwState { bits: AtomicU32::new(0), link_speed: AtomicU32::new(0) }
    }

    pub fn test(&self, bit: u32) -> bool {
        self.bits.load(Ordering::Acquire) & bit != 0
    }

    pub fn set(&self, bit: u32) {
        self.bits.fetch_or(bit, Ordering::AcqRel);
    }

    pub fn clear(&self, bit: u32) {
        self.bits.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn test_and_clear(&self, bit: u32) -> bool {
        self.bits.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Last resolved link speed in Mbit/s, 0 when down.
    pub fn link_speed_mbps(&self) -> u32 {
        self.link_speed.load(Ordering::Relaxed)
    }

    fn set_link_speed(&self, mbps: u32) {
        self.link_speed.store(mbps, Ordering::Relaxed);
    }
}

bitflags! {
    /// Wake-on-LAN trigger selection.
    #[derive(Default)]
    pub struct WolMode: u8 {
        /// Wake when the PHY sees the link come up.
        const PHY = 1 << 0;
        /// Wake on a magic packet, via the firmware's sleep proxy.
        const MAGIC = 1 << 1;
    }
}

/// The per-generation firmware operations. Implementations carry no
/// state of their own; everything lives in [`Mcp`], which callers can
/// only reach through the session lock.
pub(crate) trait FwOps: Sync {
    fn wait_fw_init(&self, mcp: &mut Mcp) -> Result<(), FwError>;
    fn set_link(&self, mcp: &mut Mcp, force: bool);
    fn check_link(&self, mcp: &mut Mcp) -> Option<usize>;
    fn get_link_caps(&self, mcp: &mut Mcp) -> Result<(), FwError>;
    fn restart_aneg(&self, mcp: &mut Mcp) -> Result<(), FwError>;
    fn set_default_link(&self, mcp: &mut Mcp);
    fn enable_wol(&self, mcp: &mut Mcp, mac: [u8; 6]) -> Result<(), FwError>;
    fn phy_temperature(&self, mcp: &mut Mcp) -> Result<i32, FwError>;
    fn efuse_shadow_addr_reg(&self) -> u32;
}

/// Stand-in ops before [`FwSession::init`] has selected a generation.
struct FwNone;

impl FwOps for FwNone {
    fn wait_fw_init(&self, _mcp: &mut Mcp) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn set_link(&self, _mcp: &mut Mcp, _force: bool) {
        debug!("set_link before firmware init");
    }

    fn check_link(&self, _mcp: &mut Mcp) -> Option<usize> {
        None
    }

    fn get_link_caps(&self, _mcp: &mut Mcp) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn restart_aneg(&self, _mcp: &mut Mcp) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn set_default_link(&self, _mcp: &mut Mcp) {}

    fn enable_wol(&self, _mcp: &mut Mcp, _mac: [u8; 6]) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn phy_temperature(&self, _mcp: &mut Mcp) -> Result<i32, FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn efuse_shadow_addr_reg(&self) -> u32 {
        0
    }
}

static FW_NONE: FwNone = FwNone;
static FW1_OPS: Fw1 = Fw1;
static FW2_OPS: Fw2 = Fw2;

/// Generation-indexed operations table; selection happens exactly once,
/// in [`fw_init`].
static FW_OPS_TABLE: [&'static dyn FwOps; 2] = [&FW1_OPS, &FW2_OPS];

/// Everything behind the session lock: the transport plus all state the
/// firmware exchange mutates. Holding `&mut Mcp` *is* holding the lock,
/// which is what makes unlocked mailbox access unrepresentable.
pub(crate) struct Mcp {
    pub(crate) mbox: Mailbox,
    pub(crate) ops: &'static dyn FwOps,
    pub(crate) state: Arc<HwState>,
    pub(crate) fw_rev: u32,
    pub(crate) fw_stat_addr: u32,
    pub(crate) fw_settings_addr: u32,
    pub(crate) fw_settings_len: u32,
    /// High request word as last written, so self-clearing and
    /// firmware-owned bits survive rewrites.
    pub(crate) req_high: u32,
    /// Bits of `req_high` that must be carried over verbatim.
    pub(crate) req_high_mask: u32,
    pub(crate) caps_low: u32,
    pub(crate) caps_high: u32,
    pub(crate) link: LinkState,
    pub(crate) thermal: ThermalConfig,
    pub(crate) wdog: WatchdogState,
    pub(crate) wol_mode: WolMode,
    /// Last link state reported to the log, for transition detection.
    pub(crate) last_reported: Option<usize>,
}

impl Mcp {
    pub(crate) fn read_fwstat_word(&self, offt: u32) -> Result<u32, FwError> {
        self.mbox.read_word(self.fw_stat_addr.wrapping_add(offt))
    }

    pub(crate) fn throttle_enabled(&self) -> bool {
        self.thermal.flags.contains(ThermalFlags::THROTTLE)
    }
}

/// Bring the firmware session up: detect the protocol generation, wait
/// for firmware readiness, locate the status structure, read
/// capabilities, and apply the thermal configuration.
fn fw_init(mcp: &mut Mcp, wdog_period_ms: u64) -> Result<(), FwError> {
    let polled = mcp.mbox.poll(10000, 1000, |m| {
        let reg = m.read(ATL_GLOBAL_FW_VERSION);
        if reg != 0 {
            Some(reg)
        } else {
            None
        }
    });

    let ver = match polled {
        Ok(polled) => {
            debug!("FW startup took {} ms", polled.tries);
            FwVersion(polled.value)
        }
        Err(e) => {
            error!("Timeout waiting for FW version");
            return Err(e);
        }
    };

    let mut major = ver.major();
    if major == 0 || major > 3 {
        error!("Unsupported FW major version: {}", major);
        return Err(FwError::UnsupportedFirmware(major));
    }
    // Major 3 speaks the Gen2 protocol.
    if major > 2 {
        major -= 1;
    }
    mcp.ops = FW_OPS_TABLE[(major - 1) as usize];
    mcp.fw_rev = ver.0;

    let ops = mcp.ops;
    ops.wait_fw_init(mcp)?;

    mcp.fw_stat_addr = mcp.mbox.read(ATL_MCP_SCRATCH_FW_STAT_STRUCT);

    mcp.wdog.hbeat = watchdog::get_hbeat(mcp)?;
    mcp.wdog.next_due = mcp.mbox.now_ms() + 2 * wdog_period_ms;

    if major > 1 {
        mcp.req_high = 0;
        mcp.fw_settings_addr = mcp.read_fwstat_word(ATL_FWSTAT_SETTINGS_ADDR)?;
        mcp.fw_settings_len = mcp.read_fwstat_word(ATL_FWSTAT_SETTINGS_LEN)?;
        debug!(
            "FW settings area: {:#x}, len {:#x}",
            mcp.fw_settings_addr, mcp.fw_settings_len
        );
    }

    ops.get_link_caps(mcp)?;

    if mcp.caps_high & ATL_FW2_SET_THERMAL == 0 {
        if mcp.thermal.flags.contains(ThermalFlags::MONITOR) {
            warn!("Thermal monitoring not supported by firmware");
        }
        mcp.thermal
            .flags
            .remove(ThermalFlags::MONITOR | ThermalFlags::THROTTLE);
    } else if let Err(e) = thermal::update_thermal(mcp) {
        // The device is still usable without thermal monitoring.
        error!("Failed to apply thermal configuration: {}", e);
    }

    Ok(())
}

/// One firmware session per device. Owns the session lock and the
/// lock-free status; everything the firmware exchange touches lives
/// inside.
pub struct FwSession {
    mcp: Mutex<Mcp>,
    state: Arc<HwState>,
    wdog_period_ms: u64,
}

impl FwSession {
    /// Create a session over the given register file. Validates the
    /// thermal thresholds up front; nothing touches the hardware until
    /// [`FwSession::init`].
    pub fn new(hal: Box<dyn McpHal>, thermal: ThermalConfig) -> Result<FwSession, FwError> {
        thermal::verify_limits(&thermal)?;

        let state = Arc::new(HwState::new());
        state.set(ST_ENABLED);

        let mcp = Mcp {
            mbox: Mailbox::new(hal),
            ops: &FW_NONE,
            state: state.clone(),
            fw_rev: 0,
            fw_stat_addr: 0,
            fw_settings_addr: 0,
            fw_settings_len: 0,
            req_high: 0,
            req_high_mask: 0,
            caps_low: 0,
            caps_high: 0,
            link: LinkState::new(),
            thermal,
            wdog: WatchdogState::new(),
            wol_mode: WolMode::empty(),
            last_reported: None,
        };

        Ok(FwSession {
            mcp: Mutex::new(mcp),
            state,
            wdog_period_ms: ATL_WDOG_PERIOD_MS,
        })
    }

    pub fn set_watchdog_period(&mut self, period_ms: u64) {
        self.wdog_period_ms = period_ms;
    }

    /// Lock-free device status, shared with the worker and interrupt
    /// paths.
    pub fn state(&self) -> &HwState {
        &self.state
    }

    /// Run the firmware bring-up state machine. Called once at device
    /// init and again after every hardware reset; all negotiated state
    /// is rebuilt from the firmware each time.
    pub fn init(&self) -> Result<(), FwError> {
        let mut mcp = self.mcp.lock();
        fw_init(&mut mcp, self.wdog_period_ms)
    }

    /// Push the (possibly throttled) advertised rate set to firmware.
    /// Without `force` this is a no-op unless the effective request
    /// changed since the last issued write.
    pub fn set_link(&self, force: bool) {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        ops.set_link(&mut mcp, force);
    }

    /// Read the firmware's link result and resolve it against the
    /// catalog. Safe to call from the link-change interrupt path; the
    /// session lock is the only serialization needed.
    pub fn check_link(&self) -> Option<&'static LinkType> {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        let idx = ops.check_link(&mut mcp);
        self.publish_link(&mcp);
        idx.map(|i| &LINK_TYPES[i])
    }

    /// `check_link` plus one-shot transition logging, for the periodic
    /// worker.
    pub fn refresh_link(&self) -> Option<&'static LinkType> {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        let idx = ops.check_link(&mut mcp);
        self.publish_link(&mcp);

        if idx != mcp.last_reported {
            match idx {
                Some(i) => info!(
                    "Link is up: {} ({} Mbit/s)",
                    LINK_TYPES[i].name, LINK_TYPES[i].speed
                ),
                None => info!("Link is down"),
            }
            mcp.last_reported = idx;
        }

        idx.map(|i| &LINK_TYPES[i])
    }

    /// Reset the administrative link configuration to "everything the
    /// hardware can do".
    pub fn set_default_link(&self) {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        ops.set_default_link(&mut mcp);
    }

    /// Replace the advertised rate set (clamped to the supported set)
    /// and let change detection decide whether firmware needs a write.
    pub fn advertise(&self, rates: RateMask) {
        let mut mcp = self.mcp.lock();
        let supported = mcp.link.supported;
        mcp.link.advertised = RateMask::from_bits(rates.bits() & supported.bits());
        let ops = mcp.ops;
        ops.set_link(&mut mcp, false);
    }

    /// Bring the link up administratively and ask the worker to refresh.
    pub fn start_link(&self) {
        {
            let mut mcp = self.mcp.lock();
            mcp.link.force_off = false;
            let ops = mcp.ops;
            ops.set_link(&mut mcp, true);
        }
        self.state.set(ST_UPDATE_LINK);
    }

    /// Force the link down (low-power) and clear the resolved state.
    pub fn stop_link(&self) {
        let mut mcp = self.mcp.lock();
        mcp.link.force_off = true;
        let ops = mcp.ops;
        ops.set_link(&mut mcp, true);
        mcp.link.link = None;
        self.publish_link(&mcp);
    }

    pub fn restart_autoneg(&self) -> Result<(), FwError> {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        ops.restart_aneg(&mut mcp)
    }

    pub fn set_wol_mode(&self, mode: WolMode) {
        self.mcp.lock().wol_mode = mode;
    }

    /// Arm wake-on-LAN for the configured wake modes before a deep
    /// sleep. Leaves the firmware in its low-power link state.
    pub fn enable_wol(&self, mac: [u8; 6]) -> Result<(), FwError> {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        ops.enable_wol(&mut mcp, mac)
    }

    /// Current PHY temperature in millidegrees C.
    pub fn phy_temperature(&self) -> Result<i32, FwError> {
        let mut mcp = self.mcp.lock();
        let ops = mcp.ops;
        ops.phy_temperature(&mut mcp)
    }

    /// Validate and apply a new thermal configuration. While a reset is
    /// in progress only the stored values change; the post-reset init
    /// applies them.
    pub fn update_thermal_config(&self, cfg: ThermalConfig) -> Result<(), FwError> {
        thermal::verify_limits(&cfg)?;

        let mut mcp = self.mcp.lock();
        mcp.thermal = cfg;

        if self.state.test(ST_RESETTING) {
            return Ok(());
        }

        thermal::update_thermal(&mut mcp)
    }

    /// Toggle one thermal flag, with dependency checking and rollback
    /// on a failed firmware application.
    pub fn set_thermal_flag(&self, flag: ThermalFlag, value: bool) -> Result<(), FwError> {
        let mut mcp = self.mcp.lock();
        thermal::update_thermal_flag(&mut mcp, flag, value)
    }

    /// Periodic firmware liveness check; requests a hardware reset via
    /// [`ST_RESET_NEEDED`] when the heartbeat stalls.
    pub fn watchdog_tick(&self) {
        let mut mcp = self.mcp.lock();
        watchdog::tick(&mut mcp, self.wdog_period_ms);
    }

    /// True when the watchdog (or anyone else) has requested a full
    /// hardware reset.
    pub fn reset_needed(&self) -> bool {
        self.state.test(ST_RESET_NEEDED)
    }

    /// Consume a pending reset request. The caller owns performing the
    /// actual reset and re-running [`FwSession::init`].
    pub fn take_reset_request(&self) -> bool {
        self.state.test_and_clear(ST_RESET_NEEDED)
    }

    /// Lock-free snapshot of the resolved link speed in Mbit/s, 0 when
    /// down. May lag the negotiation by one exchange.
    pub fn link_speed_mbps(&self) -> u32 {
        self.state.link_speed_mbps()
    }

    /// Raw firmware version word, as published at bring-up.
    pub fn fw_revision(&self) -> u32 {
        self.mcp.lock().fw_rev
    }

    /// Location of the EFuse shadow pointer register for the selected
    /// generation.
    pub fn efuse_shadow_addr_reg(&self) -> u32 {
        self.mcp.lock().ops.efuse_shadow_addr_reg()
    }

    /// Copy of the negotiation state for reporting layers. Taken under
    /// the lock but trivially cheap; callers that cannot afford even
    /// that use [`HwState::link_speed_mbps`].
    pub fn link_info(&self) -> LinkInfo {
        let mcp = self.mcp.lock();
        LinkInfo {
            link: mcp.link.link_type(),
            advertised: mcp.link.advertised,
            supported: mcp.link.supported,
            lp_advertised: mcp.link.lp_advertised,
            autoneg: mcp.link.autoneg,
            eee: mcp.link.eee,
            eee_enabled: mcp.link.eee_enabled,
            fc_cur: mcp.link.fc.cur,
        }
    }

    /// The raw capability words reported by Gen2 firmware (zero on
    /// Gen1).
    pub fn capabilities(&self) -> (u32, u32) {
        let mcp = self.mcp.lock();
        (mcp.caps_low, mcp.caps_high)
    }

    /// Copy of the current thermal configuration.
    pub fn thermal_config(&self) -> ThermalConfig {
        self.mcp.lock().thermal
    }

    fn publish_link(&self, mcp: &Mcp) {
        let speed = mcp.link.link_type().map(|l| l.speed).unwrap_or(0);
        self.state.set_link_speed(speed);
    }
}

/// Snapshot of the negotiated link, as reported by [`FwSession::link_info`].
pub struct LinkInfo {
    pub link: Option<&'static LinkType>,
    pub advertised: RateMask,
    pub supported: RateMask,
    pub lp_advertised: RateMask,
    pub autoneg: bool,
    pub eee: bool,
    pub eee_enabled: bool,
    pub fc_cur: FcMode,
}
