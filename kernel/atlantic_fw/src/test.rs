//! Scenario tests against a simulated MCP firmware.

extern crate std;

use std::boxed::Box;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use crate::link::RateMask;
use crate::mailbox::McpHal;
use crate::regs::*;
use crate::thermal::{ThermalConfig, ThermalFlag, ThermalFlags};
use crate::{FwError, FwSession, WolMode, ST_RESETTING};

const ALL_GEN2_RATES: u32 = (1 << 5) | (1 << 8) | (1 << 9) | (1 << 10) | (1 << 11);
const ALL_GEN1_RATES: u32 = 0x3B;
const STAT_ADDR: u32 = 0x6000;
const HOST_DATA: u32 = 0x7000;

struct SimState {
    regs: BTreeMap<u32, u32>,
    mem: BTreeMap<u32, u32>,
    /// Words committed through the mailbox window, keyed by full
    /// (area | offset) address.
    mem_writes: BTreeMap<u32, u32>,
    mbox_addr: u32,
    last_data: u32,
    /// Version word answered at `ATL_GLOBAL_FW_VERSION`.
    version: u32,
    image_id: u32,
    gen2: bool,
    /// Bits of a link request the simulated partner also advertises.
    partner_rates: u32,
    alarm: bool,
    /// Request-high bits the firmware mirrors into the result register.
    mirror_high_mask: u32,
    /// When set, every mailbox window transfer stays busy forever.
    stuck: bool,
    /// Bump the transaction id after every read of it (Gen1 startup).
    txn_advance: bool,
    now_us: u64,
    read_log: Vec<u32>,
    req_low_writes: Vec<u32>,
    req_high_writes: Vec<u32>,
}

impl SimState {
    fn refresh_link_result(&mut self) {
        let req = *self.regs.get(&ATL_MCP_SCRATCH_FW2_LINK_REQ_LOW).unwrap_or(&0);
        let mut res = req & self.partner_rates;
        if self.alarm {
            res |= ATL_FW2_THERMAL_ALARM;
        }
        self.regs.insert(ATL_MCP_SCRATCH_FW2_LINK_RES_LOW, res);
    }
}

#[derive(Clone)]
struct FwSim(Arc<Mutex<SimState>>);

impl FwSim {
    fn new(version: u32) -> FwSim {
        FwSim(Arc::new(Mutex::new(SimState {
            regs: BTreeMap::new(),
            mem: BTreeMap::new(),
            mem_writes: BTreeMap::new(),
            mbox_addr: 0,
            last_data: 0,
            version,
            image_id: 0,
            gen2: false,
            partner_rates: ALL_GEN2_RATES,
            alarm: false,
            mirror_high_mask: 0,
            stuck: false,
            txn_advance: false,
            now_us: 0,
            read_log: Vec::new(),
            req_low_writes: Vec::new(),
            req_high_writes: Vec::new(),
        })))
    }

    /// A Gen2 firmware with all rates supported, thermal thresholds
    /// accepted, and temperature readout working.
    fn gen2() -> FwSim {
        let sim = FwSim::new(0x0200_0001);
        {
            let mut st = sim.0.lock().unwrap();
            st.gen2 = true;
            st.image_id = 0x1234_5678;
            st.regs.insert(ATL_MCP_SCRATCH_FW_STAT_STRUCT, STAT_ADDR);
            st.mem.insert(STAT_ADDR + ATL_FWSTAT_LCAPS, ALL_GEN2_RATES);
            st.mem.insert(STAT_ADDR + ATL_FWSTAT_LCAPS + 4, ATL_FW2_SET_THERMAL);
            st.mem.insert(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 1);
            st.mem.insert(STAT_ADDR + ATL_FWSTAT_TEMP, 6400);
            st.mirror_high_mask = ATL_FW2_SET_THERMAL
                | ATL_FW2_PHY_TEMP
                | ATL_FW2_PAUSE_MASK
                | ATL_FW2_WAKE_ON_LINK
                | ATL_FW2_NIC_PROXY
                | ATL_FW2_WOL;
        }
        sim
    }

    /// A Gen1 firmware: host-data pointer present, transaction counter
    /// advancing.
    fn gen1() -> FwSim {
        let sim = FwSim::new(0x0100_0001);
        {
            let mut st = sim.0.lock().unwrap();
            st.regs.insert(ATL_MCP_SCRATCH_FW_STAT_STRUCT, HOST_DATA);
            st.mem.insert(HOST_DATA + ATL_FWSTAT_TRANSACTION_ID, 0x11);
            st.mem.insert(HOST_DATA + ATL_FWSTAT_PHY_HBEAT, 1);
            st.txn_advance = true;
        }
        sim
    }

    fn set_reg(&self, reg: u32, val: u32) {
        self.0.lock().unwrap().regs.insert(reg, val);
    }

    fn set_mem(&self, addr: u32, val: u32) {
        self.0.lock().unwrap().mem.insert(addr, val);
    }

    fn set_alarm(&self, alarm: bool) {
        let mut st = self.0.lock().unwrap();
        st.alarm = alarm;
        st.refresh_link_result();
    }

    fn set_partner(&self, rates: u32) {
        let mut st = self.0.lock().unwrap();
        st.partner_rates = rates;
        st.refresh_link_result();
    }

    fn set_mirror_high(&self, mask: u32) {
        self.0.lock().unwrap().mirror_high_mask = mask;
    }

    fn set_stuck(&self, stuck: bool) {
        self.0.lock().unwrap().stuck = stuck;
    }

    fn advance_ms(&self, ms: u64) {
        self.0.lock().unwrap().now_us += ms * 1000;
    }

    fn read_log(&self) -> Vec<u32> {
        self.0.lock().unwrap().read_log.clone()
    }

    fn req_low_writes(&self) -> Vec<u32> {
        self.0.lock().unwrap().req_low_writes.clone()
    }

    fn req_high_writes(&self) -> Vec<u32> {
        self.0.lock().unwrap().req_high_writes.clone()
    }

    /// A word previously committed through the window into `area`.
    fn cfg_word(&self, offset: u32) -> Option<u32> {
        self.0
            .lock()
            .unwrap()
            .mem_writes
            .get(&(ATL_MCP_AREA_CONFIG | offset))
            .copied()
    }
}

impl McpHal for FwSim {
    fn read_reg(&self, reg: u32) -> u32 {
        let mut st = self.0.lock().unwrap();
        st.read_log.push(reg);
        match reg {
            ATL_GLOBAL_FW_VERSION => st.version,
            ATL_GLOBAL_FW_IMAGE_ID => st.image_id,
            ATL_MCP_MBOX_CMD => {
                if st.stuck {
                    ATL_MCP_MBOX_BUSY
                } else {
                    0
                }
            }
            ATL_MCP_MBOX_DATA => {
                let addr = st.mbox_addr;
                let word = *st.mem.get(&addr).unwrap_or(&0);
                if st.txn_advance && addr == HOST_DATA + ATL_FWSTAT_TRANSACTION_ID {
                    st.mem.insert(addr, word.wrapping_add(1));
                }
                st.mbox_addr += 4;
                word
            }
            _ => *st.regs.get(&reg).unwrap_or(&0),
        }
    }

    fn write_reg(&self, reg: u32, val: u32) {
        let mut st = self.0.lock().unwrap();
        match reg {
            ATL_MCP_MBOX_ADDR => st.mbox_addr = val,
            ATL_MCP_MBOX_DATA => st.last_data = val,
            ATL_MCP_MBOX_CMD => {
                if val & ATL_MCP_MBOX_WRITE != 0 && !st.stuck {
                    let addr = st.mbox_addr;
                    let data = st.last_data;
                    st.mem_writes.insert(addr, data);
                    st.mbox_addr += 4;
                }
            }
            ATL_MCP_SCRATCH_FW2_LINK_REQ_LOW => {
                st.regs.insert(reg, val);
                st.req_low_writes.push(val);
                if st.gen2 {
                    st.refresh_link_result();
                }
            }
            ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH => {
                st.regs.insert(reg, val);
                st.req_high_writes.push(val);
                if st.gen2 {
                    let mirrored = val & st.mirror_high_mask;
                    st.regs.insert(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH, mirrored);
                }
            }
            _ => {
                st.regs.insert(reg, val);
            }
        }
    }

    fn udelay(&self, us: u32) {
        self.0.lock().unwrap().now_us += us as u64;
    }

    fn now_ms(&self) -> u64 {
        self.0.lock().unwrap().now_us / 1000
    }
}

fn session(sim: &FwSim) -> FwSession {
    FwSession::new(Box::new(sim.clone()), ThermalConfig::default()).unwrap()
}

fn session_with(sim: &FwSim, cfg: ThermalConfig) -> FwSession {
    FwSession::new(Box::new(sim.clone()), cfg).unwrap()
}

#[test]
fn gen2_bringup_reads_caps_and_pushes_thermal() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    assert_eq!(s.fw_revision(), 0x0200_0001);
    assert_eq!(s.link_info().supported.bits(), 0b11111);

    // default thresholds uploaded as a single config-area record
    assert_eq!(sim.cfg_word(0), Some(0x17));
    assert_eq!(sim.cfg_word(4), Some(108 | (100 << 8) | (80 << 16)));

    // monitoring armed and acknowledged
    let high = sim.req_high_writes();
    assert!(high.last().unwrap() & ATL_FW2_SET_THERMAL != 0);
    assert!(s.thermal_config().flags.contains(ThermalFlags::MONITOR));
}

#[test]
fn eee_capable_rates_join_supported_plane() {
    let sim = FwSim::gen2();
    sim.set_mem(
        STAT_ADDR + ATL_FWSTAT_LCAPS + 4,
        ATL_FW2_SET_THERMAL | (1 << 11),
    );
    let s = session(&sim);
    s.init().unwrap();

    let info = s.link_info();
    assert!(info.supported.rate(4));
    assert!(info.supported.eee(4));
    assert!(!info.supported.eee(3));

    // advertising the EEE-capable rate puts its companion bit into the
    // high request word
    s.set_default_link();
    s.set_link(true);
    let high = sim.req_high_writes();
    assert!(high.last().unwrap() & (1 << 11) != 0);
}

#[test]
fn unsupported_major_fails_before_any_other_access() {
    let sim = FwSim::new(0x0400_0001);
    let s = session(&sim);

    assert_eq!(s.init(), Err(FwError::UnsupportedFirmware(4)));
    assert!(sim.read_log().iter().all(|&r| r == ATL_GLOBAL_FW_VERSION));
}

#[test]
fn zero_major_is_rejected() {
    let sim = FwSim::new(0x0012_3456);
    let s = session(&sim);
    assert_eq!(s.init(), Err(FwError::UnsupportedFirmware(0)));
}

#[test]
fn major_three_folds_to_gen2() {
    let sim = FwSim::gen2();
    sim.0.lock().unwrap().version = 0x0300_0001;
    let s = session(&sim);
    s.init().unwrap();

    // a Gen2-only operation succeeds
    assert_eq!(s.phy_temperature(), Ok(25000));
}

#[test]
fn version_poll_timeout() {
    let sim = FwSim::new(0);
    let s = session(&sim);
    assert_eq!(s.init(), Err(FwError::Timeout));
}

#[test]
fn gen2_image_id_timeout() {
    let sim = FwSim::gen2();
    sim.0.lock().unwrap().image_id = 0;
    let s = session(&sim);
    assert_eq!(s.init(), Err(FwError::FirmwareInitTimeout));
}

#[test]
fn gen1_bringup_and_unsupported_ops() {
    let sim = FwSim::gen1();
    let s = session(&sim);
    s.init().unwrap();

    assert_eq!(s.link_info().supported.bits(), 0b11111);
    assert_eq!(s.restart_autoneg(), Err(FwError::OperationNotSupported));
    assert_eq!(s.phy_temperature(), Err(FwError::OperationNotSupported));
    s.set_wol_mode(WolMode::MAGIC);
    assert_eq!(s.enable_wol([0; 6]), Err(FwError::OperationNotSupported));
    assert_eq!(s.efuse_shadow_addr_reg(), ATL_MCP_SCRATCH_FW1_EFUSE_SHADOW);
}

#[test]
fn gen1_link_request_and_status_gate() {
    let sim = FwSim::gen1();
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);
    // all Gen1 rate bits, shifted up, with the mode code in the low
    // nibble
    assert_eq!(
        sim.req_low_writes().last().copied(),
        Some((ALL_GEN1_RATES << 16) | 2)
    );

    // firmware negotiated 10GBaseT-FD
    sim.set_reg(ATL_MCP_SCRATCH_FW1_LINK_STS, (0x01 << 16) | 2);
    let link = s.check_link().unwrap();
    assert_eq!(link.name, "10GBaseT-FD");
    assert_eq!(s.state().link_speed_mbps(), 10000);

    // a bad status nibble invalidates the whole word
    sim.set_reg(ATL_MCP_SCRATCH_FW1_LINK_STS, (0x01 << 16) | 3);
    assert!(s.check_link().is_none());
    assert_eq!(s.state().link_speed_mbps(), 0);
}

#[test]
fn default_link_round_trip_resolves_fastest() {
    let sim = FwSim::gen2();
    // keep the firmware from echoing pause bits so the negotiated flow
    // control stays empty
    sim.set_mirror_high(ATL_FW2_SET_THERMAL | ATL_FW2_PHY_TEMP);
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);

    let link = s.check_link().unwrap();
    assert_eq!(link.name, "10GBaseT-FD");
    assert_eq!(link.speed, 10000);

    let info = s.link_info();
    assert!(!info.eee);
    assert!(info.fc_cur.is_empty());
    assert_eq!(s.state().link_speed_mbps(), 10000);
}

#[test]
fn set_link_skips_write_when_nothing_changed() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(false);
    let writes = sim.req_low_writes().len();
    assert!(writes > 0);

    // same advertised set, same flow control: no new transaction
    s.set_link(false);
    assert_eq!(sim.req_low_writes().len(), writes);

    // narrowing the advertised set does write
    s.advertise(RateMask::from_bits(0b00001));
    assert_eq!(sim.req_low_writes().len(), writes + 1);
    assert_eq!(sim.req_low_writes().last().copied(), Some(1 << 5));

    // and repeating it doesn't
    s.advertise(RateMask::from_bits(0b00001));
    assert_eq!(sim.req_low_writes().len(), writes + 1);
}

#[test]
fn gen2_preserves_masked_bits_and_drops_link_when_empty() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);
    // the set-thermal request survives link rewrites verbatim
    let high = sim.req_high_writes().last().copied().unwrap();
    assert!(high & ATL_FW2_SET_THERMAL != 0);
    // full flow control encodes as the pause bit alone
    assert!(high & ATL_FW2_PAUSE != 0);
    assert!(high & ATL_FW2_ASYM_PAUSE == 0);

    s.stop_link();
    assert_eq!(sim.req_low_writes().last().copied(), Some(0));
    let high = sim.req_high_writes().last().copied().unwrap();
    assert!(high & ATL_FW2_LINK_DROP != 0);
    assert!(high & ATL_FW2_SET_THERMAL != 0);
    assert_eq!(s.state().link_speed_mbps(), 0);
}

#[test]
fn wol_uploads_offloads_and_waits_for_ack() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    s.set_wol_mode(WolMode::PHY | WolMode::MAGIC);
    let mac = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];
    s.enable_wol(mac).unwrap();

    // sleep-proxy record: version, length, MAC
    assert_eq!(sim.cfg_word(ATL_FW2_OFFLOAD_OFFT), Some(0));
    assert_eq!(sim.cfg_word(ATL_FW2_OFFLOAD_OFFT + 4), Some(16));
    assert_eq!(
        sim.cfg_word(ATL_FW2_OFFLOAD_OFFT + 8),
        Some(u32::from_le_bytes([0x02, 0x11, 0x22, 0x33]))
    );
    assert_eq!(
        sim.cfg_word(ATL_FW2_OFFLOAD_OFFT + 12),
        Some(u32::from_le_bytes([0x44, 0x55, 0, 0]))
    );

    let high = sim.req_high_writes().last().copied().unwrap();
    assert_eq!(
        high,
        ATL_FW2_WAKE_ON_LINK | ATL_FW2_NIC_PROXY | ATL_FW2_WOL
    );
    assert_eq!(sim.req_low_writes().last().copied(), Some(0));
}

#[test]
fn wol_ack_timeout_leaves_session_usable() {
    let sim = FwSim::gen2();
    sim.set_mirror_high(ATL_FW2_SET_THERMAL | ATL_FW2_PHY_TEMP);
    let s = session(&sim);
    s.init().unwrap();

    s.set_wol_mode(WolMode::MAGIC);
    assert_eq!(s.enable_wol([0; 6]), Err(FwError::Timeout));

    // the session is still operational afterwards
    s.set_default_link();
    s.set_link(true);
    assert!(s.check_link().is_some());
}

#[test]
fn phy_temperature_is_scaled_to_millidegrees() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    // 6400/256 = 25 degrees
    assert_eq!(s.phy_temperature(), Ok(25000));
}

#[test]
fn restart_aneg_sets_self_clearing_bit() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    s.restart_autoneg().unwrap();
    let high = sim.req_high_writes().last().copied().unwrap();
    assert!(high & ATL_FW2_RESTART_ANEG != 0);
}

#[test]
fn thermal_flag_dependencies() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    // monitor is on from init, so throttling may be enabled
    s.set_thermal_flag(ThermalFlag::Throttle, true).unwrap();
    assert!(s.thermal_config().flags.contains(ThermalFlags::THROTTLE));

    // disabling the monitor takes throttling down with it
    s.set_thermal_flag(ThermalFlag::Monitor, false).unwrap();
    let flags = s.thermal_config().flags;
    assert!(!flags.contains(ThermalFlags::MONITOR));
    assert!(!flags.contains(ThermalFlags::THROTTLE));

    // and throttling alone is rejected
    assert_eq!(
        s.set_thermal_flag(ThermalFlag::Throttle, true),
        Err(FwError::InvalidThermalConfig)
    );
}

#[test]
fn monitor_requires_firmware_support() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_LCAPS + 4, 0);
    let s = session(&sim);
    s.init().unwrap();

    // init forced the flags off after the capability probe
    assert!(!s.thermal_config().flags.contains(ThermalFlags::MONITOR));
    assert_eq!(
        s.set_thermal_flag(ThermalFlag::Monitor, true),
        Err(FwError::InvalidThermalConfig)
    );
}

#[test]
fn failed_thermal_apply_rolls_flags_back() {
    let sim = FwSim::gen2();
    // firmware supports thermal but never acknowledges the request
    sim.set_mirror_high(ATL_FW2_PHY_TEMP);
    let cfg = ThermalConfig { flags: ThermalFlags::empty(), ..ThermalConfig::default() };
    let s = session_with(&sim, cfg);
    s.init().unwrap();

    assert_eq!(
        s.set_thermal_flag(ThermalFlag::Monitor, true),
        Err(FwError::FirmwareAckTimeout)
    );
    assert!(s.thermal_config().flags.is_empty());
}

#[test]
fn threshold_update_requires_disable_first() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    let before = sim.req_high_writes().len();
    let cfg = ThermalConfig { high_temp: 95, ..ThermalConfig::default() };
    s.update_thermal_config(cfg).unwrap();

    // monitoring was live, so the update is disable, push, re-enable
    let writes = sim.req_high_writes();
    let new = &writes[before..];
    assert!(new.len() >= 2);
    assert!(new[0] & ATL_FW2_SET_THERMAL == 0);
    assert!(new.last().unwrap() & ATL_FW2_SET_THERMAL != 0);

    // and the new threshold record was uploaded
    assert_eq!(sim.cfg_word(4), Some(108 | (95 << 8) | (80 << 16)));
}

#[test]
fn bad_thresholds_rejected_at_session_creation() {
    let sim = FwSim::gen2();
    let cfg = ThermalConfig { shutdown_temp: 130, ..ThermalConfig::default() };
    assert!(matches!(
        FwSession::new(Box::new(sim.clone()), cfg),
        Err(FwError::InvalidThermalConfig)
    ));

    // the override flag downgrades the violation to a warning
    let cfg = ThermalConfig {
        shutdown_temp: 130,
        flags: ThermalFlags::MONITOR | ThermalFlags::IGNORE_LIMITS,
        ..ThermalConfig::default()
    };
    assert!(FwSession::new(Box::new(sim.clone()), cfg).is_ok());
}

#[test]
fn thermal_throttle_follows_partner_down() {
    let sim = FwSim::gen2();
    let cfg = ThermalConfig {
        flags: ThermalFlags::MONITOR | ThermalFlags::THROTTLE,
        ..ThermalConfig::default()
    };
    let s = session_with(&sim, cfg);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);

    // partner advertises 2.5G and up; link settles at 10G
    sim.set_partner((1 << 9) | (1 << 10) | (1 << 11));
    let link = s.check_link().unwrap();
    assert_eq!(link.name, "10GBaseT-FD");

    // thermal alarm: the driver throttles to the lowest partner rate
    // and renegotiates with the whole low end advertised
    sim.set_alarm(true);
    assert!(s.check_link().is_none());
    assert_eq!(
        sim.req_low_writes().last().copied(),
        Some((1 << 5) | (1 << 8) | (1 << 9))
    );

    // the partner narrows below the throttle floor; the driver notices
    // and follows it down
    sim.set_partner((1 << 8) | (1 << 9));
    assert!(s.check_link().is_none());
    assert_eq!(
        sim.req_low_writes().last().copied(),
        Some((1 << 5) | (1 << 8))
    );

    // alarm clears: full advertisement is restored and the link comes
    // back at the partner's best rate
    sim.set_alarm(false);
    assert!(s.check_link().is_none());
    assert_eq!(sim.req_low_writes().last().copied(), Some(ALL_GEN2_RATES));
    let link = s.check_link().unwrap();
    assert_eq!(link.name, "2.5GBaseT-FD");
}

#[test]
fn throttle_disabled_keeps_advertisement() {
    let sim = FwSim::gen2();
    // monitor only, no throttling
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);
    let writes = sim.req_low_writes().len();

    sim.set_alarm(true);
    // the link survives and no renegotiation is issued
    assert!(s.check_link().is_some());
    assert_eq!(sim.req_low_writes().len(), writes);
}

#[test]
fn watchdog_self_disables_on_unprovisioned_heartbeat() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 0);
    let s = session(&sim);
    s.init().unwrap();

    sim.advance_ms(3000);
    s.watchdog_tick();
    assert!(!s.reset_needed());

    // even a later stall never triggers a reset
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 5);
    sim.advance_ms(2000);
    s.watchdog_tick();
    sim.advance_ms(2000);
    s.watchdog_tick();
    assert!(!s.reset_needed());
}

#[test]
fn watchdog_requests_reset_on_stall() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 5);
    let s = session(&sim);
    s.init().unwrap();

    sim.advance_ms(3000);
    s.watchdog_tick();
    assert!(s.reset_needed());
    assert!(s.take_reset_request());
    assert!(!s.reset_needed());
}

#[test]
fn watchdog_tracks_progress() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 5);
    let s = session(&sim);
    s.init().unwrap();

    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 6);
    sim.advance_ms(3000);
    s.watchdog_tick();
    assert!(!s.reset_needed());

    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 7);
    sim.advance_ms(2000);
    s.watchdog_tick();
    assert!(!s.reset_needed());

    // stored value did follow along: a repeat of 7 is a stall
    sim.advance_ms(2000);
    s.watchdog_tick();
    assert!(s.reset_needed());
}

#[test]
fn watchdog_skips_while_resetting_or_not_due() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 5);
    let s = session(&sim);
    s.init().unwrap();

    // not due yet
    s.watchdog_tick();
    assert!(!s.reset_needed());

    // due, but a reset is in flight
    sim.advance_ms(3000);
    s.state().set(ST_RESETTING);
    s.watchdog_tick();
    assert!(!s.reset_needed());
    s.state().clear(ST_RESETTING);

    // once the reset clears the stall is caught
    s.watchdog_tick();
    assert!(s.reset_needed());
}

#[test]
fn watchdog_retries_after_read_failure() {
    let sim = FwSim::gen2();
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 5);
    let s = session(&sim);
    s.init().unwrap();

    sim.set_stuck(true);
    sim.advance_ms(3000);
    s.watchdog_tick();
    assert!(!s.reset_needed());

    // transport recovers, counter advanced: still healthy
    sim.set_stuck(false);
    sim.set_mem(STAT_ADDR + ATL_FWSTAT_PHY_HBEAT, 6);
    sim.advance_ms(2000);
    s.watchdog_tick();
    assert!(!s.reset_needed());
}

#[test]
fn refresh_link_reports_transitions() {
    let sim = FwSim::gen2();
    let s = session(&sim);
    s.init().unwrap();

    s.set_default_link();
    s.set_link(true);
    assert!(s.refresh_link().is_some());

    sim.set_partner(0);
    s.set_link(true);
    assert!(s.refresh_link().is_none());
    assert_eq!(s.state().link_speed_mbps(), 0);
}
