//! Thermal threshold configuration and the monitor/throttle state
//! machine driven by the Gen2 firmware's alarm bit.

use bitflags::bitflags;
use static_assertions::const_assert_eq;
use zerocopy::AsBytes;

use crate::fw2;
use crate::mailbox::McpArea;
use crate::regs::*;
use crate::{FwError, Mcp};

bitflags! {
    #[derive(Default)]
    pub struct ThermalFlags: u32 {
        /// Firmware-side temperature monitoring is on.
        const MONITOR = 1 << 0;
        /// Narrow the advertised rates while the alarm is raised.
        /// Requires `MONITOR`.
        const THROTTLE = 1 << 1;
        /// Accept out-of-range thresholds with a warning instead of
        /// rejecting them.
        const IGNORE_LIMITS = 1 << 2;
    }
}

/// Selector for [`crate::FwSession::set_thermal_flag`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThermalFlag {
    Monitor,
    Throttle,
    IgnoreLimits,
}

impl ThermalFlag {
    fn bit(self) -> ThermalFlags {
        match self {
            ThermalFlag::Monitor => ThermalFlags::MONITOR,
            ThermalFlag::Throttle => ThermalFlags::THROTTLE,
            ThermalFlag::IgnoreLimits => ThermalFlags::IGNORE_LIMITS,
        }
    }
}

/// Temperature thresholds (°C) pushed to the firmware, plus the monitor
/// flags. The firmware raises its alarm at `high_temp`, clears it again
/// at `normal_temp`, and hard-stops the PHY at `shutdown_temp`.
#[derive(Clone, Copy)]
pub struct ThermalConfig {
    pub shutdown_temp: u8,
    pub high_temp: u8,
    pub normal_temp: u8,
    pub flags: ThermalFlags,
}

impl Default for ThermalConfig {
    fn default() -> ThermalConfig {
        ThermalConfig {
            shutdown_temp: 108,
            high_temp: 100,
            normal_temp: 80,
            flags: ThermalFlags::MONITOR,
        }
    }
}

struct ThermalLimit {
    name: &'static str,
    min: u8,
    max: u8,
    get: fn(&ThermalConfig) -> u8,
}

static THERMAL_LIMITS: [ThermalLimit; 3] = [
    ThermalLimit { name: "Shutdown", min: 108, max: 118, get: |t| t.shutdown_temp },
    ThermalLimit { name: "High", min: 90, max: 107, get: |t| t.high_temp },
    ThermalLimit { name: "Normal", min: 50, max: 85, get: |t| t.normal_temp },
];

/// Check each threshold against its acceptable range. Violations are
/// rejected unless `IGNORE_LIMITS` is set, in which case they are only
/// warned about.
pub fn verify_limits(thermal: &ThermalConfig) -> Result<(), FwError> {
    let ignore = thermal.flags.contains(ThermalFlags::IGNORE_LIMITS);

    for lim in &THERMAL_LIMITS {
        let val = (lim.get)(thermal);

        if val >= lim.min && val <= lim.max {
            continue;
        }

        if ignore {
            warn!(
                "{} temperature threshold out of range ({} - {}): {}, allowing anyway",
                lim.name, lim.min, lim.max, val
            );
        } else {
            error!(
                "{} temperature threshold out of range ({} - {}): {}",
                lim.name, lim.min, lim.max, val
            );
            return Err(FwError::InvalidThermalConfig);
        }
    }

    Ok(())
}

/// The threshold record uploaded to the firmware's configuration area.
#[derive(AsBytes)]
#[repr(C)]
struct ThermalCfgMsg {
    msg_id: u32,
    shutdown_temp: u8,
    high_temp: u8,
    normal_temp: u8,
    _pad: u8,
}

const_assert_eq!(core::mem::size_of::<ThermalCfgMsg>(), 8);

const THERMAL_CFG_MSG_ID: u32 = 0x17;

/// Enable or disable firmware thermal monitoring, pushing the current
/// thresholds first when enabling. Each direction is a bounded polled
/// handshake on the set-thermal request/result bit.
pub(crate) fn set_thermal_monitor(mcp: &mut Mcp, enable: bool) -> Result<(), FwError> {
    if enable {
        let cfg = ThermalCfgMsg {
            msg_id: THERMAL_CFG_MSG_ID,
            shutdown_temp: mcp.thermal.shutdown_temp,
            high_temp: mcp.thermal.high_temp,
            normal_temp: mcp.thermal.normal_temp,
            _pad: 0,
        };

        if let Err(e) = mcp.mbox.write_block(0, cfg.as_bytes(), McpArea::Config) {
            error!("Failed to upload thermal thresholds to firmware: {}", e);
            return Err(e);
        }

        mcp.req_high |= ATL_FW2_SET_THERMAL;
    } else {
        mcp.req_high &= !ATL_FW2_SET_THERMAL;
    }

    mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH, mcp.req_high);
    let acked = mcp.mbox.poll(1000, 10, |m| {
        let high = m.read(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH);
        if (high & ATL_FW2_SET_THERMAL != 0) == enable {
            Some(())
        } else {
            None
        }
    });

    if acked.is_err() {
        error!("Timeout waiting for thermal monitoring FW request");
        return Err(FwError::FirmwareAckTimeout);
    }

    Ok(())
}

/// (Re)apply the configured thresholds and monitor flag. Monitoring
/// cannot be reconfigured live: changing thresholds while it is on
/// requires a disable, push, re-enable sequence.
pub(crate) fn update_thermal(mcp: &mut Mcp) -> Result<(), FwError> {
    let enable = mcp.thermal.flags.contains(ThermalFlags::MONITOR);

    if !enable || mcp.req_high & ATL_FW2_SET_THERMAL != 0 {
        set_thermal_monitor(mcp, false)?;
    }

    let mut ret = Ok(());
    if enable {
        ret = set_thermal_monitor(mcp, true);
    }

    // Thresholds might have changed, recheck state.
    let sts = mcp.mbox.read(ATL_MCP_SCRATCH_FW2_LINK_RES_LOW);
    thermal_check(mcp, sts);
    ret
}

/// Process the alarm bit from a link result word and track the lowest
/// rate the partner has offered during this link-up.
///
/// Two triggers can lead to renegotiation: the alarm toggling, and the
/// partner newly offering a rate below `throttled_to` while we are
/// already throttled with the alarm still raised. Firmware only reports
/// mutually-advertised rates, so the low-end offer made by
/// [`crate::link::link_adv`] is what lets the second trigger fire.
pub(crate) fn thermal_check(mcp: &mut Mcp, sts: u32) {
    let alarm = sts & ATL_FW2_THERMAL_ALARM != 0;
    let mut renegotiate = false;

    if mcp.link.link.is_some() {
        if let Some(lowest) = mcp.link.lp_advertised.lowest_rate() {
            if lowest < mcp.link.lp_lowest {
                mcp.link.lp_lowest = lowest;
                if lowest < mcp.link.throttled_to && mcp.link.thermal_throttled && alarm {
                    // Still throttled, and the partner just started
                    // offering an even lower rate: renegotiate down.
                    renegotiate = true;
                }
            }
        }
    } else {
        mcp.link.lp_lowest = mcp.link.supported.highest_rate().unwrap_or(0);
    }

    if !renegotiate {
        if alarm == mcp.link.thermal_throttled {
            return;
        }

        mcp.link.thermal_throttled = alarm;

        // Temperature is for the log only; failure to read it is not
        // an error here.
        let temp = match fw2::phy_temperature_locked(mcp) {
            // millidegrees to decidegrees
            Ok(t) => (t + 50) / 100,
            Err(_) => 0,
        };

        if alarm {
            if temp != 0 {
                warn!("PHY temperature above threshold: {}.{}", temp / 10, temp % 10);
            } else {
                warn!("PHY temperature above threshold");
            }
        } else if temp != 0 {
            warn!("PHY temperature back in range: {}.{}", temp / 10, temp % 10);
        } else {
            warn!("PHY temperature back in range");
        }
    }

    if mcp.thermal.flags.contains(ThermalFlags::THROTTLE) {
        // Renegotiate the link against the narrowed rate set.
        mcp.link.link = None;
        mcp.link.throttled_to = mcp.link.lp_lowest;
        fw2::set_link_locked(mcp);
    }
}

/// Change one thermal flag, enforcing the dependencies between them and
/// rolling the change back if applying it to the firmware fails.
pub(crate) fn update_thermal_flag(
    mcp: &mut Mcp,
    flag: ThermalFlag,
    val: bool,
) -> Result<(), FwError> {
    let mut flags = mcp.thermal.flags;

    match flag {
        ThermalFlag::Monitor => {
            if !val {
                // Throttling cannot outlive monitoring.
                flags.remove(ThermalFlags::THROTTLE);
            } else if mcp.caps_high & ATL_FW2_SET_THERMAL == 0 {
                error!("Thermal monitoring not supported by firmware");
                return Err(FwError::InvalidThermalConfig);
            }
        }
        ThermalFlag::Throttle => {
            if val && !flags.contains(ThermalFlags::MONITOR) {
                error!("Thermal monitoring needs to be enabled before enabling throttling");
                return Err(FwError::InvalidThermalConfig);
            }
        }
        ThermalFlag::IgnoreLimits => {}
    }

    flags.set(flag.bit(), val);

    let changed = flags ^ mcp.thermal.flags;
    mcp.thermal.flags = flags;

    if mcp.state.test(crate::ST_RESETTING) {
        // The post-reset init will apply the settings skipped here.
        return Ok(());
    }

    let mut ret = Ok(());
    if changed.contains(ThermalFlags::MONITOR) {
        ret = update_thermal(mcp);
    } else if changed.contains(ThermalFlags::THROTTLE) && mcp.link.thermal_throttled {
        fw2::set_link_locked(mcp);
    }

    if ret.is_err() {
        // Revert the flag change, the firmware never took it.
        mcp.thermal.flags ^= changed;
    }

    ret
}
