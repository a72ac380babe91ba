//! Firmware liveness watchdog. The firmware increments a PHY-management
//! heartbeat counter in its status structure; if the counter stops
//! moving for a full period the MCP is considered hung and a full
//! hardware reset is requested.

use crate::regs::ATL_FWSTAT_PHY_HBEAT;
use crate::{FwError, Mcp, ST_ENABLED, ST_RESETTING, ST_RESET_NEEDED};

/// Default watchdog period in milliseconds.
pub const ATL_WDOG_PERIOD_MS: u64 = 1100;

pub struct WatchdogState {
    /// Heartbeat value seen on the previous tick.
    pub(crate) hbeat: u16,
    /// Next deadline, in HAL monotonic milliseconds.
    pub(crate) next_due: u64,
    /// Set once when the firmware clearly doesn't provision the counter.
    pub(crate) disabled: bool,
}

impl WatchdogState {
    pub(crate) fn new() -> WatchdogState {
        WatchdogState { hbeat: 0, next_due: 0, disabled: false }
    }
}

pub(crate) fn get_hbeat(mcp: &Mcp) -> Result<u16, FwError> {
    let val = mcp.read_fwstat_word(ATL_FWSTAT_PHY_HBEAT)?;
    Ok(val as u16)
}

/// One watchdog check. Runs from the periodic maintenance tick; skipped
/// while a reset is pending or the device is down, and permanently
/// skipped once self-disabled.
pub(crate) fn tick(mcp: &mut Mcp, period_ms: u64) {
    let now = mcp.mbox.now_ms();

    if mcp.wdog.disabled || now < mcp.wdog.next_due {
        return;
    }

    if mcp.state.test(ST_RESETTING) || !mcp.state.test(ST_ENABLED) {
        return;
    }

    let hbeat = match get_hbeat(mcp) {
        Ok(hbeat) => hbeat,
        Err(e) => {
            // Not escalated; the next tick retries.
            error!("FW watchdog: failure reading PHY heartbeat: {}", e);
            mcp.wdog.next_due = now + period_ms;
            return;
        }
    };

    if hbeat == 0 && mcp.wdog.hbeat == 0 {
        warn!("FW heartbeat stuck at 0, probably not provisioned. Disabling watchdog.");
        mcp.wdog.disabled = true;
        mcp.wdog.next_due = now + period_ms;
        return;
    }

    if hbeat == mcp.wdog.hbeat {
        error!(
            "FW watchdog: FW hang (PHY heartbeat stuck at {}), resetting",
            hbeat
        );
        mcp.state.set(ST_RESET_NEEDED);
    }

    mcp.wdog.hbeat = hbeat;
    mcp.wdog.next_due = now + period_ms;
}
