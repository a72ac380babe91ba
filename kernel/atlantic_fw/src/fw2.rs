//! Generation-2 firmware protocol: split low/high request and result
//! words, firmware-reported capabilities, EEE, flow control, thermal
//! alarms, wake-on-LAN, and PHY temperature readout.

use alloc::vec;
use core::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;

use crate::link::{self, FcMode, RateMask, LINK_TYPES};
use crate::mailbox::McpArea;
use crate::regs::*;
use crate::thermal;
use crate::{FwError, FwOps, Mcp, WolMode, ST_RESETTING};

pub(crate) struct Fw2;

/// Compose and issue the Gen2 link request. Bits covered by
/// `req_high_mask` are carried over verbatim from the last exchange;
/// pause bits are rebuilt from the flow-control request, and the EEE
/// companion plane comes in through the high half of the rate pattern.
pub(crate) fn set_link_locked(mcp: &mut Mcp) {
    let mut hi_bits = mcp.req_high & mcp.req_high_mask;

    if mcp.link.fc.req.contains(FcMode::RX) {
        hi_bits |= ATL_FW2_PAUSE | ATL_FW2_ASYM_PAUSE;
    }
    if mcp.link.fc.req.contains(FcMode::TX) {
        hi_bits ^= ATL_FW2_ASYM_PAUSE;
    }

    let bits = link::set_fw_bits(&mcp.link, 1, mcp.throttle_enabled());

    if bits == 0 {
        // If no modes are advertised, put the PHY into low-power.
        hi_bits |= ATL_FW2_LINK_DROP;
    } else {
        hi_bits |= (bits >> 32) as u32;
    }

    mcp.req_high = hi_bits;
    mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_LOW, bits as u32);
    mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH, hi_bits);
}

/// Read the PHY temperature in millidegrees C by toggling the
/// temperature request bit and waiting for the firmware to mirror it.
pub(crate) fn phy_temperature_locked(mcp: &mut Mcp) -> Result<i32, FwError> {
    if mcp.state.test(ST_RESETTING) {
        return Ok(0);
    }

    mcp.req_high ^= ATL_FW2_PHY_TEMP;
    let req = mcp.req_high;
    mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH, req);

    let mirrored = mcp.mbox.poll(1000, 10, |m| {
        let res = m.read(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH);
        if (res ^ req) & ATL_FW2_PHY_TEMP == 0 {
            Some(())
        } else {
            None
        }
    });

    if mirrored.is_err() {
        error!("Timeout waiting for PHY temperature");
        return Err(FwError::Timeout);
    }

    let val = mcp.read_fwstat_word(ATL_FWSTAT_TEMP)?;

    // The status word holds the temperature in 1/256ths of a degree.
    Ok(((val & 0xffff) * 1000 / 256) as i32)
}

/// The sleep-proxy offload record uploaded for magic-packet wake.
#[derive(AsBytes)]
#[repr(C)]
struct OffloadInfo {
    version: u32,
    len: u32,
    mac_addr: [u8; 6],
    _pad: [u8; 2],
}

const_assert_eq!(size_of::<OffloadInfo>(), 16);

impl FwOps for Fw2 {
    fn wait_fw_init(&self, mcp: &mut Mcp) -> Result<(), FwError> {
        let ready = mcp.mbox.poll(1000, 1000, |m| {
            let reg = m.read(ATL_GLOBAL_FW_IMAGE_ID);
            if reg != 0 {
                Some(reg)
            } else {
                None
            }
        });

        match ready {
            Ok(_) => Ok(()),
            Err(_) => {
                error!("timeout waiting for the FW image id");
                Err(FwError::FirmwareInitTimeout)
            }
        }
    }

    fn set_link(&self, mcp: &mut Mcp, force: bool) {
        let throttle = mcp.throttle_enabled();
        if !force && !link::fw2_set_link_needed(&mut mcp.link, throttle) {
            return;
        }

        set_link_locked(mcp);
    }

    fn check_link(&self, mcp: &mut Mcp) -> Option<usize> {
        let low = mcp.mbox.read(ATL_MCP_SCRATCH_FW2_LINK_RES_LOW);
        let high = mcp.mbox.read(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH);

        link::parse_fw_bits(&mut mcp.link, low, high, 1);

        // The alarm bit shares the low result word with the rate bits.
        thermal::thermal_check(mcp, low);

        // Thermal check might have reset the link due to throttling.
        let link = mcp.link.link;

        let mut fc = FcMode::empty();
        if link.is_some() {
            if high & ATL_FW2_PAUSE != 0 {
                fc |= FcMode::RX;
            }
            if high & ATL_FW2_ASYM_PAUSE != 0 {
                fc |= FcMode::TX;
            }
        }
        mcp.link.fc.cur = fc;

        link
    }

    fn get_link_caps(&self, mcp: &mut Mcp) -> Result<(), FwError> {
        debug!("Host data struct addr: {:#x}", mcp.fw_stat_addr);

        let mut caps = [0u32; 2];
        mcp.mbox
            .read_block(mcp.fw_stat_addr + ATL_FWSTAT_LCAPS, &mut caps)?;

        mcp.caps_low = caps[0];
        mcp.caps_high = caps[1];
        debug!("Got link caps: {:#x} {:#x}", caps[0], caps[1]);

        let mut supported = RateMask::empty();
        let mut mask = ATL_FW2_PAUSE_MASK | ATL_FW2_LINK_DROP;

        for (i, rate) in LINK_TYPES.iter().enumerate() {
            let bit = rate.fw_bits[1];

            if bit & caps[0] != 0 {
                supported.set_rate(i);
                if bit & caps[1] != 0 {
                    supported.set_eee(i);
                    mask |= bit;
                }
            }
        }

        mcp.req_high_mask = !mask;
        mcp.link.supported = supported;
        mcp.link.lp_lowest = supported.highest_rate().unwrap_or(0);

        Ok(())
    }

    fn restart_aneg(&self, mcp: &mut Mcp) -> Result<(), FwError> {
        // The restart bit is self-clearing, so it is not tracked via
        // req_high.
        mcp.mbox
            .set_bits(ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH, ATL_FW2_RESTART_ANEG);
        Ok(())
    }

    fn set_default_link(&self, mcp: &mut Mcp) {
        mcp.link.autoneg = true;
        mcp.link.advertised = mcp.link.supported;
        mcp.link.force_off = false;
        mcp.link.fc.req = FcMode::FULL;
        mcp.link.eee_enabled = true;
    }

    fn enable_wol(&self, mcp: &mut Mcp, mac: [u8; 6]) -> Result<(), FwError> {
        let mut wol_bits = 0;

        if mcp.wol_mode.contains(WolMode::PHY) {
            wol_bits |= ATL_FW2_WAKE_ON_LINK;
        }

        if mcp.wol_mode.contains(WolMode::MAGIC) {
            wol_bits |= ATL_FW2_NIC_PROXY | ATL_FW2_WOL;

            let info = OffloadInfo {
                version: 0,
                len: size_of::<OffloadInfo>() as u32,
                mac_addr: mac,
                _pad: [0; 2],
            };

            let mut msg = vec![0u8; ATL_FW2_OFFLOAD_OFFT as usize + size_of::<OffloadInfo>()];
            msg[ATL_FW2_OFFLOAD_OFFT as usize..].copy_from_slice(info.as_bytes());

            if let Err(e) = mcp.mbox.write_block(0, &msg, McpArea::Config) {
                error!("Failed to upload sleep proxy info to FW");
                return Err(e);
            }
        }

        mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_LOW, 0);
        mcp.mbox.write(ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH, wol_bits);

        let acked = mcp.mbox.poll(100, 1000, |m| {
            let val = m.read(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH);
            if val & wol_bits == wol_bits {
                Some(())
            } else {
                None
            }
        });

        match acked {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Timeout waiting for WoL enable");
                Err(e)
            }
        }
    }

    fn phy_temperature(&self, mcp: &mut Mcp) -> Result<i32, FwError> {
        phy_temperature_locked(mcp)
    }

    fn efuse_shadow_addr_reg(&self) -> u32 {
        ATL_MCP_SCRATCH_FW2_EFUSE_SHADOW
    }
}
