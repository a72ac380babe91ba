//! Generation-1 firmware protocol. The oldest MCP firmware: a single
//! request/status register pair, fixed capabilities, and no support for
//! autonegotiation restart, wake-on-LAN, or temperature readout.

use crate::link::{self, RateMask, LINK_TYPES};
use crate::regs::*;
use crate::{FwError, FwOps, Mcp};

pub(crate) struct Fw1;

impl FwOps for Fw1 {
    fn wait_fw_init(&self, mcp: &mut Mcp) -> Result<(), FwError> {
        mcp.mbox.udelay(10_000);

        let host_data = match mcp.mbox.poll(2000, 1000, |m| {
            let addr = m.read(ATL_MCP_SCRATCH_FW_STAT_STRUCT);
            if addr != 0 {
                Some(addr)
            } else {
                None
            }
        }) {
            Ok(polled) => polled.value,
            Err(_) => {
                error!("timeout waiting for the FW host data address");
                return Err(FwError::FirmwareInitTimeout);
            }
        };

        debug!("got hostData address: {:#x}", host_data);

        let id = mcp.mbox.read_word(host_data + ATL_FWSTAT_TRANSACTION_ID)?;

        // Gen1 publishes no explicit ready flag; a moving transaction
        // counter is the only sign the firmware started.
        let waited = mcp.mbox.poll(10000, 1000, |m| {
            match m.read_word(host_data + ATL_FWSTAT_TRANSACTION_ID) {
                Ok(new_id) if new_id != id => Some(new_id),
                _ => None,
            }
        });

        if waited.is_err() {
            error!(
                "timeout waiting for FW to start (initial transactionId {:#x}, hostData addr {:#x})",
                id, host_data
            );
            return Err(FwError::FirmwareInitTimeout);
        }

        Ok(())
    }

    fn set_link(&self, mcp: &mut Mcp, force: bool) {
        let throttle = mcp.throttle_enabled();
        if !force && !link::fw1_set_link_needed(&mut mcp.link, throttle) {
            return;
        }

        let bits = link::set_fw_bits(&mcp.link, 0, throttle) as u32;
        mcp.mbox.write(ATL_MCP_SCRATCH_FW1_LINK_REQ, fw1_link_request(bits));
    }

    fn check_link(&self, mcp: &mut Mcp) -> Option<usize> {
        let sts = Fw1LinkStatus(mcp.mbox.read(ATL_MCP_SCRATCH_FW1_LINK_STS));
        link::parse_fw_bits(&mut mcp.link, sts.rate_bits(), 0, 0)
    }

    fn get_link_caps(&self, mcp: &mut Mcp) -> Result<(), FwError> {
        // Gen1 firmware doesn't report capabilities; every catalog rate
        // is supported and none of them do EEE.
        let mut supported = RateMask::empty();
        for i in 0..LINK_TYPES.len() {
            supported.set_rate(i);
        }

        mcp.link.supported = supported;
        mcp.link.lp_lowest = supported.highest_rate().unwrap_or(0);
        Ok(())
    }

    fn restart_aneg(&self, _mcp: &mut Mcp) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn set_default_link(&self, mcp: &mut Mcp) {
        mcp.link.autoneg = true;
        mcp.link.advertised = mcp.link.supported;
        mcp.link.force_off = false;
    }

    fn enable_wol(&self, _mcp: &mut Mcp, _mac: [u8; 6]) -> Result<(), FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn phy_temperature(&self, _mcp: &mut Mcp) -> Result<i32, FwError> {
        Err(FwError::OperationNotSupported)
    }

    fn efuse_shadow_addr_reg(&self) -> u32 {
        ATL_MCP_SCRATCH_FW1_EFUSE_SHADOW
    }
}
