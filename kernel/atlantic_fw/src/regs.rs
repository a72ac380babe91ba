//! Register map for the MCP (management co-processor) interface of
//! Aquantia AQtion NICs: global registers, the shared-memory mailbox
//! window, and the scratch-pad file both firmware generations use to
//! exchange link requests and results with the driver.

use bit_field::BitField;

/// Global register holding the running firmware's version word.
/// Reads as zero until the MCP has booted far enough to publish it.
pub const ATL_GLOBAL_FW_VERSION: u32 = 0x18;

/// Global register holding the firmware image id (Gen2 only).
/// Non-zero once the Gen2 firmware has finished initializing.
pub const ATL_GLOBAL_FW_IMAGE_ID: u32 = 0x1C;

/// MCP shared-memory mailbox window: command/status register.
pub const ATL_MCP_MBOX_CMD: u32 = 0x200;
/// MCP shared-memory mailbox window: word address register.
/// The address auto-increments after every completed transfer.
pub const ATL_MCP_MBOX_ADDR: u32 = 0x208;
/// MCP shared-memory mailbox window: data register.
pub const ATL_MCP_MBOX_DATA: u32 = 0x20C;

/// Kicks a mailbox window transfer when written to [`ATL_MCP_MBOX_CMD`].
pub const ATL_MCP_MBOX_START: u32 = 1 << 15;
/// Set in [`ATL_MCP_MBOX_CMD`] to make the transfer a write.
pub const ATL_MCP_MBOX_WRITE: u32 = 1 << 14;
/// Reads back as set in [`ATL_MCP_MBOX_CMD`] while a transfer is in flight.
pub const ATL_MCP_MBOX_BUSY: u32 = 1 << 8;

/// Address-space selector for mailbox writes into the firmware's
/// configuration area (sleep-proxy records, thermal thresholds).
pub const ATL_MCP_AREA_CONFIG: u32 = 0x8000_0000;
/// Address-space selector for mailbox writes into the settings area.
pub const ATL_MCP_AREA_SETTINGS: u32 = 0x2000_0000;

/// MCP scratch-pad register file. Both generations use these for the
/// link request/result exchange; which index means what differs per
/// generation.
pub const fn atl_mcp_scratch(idx: u32) -> u32 {
    0x300 + idx * 4
}

pub const ATL_MCP_SCRATCH_FW_STAT_STRUCT: u32 = atl_mcp_scratch(0x18);
pub const ATL_MCP_SCRATCH_FW1_LINK_REQ: u32 = atl_mcp_scratch(0x1A);
pub const ATL_MCP_SCRATCH_FW1_LINK_STS: u32 = atl_mcp_scratch(0x1B);
pub const ATL_MCP_SCRATCH_FW1_EFUSE_SHADOW: u32 = atl_mcp_scratch(0x1D);
pub const ATL_MCP_SCRATCH_FW2_LINK_REQ_LOW: u32 = atl_mcp_scratch(0x1A);
pub const ATL_MCP_SCRATCH_FW2_LINK_REQ_HIGH: u32 = atl_mcp_scratch(0x1B);
pub const ATL_MCP_SCRATCH_FW2_LINK_RES_LOW: u32 = atl_mcp_scratch(0x1C);
pub const ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH: u32 = atl_mcp_scratch(0x1D);
pub const ATL_MCP_SCRATCH_FW2_EFUSE_SHADOW: u32 = atl_mcp_scratch(0x05);

// Gen2 link request/result high-word option bits. The same bit positions
// appear in the request register (driver asks) and the result register
// (firmware acknowledges), so a request is confirmed by polling for the
// matching result bit.
pub const ATL_FW2_PAUSE: u32 = 1 << 3;
pub const ATL_FW2_ASYM_PAUSE: u32 = 1 << 4;
pub const ATL_FW2_PAUSE_MASK: u32 = ATL_FW2_PAUSE | ATL_FW2_ASYM_PAUSE;
pub const ATL_FW2_WAKE_ON_LINK: u32 = 1 << 16;
pub const ATL_FW2_NIC_PROXY: u32 = 1 << 17;
pub const ATL_FW2_WOL: u32 = 1 << 18;
pub const ATL_FW2_SET_THERMAL: u32 = 1 << 21;
pub const ATL_FW2_LINK_DROP: u32 = 1 << 22;
pub const ATL_FW2_PHY_TEMP: u32 = 1 << 25;
pub const ATL_FW2_RESTART_ANEG: u32 = 1 << 31;

/// Thermal alarm bit, multiplexed by Gen2 firmware into the *low* link
/// result word next to the rate bits.
pub const ATL_FW2_THERMAL_ALARM: u32 = 1 << 29;

// Offsets into the firmware status structure in MCP shared memory.
pub const ATL_FWSTAT_TRANSACTION_ID: u32 = 0x04;
pub const ATL_FWSTAT_PHY_HBEAT: u32 = 0x4C;
pub const ATL_FWSTAT_TEMP: u32 = 0x50;
pub const ATL_FWSTAT_LCAPS: u32 = 0x84;
pub const ATL_FWSTAT_SETTINGS_ADDR: u32 = 0x110;
pub const ATL_FWSTAT_SETTINGS_LEN: u32 = 0x114;

/// Byte offset of the sleep-proxy offload record inside the
/// configuration-area interface structure.
pub const ATL_FW2_OFFLOAD_OFFT: u32 = 0x58;

/// The firmware version word published in [`ATL_GLOBAL_FW_VERSION`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FwVersion(pub u32);

impl FwVersion {
    /// Major protocol generation, from the top byte.
    pub fn major(&self) -> u8 {
        self.0.get_bits(24..32) as u8
    }

    pub fn minor(&self) -> u8 {
        self.0.get_bits(16..24) as u8
    }

    pub fn build(&self) -> u16 {
        self.0.get_bits(0..16) as u16
    }
}

/// The Gen1 link status word read from `FW1_LINK_STS`.
///
/// Layout: bits `[3:0]` hold a status code which must equal 2 for the
/// rest of the word to be valid, bits `[23:16]` hold the negotiated
/// rate as Gen1 rate bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Fw1LinkStatus(pub u32);

impl Fw1LinkStatus {
    const VALID_STATUS: u32 = 2;

    pub fn valid(&self) -> bool {
        self.0.get_bits(0..4) == Self::VALID_STATUS
    }

    /// Gen1 rate-result bits, zero when the status code is invalid.
    pub fn rate_bits(&self) -> u32 {
        if self.valid() {
            self.0.get_bits(16..24)
        } else {
            0
        }
    }
}

/// The Gen1 link request word written to `FW1_LINK_REQ`: rate bits in
/// `[31:16]`, the mandatory mode code 2 in the low nibble.
pub fn fw1_link_request(rate_bits: u32) -> u32 {
    (rate_bits << 16) | 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_addresses() {
        assert_eq!(atl_mcp_scratch(0), 0x300);
        assert_eq!(ATL_MCP_SCRATCH_FW_STAT_STRUCT, 0x360);
        assert_eq!(ATL_MCP_SCRATCH_FW2_LINK_RES_HIGH, 0x374);
    }

    #[test]
    fn version_decode() {
        let v = FwVersion(0x0301_002A);
        assert_eq!(v.major(), 3);
        assert_eq!(v.minor(), 1);
        assert_eq!(v.build(), 0x2A);
    }

    #[test]
    fn fw1_status_gate() {
        // status code 2 in the low nibble makes the word valid
        let sts = Fw1LinkStatus(0x0001_0002);
        assert!(sts.valid());
        assert_eq!(sts.rate_bits(), 0x01);

        // any other status code hides the rate field
        let sts = Fw1LinkStatus(0x0001_0003);
        assert!(!sts.valid());
        assert_eq!(sts.rate_bits(), 0);
    }

    #[test]
    fn fw1_request_word() {
        assert_eq!(fw1_link_request(0x10), 0x0010_0002);
    }
}
