//! Word-granular transport to the MCP: raw register access, the shared
//! memory mailbox window, and the bounded busy-poll primitive every
//! firmware handshake is built on.

use alloc::boxed::Box;

use crate::regs::*;
use crate::FwError;

/// Platform services the firmware core needs from its host environment:
/// access to the device's BAR0 register file, a busy-wait delay, and a
/// monotonic millisecond clock for watchdog deadlines.
///
/// On real hardware this wraps a mapped PCI BAR; tests implement it with
/// a simulated firmware.
pub trait McpHal: Send {
    fn read_reg(&self, reg: u32) -> u32;
    fn write_reg(&self, reg: u32, val: u32);
    /// Busy-wait for `us` microseconds.
    fn udelay(&self, us: u32);
    /// Monotonic milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;
}

/// Destination address space for mailbox-window writes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum McpArea {
    /// Firmware configuration area (thermal thresholds, sleep proxy).
    Config,
    /// Firmware settings area.
    Settings,
}

impl McpArea {
    fn base(self) -> u32 {
        match self {
            McpArea::Config => ATL_MCP_AREA_CONFIG,
            McpArea::Settings => ATL_MCP_AREA_SETTINGS,
        }
    }
}

/// Successful outcome of [`Mailbox::poll`]: the value the stop condition
/// produced and how many attempts it took to get there.
pub struct Polled<T> {
    pub value: T,
    pub tries: u32,
}

/// Attempts-per-word and delay for mailbox window transfers.
const MBOX_WORD_TRIES: u32 = 1000;
const MBOX_WORD_DELAY_US: u32 = 10;

/// The raw MCP transport. All methods are register-level and carry no
/// protocol state; serialization against concurrent users is the session
/// lock's job, one layer up.
pub struct Mailbox {
    hal: Box<dyn McpHal>,
}

impl Mailbox {
    pub fn new(hal: Box<dyn McpHal>) -> Mailbox {
        Mailbox { hal }
    }

    pub fn read(&self, reg: u32) -> u32 {
        self.hal.read_reg(reg)
    }

    pub fn write(&self, reg: u32, val: u32) {
        self.hal.write_reg(reg, val);
    }

    pub fn set_bits(&self, reg: u32, bits: u32) {
        let val = self.hal.read_reg(reg);
        self.hal.write_reg(reg, val | bits);
    }

    pub fn udelay(&self, us: u32) {
        self.hal.udelay(us);
    }

    pub fn now_ms(&self) -> u64 {
        self.hal.now_ms()
    }

    /// Bounded busy-poll: evaluate `cond` up to `attempts` times,
    /// sleeping `delay_us` between attempts, until it produces a value.
    ///
    /// Every handshake timeout in this driver is an (attempts × delay)
    /// product expressed through this single loop.
    pub fn poll<T, F>(
        &self,
        attempts: u32,
        delay_us: u32,
        mut cond: F,
    ) -> Result<Polled<T>, FwError>
    where
        F: FnMut(&Mailbox) -> Option<T>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            if let Some(value) = cond(self) {
                return Ok(Polled { value, tries });
            }
            if tries >= attempts {
                return Err(FwError::Timeout);
            }
            self.hal.udelay(delay_us);
        }
    }

    /// Transfer one word through the mailbox window and return the data
    /// register's contents (meaningful for reads).
    fn mbox_transfer(&self, cmd: u32) -> Result<u32, FwError> {
        self.hal.write_reg(ATL_MCP_MBOX_CMD, cmd);
        self.poll(MBOX_WORD_TRIES, MBOX_WORD_DELAY_US, |m| {
            if m.read(ATL_MCP_MBOX_CMD) & ATL_MCP_MBOX_BUSY == 0 {
                Some(())
            } else {
                None
            }
        })?;
        Ok(self.hal.read_reg(ATL_MCP_MBOX_DATA))
    }

    /// Read `buf.len()` words of MCP shared memory starting at the
    /// word-aligned byte address `addr`.
    pub fn read_block(&self, addr: u32, buf: &mut [u32]) -> Result<(), FwError> {
        self.hal.write_reg(ATL_MCP_MBOX_ADDR, addr & !3);
        for word in buf.iter_mut() {
            *word = self.mbox_transfer(ATL_MCP_MBOX_START)?;
        }
        Ok(())
    }

    /// Write `data` into MCP shared memory at `offset` within `area`,
    /// rounding the length up to a multiple of four bytes.
    pub fn write_block(&self, offset: u32, data: &[u8], area: McpArea) -> Result<(), FwError> {
        self.hal.write_reg(ATL_MCP_MBOX_ADDR, area.base() | (offset & !3));
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.hal.write_reg(ATL_MCP_MBOX_DATA, u32::from_le_bytes(word));
            self.mbox_transfer(ATL_MCP_MBOX_START | ATL_MCP_MBOX_WRITE)?;
        }
        Ok(())
    }

    /// Read one (possibly unaligned) 32-bit word of MCP shared memory.
    pub fn read_word(&self, addr: u32) -> Result<u32, FwError> {
        let mut buf = [0u32; 1];
        self.read_block(addr & !3, &mut buf)?;
        Ok(buf[0] >> (8 * (addr & 3)))
    }
}
