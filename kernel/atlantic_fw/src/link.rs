//! Link-rate catalog and negotiation state.
//!
//! The catalog is ordered by ascending speed, and an entry's index in it
//! doubles as its priority: when several rates are advertised by both
//! sides, the highest index wins. Rate bitmaps keep one bit per catalog
//! index in the low half of the word, with a parallel
//! energy-efficient-ethernet plane at [`EEE_BIT_OFFT`].

use bitflags::bitflags;

/// Offset of the EEE companion plane inside a [`RateMask`].
pub const EEE_BIT_OFFT: usize = 16;

/// One catalog entry: a named link rate with its per-generation firmware
/// bit assignment (`fw_bits[0]` for Gen1, `fw_bits[1]` for Gen2).
pub struct LinkType {
    pub name: &'static str,
    /// Nominal speed in Mbit/s.
    pub speed: u32,
    pub(crate) fw_bits: [u32; 2],
}

/// The rate catalog, ascending by speed.
pub static LINK_TYPES: [LinkType; 5] = [
    LinkType { name: "100BaseTX-FD", speed: 100, fw_bits: [0x20, 1 << 5] },
    LinkType { name: "1000BaseT-FD", speed: 1000, fw_bits: [0x10, 1 << 8] },
    LinkType { name: "2.5GBaseT-FD", speed: 2500, fw_bits: [0x08, 1 << 9] },
    LinkType { name: "5GBaseT-FD", speed: 5000, fw_bits: [0x02, 1 << 10] },
    LinkType { name: "10GBaseT-FD", speed: 10000, fw_bits: [0x01, 1 << 11] },
];

/// A set of catalog rates plus their EEE companion bits.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct RateMask(u32);

impl RateMask {
    pub const fn empty() -> RateMask {
        RateMask(0)
    }

    pub const fn from_bits(bits: u32) -> RateMask {
        RateMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn rate(self, idx: usize) -> bool {
        self.0 & (1 << idx) != 0
    }

    pub fn set_rate(&mut self, idx: usize) {
        self.0 |= 1 << idx;
    }

    pub fn eee(self, idx: usize) -> bool {
        self.0 & (1 << (idx + EEE_BIT_OFFT)) != 0
    }

    pub fn set_eee(&mut self, idx: usize) {
        self.0 |= 1 << (idx + EEE_BIT_OFFT);
    }

    /// All rates at or below `idx`, with no EEE plane.
    pub fn up_to(idx: usize) -> RateMask {
        RateMask((1 << (idx + 1)) - 1)
    }

    /// Index of the slowest rate present, ignoring the EEE plane.
    pub fn lowest_rate(self) -> Option<usize> {
        let rates = self.0 & ((1 << EEE_BIT_OFFT) - 1);
        if rates == 0 {
            None
        } else {
            Some(rates.trailing_zeros() as usize)
        }
    }

    /// Index of the fastest rate present, ignoring the EEE plane.
    pub fn highest_rate(self) -> Option<usize> {
        let rates = self.0 & ((1 << EEE_BIT_OFFT) - 1);
        if rates == 0 {
            None
        } else {
            Some(31 - rates.leading_zeros() as usize)
        }
    }
}

bitflags! {
    /// Flow-control directions in effect or requested.
    #[derive(Default)]
    pub struct FcMode: u8 {
        const RX = 1 << 0;
        const TX = 1 << 1;
        const FULL = Self::RX.bits | Self::TX.bits;
    }
}

/// Requested, previously-requested, and currently negotiated flow control.
#[derive(Default)]
pub struct FcState {
    pub req: FcMode,
    pub(crate) prev_req: FcMode,
    pub cur: FcMode,
}

/// All mutable negotiation state for one link. Mutated only while the
/// firmware session lock is held.
pub struct LinkState {
    /// Rates the administrator asked us to advertise.
    pub advertised: RateMask,
    /// What was last actually sent to firmware, for change detection.
    pub(crate) prev_advertised: RateMask,
    /// Rates the firmware reports the hardware supports.
    pub supported: RateMask,
    /// Rates the link partner advertised in the last exchange.
    pub lp_advertised: RateMask,
    /// Resolved link, as an index into [`LINK_TYPES`].
    pub(crate) link: Option<usize>,
    /// EEE negotiated on the resolved link.
    pub eee: bool,
    pub eee_enabled: bool,
    pub autoneg: bool,
    pub fc: FcState,
    /// Administratively forced down.
    pub force_off: bool,
    /// Currently narrowed down due to a thermal alarm.
    pub thermal_throttled: bool,
    /// Catalog index we throttled down to.
    pub(crate) throttled_to: usize,
    /// Lowest partner rate observed during this link-up.
    pub(crate) lp_lowest: usize,
}

impl LinkState {
    pub fn new() -> LinkState {
        LinkState {
            advertised: RateMask::empty(),
            prev_advertised: RateMask::empty(),
            supported: RateMask::empty(),
            lp_advertised: RateMask::empty(),
            link: None,
            eee: false,
            eee_enabled: false,
            autoneg: false,
            fc: FcState::default(),
            force_off: false,
            thermal_throttled: false,
            throttled_to: 0,
            lp_lowest: 0,
        }
    }

    pub fn link_type(&self) -> Option<&'static LinkType> {
        self.link.map(|i| &LINK_TYPES[i])
    }
}

impl Default for LinkState {
    fn default() -> LinkState {
        LinkState::new()
    }
}

/// The rate set actually offered to firmware, as opposed to the one the
/// administrator configured.
///
/// While thermal-throttled we advertise not just the `throttled_to` rate
/// but every lower rate as well. Firmware only reports rates advertised
/// by *both* sides, so offering the whole low end lets the thermal check
/// notice if the partner later drops below `throttled_to` and follow it
/// down instead of staying stuck.
pub(crate) fn link_adv(lstate: &LinkState, throttle_enabled: bool) -> RateMask {
    if lstate.force_off {
        return RateMask::empty();
    }

    if lstate.thermal_throttled && throttle_enabled {
        return RateMask::up_to(lstate.throttled_to);
    }

    lstate.advertised
}

/// Resolve the firmware's link-result words against the catalog.
///
/// Scans catalog entries in ascending speed order; every entry whose bit
/// is set in `low` joins the partner-advertised set (with its EEE
/// companion if the same bit is set in `high`), and entries we advertise
/// ourselves overwrite the candidate as the scan ascends, so the highest
/// mutually-advertised rate wins. EEE is active on the winner only if
/// both sides advertised its companion bit.
pub(crate) fn parse_fw_bits(
    lstate: &mut LinkState,
    low: u32,
    high: u32,
    fw_idx: usize,
) -> Option<usize> {
    let adv = lstate.advertised;
    let mut lp_adv = RateMask::empty();
    let mut last = None;

    for (i, link) in LINK_TYPES.iter().enumerate() {
        let link_bit = link.fw_bits[fw_idx];

        if low & link_bit == 0 {
            continue;
        }

        if high & link_bit != 0 {
            lp_adv.set_eee(i);
        }

        lp_adv.set_rate(i);
        if adv.rate(i) {
            last = Some(i);
        }
    }

    lstate.lp_advertised = lp_adv;

    let mut eee = false;
    if let Some(last) = last {
        if lp_adv.eee(last) && adv.eee(last) {
            eee = true;
        }
    }

    lstate.link = last;
    lstate.eee = eee;
    last
}

/// Build the per-generation firmware bit pattern for the currently
/// offered rate set. EEE companion bits land in the high 32 bits.
pub(crate) fn set_fw_bits(lstate: &LinkState, fw_idx: usize, throttle_enabled: bool) -> u64 {
    let adv = link_adv(lstate, throttle_enabled);
    let mut bits: u64 = 0;

    for (i, ltype) in LINK_TYPES.iter().enumerate() {
        let bit = ltype.fw_bits[fw_idx];

        if adv.rate(i) {
            bits |= bit as u64;
            if adv.eee(i) {
                bits |= (bit as u64) << 32;
            }
        }
    }

    bits
}

/// True when the offered rate set changed since the last issued write;
/// updates the change-detection snapshot as a side effect.
pub(crate) fn fw1_set_link_needed(lstate: &mut LinkState, throttle_enabled: bool) -> bool {
    let adv = link_adv(lstate, throttle_enabled);
    if adv != lstate.prev_advertised {
        lstate.prev_advertised = adv;
        return true;
    }
    false
}

/// Gen2 change detection additionally covers the flow-control request.
pub(crate) fn fw2_set_link_needed(lstate: &mut LinkState, throttle_enabled: bool) -> bool {
    let mut fc_changed = false;
    if lstate.fc.req != lstate.fc.prev_req {
        lstate.fc.prev_req = lstate.fc.req;
        fc_changed = true;
    }

    fw1_set_link_needed(lstate, throttle_enabled) || fc_changed
}
