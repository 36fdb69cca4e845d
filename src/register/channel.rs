//! Per-channel Register Block
//!
//! Each channel owns sixteen register words. The names follow the FPGA's
//! point of view: the RX bank carries host sends, the TX bank host receives.

use super::{RegisterBank, chnl_reg_ro, chnl_reg_rw};
use crate::channel::Direction;
use crate::constants::MAX_OFFSET;

// =============================================================================
// Register Offsets
// =============================================================================

/// RX scatter-gather list length in words (writing it starts the descriptor read)
pub const RX_SG_LEN_REG: usize = 0x0;
/// RX scatter-gather list address, low 32 bits
pub const RX_SG_ADDR_LO_REG: usize = 0x1;
/// RX scatter-gather list address, high 32 bits
pub const RX_SG_ADDR_HI_REG: usize = 0x2;
/// RX transfer length in words
pub const RX_LEN_REG: usize = 0x3;
/// RX offset and last flag
pub const RX_OFFLAST_REG: usize = 0x4;
/// TX scatter-gather list length in words (writing it starts the descriptor read)
pub const TX_SG_LEN_REG: usize = 0x5;
/// TX scatter-gather list address, low 32 bits
pub const TX_SG_ADDR_LO_REG: usize = 0x6;
/// TX scatter-gather list address, high 32 bits
pub const TX_SG_ADDR_HI_REG: usize = 0x7;
/// TX transfer length announced by the FPGA, in words
pub const TX_LEN_REG: usize = 0x8;
/// TX offset and last flag announced by the FPGA
pub const TX_OFFLAST_REG: usize = 0x9;
/// RX words actually transferred
pub const RX_TNFR_LEN_REG: usize = 0xD;
/// TX words actually transferred
pub const TX_TNFR_LEN_REG: usize = 0xE;

// =============================================================================
// OFFLAST Word
// =============================================================================

/// OFFLAST last flag
pub const OFFLAST_LAST: u32 = 1 << 0;
/// OFFLAST offset shift
pub const OFFLAST_OFFSET_SHIFT: u32 = 1;

/// Pack an offset and last flag into an OFFLAST word
#[inline]
pub const fn pack_offlast(offset: u32, last: bool) -> u32 {
    ((offset & MAX_OFFSET) << OFFLAST_OFFSET_SHIFT) | (last as u32)
}

/// Split an OFFLAST word into offset and last flag
#[inline]
pub const fn unpack_offlast(raw: u32) -> (u32, bool) {
    (raw >> OFFLAST_OFFSET_SHIFT, (raw & OFFLAST_LAST) != 0)
}

/// View over one channel's register block
pub struct ChannelRegs<'a> {
    bank: &'a dyn RegisterBank,
    channel: usize,
}

impl<'a> ChannelRegs<'a> {
    /// Create a view over `channel`'s block
    pub fn new(bank: &'a dyn RegisterBank, channel: usize) -> Self {
        Self { bank, channel }
    }

    chnl_reg_rw!(rx_sg_len, set_rx_sg_len, RX_SG_LEN_REG, "RX scatter-gather list length");
    chnl_reg_rw!(rx_sg_addr_lo, set_rx_sg_addr_lo, RX_SG_ADDR_LO_REG, "RX SG address low");
    chnl_reg_rw!(rx_sg_addr_hi, set_rx_sg_addr_hi, RX_SG_ADDR_HI_REG, "RX SG address high");
    chnl_reg_rw!(rx_len, set_rx_len, RX_LEN_REG, "RX transfer length");
    chnl_reg_rw!(rx_offlast, set_rx_offlast, RX_OFFLAST_REG, "RX offset/last word");
    chnl_reg_rw!(tx_sg_len, set_tx_sg_len, TX_SG_LEN_REG, "TX scatter-gather list length");
    chnl_reg_rw!(tx_sg_addr_lo, set_tx_sg_addr_lo, TX_SG_ADDR_LO_REG, "TX SG address low");
    chnl_reg_rw!(tx_sg_addr_hi, set_tx_sg_addr_hi, TX_SG_ADDR_HI_REG, "TX SG address high");
    chnl_reg_ro!(tx_len, TX_LEN_REG, "TX announced length");
    chnl_reg_ro!(tx_offlast, TX_OFFLAST_REG, "TX announced offset/last word");
    chnl_reg_ro!(rx_tnfr_len, RX_TNFR_LEN_REG, "RX transferred length");
    chnl_reg_ro!(tx_tnfr_len, TX_TNFR_LEN_REG, "TX transferred length");

    /// Program the length and offset/last of a host send.
    ///
    /// Must precede [`Self::program_sg`] for the same transaction.
    pub fn program_send(&self, len_words: u32, offset: u32, last: bool) {
        self.set_rx_len(len_words);
        self.set_rx_offlast(pack_offlast(offset, last));
    }

    /// Point the direction at a descriptor list and start the descriptor read.
    ///
    /// The length write goes last; it is what the FPGA acts on.
    pub fn program_sg(&self, direction: Direction, addr: u64, list_words: u32) {
        let lo = addr as u32;
        let hi = (addr >> 32) as u32;
        match direction {
            Direction::Send => {
                self.set_rx_sg_addr_lo(lo);
                self.set_rx_sg_addr_hi(hi);
                self.set_rx_sg_len(list_words);
            }
            Direction::Receive => {
                self.set_tx_sg_addr_lo(lo);
                self.set_tx_sg_addr_hi(hi);
                self.set_tx_sg_len(list_words);
            }
        }
    }

    /// Read back the direction's descriptor list length
    pub fn sg_len(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Send => self.rx_sg_len(),
            Direction::Receive => self.tx_sg_len(),
        }
    }

    /// Words moved by the direction's last transfer
    pub fn transferred_words(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Send => self.rx_tnfr_len(),
            Direction::Receive => self.tx_tnfr_len(),
        }
    }

    /// Length (words), offset and last flag the FPGA announced for its next send
    pub fn announcement(&self) -> (u32, u32, bool) {
        let len = self.tx_len();
        let (offset, last) = unpack_offlast(self.tx_offlast());
        (len, offset, last)
    }
}
