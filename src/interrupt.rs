//! Interrupt controller
//!
//! Owns the IE / IF / IME registers (0x04000200, 0x04000202, 0x04000208)
//! and the CPU-visible pending line. Fourteen sources share one IRQ line:
//!
//! - Bit 0: VBlank
//! - Bit 1: HBlank
//! - Bit 2: VCount match
//! - Bits 3-6: Timer 0-3 overflow
//! - Bit 7: Serial
//! - Bits 8-11: DMA 0-3 completion
//! - Bit 12: Keypad
//! - Bit 13: Game Pak
//!
//! A request always latches its IF bit; IE and IME gate only whether the
//! pending line is raised towards the CPU. Software acknowledges by writing
//! 1s to IF.
//!
//! Reference: GBATEK "GBA Interrupt Control"

use bitflags::bitflags;

bitflags! {
    /// Bit layout shared by IE and IF
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqBits: u16 {
        const VBLANK = 1 << 0;
        const HBLANK = 1 << 1;
        const VCOUNT = 1 << 2;
        const TIMER0 = 1 << 3;
        const TIMER1 = 1 << 4;
        const TIMER2 = 1 << 5;
        const TIMER3 = 1 << 6;
        const SERIAL = 1 << 7;
        const DMA0 = 1 << 8;
        const DMA1 = 1 << 9;
        const DMA2 = 1 << 10;
        const DMA3 = 1 << 11;
        const KEYPAD = 1 << 12;
        const GAMEPAK = 1 << 13;
    }
}

/// Interrupt sources, in IF bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    HBlank,
    VCount,
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Serial,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
    Keypad,
    GamePak,
}

impl Interrupt {
    pub fn bit(self) -> IrqBits {
        match self {
            Interrupt::VBlank => IrqBits::VBLANK,
            Interrupt::HBlank => IrqBits::HBLANK,
            Interrupt::VCount => IrqBits::VCOUNT,
            Interrupt::Timer0 => IrqBits::TIMER0,
            Interrupt::Timer1 => IrqBits::TIMER1,
            Interrupt::Timer2 => IrqBits::TIMER2,
            Interrupt::Timer3 => IrqBits::TIMER3,
            Interrupt::Serial => IrqBits::SERIAL,
            Interrupt::Dma0 => IrqBits::DMA0,
            Interrupt::Dma1 => IrqBits::DMA1,
            Interrupt::Dma2 => IrqBits::DMA2,
            Interrupt::Dma3 => IrqBits::DMA3,
            Interrupt::Keypad => IrqBits::KEYPAD,
            Interrupt::GamePak => IrqBits::GAMEPAK,
        }
    }

    /// DMA completion interrupt for channel `n`
    pub fn dma(n: usize) -> Self {
        match n {
            0 => Interrupt::Dma0,
            1 => Interrupt::Dma1,
            2 => Interrupt::Dma2,
            3 => Interrupt::Dma3,
            _ => panic!("DMA channel {n} out of range"),
        }
    }
}

/// IE / IF / IME register block
pub struct InterruptController {
    enabled: IrqBits,
    requested: IrqBits,
    master_enable: bool,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            enabled: IrqBits::empty(),
            requested: IrqBits::empty(),
            master_enable: false,
        }
    }

    pub fn reset(&mut self) {
        self.enabled = IrqBits::empty();
        self.requested = IrqBits::empty();
        self.master_enable = false;
    }

    /// Record an interrupt request.
    ///
    /// The IF bit is latched unconditionally; whether the CPU sees it is
    /// decided by `irq_pending` each step, so enabling IE or IME after the
    /// request still dispatches it.
    pub fn request(&mut self, interrupt: Interrupt) {
        log::debug!("interrupt requested: {interrupt:?}");
        self.requested |= interrupt.bit();
    }

    /// CPU-visible pending line: IME & IE & IF
    pub fn irq_pending(&self) -> bool {
        self.master_enable && self.enabled.intersects(self.requested)
    }

    pub fn read_ie(&self) -> u16 {
        self.enabled.bits()
    }

    pub fn write_ie(&mut self, value: u16) {
        self.enabled = IrqBits::from_bits_truncate(value);
    }

    pub fn read_if(&self) -> u16 {
        self.requested.bits()
    }

    /// IF is write-1-to-clear: set bits acknowledge the matching request
    pub fn write_if(&mut self, value: u16) {
        self.requested &= !IrqBits::from_bits_truncate(value);
    }

    pub fn read_ime(&self) -> u16 {
        self.master_enable as u16
    }

    /// Only bit 0 of IME is significant
    pub fn write_ime(&mut self, value: u16) {
        self.master_enable = value & 1 != 0;
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let ic = InterruptController::new();
        assert_eq!(ic.read_ie(), 0);
        assert_eq!(ic.read_if(), 0);
        assert_eq!(ic.read_ime(), 0);
        assert!(!ic.irq_pending());
    }

    #[test]
    fn test_request_latches_if_even_when_masked() {
        // IE and IME both clear: the request must still be recorded
        let mut ic = InterruptController::new();
        ic.request(Interrupt::VBlank);
        assert_eq!(ic.read_if(), IrqBits::VBLANK.bits());
        assert!(!ic.irq_pending());

        // Enabling afterwards dispatches the already-latched request
        ic.write_ie(IrqBits::VBLANK.bits());
        assert!(!ic.irq_pending());
        ic.write_ime(1);
        assert!(ic.irq_pending());
    }

    #[test]
    fn test_pending_requires_all_three() {
        let mut ic = InterruptController::new();
        ic.write_ime(1);
        ic.write_ie(IrqBits::TIMER0.bits());
        assert!(!ic.irq_pending());

        ic.request(Interrupt::Timer0);
        assert!(ic.irq_pending());

        ic.write_ime(0);
        assert!(!ic.irq_pending());
    }

    #[test]
    fn test_if_write_one_to_clear() {
        let mut ic = InterruptController::new();
        ic.request(Interrupt::Dma0);
        ic.request(Interrupt::HBlank);

        // Acknowledging one source leaves the other latched
        ic.write_if(IrqBits::DMA0.bits());
        assert_eq!(ic.read_if(), IrqBits::HBLANK.bits());

        // Writing zero clears nothing
        ic.write_if(0);
        assert_eq!(ic.read_if(), IrqBits::HBLANK.bits());
    }

    #[test]
    fn test_ime_uses_bit_zero_only() {
        let mut ic = InterruptController::new();
        ic.write_ime(0xFFFE);
        assert_eq!(ic.read_ime(), 0);
        ic.write_ime(0x0003);
        assert_eq!(ic.read_ime(), 1);
    }

    #[test]
    fn test_unused_high_bits_ignored() {
        let mut ic = InterruptController::new();
        ic.write_ie(0xFFFF);
        // Only the 14 defined sources stick
        assert_eq!(ic.read_ie(), 0x3FFF);
    }

    #[test]
    fn test_dma_helper() {
        assert_eq!(Interrupt::dma(0).bit(), IrqBits::DMA0);
        assert_eq!(Interrupt::dma(3).bit(), IrqBits::DMA3);
    }
}
