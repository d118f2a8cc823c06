//! Emulator orchestrator
//!
//! Owns the CPU and the system bus and drives them the way the console's
//! fabric does: each quantum is either one DMA transfer unit (DMA wins
//! arbitration) or one CPU instruction. The pixel producer, audio mixer,
//! and timers live outside the core; they advance themselves with the
//! cycle counts returned here and call back in through the event and
//! interrupt methods.

use crate::bus::GbaBus;
use crate::cartridge::CartridgeError;
use crate::cpu::Cpu;
use crate::dma;
use crate::interrupt::Interrupt;
use crate::io::{reg, Keys};

/// One Game Boy Advance
pub struct Gba {
    cpu: Cpu,
    bus: GbaBus,
    /// Total cycles since power-on or reset
    total_cycles: u64,
}

impl Gba {
    /// Power on with no ROM: the CPU sits at the reset vector with the
    /// BIOS-boot register layout
    pub fn new() -> Self {
        let mut bus = GbaBus::new();
        let mut cpu = Cpu::new();
        cpu.fill_pipe(&mut bus);
        Self {
            cpu,
            bus,
            total_cycles: 0,
        }
    }

    /// Load a BIOS image (16KB at 0x00000000)
    pub fn load_bios(&mut self, image: &[u8]) {
        self.bus.bios.load(image);
        self.reset();
    }

    /// Load a cartridge and reset
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), CartridgeError> {
        self.bus.cart.load_rom(image)?;
        self.reset();
        Ok(())
    }

    /// Reset CPU and bus state; loaded BIOS/ROM images are preserved
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset();
        self.cpu.fill_pipe(&mut self.bus);
        self.total_cycles = 0;
    }

    /// Start execution at the cartridge entry point instead of the BIOS
    pub fn skip_bios(&mut self) {
        self.cpu.skip_bios(&mut self.bus);
    }

    /// Run one quantum and return the cycles it consumed.
    ///
    /// DMA has bus priority: while a channel is ready, each quantum moves
    /// one transfer unit and the CPU stalls. Otherwise the CPU executes
    /// one instruction (or services a pending IRQ).
    pub fn step(&mut self) -> u32 {
        // A HALTCNT write during the previous instruction parks the CPU
        if self.bus.io.halt_requested {
            self.bus.io.halt_requested = false;
            self.cpu.halted = true;
        }
        self.cpu.irq = self.bus.io.irq.irq_pending();

        let dma_cycles = dma::run_slot(&mut self.bus);
        let cycles = if dma_cycles > 0 {
            dma_cycles
        } else {
            self.cpu.step(&mut self.bus)
        };
        self.total_cycles += cycles as u64;
        cycles
    }

    /// Run quanta until at least `cycles` cycles have elapsed; returns
    /// the cycles actually executed
    pub fn run_cycles(&mut self, cycles: u32) -> u32 {
        let mut executed = 0u32;
        while executed < cycles {
            executed += self.step();
        }
        executed
    }

    /// Record an interrupt request from a collaborator (PPU, timers,
    /// serial, cartridge)
    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        self.bus.io.irq.request(interrupt);
    }

    /// VBlank edge from the pixel producer: triggers VBlank DMA and, when
    /// DISPSTAT asks for it, the VBlank interrupt
    pub fn vblank(&mut self) {
        self.bus.dma.notify_vblank();
        if self.bus.io.store_read(reg::DISPSTAT) & 1 << 3 != 0 {
            self.bus.io.irq.request(Interrupt::VBlank);
        }
    }

    /// HBlank edge from the pixel producer
    pub fn hblank(&mut self) {
        self.bus.dma.notify_hblank();
        if self.bus.io.store_read(reg::DISPSTAT) & 1 << 4 != 0 {
            self.bus.io.irq.request(Interrupt::HBlank);
        }
    }

    /// Audio FIFO low-water mark from the mixer (0 = FIFO_A, 1 = FIFO_B)
    pub fn fifo_refill(&mut self, fifo: usize) {
        self.bus.dma.notify_fifo(fifo);
    }

    /// Video-capture line from the pixel producer (channel 3's special
    /// timing mode)
    pub fn video_capture(&mut self) {
        self.bus.dma.notify_video_capture();
    }

    /// Host keypad input
    pub fn set_keys(&mut self, keys: Keys) {
        self.bus.io.set_keys(keys);
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &GbaBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut GbaBus {
        &mut self.bus
    }

    /// Split borrow for hosts and tests that poke CPU registers through
    /// the live bus (r15 writes refill the pipeline from it)
    pub fn cpu_bus(&mut self) -> (&mut Cpu, &mut GbaBus) {
        (&mut self.cpu, &mut self.bus)
    }

    /// Register/flag dump for crash diagnostics
    pub fn dump_state(&self) -> String {
        format!(
            "{}total cycles: {}\n",
            self.cpu.dump_registers(),
            self.total_cycles
        )
    }
}

impl Default for Gba {
    fn default() -> Self {
        Self::new()
    }
}
