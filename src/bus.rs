//! System bus for the Game Boy Advance
//!
//! Routes byte/halfword/word accesses to BIOS, EWRAM, IWRAM, the I/O bank,
//! palette, VRAM, OAM, cartridge ROM, or backup, applying each region's
//! alignment, mirroring, and write-policy rules.
//!
//! Reads never fail: an unmapped or forbidden address returns "open bus",
//! the residue of the last instruction fetch still driving the data lines.
//! The bus therefore keeps a shadow of the CPU's two prefetched opcodes,
//! updated on every `fetch_half`/`fetch_word`, and derives the open-bus
//! word from it (in THUMB the two 16-bit halves are picked per region).
//!
//! Writes that hit ROM, BIOS, or unmapped space are dropped. Byte writes
//! into palette and background VRAM are widened to `(v << 8) | v` halfword
//! stores; byte writes into OBJ VRAM and OAM are dropped entirely.
//!
//! Reference: GBATEK "GBA Memory Map" and "GBA Unpredictable Things"

use crate::cartridge::{BackupType, Cartridge};
use crate::dma::DmaEngine;
use crate::io::{reg, IoRegisters};
use crate::memory::{addr, Bios, Ewram, Iwram, Oam, Palette, Vram};

/// Bus capability handed to the CPU: six access operations plus the fetch
/// variants that feed the open-bus shadow. Mock implementations back the
/// CPU tests with a flat RAM.
pub trait Bus {
    fn read_byte(&mut self, addr: u32) -> u8;
    fn read_half(&mut self, addr: u32) -> u16;
    fn read_word(&mut self, addr: u32) -> u32;
    fn write_byte(&mut self, addr: u32, value: u8);
    fn write_half(&mut self, addr: u32, value: u16);
    fn write_word(&mut self, addr: u32, value: u32);

    /// Instruction fetch in THUMB state
    fn fetch_half(&mut self, addr: u32) -> u16 {
        self.read_half(addr)
    }

    /// Instruction fetch in ARM state
    fn fetch_word(&mut self, addr: u32) -> u32 {
        self.read_word(addr)
    }
}

/// The full system bus
pub struct GbaBus {
    pub bios: Bios,
    pub ewram: Ewram,
    pub iwram: Iwram,
    pub io: IoRegisters,
    pub dma: DmaEngine,
    pub palette: Palette,
    pub vram: Vram,
    pub oam: Oam,
    pub cart: Cartridge,

    /// Shadow of the CPU's prefetch queue, for open-bus reads
    pipeline: [u32; 2],
    /// Width of the most recent fetch (selects the open-bus recipe)
    thumb_fetch: bool,
    /// BIOS is readable only while execution is inside it; tracked from
    /// the most recent fetch address
    bios_accessible: bool,
}

impl GbaBus {
    pub fn new() -> Self {
        Self {
            bios: Bios::new(),
            ewram: Ewram::new(),
            iwram: Iwram::new(),
            io: IoRegisters::new(),
            dma: DmaEngine::new(),
            palette: Palette::new(),
            vram: Vram::new(),
            oam: Oam::new(),
            cart: Cartridge::new(),
            pipeline: [0; 2],
            thumb_fetch: false,
            bios_accessible: true,
        }
    }

    /// Reset everything except the loaded BIOS and ROM images
    pub fn reset(&mut self) {
        self.ewram.reset();
        self.iwram.reset();
        self.io.reset();
        self.dma.reset();
        self.palette.reset();
        self.vram.reset();
        self.oam.reset();
        self.pipeline = [0; 2];
        self.thumb_fetch = false;
        self.bios_accessible = true;
    }

    /// Seed the open-bus shadow (used by tests; the CPU refill does this
    /// naturally through `fetch_half`/`fetch_word`)
    pub fn seed_pipeline(&mut self, p0: u32, p1: u32, thumb: bool) {
        self.pipeline = [p0, p1];
        self.thumb_fetch = thumb;
    }

    /// Open-bus value for a read of `addr`.
    ///
    /// In ARM state the data lines still carry the newest prefetched word.
    /// In THUMB state each 16-bit half comes from one of the two prefetch
    /// slots depending on the region being read: BIOS and OAM pair the
    /// older slot below the newer one, IWRAM picks by address bit 1, and
    /// everywhere else both halves repeat the newest slot. The byte lanes
    /// then rotate into place exactly like a misaligned read.
    fn open_bus(&self, addr: u32) -> u32 {
        let value = if self.thumb_fetch {
            let p0 = self.pipeline[0] & 0xFFFF;
            let p1 = self.pipeline[1] & 0xFFFF;
            let (mut low, mut high) = (p1, p1);
            match addr >> 24 {
                0x00 | 0x07 => low = p0,
                0x03 => {
                    if addr & 3 != 0 {
                        low = p0;
                    } else {
                        high = p0;
                    }
                }
                _ => {}
            }
            (high << 16) | low
        } else {
            self.pipeline[1]
        };
        let value = value.rotate_right((addr & 3) * 8);
        log::warn!("open bus read {addr:08X} -> {value:08X}");
        value
    }

    /// Collapse an I/O-page address into a register offset, or `None` when
    /// the address is one of the unmapped mirrors.
    ///
    /// The internal memory control word is the single register mirrored
    /// into every 64KB slot of the page; everything else exists only in
    /// the first 0x400 bytes.
    fn io_offset(addr: u32) -> Option<u32> {
        if addr & 0xFF00_FFFC == 0x0400_0800 {
            return Some(reg::IMEM_CTRL + (addr & 3));
        }
        let offset = addr - addr::IO_START;
        if offset < addr::IO_SIZE {
            Some(offset)
        } else {
            None
        }
    }

    fn io_read_half(&self, offset: u32) -> Option<u16> {
        if (reg::DMA_BASE..=reg::DMA_END).contains(&offset) {
            self.dma.read_half(offset - reg::DMA_BASE)
        } else {
            self.io.read_half(offset)
        }
    }

    fn io_write_half(&mut self, offset: u32, value: u16) {
        if (reg::DMA_BASE..=reg::DMA_END).contains(&offset) {
            self.dma.write_half(offset - reg::DMA_BASE, value);
        } else {
            self.io.write_half(offset, value);
        }
    }

    fn io_read_byte(&self, offset: u32) -> Option<u8> {
        let half = self.io_read_half(offset & !1)?;
        Some((half >> ((offset & 1) * 8)) as u8)
    }

    fn io_write_byte(&mut self, offset: u32, value: u8) {
        if (reg::DMA_BASE..=reg::DMA_END).contains(&offset) {
            // Sub-halfword DMA register writes merge against the stored
            // value, including the write-only address registers
            let base = offset & !1;
            let old = self.dma.stored_half(base - reg::DMA_BASE);
            let merged = if offset & 1 == 0 {
                (old & 0xFF00) | value as u16
            } else {
                (old & 0x00FF) | ((value as u16) << 8)
            };
            self.dma.write_half(base - reg::DMA_BASE, merged);
        } else {
            self.io.write_byte(offset, value);
        }
    }

    fn rom_offset(addr: u32) -> u32 {
        addr & 0x01FF_FFFF
    }
}

impl Default for GbaBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for GbaBus {
    fn read_byte(&mut self, addr: u32) -> u8 {
        match addr >> 24 {
            0x00 => {
                if addr < addr::BIOS_SIZE as u32 && self.bios_accessible {
                    self.bios.read_byte(addr)
                } else {
                    self.open_bus(addr) as u8
                }
            }
            0x02 => self.ewram.read_byte(addr),
            0x03 => self.iwram.read_byte(addr),
            0x04 => match Self::io_offset(addr) {
                Some(offset) => match self.io_read_byte(offset) {
                    Some(value) => value,
                    None => self.open_bus(addr) as u8,
                },
                None => self.open_bus(addr) as u8,
            },
            0x05 => self.palette.read_byte(addr),
            0x06 => self.vram.read_byte(addr),
            0x07 => self.oam.read_byte(addr),
            0x08..=0x0D => {
                let offset = Self::rom_offset(addr);
                if self.cart.out_of_range(offset) {
                    self.open_bus(addr) as u8
                } else {
                    self.cart.read_rom_byte(offset)
                }
            }
            0x0E | 0x0F => {
                if self.cart.backup_type() == BackupType::None {
                    self.open_bus(addr) as u8
                } else {
                    self.cart.read_backup(addr)
                }
            }
            _ => self.open_bus(addr) as u8,
        }
    }

    fn read_half(&mut self, addr: u32) -> u16 {
        let aligned = addr & !1;
        match aligned >> 24 {
            0x00 => {
                if aligned < addr::BIOS_SIZE as u32 && self.bios_accessible {
                    self.bios.read_half(aligned)
                } else {
                    self.open_bus(aligned) as u16
                }
            }
            0x02 => self.ewram.read_half(aligned),
            0x03 => self.iwram.read_half(aligned),
            0x04 => match Self::io_offset(aligned) {
                Some(offset) => match self.io_read_half(offset) {
                    Some(value) => value,
                    None => self.open_bus(aligned) as u16,
                },
                None => self.open_bus(aligned) as u16,
            },
            0x05 => self.palette.read_half(aligned),
            0x06 => self.vram.read_half(aligned),
            0x07 => self.oam.read_half(aligned),
            0x08..=0x0D => {
                let offset = Self::rom_offset(aligned);
                if self.cart.out_of_range(offset) {
                    self.open_bus(aligned) as u16
                } else {
                    self.cart.read_rom_half(offset)
                }
            }
            0x0E | 0x0F => {
                // The 8-bit backup chip mirrors its byte onto both lanes
                if self.cart.backup_type() == BackupType::None {
                    self.open_bus(aligned) as u16
                } else {
                    let byte = self.cart.read_backup(aligned) as u16;
                    byte * 0x0101
                }
            }
            _ => self.open_bus(aligned) as u16,
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        // The raw address is kept for open-bus byte-lane rotation
        let aligned = addr & !3;
        match aligned >> 24 {
            0x00 => {
                if aligned < addr::BIOS_SIZE as u32 && self.bios_accessible {
                    self.bios.read_word(aligned)
                } else {
                    self.open_bus(addr)
                }
            }
            0x02 => self.ewram.read_word(aligned),
            0x03 => self.iwram.read_word(aligned),
            0x04 => match Self::io_offset(aligned) {
                Some(offset) => {
                    let lo = self.io_read_half(offset);
                    let hi = self.io_read_half(offset + 2);
                    if lo.is_none() && hi.is_none() {
                        self.open_bus(addr)
                    } else {
                        (hi.unwrap_or(0) as u32) << 16 | lo.unwrap_or(0) as u32
                    }
                }
                None => self.open_bus(addr),
            },
            0x05 => self.palette.read_word(aligned),
            0x06 => self.vram.read_word(aligned),
            0x07 => self.oam.read_word(aligned),
            0x08..=0x0D => {
                let offset = Self::rom_offset(aligned);
                if self.cart.out_of_range(offset) {
                    self.open_bus(addr)
                } else {
                    self.cart.read_rom_word(offset)
                }
            }
            0x0E | 0x0F => {
                if self.cart.backup_type() == BackupType::None {
                    self.open_bus(addr)
                } else {
                    let byte = self.cart.read_backup(aligned) as u32;
                    byte * 0x0101_0101
                }
            }
            _ => self.open_bus(addr),
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        match addr >> 24 {
            0x00 | 0x01 => {
                log::warn!("byte write {addr:08X} to BIOS/unused dropped");
            }
            0x02 => self.ewram.write_byte(addr, value),
            0x03 => self.iwram.write_byte(addr, value),
            0x04 => match Self::io_offset(addr) {
                Some(offset) => self.io_write_byte(offset, value),
                None => log::warn!("byte write {addr:08X} to unmapped I/O dropped"),
            },
            // The 16-bit video bus widens byte stores into both lanes
            0x05 => self.palette.write_half(addr & !1, (value as u16) * 0x0101),
            0x06 => {
                if Vram::in_obj_region(addr) {
                    log::warn!("byte write {addr:08X} to OBJ VRAM dropped");
                } else {
                    self.vram.write_half(addr & !1, (value as u16) * 0x0101);
                }
            }
            0x07 => {
                log::warn!("byte write {addr:08X} to OAM dropped");
            }
            0x08..=0x0D => {
                log::warn!("byte write {addr:08X} to cartridge ROM dropped");
            }
            0x0E | 0x0F => self.cart.write_backup(addr, value),
            _ => {
                log::warn!("byte write {addr:08X} out of range dropped");
            }
        }
    }

    fn write_half(&mut self, addr: u32, value: u16) {
        let aligned = addr & !1;
        match aligned >> 24 {
            0x00 | 0x01 => {
                log::warn!("half write {aligned:08X} to BIOS/unused dropped");
            }
            0x02 => self.ewram.write_half(aligned, value),
            0x03 => self.iwram.write_half(aligned, value),
            0x04 => match Self::io_offset(aligned) {
                Some(offset) => self.io_write_half(offset, value),
                None => log::warn!("half write {aligned:08X} to unmapped I/O dropped"),
            },
            0x05 => self.palette.write_half(aligned, value),
            0x06 => self.vram.write_half(aligned, value),
            0x07 => self.oam.write_half(aligned, value),
            0x08..=0x0D => {
                log::warn!("half write {aligned:08X} to cartridge ROM dropped");
            }
            0x0E | 0x0F => {
                // Narrow bus: the chip sees one byte, lane-selected
                self.cart.write_backup(aligned, (value >> ((addr & 1) * 8)) as u8);
            }
            _ => {
                log::warn!("half write {aligned:08X} out of range dropped");
            }
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        let aligned = addr & !3;
        match aligned >> 24 {
            0x00 | 0x01 => {
                log::warn!("word write {aligned:08X} to BIOS/unused dropped");
            }
            0x02 => self.ewram.write_word(aligned, value),
            0x03 => self.iwram.write_word(aligned, value),
            0x04 => match Self::io_offset(aligned) {
                Some(offset) => {
                    self.io_write_half(offset, value as u16);
                    self.io_write_half(offset + 2, (value >> 16) as u16);
                }
                None => log::warn!("word write {aligned:08X} to unmapped I/O dropped"),
            },
            0x05 => self.palette.write_word(aligned, value),
            0x06 => self.vram.write_word(aligned, value),
            0x07 => self.oam.write_word(aligned, value),
            0x08..=0x0D => {
                log::warn!("word write {aligned:08X} to cartridge ROM dropped");
            }
            0x0E | 0x0F => {
                self.cart.write_backup(aligned, (value >> ((addr & 3) * 8)) as u8);
            }
            _ => {
                log::warn!("word write {aligned:08X} out of range dropped");
            }
        }
    }

    fn fetch_half(&mut self, addr: u32) -> u16 {
        let value = self.read_half(addr);
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = value as u32;
        self.thumb_fetch = true;
        self.bios_accessible = addr < addr::BIOS_SIZE as u32;
        value
    }

    fn fetch_word(&mut self, addr: u32) -> u32 {
        let value = self.read_word(addr);
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = value;
        self.thumb_fetch = false;
        self.bios_accessible = addr < addr::BIOS_SIZE as u32;
        value
    }
}
