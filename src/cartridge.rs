//! Cartridge ROM and backup storage
//!
//! Games ship one of three persistent-storage chips behind 0x0E000000:
//! battery-backed SRAM, flash (64KB or 128KB), or a serial EEPROM. There is
//! no header field describing which; commercial ROMs embed an ASCII marker
//! for the library version they link, so detection scans the ROM image for
//! those markers the way the library initializers left them.
//!
//! Reference: GBATEK "GBA Cart Backup IDs"

use crate::memory::{addr, read_half_le, read_word_le};
use thiserror::Error;

/// SRAM chips are 32KB, mirrored across the backup page
pub const SRAM_SIZE: usize = 0x8000;
/// 512Kbit flash
pub const FLASH_64K_SIZE: usize = 0x1_0000;
/// 1Mbit flash
pub const FLASH_128K_SIZE: usize = 0x2_0000;

/// Backup markers appear word-aligned at or after this ROM offset
/// (everything before it is the cartridge header)
const BACKUP_SCAN_START: usize = 0xE4;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("ROM image is empty")]
    Empty,
    #[error("ROM image is {0} bytes; the cartridge bus addresses at most 32MB")]
    TooLarge(usize),
}

/// Backup chip type detected from the ROM image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    /// No marker found; reads of the backup page fall to open-bus
    None,
    Sram,
    Eeprom,
    Flash64K,
    Flash128K,
}

/// Cartridge state: the ROM image plus backup storage
pub struct Cartridge {
    rom: Vec<u8>,
    backup_type: BackupType,
    backup: Vec<u8>,
}

impl Cartridge {
    /// Create a cartridge with no ROM inserted. All reads fall to open-bus
    /// until `load_rom` succeeds.
    pub fn new() -> Self {
        Self {
            rom: Vec::new(),
            backup_type: BackupType::None,
            backup: Vec::new(),
        }
    }

    /// Load a ROM image and detect its backup chip
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), CartridgeError> {
        if image.is_empty() {
            return Err(CartridgeError::Empty);
        }
        if image.len() > addr::ROM_MAX_SIZE {
            return Err(CartridgeError::TooLarge(image.len()));
        }

        self.rom = image.to_vec();
        self.backup_type = detect_backup_type(&self.rom);
        self.backup = match self.backup_type {
            BackupType::Sram => vec![0; SRAM_SIZE],
            BackupType::Flash64K => vec![0xFF; FLASH_64K_SIZE],
            BackupType::Flash128K => vec![0xFF; FLASH_128K_SIZE],
            BackupType::None | BackupType::Eeprom => Vec::new(),
        };
        log::debug!(
            "loaded {} byte ROM, backup type {:?}",
            self.rom.len(),
            self.backup_type
        );
        Ok(())
    }

    pub fn rom_loaded(&self) -> bool {
        !self.rom.is_empty()
    }

    pub fn rom_size(&self) -> usize {
        self.rom.len()
    }

    pub fn backup_type(&self) -> BackupType {
        self.backup_type
    }

    /// Whether a mirrored cartridge offset is past the end of the ROM image
    /// (such reads are open-bus)
    #[inline]
    pub fn out_of_range(&self, offset: u32) -> bool {
        offset as usize >= self.rom.len()
    }

    // ROM reads take the offset within the 32MB cartridge window
    // (the bus collapses the three wait-state mirrors first).

    #[inline]
    pub fn read_rom_byte(&self, offset: u32) -> u8 {
        self.rom[offset as usize]
    }

    #[inline]
    pub fn read_rom_half(&self, offset: u32) -> u16 {
        read_half_le(&self.rom, offset as usize)
    }

    #[inline]
    pub fn read_rom_word(&self, offset: u32) -> u32 {
        read_word_le(&self.rom, offset as usize)
    }

    /// Read from the backup page. `addr` is the full bus address.
    pub fn read_backup(&self, addr: u32) -> u8 {
        match self.backup_type {
            BackupType::Sram => self.backup[(addr as usize) & (SRAM_SIZE - 1)],
            BackupType::Flash64K | BackupType::Flash128K => {
                // Chip-identification stub: Sanyo manufacturer/device ID at
                // the first two bytes, data reads elsewhere.
                match addr & 0x1_FFFF {
                    0x0 => 0x62,
                    0x1 => 0x13,
                    offset => self.backup[offset as usize % self.backup.len()],
                }
            }
            BackupType::Eeprom => {
                // Serial protocol not modeled; report "ready"
                1
            }
            BackupType::None => {
                log::warn!("backup read {addr:08X} with no backup chip detected");
                0
            }
        }
    }

    /// Write to the backup page. `addr` is the full bus address.
    pub fn write_backup(&mut self, addr: u32, value: u8) {
        match self.backup_type {
            BackupType::Sram => {
                self.backup[(addr as usize) & (SRAM_SIZE - 1)] = value;
            }
            BackupType::Flash64K | BackupType::Flash128K => {
                // Command-state machine (erase/bank switch) not modeled;
                // plain byte programming is enough for the save paths
                let len = self.backup.len();
                self.backup[(addr as usize) & (len - 1)] = value;
            }
            BackupType::Eeprom => {
                log::warn!("EEPROM write {addr:08X} <- {value:02X} ignored");
            }
            BackupType::None => {
                log::warn!("backup write {addr:08X} with no backup chip detected");
            }
        }
    }

    /// Backup contents, for host-side save persistence
    pub fn backup_data(&self) -> &[u8] {
        &self.backup
    }

    /// Replace backup contents (host-side save restore). Oversize input is
    /// truncated to the chip size.
    pub fn restore_backup(&mut self, data: &[u8]) {
        let len = data.len().min(self.backup.len());
        self.backup[..len].copy_from_slice(&data[..len]);
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan the ROM image for a backup library marker.
///
/// Markers are word-aligned ASCII strings; the scan starts past the header.
/// FLASH512_ and the bare FLASH_ both mean 64KB; FLASH1M_ means 128KB.
fn detect_backup_type(rom: &[u8]) -> BackupType {
    let mut offset = BACKUP_SCAN_START;
    while offset + 4 < rom.len() {
        let window = &rom[offset..];
        if window.starts_with(b"SRAM") {
            return BackupType::Sram;
        }
        if window.starts_with(b"EEPROM") {
            return BackupType::Eeprom;
        }
        if window.starts_with(b"FLASH1M_") {
            return BackupType::Flash128K;
        }
        if window.starts_with(b"FLASH512_") || window.starts_with(b"FLASH_") {
            return BackupType::Flash64K;
        }
        offset += 4;
    }
    BackupType::None
}
