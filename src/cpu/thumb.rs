//! THUMB (16-bit) instruction decoding and execution
//!
//! The 19 THUMB formats are distinguished by the top bits of the
//! halfword. Most compress an ARM data-processing or transfer form with
//! implicit flags; the executor reuses the same shifter and ALU helpers
//! so the flag behavior matches the ARM paths bit for bit.

use super::helpers::{barrel_shift, sign_extend, ShiftKind};
use super::{vector, Cpu, Mode};
use crate::bus::Bus;

/// A decoded THUMB instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbInstr {
    /// Format 1: LSL/LSR/ASR by immediate
    MoveShifted {
        shift: ShiftKind,
        amount: u32,
        rs: usize,
        rd: usize,
    },
    /// Format 2: ADD/SUB with register or 3-bit immediate
    AddSub {
        sub: bool,
        operand: AddSubOperand,
        rs: usize,
        rd: usize,
    },
    /// Format 3: MOV/CMP/ADD/SUB with 8-bit immediate
    Immediate { op: u32, rd: usize, imm: u32 },
    /// Format 4: register-register ALU operations
    Alu { op: u32, rs: usize, rd: usize },
    /// Format 5: high-register ADD/CMP/MOV and BX
    HiRegister { op: u32, rs: usize, rd: usize },
    /// Format 6: PC-relative word load
    PcRelativeLoad { rd: usize, offset: u32 },
    /// Format 7: word/byte load-store with register offset
    LoadStoreReg {
        load: bool,
        byte: bool,
        ro: usize,
        rb: usize,
        rd: usize,
    },
    /// Format 8: halfword and sign-extended load-store
    LoadStoreSignExt {
        h: bool,
        sign: bool,
        ro: usize,
        rb: usize,
        rd: usize,
    },
    /// Format 9: word/byte load-store with 5-bit immediate offset
    LoadStoreImm {
        load: bool,
        byte: bool,
        offset: u32,
        rb: usize,
        rd: usize,
    },
    /// Format 10: halfword load-store with immediate offset
    LoadStoreHalf {
        load: bool,
        offset: u32,
        rb: usize,
        rd: usize,
    },
    /// Format 11: SP-relative word load-store
    SpRelative { load: bool, rd: usize, offset: u32 },
    /// Format 12: address generation from PC or SP
    LoadAddress { sp: bool, rd: usize, offset: u32 },
    /// Format 13: adjust SP by a signed 9-bit amount
    AddSp { offset: i32 },
    /// Format 14: PUSH/POP, optionally with LR/PC
    PushPop { pop: bool, lr_pc: bool, rlist: u8 },
    /// Format 15: LDMIA/STMIA with writeback
    MultipleLoadStore { load: bool, rb: usize, rlist: u8 },
    /// Format 16: conditional branch, ARM condition codes
    CondBranch { condition: u32, offset: i32 },
    /// Format 17: software interrupt
    Swi,
    /// Format 18: unconditional branch
    Branch { offset: i32 },
    /// Format 19: the two-halfword BL pair
    LongBranchLink { high: bool, offset: u32 },
    Undefined,
}

/// Second operand of the format-2 add/subtract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddSubOperand {
    Register(usize),
    Immediate(u32),
}

#[inline]
fn reg(half: u16, shift: u32) -> usize {
    (half >> shift & 7) as usize
}

/// Decode a 16-bit THUMB instruction
pub fn decode_thumb(half: u16) -> ThumbInstr {
    match half >> 8 {
        0x00..=0x17 => ThumbInstr::MoveShifted {
            shift: ShiftKind::from_bits(half as u32 >> 11),
            amount: (half >> 6 & 0x1F) as u32,
            rs: reg(half, 3),
            rd: reg(half, 0),
        },
        0x18..=0x1F => {
            let operand = if half & 1 << 10 != 0 {
                AddSubOperand::Immediate((half >> 6 & 7) as u32)
            } else {
                AddSubOperand::Register(reg(half, 6))
            };
            ThumbInstr::AddSub {
                sub: half & 1 << 9 != 0,
                operand,
                rs: reg(half, 3),
                rd: reg(half, 0),
            }
        }
        0x20..=0x3F => ThumbInstr::Immediate {
            op: (half >> 11 & 3) as u32,
            rd: reg(half, 8),
            imm: (half & 0xFF) as u32,
        },
        0x40..=0x43 => ThumbInstr::Alu {
            op: (half >> 6 & 0xF) as u32,
            rs: reg(half, 3),
            rd: reg(half, 0),
        },
        0x44..=0x47 => ThumbInstr::HiRegister {
            op: (half >> 8 & 3) as u32,
            rs: (half >> 3 & 0xF) as usize,
            rd: (reg(half, 0)) | ((half >> 7 & 1) as usize) << 3,
        },
        0x48..=0x4F => ThumbInstr::PcRelativeLoad {
            rd: reg(half, 8),
            offset: ((half & 0xFF) as u32) << 2,
        },
        0x50..=0x5F => {
            if half & 1 << 9 == 0 {
                ThumbInstr::LoadStoreReg {
                    load: half & 1 << 11 != 0,
                    byte: half & 1 << 10 != 0,
                    ro: reg(half, 6),
                    rb: reg(half, 3),
                    rd: reg(half, 0),
                }
            } else {
                ThumbInstr::LoadStoreSignExt {
                    h: half & 1 << 11 != 0,
                    sign: half & 1 << 10 != 0,
                    ro: reg(half, 6),
                    rb: reg(half, 3),
                    rd: reg(half, 0),
                }
            }
        }
        0x60..=0x7F => {
            let byte = half & 1 << 12 != 0;
            let imm5 = (half >> 6 & 0x1F) as u32;
            ThumbInstr::LoadStoreImm {
                load: half & 1 << 11 != 0,
                byte,
                offset: if byte { imm5 } else { imm5 << 2 },
                rb: reg(half, 3),
                rd: reg(half, 0),
            }
        }
        0x80..=0x8F => ThumbInstr::LoadStoreHalf {
            load: half & 1 << 11 != 0,
            offset: ((half >> 6 & 0x1F) as u32) << 1,
            rb: reg(half, 3),
            rd: reg(half, 0),
        },
        0x90..=0x9F => ThumbInstr::SpRelative {
            load: half & 1 << 11 != 0,
            rd: reg(half, 8),
            offset: ((half & 0xFF) as u32) << 2,
        },
        0xA0..=0xAF => ThumbInstr::LoadAddress {
            sp: half & 1 << 11 != 0,
            rd: reg(half, 8),
            offset: ((half & 0xFF) as u32) << 2,
        },
        0xB0 => {
            let magnitude = ((half & 0x7F) as i32) << 2;
            ThumbInstr::AddSp {
                offset: if half & 1 << 7 != 0 {
                    -magnitude
                } else {
                    magnitude
                },
            }
        }
        0xB4 | 0xB5 | 0xBC | 0xBD => ThumbInstr::PushPop {
            pop: half & 1 << 11 != 0,
            lr_pc: half & 1 << 8 != 0,
            rlist: half as u8,
        },
        0xC0..=0xCF => ThumbInstr::MultipleLoadStore {
            load: half & 1 << 11 != 0,
            rb: reg(half, 8),
            rlist: half as u8,
        },
        0xD0..=0xDD => ThumbInstr::CondBranch {
            condition: (half >> 8 & 0xF) as u32,
            offset: (sign_extend((half & 0xFF) as u32, 8) << 1) as i32,
        },
        0xDF => ThumbInstr::Swi,
        0xE0..=0xE7 => ThumbInstr::Branch {
            offset: (sign_extend((half & 0x7FF) as u32, 11) << 1) as i32,
        },
        0xF0..=0xFF => ThumbInstr::LongBranchLink {
            high: half & 1 << 11 != 0,
            offset: (half & 0x7FF) as u32,
        },
        _ => ThumbInstr::Undefined,
    }
}

impl Cpu {
    pub(super) fn execute_thumb<B: Bus>(&mut self, bus: &mut B, half: u16) {
        match decode_thumb(half) {
            ThumbInstr::MoveShifted {
                shift,
                amount,
                rs,
                rd,
            } => {
                let (result, carry) =
                    barrel_shift(shift, self.get_register(rs), amount, self.cpsr.carry(), false);
                self.set_flags_nz(result);
                self.cpsr.set_carry(carry);
                self.set_register(bus, rd, result);
                self.tick(1);
            }
            ThumbInstr::AddSub {
                sub,
                operand,
                rs,
                rd,
            } => {
                let op1 = self.get_register(rs);
                let op2 = match operand {
                    AddSubOperand::Register(rn) => self.get_register(rn),
                    AddSubOperand::Immediate(imm) => imm,
                };
                let result = if sub {
                    self.sub_with_flags(op1, op2)
                } else {
                    self.add_with_flags(op1, op2)
                };
                self.set_register(bus, rd, result);
                self.tick(1);
            }
            ThumbInstr::Immediate { op, rd, imm } => {
                self.thumb_immediate(bus, op, rd, imm);
            }
            ThumbInstr::Alu { op, rs, rd } => {
                self.thumb_alu(bus, op, rs, rd);
            }
            ThumbInstr::HiRegister { op, rs, rd } => {
                self.thumb_hi_register(bus, op, rs, rd);
            }
            ThumbInstr::PcRelativeLoad { rd, offset } => {
                // The PC's bit 1 is invisible to this addressing mode
                let addr = (self.pc() & !2).wrapping_add(offset);
                let value = bus.read_word(addr);
                self.set_register(bus, rd, value);
                self.tick(3);
            }
            ThumbInstr::LoadStoreReg {
                load,
                byte,
                ro,
                rb,
                rd,
            } => {
                let addr = self.get_register(rb).wrapping_add(self.get_register(ro));
                self.thumb_load_store_word_byte(bus, load, byte, addr, rd);
            }
            ThumbInstr::LoadStoreSignExt { h, sign, ro, rb, rd } => {
                let addr = self.get_register(rb).wrapping_add(self.get_register(ro));
                self.thumb_load_store_sign_ext(bus, h, sign, addr, rd);
            }
            ThumbInstr::LoadStoreImm {
                load,
                byte,
                offset,
                rb,
                rd,
            } => {
                let addr = self.get_register(rb).wrapping_add(offset);
                self.thumb_load_store_word_byte(bus, load, byte, addr, rd);
            }
            ThumbInstr::LoadStoreHalf {
                load,
                offset,
                rb,
                rd,
            } => {
                let addr = self.get_register(rb).wrapping_add(offset);
                if load {
                    let value = (bus.read_half(addr) as u32).rotate_right((addr & 1) * 8);
                    self.set_register(bus, rd, value);
                    self.tick(3);
                } else {
                    bus.write_half(addr, self.get_register(rd) as u16);
                    self.tick(2);
                }
            }
            ThumbInstr::SpRelative { load, rd, offset } => {
                let addr = self.get_register(13).wrapping_add(offset);
                self.thumb_load_store_word_byte(bus, load, false, addr, rd);
            }
            ThumbInstr::LoadAddress { sp, rd, offset } => {
                let base = if sp {
                    self.get_register(13)
                } else {
                    self.pc() & !2
                };
                self.set_register(bus, rd, base.wrapping_add(offset));
                self.tick(1);
            }
            ThumbInstr::AddSp { offset } => {
                let sp = self.get_register(13).wrapping_add(offset as u32);
                self.set_register(bus, 13, sp);
                self.tick(1);
            }
            ThumbInstr::PushPop { pop, lr_pc, rlist } => {
                self.thumb_push_pop(bus, pop, lr_pc, rlist);
            }
            ThumbInstr::MultipleLoadStore { load, rb, rlist } => {
                self.thumb_multiple_load_store(bus, load, rb, rlist);
            }
            ThumbInstr::CondBranch { condition, offset } => {
                if self.check_cond(condition) {
                    let target = self.pc().wrapping_add(offset as u32);
                    self.set_pc(bus, target);
                    self.tick(3);
                } else {
                    self.tick(1);
                }
            }
            ThumbInstr::Swi => {
                self.exception(bus, Mode::Supervisor, vector::SWI);
            }
            ThumbInstr::Branch { offset } => {
                let target = self.pc().wrapping_add(offset as u32);
                self.set_pc(bus, target);
                self.tick(3);
            }
            ThumbInstr::LongBranchLink { high, offset } => {
                self.thumb_long_branch_link(bus, high, offset);
            }
            ThumbInstr::Undefined => self.undefined(bus, half as u32),
        }
    }

    fn thumb_immediate<B: Bus>(&mut self, bus: &mut B, op: u32, rd: usize, imm: u32) {
        let current = self.get_register(rd);
        match op {
            // MOV
            0 => {
                self.set_flags_nz(imm);
                self.set_register(bus, rd, imm);
            }
            // CMP
            1 => {
                self.sub_with_flags(current, imm);
            }
            // ADD
            2 => {
                let result = self.add_with_flags(current, imm);
                self.set_register(bus, rd, result);
            }
            // SUB
            _ => {
                let result = self.sub_with_flags(current, imm);
                self.set_register(bus, rd, result);
            }
        }
        self.tick(1);
    }

    fn thumb_alu<B: Bus>(&mut self, bus: &mut B, op: u32, rs: usize, rd: usize) {
        let op1 = self.get_register(rd);
        let op2 = self.get_register(rs);
        let carry = self.cpsr.carry();

        let mut shift = |cpu: &mut Self, kind: ShiftKind| {
            cpu.tick(1);
            let (result, carry_out) = barrel_shift(kind, op1, op2 & 0xFF, carry, true);
            cpu.set_flags_nz(result);
            cpu.cpsr.set_carry(carry_out);
            result
        };

        let (result, write) = match op {
            0x0 => {
                let r = op1 & op2;
                self.set_flags_nz(r);
                (r, true)
            }
            0x1 => {
                let r = op1 ^ op2;
                self.set_flags_nz(r);
                (r, true)
            }
            0x2 => (shift(self, ShiftKind::Lsl), true),
            0x3 => (shift(self, ShiftKind::Lsr), true),
            0x4 => (shift(self, ShiftKind::Asr), true),
            0x5 => (self.adc_with_flags(op1, op2, carry), true),
            0x6 => (self.sbc_with_flags(op1, op2, carry), true),
            0x7 => (shift(self, ShiftKind::Ror), true),
            0x8 => {
                self.set_flags_nz(op1 & op2);
                (0, false)
            }
            0x9 => (self.sub_with_flags(0, op2), true),
            0xA => {
                self.sub_with_flags(op1, op2);
                (0, false)
            }
            0xB => {
                self.add_with_flags(op1, op2);
                (0, false)
            }
            0xC => {
                let r = op1 | op2;
                self.set_flags_nz(r);
                (r, true)
            }
            0xD => {
                self.tick(1);
                let r = op1.wrapping_mul(op2);
                self.set_flags_nz(r);
                (r, true)
            }
            0xE => {
                let r = op1 & !op2;
                self.set_flags_nz(r);
                (r, true)
            }
            _ => {
                let r = !op2;
                self.set_flags_nz(r);
                (r, true)
            }
        };

        if write {
            self.set_register(bus, rd, result);
        }
        self.tick(1);
    }

    fn thumb_hi_register<B: Bus>(&mut self, bus: &mut B, op: u32, rs: usize, rd: usize) {
        match op {
            // ADD: no flags, even with r15
            0 => {
                let result = self.get_register(rd).wrapping_add(self.get_register(rs));
                self.set_register(bus, rd, result);
            }
            // CMP: the only flag-setting high-register op
            1 => {
                let op1 = self.get_register(rd);
                let op2 = self.get_register(rs);
                self.sub_with_flags(op1, op2);
            }
            // MOV
            2 => {
                let value = self.get_register(rs);
                self.set_register(bus, rd, value);
            }
            // BX: bit 0 of the target selects the state
            _ => {
                let target = self.get_register(rs);
                self.cpsr.set_thumb(target & 1 != 0);
                self.set_pc(bus, target);
                self.tick(2);
            }
        }
        self.tick(1);
    }

    fn thumb_load_store_word_byte<B: Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        byte: bool,
        addr: u32,
        rd: usize,
    ) {
        if load {
            let value = if byte {
                bus.read_byte(addr) as u32
            } else {
                bus.read_word(addr).rotate_right((addr & 3) * 8)
            };
            self.set_register(bus, rd, value);
            self.tick(3);
        } else {
            let value = self.get_register(rd);
            if byte {
                bus.write_byte(addr, value as u8);
            } else {
                bus.write_word(addr, value);
            }
            self.tick(2);
        }
    }

    fn thumb_load_store_sign_ext<B: Bus>(
        &mut self,
        bus: &mut B,
        h: bool,
        sign: bool,
        addr: u32,
        rd: usize,
    ) {
        match (sign, h) {
            // STRH
            (false, false) => {
                bus.write_half(addr, self.get_register(rd) as u16);
                self.tick(2);
                return;
            }
            // LDRH with the unaligned rotate
            (false, true) => {
                let value = (bus.read_half(addr) as u32).rotate_right((addr & 1) * 8);
                self.set_register(bus, rd, value);
            }
            // LDRSB
            (true, false) => {
                let value = sign_extend(bus.read_byte(addr) as u32, 8);
                self.set_register(bus, rd, value);
            }
            // LDRSH; odd addresses degrade to a sign-extended byte
            (true, true) => {
                let value = if addr & 1 != 0 {
                    sign_extend(bus.read_byte(addr) as u32, 8)
                } else {
                    sign_extend(bus.read_half(addr) as u32, 16)
                };
                self.set_register(bus, rd, value);
            }
        }
        self.tick(3);
    }

    fn thumb_push_pop<B: Bus>(&mut self, bus: &mut B, pop: bool, lr_pc: bool, rlist: u8) {
        let count = rlist.count_ones() + lr_pc as u32;
        if count == 0 {
            log::warn!("PUSH/POP with empty register list ignored");
            self.tick(1);
            return;
        }

        let sp = self.get_register(13);
        if pop {
            let mut addr = sp;
            for index in 0..8 {
                if rlist & 1 << index != 0 {
                    let value = bus.read_word(addr);
                    self.set_register(bus, index, value);
                    addr = addr.wrapping_add(4);
                }
            }
            if lr_pc {
                let value = bus.read_word(addr);
                addr = addr.wrapping_add(4);
                // Loaded PC selects the state from bit 0
                self.cpsr.set_thumb(value & 1 != 0);
                self.set_register(bus, 13, addr);
                self.set_pc(bus, value);
                self.tick(2 + count);
                return;
            }
            self.set_register(bus, 13, addr);
        } else {
            let mut addr = sp.wrapping_sub(4 * count);
            self.set_register(bus, 13, addr);
            for index in 0..8 {
                if rlist & 1 << index != 0 {
                    let value = self.get_register(index);
                    bus.write_word(addr, value);
                    addr = addr.wrapping_add(4);
                }
            }
            if lr_pc {
                bus.write_word(addr, self.get_register(14));
            }
        }
        self.tick(1 + count);
    }

    fn thumb_multiple_load_store<B: Bus>(&mut self, bus: &mut B, load: bool, rb: usize, rlist: u8) {
        if rlist == 0 {
            log::warn!("LDMIA/STMIA with empty register list ignored");
            self.tick(1);
            return;
        }

        let count = rlist.count_ones();
        let base = self.get_register(rb);
        let final_base = base.wrapping_add(4 * count);

        if load {
            // Base writeback first; a loaded base register wins
            self.set_register(bus, rb, final_base);
            let mut addr = base;
            for index in 0..8 {
                if rlist & 1 << index != 0 {
                    let value = bus.read_word(addr);
                    self.set_register(bus, index, value);
                    addr = addr.wrapping_add(4);
                }
            }
        } else {
            let mut addr = base;
            for index in 0..8 {
                if rlist & 1 << index != 0 {
                    let value = self.get_register(index);
                    bus.write_word(addr, value);
                    addr = addr.wrapping_add(4);
                }
            }
            self.set_register(bus, rb, final_base);
        }
        self.tick(1 + count);
    }

    /// The BL pair: the first half parks the upper offset bits in LR, the
    /// second combines them, links the return address (with its THUMB
    /// bit), and branches.
    fn thumb_long_branch_link<B: Bus>(&mut self, bus: &mut B, high: bool, offset: u32) {
        if !high {
            let upper = sign_extend(offset, 11) << 12;
            let lr = self.pc().wrapping_add(upper);
            self.set_register(bus, 14, lr);
            self.tick(1);
        } else {
            let target = self.get_register(14).wrapping_add(offset << 1);
            let return_addr = self.pc().wrapping_sub(2) | 1;
            self.set_register(bus, 14, return_addr);
            self.set_pc(bus, target);
            self.tick(3);
        }
    }
}
