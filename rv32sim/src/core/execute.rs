//! Per-instruction semantics.
//!
//! Every instruction has a two-part contract: its effect on registers and
//! memory, and its effect on the PC. Control transfers set the PC
//! themselves; everything else advances it by four after retirement.

use crate::core::instruction::{
    BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, ShiftImmOp, StoreWidth,
};
use crate::core::Hart;

impl Hart {
    /// Execute one decoded instruction, updating registers, memory and the
    /// PC. Returns `true` when the instruction was `ebreak`, which leaves
    /// the PC in place as the debugger rendezvous point.
    pub(crate) fn execute(&mut self, instruction: Instruction) -> bool {
        match instruction {
            Instruction::Lui { rd, imm } => {
                self.write_reg(rd, imm as u32);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Auipc { rd, imm } => {
                self.write_reg(rd, self.pc.wrapping_add(imm as u32));
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Jal { rd, offset } => {
                self.write_reg(rd, self.pc.wrapping_add(4));
                self.pc = self.pc.wrapping_add(offset as u32);
            }
            Instruction::Jalr { rd, rs1, offset } => {
                let base = self.read_reg(rs1);
                self.write_reg(rd, self.pc.wrapping_add(4));
                self.pc = base.wrapping_add(offset as u32);
            }
            Instruction::Branch { cond, rs1, rs2, offset } => {
                let lhs = self.read_reg(rs1);
                let rhs = self.read_reg(rs2);
                let taken = match cond {
                    BranchCondition::Beq => lhs == rhs,
                    BranchCondition::Bne => lhs != rhs,
                    BranchCondition::Blt => (lhs as i32) < (rhs as i32),
                    BranchCondition::Bge => (lhs as i32) >= (rhs as i32),
                    BranchCondition::Bltu => lhs < rhs,
                    BranchCondition::Bgeu => lhs >= rhs,
                };
                if taken {
                    self.pc = self.pc.wrapping_add(offset as u32);
                } else {
                    self.pc = self.pc.wrapping_add(4);
                }
            }
            Instruction::Load { width, rd, rs1, offset } => {
                let addr = self.read_reg(rs1).wrapping_add(offset as u32);
                let loaded = self.load(width, addr);
                self.write_reg(rd, loaded);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Store { width, rs1, rs2, offset } => {
                let addr = self.read_reg(rs1).wrapping_add(offset as u32);
                let value = self.read_reg(rs2);
                let bytes = value.to_le_bytes();
                let len = match width {
                    StoreWidth::Sb => 1,
                    StoreWidth::Sh => 2,
                    StoreWidth::Sw => 4,
                };
                if let Err(err) = self.mem_write(addr, &bytes[..len]) {
                    tracing::warn!("store at pc {:#010x} failed: {err}", self.pc);
                }
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::OpImm { op, rd, rs1, imm } => {
                let lhs = self.read_reg(rs1);
                let result = match op {
                    RegImmOp::Addi => lhs.wrapping_add(imm as u32),
                    RegImmOp::Slti => ((lhs as i32) < imm) as u32,
                    RegImmOp::Sltiu => (lhs < imm as u32) as u32,
                    RegImmOp::Xori => lhs ^ imm as u32,
                    RegImmOp::Ori => lhs | imm as u32,
                    RegImmOp::Andi => lhs & imm as u32,
                };
                self.write_reg(rd, result);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::ShiftImm { op, rd, rs1, shamt } => {
                let lhs = self.read_reg(rs1);
                let result = match op {
                    ShiftImmOp::Slli => lhs << shamt,
                    ShiftImmOp::Srli => lhs >> shamt,
                    ShiftImmOp::Srai => ((lhs as i32) >> shamt) as u32,
                };
                self.write_reg(rd, result);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Op { op, rd, rs1, rs2 } => {
                let lhs = self.read_reg(rs1);
                let rhs = self.read_reg(rs2);
                self.write_reg(rd, alu(op, lhs, rhs));
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Csr { op, rd, rs1, csr } => {
                let source = self.read_reg(rs1);
                self.csr_op(op, rd, csr, source);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::CsrImm { op, rd, uimm, csr } => {
                self.csr_op(op, rd, csr, uimm);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Ecall => {
                // No environment to call into; retire as a no-op.
                tracing::warn!("ecall at pc {:#010x} ignored", self.pc);
                self.pc = self.pc.wrapping_add(4);
            }
            Instruction::Ebreak => return true,
            Instruction::Mret => self.exit_irq(),
        }
        false
    }

    fn load(&mut self, width: LoadWidth, addr: u32) -> u32 {
        let len = match width {
            LoadWidth::Lb | LoadWidth::Lbu => 1,
            LoadWidth::Lh | LoadWidth::Lhu => 2,
            LoadWidth::Lw => 4,
        };
        let mut bytes = [0u8; 4];
        if let Err(err) = self.mem_read(addr, &mut bytes[..len]) {
            tracing::warn!("load at pc {:#010x} failed: {err}", self.pc);
        }
        match width {
            LoadWidth::Lb => bytes[0] as i8 as i32 as u32,
            LoadWidth::Lbu => bytes[0] as u32,
            LoadWidth::Lh => i16::from_le_bytes([bytes[0], bytes[1]]) as i32 as u32,
            LoadWidth::Lhu => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            LoadWidth::Lw => u32::from_le_bytes(bytes),
        }
    }

    /// All CSR flavours capture the old value into `rd` before computing
    /// the new value from it and the source operand.
    fn csr_op(&mut self, op: CsrOp, rd: u32, csr: u16, source: u32) {
        let old = self.csrs().read(csr);
        let new = match op {
            CsrOp::ReadWrite => source,
            CsrOp::ReadSet => old | source,
            CsrOp::ReadClear => old & !source,
        };
        self.write_reg(rd, old);
        self.csrs_mut().write(csr, new);
    }
}

fn alu(op: RegRegOp, lhs: u32, rhs: u32) -> u32 {
    match op {
        RegRegOp::Add => lhs.wrapping_add(rhs),
        RegRegOp::Sub => lhs.wrapping_sub(rhs),
        RegRegOp::Sll => lhs << (rhs & 0x1F),
        RegRegOp::Slt => ((lhs as i32) < (rhs as i32)) as u32,
        RegRegOp::Sltu => (lhs < rhs) as u32,
        RegRegOp::Xor => lhs ^ rhs,
        RegRegOp::Srl => lhs >> (rhs & 0x1F),
        RegRegOp::Sra => ((lhs as i32) >> (rhs & 0x1F)) as u32,
        RegRegOp::Or => lhs | rhs,
        RegRegOp::And => lhs & rhs,
        RegRegOp::Mul => lhs.wrapping_mul(rhs),
        RegRegOp::Mulh => (((lhs as i32 as i64) * (rhs as i32 as i64)) >> 32) as u32,
        RegRegOp::Mulhsu => (((lhs as i32 as i64) * (rhs as i64)) >> 32) as u32,
        RegRegOp::Mulhu => (((lhs as u64) * (rhs as u64)) >> 32) as u32,
        RegRegOp::Div => {
            let (lhs, rhs) = (lhs as i32, rhs as i32);
            if rhs == 0 {
                u32::MAX
            } else {
                lhs.wrapping_div(rhs) as u32
            }
        }
        RegRegOp::Divu => {
            if rhs == 0 {
                u32::MAX
            } else {
                lhs / rhs
            }
        }
        RegRegOp::Rem => {
            let (lhs, rhs) = (lhs as i32, rhs as i32);
            if rhs == 0 {
                lhs as u32
            } else {
                lhs.wrapping_rem(rhs) as u32
            }
        }
        RegRegOp::Remu => {
            if rhs == 0 {
                lhs
            } else {
                lhs % rhs
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::asm;
    use crate::core::csr;
    use crate::device::{Memory, MEM_ATTR_READABLE, MEM_ATTR_WRITABLE};
    use std::sync::Arc;

    /// A hart with a small flash at 0 and RAM at 0x2000_0000.
    fn hart() -> Hart {
        let mut hart = Hart::new();
        let flash = Arc::new(Memory::new("flash", MEM_ATTR_READABLE, 0, 0x1000));
        let ram = Arc::new(Memory::new(
            "ram",
            MEM_ATTR_READABLE | MEM_ATTR_WRITABLE,
            0x2000_0000,
            0x1000,
        ));
        hart.attach_device(ram);
        hart.attach_device(flash.clone());
        hart.set_flash(flash);
        hart.reset();
        hart
    }

    fn exec(hart: &mut Hart, word: u32) {
        let instruction = Instruction::decode(word).unwrap();
        hart.execute(instruction);
    }

    #[test]
    fn x0_is_hardwired_to_zero() {
        let mut hart = hart();
        exec(&mut hart, asm::addi(0, 0, 123));
        assert_eq!(hart.read_reg(0), 0);
    }

    #[test]
    fn addi_wraps_modulo_32_bits() {
        let mut hart = hart();
        exec(&mut hart, asm::addi(1, 0, -1));
        assert_eq!(hart.read_reg(1), 0xFFFF_FFFF);
        exec(&mut hart, asm::addi(2, 1, 1));
        assert_eq!(hart.read_reg(2), 0);
    }

    #[test]
    fn slt_flavours_compare_with_the_right_sign() {
        let mut hart = hart();
        hart.write_reg(1, 0xFFFF_FFFF); // -1 signed, huge unsigned
        hart.write_reg(2, 1);
        exec(&mut hart, asm::slt(3, 1, 2));
        assert_eq!(hart.read_reg(3), 1);
        exec(&mut hart, asm::sltu(4, 1, 2));
        assert_eq!(hart.read_reg(4), 0);
        exec(&mut hart, asm::slti(5, 1, 0));
        assert_eq!(hart.read_reg(5), 1);
        exec(&mut hart, asm::sltiu(6, 1, 0));
        assert_eq!(hart.read_reg(6), 0);
    }

    #[test]
    fn shift_right_preserves_or_clears_the_sign() {
        let mut hart = hart();
        hart.write_reg(1, 0x8000_0000);
        exec(&mut hart, asm::srai(2, 1, 1));
        assert_eq!(hart.read_reg(2), 0xC000_0000);
        exec(&mut hart, asm::srli(3, 1, 1));
        assert_eq!(hart.read_reg(3), 0x4000_0000);
    }

    #[test]
    fn shifts_by_register_use_the_low_five_bits() {
        let mut hart = hart();
        hart.write_reg(1, 1);
        hart.write_reg(2, 33); // shifts by 1
        exec(&mut hart, asm::sll(3, 1, 2));
        assert_eq!(hart.read_reg(3), 2);
    }

    #[test]
    fn multiply_high_variants() {
        let mut hart = hart();
        hart.write_reg(1, 0xFFFF_FFFF); // -1 or 2^32-1
        hart.write_reg(2, 0xFFFF_FFFF);
        exec(&mut hart, asm::mul(3, 1, 2));
        assert_eq!(hart.read_reg(3), 1); // low bits of (-1 * -1)
        exec(&mut hart, asm::mulh(4, 1, 2));
        assert_eq!(hart.read_reg(4), 0); // high bits of 1
        exec(&mut hart, asm::mulhu(5, 1, 2));
        assert_eq!(hart.read_reg(5), 0xFFFF_FFFE);
        exec(&mut hart, asm::mulhsu(6, 1, 2));
        assert_eq!(hart.read_reg(6), 0xFFFF_FFFF); // -1 * (2^32-1), high bits
    }

    #[test]
    fn division_edge_cases_follow_the_isa() {
        let mut hart = hart();
        hart.write_reg(1, 0x8000_0000); // i32::MIN
        hart.write_reg(2, 0xFFFF_FFFF); // -1
        exec(&mut hart, asm::div(3, 1, 2));
        assert_eq!(hart.read_reg(3), 0x8000_0000);
        exec(&mut hart, asm::rem(4, 1, 2));
        assert_eq!(hart.read_reg(4), 0);

        hart.write_reg(5, 42);
        exec(&mut hart, asm::div(6, 5, 0));
        assert_eq!(hart.read_reg(6), 0xFFFF_FFFF);
        exec(&mut hart, asm::divu(7, 5, 0));
        assert_eq!(hart.read_reg(7), 0xFFFF_FFFF);
        exec(&mut hart, asm::rem(8, 5, 0));
        assert_eq!(hart.read_reg(8), 42);
        exec(&mut hart, asm::remu(9, 5, 0));
        assert_eq!(hart.read_reg(9), 42);
    }

    #[test]
    fn loads_sign_or_zero_extend() {
        let mut hart = hart();
        hart.write_reg(1, 0x2000_0000);
        hart.write_reg(2, 0xFF);
        exec(&mut hart, asm::sb(2, 1, 0));
        exec(&mut hart, asm::lb(3, 1, 0));
        assert_eq!(hart.read_reg(3), 0xFFFF_FFFF);
        exec(&mut hart, asm::lbu(4, 1, 0));
        assert_eq!(hart.read_reg(4), 0x0000_00FF);

        hart.write_reg(5, 0x8000);
        exec(&mut hart, asm::sh(5, 1, 4));
        exec(&mut hart, asm::lh(6, 1, 4));
        assert_eq!(hart.read_reg(6), 0xFFFF_8000);
        exec(&mut hart, asm::lhu(7, 1, 4));
        assert_eq!(hart.read_reg(7), 0x0000_8000);
    }

    #[test]
    fn stores_write_little_endian() {
        let mut hart = hart();
        hart.write_reg(1, 0x2000_0000);
        hart.write_reg(2, 0x1234_5678);
        exec(&mut hart, asm::sw(2, 1, 0));
        let mut bytes = [0u8; 4];
        hart.mem_read(0x2000_0000, &mut bytes).unwrap();
        assert_eq!(bytes, [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn jal_links_and_jumps_relative() {
        let mut hart = hart();
        hart.set_pc(0x100);
        exec(&mut hart, asm::jal(1, 0x20));
        assert_eq!(hart.read_reg(1), 0x104);
        assert_eq!(hart.pc(), 0x120);
    }

    #[test]
    fn jalr_reads_the_base_before_linking() {
        let mut hart = hart();
        hart.set_pc(0x100);
        hart.write_reg(1, 0x200);
        // rd == rs1: the jump must use the old value.
        exec(&mut hart, asm::jalr(1, 1, 4));
        assert_eq!(hart.pc(), 0x204);
        assert_eq!(hart.read_reg(1), 0x104);
    }

    #[test]
    fn branch_taken_and_not_taken_pc_updates() {
        let mut hart = hart();
        hart.set_pc(0x100);
        hart.write_reg(1, 5);
        hart.write_reg(2, 5);
        exec(&mut hart, asm::beq(1, 2, 0x40));
        assert_eq!(hart.pc(), 0x140);
        exec(&mut hart, asm::bne(1, 2, 0x40));
        assert_eq!(hart.pc(), 0x144);
    }

    #[test]
    fn unsigned_branches_compare_unsigned() {
        let mut hart = hart();
        hart.set_pc(0x100);
        hart.write_reg(1, 0xFFFF_FFFF);
        hart.write_reg(2, 1);
        exec(&mut hart, asm::bltu(2, 1, 0x10));
        assert_eq!(hart.pc(), 0x110);
        exec(&mut hart, asm::blt(2, 1, 0x10));
        assert_eq!(hart.pc(), 0x114);
    }

    #[test]
    fn csr_flavours_capture_old_value_first() {
        let mut hart = hart();
        hart.write_reg(1, 0b1100);
        exec(&mut hart, asm::csrrw(2, csr::MSCRATCH, 1));
        assert_eq!(hart.read_reg(2), 0);
        assert_eq!(hart.csrs().read(csr::MSCRATCH), 0b1100);

        hart.write_reg(3, 0b0011);
        exec(&mut hart, asm::csrrs(4, csr::MSCRATCH, 3));
        assert_eq!(hart.read_reg(4), 0b1100);
        assert_eq!(hart.csrs().read(csr::MSCRATCH), 0b1111);

        exec(&mut hart, asm::csrrc(5, csr::MSCRATCH, 3));
        assert_eq!(hart.read_reg(5), 0b1111);
        assert_eq!(hart.csrs().read(csr::MSCRATCH), 0b1100);

        exec(&mut hart, asm::csrrwi(6, csr::MSCRATCH, 0x15));
        assert_eq!(hart.read_reg(6), 0b1100);
        assert_eq!(hart.csrs().read(csr::MSCRATCH), 0x15);
    }

    #[test]
    fn lui_and_auipc() {
        let mut hart = hart();
        hart.set_pc(0x100);
        exec(&mut hart, asm::lui(1, 0x20000));
        assert_eq!(hart.read_reg(1), 0x2000_0000);
        assert_eq!(hart.pc(), 0x104);
        exec(&mut hart, asm::auipc(2, 0x1));
        assert_eq!(hart.read_reg(2), 0x1104);
    }
}
