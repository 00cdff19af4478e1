//! Built-in instruction tests, run by the CLI's `-t` flag.
//!
//! Each test assembles a short guest program, runs it to the final
//! `ebreak` on a freshly built machine and checks the architectural state.

use crate::asm;
use crate::core::{csr, Hart, StopReason};
use crate::device::Device;
use crate::error::Error;
use crate::machine::{Machine, MachineConfig};

fn test_config() -> MachineConfig {
    MachineConfig {
        flash_size: 0x1000,
        ram_size: 0x1000,
        ..MachineConfig::default()
    }
}

fn run_program(name: &'static str, words: &[u32]) -> Result<Machine, Error> {
    let mut machine = Machine::new(test_config());
    let image: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    machine.flash().load(0, &image).map_err(Error::Bus)?;

    let reason = machine.hart_mut().run(None);
    if reason != StopReason::Ebreak {
        return Err(Error::SelfTest {
            name,
            details: format!("expected to stop at ebreak, got {reason:?}"),
        });
    }
    Ok(machine)
}

fn expect_reg(name: &'static str, hart: &Hart, reg: u32, want: u32) -> Result<(), Error> {
    let got = hart.read_reg(reg);
    if got != want {
        return Err(Error::SelfTest {
            name,
            details: format!("x{reg} = {got:#010x}, expected {want:#010x}"),
        });
    }
    Ok(())
}

fn arithmetic() -> Result<(), Error> {
    const NAME: &str = "arithmetic";
    let machine = run_program(
        NAME,
        &[
            asm::addi(1, 0, 5),
            asm::addi(2, 0, -3),
            asm::add(3, 1, 2),
            asm::ebreak(),
        ],
    )?;
    let hart = machine.hart();
    expect_reg(NAME, hart, 1, 5)?;
    expect_reg(NAME, hart, 2, 0xFFFF_FFFD)?;
    expect_reg(NAME, hart, 3, 2)?;
    if hart.pc() != 0xC {
        return Err(Error::SelfTest {
            name: NAME,
            details: format!("pc = {:#010x}, expected the ebreak at 0xc", hart.pc()),
        });
    }
    Ok(())
}

fn branch_loop() -> Result<(), Error> {
    const NAME: &str = "branch-loop";
    let machine = run_program(
        NAME,
        &[
            asm::addi(1, 0, 10),
            asm::addi(1, 1, -1),
            asm::bne(1, 0, -4),
            asm::ebreak(),
        ],
    )?;
    expect_reg(NAME, machine.hart(), 1, 0)?;
    let retired = machine.hart().instructions_retired();
    if retired != 1 + 10 * 2 + 1 {
        return Err(Error::SelfTest {
            name: NAME,
            details: format!("retired {retired} instructions, expected 22"),
        });
    }
    Ok(())
}

fn memory_round_trip() -> Result<(), Error> {
    const NAME: &str = "memory-round-trip";
    let machine = run_program(
        NAME,
        &[
            asm::lui(1, 0x20000),
            asm::addi(2, 0, 0x55),
            asm::sw(2, 1, 0),
            asm::lw(3, 1, 0),
            asm::ebreak(),
        ],
    )?;
    expect_reg(NAME, machine.hart(), 3, 0x55)
}

fn sign_handling() -> Result<(), Error> {
    const NAME: &str = "sign-handling";
    let machine = run_program(
        NAME,
        &[
            asm::lui(1, 0x20000),
            asm::addi(2, 0, 0xFF),
            asm::sb(2, 1, 0),
            asm::lb(3, 1, 0),
            asm::lbu(4, 1, 0),
            asm::lui(5, 0x80000),
            asm::srai(6, 5, 1),
            asm::srli(7, 5, 1),
            asm::ebreak(),
        ],
    )?;
    let hart = machine.hart();
    expect_reg(NAME, hart, 3, 0xFFFF_FFFF)?;
    expect_reg(NAME, hart, 4, 0x0000_00FF)?;
    expect_reg(NAME, hart, 6, 0xC000_0000)?;
    expect_reg(NAME, hart, 7, 0x4000_0000)
}

fn division() -> Result<(), Error> {
    const NAME: &str = "division";
    let machine = run_program(
        NAME,
        &[
            asm::lui(1, 0x80000),
            asm::addi(2, 0, -1),
            asm::div(3, 1, 2),
            asm::rem(4, 1, 2),
            asm::addi(5, 0, 42),
            asm::div(6, 5, 0),
            asm::rem(7, 5, 0),
            asm::ebreak(),
        ],
    )?;
    let hart = machine.hart();
    expect_reg(NAME, hart, 3, 0x8000_0000)?;
    expect_reg(NAME, hart, 4, 0)?;
    expect_reg(NAME, hart, 6, 0xFFFF_FFFF)?;
    expect_reg(NAME, hart, 7, 42)
}

fn csr_scratch() -> Result<(), Error> {
    const NAME: &str = "csr-scratch";
    let machine = run_program(
        NAME,
        &[
            asm::addi(1, 0, 0x5A),
            asm::csrrw(0, csr::MSCRATCH, 1),
            asm::csrrs(2, csr::MSCRATCH, 0),
            asm::ebreak(),
        ],
    )?;
    expect_reg(NAME, machine.hart(), 2, 0x5A)
}

/// Run every built-in instruction test; the first failure aborts the run.
pub fn run() -> Result<(), Error> {
    arithmetic()?;
    branch_loop()?;
    memory_round_trip()?;
    sign_handling()?;
    division()?;
    csr_scratch()?;
    Ok(())
}
