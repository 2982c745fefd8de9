//! Embeddable Intel 8080 emulator.
//!
//! The crate provides two independent views of the same opcode stream: an
//! instruction-accurate interpreter ([`cpu::Cpu`]) that owns its 64 KiB
//! memory and 256 IO ports, and a pure decoder ([`disasm`]) that turns raw
//! bytes into Intel-syntax mnemonics.
//!
//! ```
//! use ottanta_core::{Cpu, CpuConfig};
//!
//! let mut cpu = Cpu::new(CpuConfig::builder().origin(0x0100).build());
//! cpu.load(&[0x3e, 0x2a, 0x76]); // MVI A,$2a; HLT
//! cpu.reset();
//! cpu.run();
//! assert_eq!(cpu.regs.a, 0x2a);
//! ```

pub mod cpu;
pub mod disasm;
pub mod memory;

pub use cpu::{Cpu, CpuConfig, Flags, Registers, CPU_CLOCK_HZ};
pub use disasm::{Disassembler, Instruction};
