mod alu;
mod exec;
mod regs;

#[cfg(test)]
mod tests;

use std::fmt;

use typed_builder::TypedBuilder;

use crate::disasm;
use crate::memory::{IoPorts, Memory};

pub use regs::{Flags, Registers};

/// Emulated clock rate used for interrupt-period arithmetic.
pub const CPU_CLOCK_HZ: u32 = 2_000_000;

/// Default interrupt frequency when the host never calls
/// [`Cpu::set_int_period`]: one deadline per 60 Hz frame, the classic
/// arcade cadence.
pub const DEFAULT_INT_FREQ_HZ: u32 = 60;

/// Hook invoked from [`Cpu::exec`] when the cycle budget expires.
///
/// The hook runs between instructions and must not re-enter `exec` or
/// `run`; injecting an interrupt opcode via [`Cpu::interrupt`] is the
/// intended use.
pub type PeriodicHook = fn(&mut Cpu);

/// Construction options for a [`Cpu`].
#[derive(Clone, Copy, Debug, TypedBuilder)]
pub struct CpuConfig {
    /// Print each instruction (address, raw bytes, mnemonic) to stdout
    /// before executing it.
    #[builder(default = false)]
    pub debug: bool,
    /// Address programs are loaded at and PC starts from after reset.
    #[builder(default = 0)]
    pub origin: u16,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Intel 8080 interpreter.
///
/// The CPU owns its whole world: the register file, the 64 KiB memory and
/// the 256-entry IO port table. Hosts drive it with [`step`](Cpu::step),
/// [`run`](Cpu::run) or [`exec`](Cpu::exec) and reach into memory and IO
/// through the accessor methods; nothing here blocks or spawns.
pub struct Cpu {
    pub regs: Registers,
    pub flags: Flags,
    memory: Memory,
    io: IoPorts,
    int_enabled: bool,
    halted: bool,
    /// Set by any instruction that overwrites PC; suppresses the
    /// post-increment for that instruction. Cleared at the top of each step.
    jumped: bool,
    /// Signed countdown to the next interrupt deadline.
    cycles: i64,
    int_period: i64,
    origin: u16,
    file_size: usize,
    debug: bool,
    periodic: Option<PeriodicHook>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(CpuConfig::default())
    }
}

impl Cpu {
    pub fn new(config: CpuConfig) -> Self {
        let int_period = i64::from(CPU_CLOCK_HZ / DEFAULT_INT_FREQ_HZ);
        Self {
            regs: Registers::default(),
            flags: Flags::default(),
            memory: Memory::default(),
            io: IoPorts::default(),
            int_enabled: false,
            halted: false,
            jumped: false,
            cycles: int_period,
            int_period,
            origin: config.origin,
            file_size: 0,
            debug: config.debug,
            periodic: None,
        }
    }

    /// Copy a raw program image into memory at the configured origin and
    /// remember its size for [`run`](Cpu::run)'s termination check.
    pub fn load(&mut self, program: &[u8]) {
        self.memory.write_bytes(self.origin, program);
        self.file_size = program.len();
        log::debug!(
            "loaded {} bytes at 0x{:04x}",
            program.len(),
            self.origin
        );
    }

    /// Zero the registers and flags, clear the halt/jump/interrupt latches
    /// and rearm the cycle countdown. Memory and IO contents are preserved
    /// so a loaded program survives the reset.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.flags = Flags::default();
        self.regs.pc = self.origin;
        self.int_enabled = false;
        self.halted = false;
        self.jumped = false;
        self.cycles = self.int_period;
    }

    /// Set the interrupt period from a frequency in Hz: the countdown is
    /// recharged with `CPU_CLOCK_HZ / freq` cycles each time it expires.
    pub fn set_int_period(&mut self, freq: u32) {
        self.int_period = i64::from(CPU_CLOCK_HZ / freq);
        self.cycles = self.int_period;
    }

    /// Register the hook called from [`exec`](Cpu::exec) whenever the cycle
    /// budget expires.
    pub fn set_periodic_hook(&mut self, hook: PeriodicHook) {
        self.periodic = Some(hook);
    }

    /// Execute exactly one instruction and return its cycle count.
    ///
    /// Returns 0 without touching any state while the CPU is halted; only
    /// an accepted [`interrupt`](Cpu::interrupt) resumes execution.
    pub fn step(&mut self) -> u32 {
        if self.halted {
            return 0;
        }

        self.jumped = false;
        let pc = self.regs.pc;
        let opcode = exec::canonical_opcode(self.memory.read_byte(pc));

        if self.debug {
            println!("{}", disasm::decode(self.memory.as_slice(), pc));
        }

        let cycles = self.dispatch(opcode);
        if !self.jumped {
            self.regs.pc = pc.wrapping_add(u16::from(exec::LENGTHS[opcode as usize]));
        }
        self.cycles -= i64::from(cycles);
        cycles
    }

    /// Step until the program halts, jumps back to 0x0000, or runs past the
    /// end of the loaded image.
    ///
    /// The termination heuristic suits self-contained test programs; hosts
    /// that need finer control should drive [`step`](Cpu::step) or
    /// [`exec`](Cpu::exec) directly.
    pub fn run(&mut self) {
        let end = self.origin as usize + self.file_size;
        loop {
            self.step();
            if self.halted {
                break;
            }
            let pc = self.regs.pc;
            if pc == 0 || pc as usize >= end {
                break;
            }
        }
    }

    /// Step until the cycle countdown crosses zero, then recharge it by the
    /// interrupt period, invoke the periodic hook and return control so the
    /// host can inject an interrupt opcode.
    pub fn exec(&mut self) {
        while self.cycles > 0 {
            if self.step() == 0 {
                // Halted: nothing will consume the budget until an
                // interrupt arrives.
                return;
            }
        }
        self.cycles += self.int_period;
        if let Some(hook) = self.periodic {
            hook(self);
        }
    }

    /// Inject an interrupt opcode (e.g. 0xCF for RST 1).
    ///
    /// Ignored while interrupts are disabled. Otherwise the latch is
    /// cleared, a halted CPU is woken, and the opcode executes as if it had
    /// been fetched, except that PC is not advanced: a call-class opcode
    /// pushes the address of the instruction the interrupt preempted.
    pub fn interrupt(&mut self, opcode: u8) {
        if !self.int_enabled {
            return;
        }
        self.int_enabled = false;
        self.halted = false;

        let opcode = exec::canonical_opcode(opcode);
        let length = u16::from(exec::LENGTHS[opcode as usize]);

        // The handlers bias return addresses and the post-increment by the
        // instruction length; winding PC back by that length first makes an
        // injected opcode resolve both against the current PC.
        self.regs.pc = self.regs.pc.wrapping_sub(length);
        self.jumped = false;
        let cycles = self.dispatch(opcode);
        if !self.jumped {
            self.regs.pc = self.regs.pc.wrapping_add(length);
        }
        self.cycles -= i64::from(cycles);
        self.jumped = false;
    }

    // Stack primitives: SP grows downward, words are pushed high byte
    // first so the low byte ends up at the lower address.

    fn push_byte(&mut self, value: u8) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.memory.write_byte(self.regs.sp, value);
    }

    fn pop_byte(&mut self) -> u8 {
        let value = self.memory.read_byte(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        value
    }

    fn push_word(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push_byte(hi);
        self.push_byte(lo);
    }

    fn pop_word(&mut self) -> u16 {
        let lo = self.pop_byte();
        let hi = self.pop_byte();
        u16::from_le_bytes([lo, hi])
    }

    // Host-facing accessors.

    #[inline]
    pub fn read_byte(&self, addr: u16) -> u8 {
        self.memory.read_byte(addr)
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        self.memory.write_byte(addr, value);
    }

    #[inline]
    pub fn read_word(&self, addr: u16) -> u16 {
        self.memory.read_word(addr)
    }

    #[inline]
    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.memory.write_word(addr, value);
    }

    #[inline]
    pub fn read_io(&self, port: u8) -> u8 {
        self.io.read(port)
    }

    #[inline]
    pub fn write_io(&mut self, port: u8, value: u8) {
        self.io.write(port, value);
    }

    #[inline]
    pub fn set_io_bit(&mut self, port: u8, bit: u8) {
        self.io.set_bit(port, bit);
    }

    #[inline]
    pub fn clear_io_bit(&mut self, port: u8, bit: u8) {
        self.io.clear_bit(port, bit);
    }

    /// The full memory image as a byte slice.
    #[inline]
    pub fn memory(&self) -> &[u8] {
        self.memory.as_slice()
    }

    #[inline]
    pub fn halted(&self) -> bool {
        self.halted
    }

    #[inline]
    pub fn int_enabled(&self) -> bool {
        self.int_enabled
    }

    /// Remaining cycles until the next interrupt deadline.
    #[inline]
    pub fn cycles(&self) -> i64 {
        self.cycles
    }

    /// Configured load/reset origin.
    #[inline]
    pub fn origin(&self) -> u16 {
        self.origin
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("regs", &self.regs)
            .field("flags", &self.flags)
            .field("int_enabled", &self.int_enabled)
            .field("halted", &self.halted)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}
