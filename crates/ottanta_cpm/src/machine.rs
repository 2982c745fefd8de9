use anyhow::{bail, Result};

use ottanta_core::cpu::{Cpu, CpuConfig};
use ottanta_core::memory::MEMORY_SIZE;

use crate::console::Console;

/// CP/M transient programs load and start at 0x0100.
pub const PROGRAM_ORIGIN: u16 = 0x0100;

/// Terminator for BDOS function 9 strings.
pub const DEFAULT_STRING_DELIMITER: u8 = b'$';

/// CALL 0x0000 re-enters the warm-boot vector: the program is done.
const WARM_BOOT: u16 = 0x0000;
/// CALL 0x0005 is the BDOS entry point, function code in register C.
const BDOS_ENTRY: u16 = 0x0005;

// The BDOS functions we service (register C).
const BDOS_TERMINATE: u8 = 0x00;
const BDOS_CONSOLE_IN: u8 = 0x01;
const BDOS_CONSOLE_OUT: u8 = 0x02;
const BDOS_WRITE_STRING: u8 = 0x09;
const BDOS_READ_LINE: u8 = 0x0a;

/// Minimal CP/M-style machine: an 8080 core plus a console.
///
/// There is no BDOS code in guest memory. Instead the machine watches the
/// instruction stream and intercepts CALLs to the two magic addresses,
/// servicing them host-side and skipping the CALL; the guest observes a
/// BDOS that returns instantly.
pub struct CpmMachine<C: Console> {
    cpu: Cpu,
    console: C,
    delimiter: u8,
    finished: bool,
}

impl<C: Console> CpmMachine<C> {
    pub fn new(console: C) -> Self {
        Self::with_config(
            console,
            CpuConfig::builder().origin(PROGRAM_ORIGIN).build(),
        )
    }

    /// Build a machine with explicit CPU options (e.g. the debug trace).
    /// The origin should stay at 0x0100 for .COM-style images.
    pub fn with_config(console: C, config: CpuConfig) -> Self {
        Self {
            cpu: Cpu::new(config),
            console,
            delimiter: DEFAULT_STRING_DELIMITER,
            finished: false,
        }
    }

    /// Change the terminator recognized by the write-string function.
    pub fn set_string_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    /// Load a raw .COM-style image at 0x0100 and reset the CPU.
    pub fn load_program(&mut self, program: &[u8]) {
        self.cpu.load(program);
        self.cpu.reset();
        self.finished = false;
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Run the loaded program until it terminates.
    ///
    /// An unknown BDOS function or a console failure aborts the run with the
    /// CPU left at the fault point.
    pub fn run(&mut self) -> Result<()> {
        while !self.finished {
            self.step()?;
        }
        Ok(())
    }

    /// Advance the guest by one instruction, servicing BDOS calls.
    pub fn step(&mut self) -> Result<u32> {
        let pc = self.cpu.regs.pc;
        let opcode = self.cpu.read_byte(pc);
        if is_call(opcode) {
            match self.cpu.read_word(pc.wrapping_add(1)) {
                WARM_BOOT => {
                    log::debug!("warm boot at pc=0x{:04x}", pc);
                    self.cpu.reset();
                    self.finished = true;
                    return Ok(0);
                }
                BDOS_ENTRY => {
                    self.bdos()?;
                    if !self.finished {
                        self.cpu.regs.pc = pc.wrapping_add(3);
                    }
                    return Ok(0);
                }
                _ => {}
            }
        }

        let cycles = self.cpu.step();
        if self.cpu.halted() || self.cpu.regs.pc == WARM_BOOT {
            self.finished = true;
        }
        Ok(cycles)
    }

    fn bdos(&mut self) -> Result<()> {
        let function = self.cpu.regs.c;
        match function {
            BDOS_TERMINATE => {
                self.finished = true;
            }
            BDOS_CONSOLE_IN => {
                let ch = self.console.read_char()?;
                // BDOS echoes console input.
                self.console.write_char(ch)?;
                self.cpu.regs.a = ch;
            }
            BDOS_CONSOLE_OUT => {
                self.console.write_char(self.cpu.regs.e)?;
            }
            BDOS_WRITE_STRING => {
                let mut addr = self.cpu.regs.de();
                // Bounded walk: a string without its delimiter must not spin
                // forever in wrapped memory.
                for _ in 0..MEMORY_SIZE {
                    let ch = self.cpu.read_byte(addr);
                    if ch == self.delimiter {
                        break;
                    }
                    self.console.write_char(ch)?;
                    addr = addr.wrapping_add(1);
                }
            }
            BDOS_READ_LINE => {
                // DE points at [max, count, bytes...].
                let buffer = self.cpu.regs.de();
                let max = self.cpu.read_byte(buffer) as usize;
                let mut line = self.console.read_line()?;
                line.truncate(max);
                self.cpu
                    .write_byte(buffer.wrapping_add(1), line.len() as u8);
                for (i, &ch) in line.iter().enumerate() {
                    self.cpu.write_byte(buffer.wrapping_add(2 + i as u16), ch);
                }
            }
            _ => bail!(
                "unsupported BDOS function 0x{:02x} at pc=0x{:04x}",
                function,
                self.cpu.regs.pc
            ),
        }
        Ok(())
    }
}

fn is_call(opcode: u8) -> bool {
    // All four CALL encodings, the canonical one and the duplicates.
    matches!(opcode, 0xcd | 0xdd | 0xed | 0xfd)
}

#[cfg(test)]
mod tests {
    use super::{CpmMachine, PROGRAM_ORIGIN};
    use crate::console::BufferedConsole;

    fn machine_with(program: &[u8]) -> CpmMachine<BufferedConsole> {
        let mut machine = CpmMachine::new(BufferedConsole::new());
        machine.load_program(program);
        machine
    }

    #[test]
    fn programs_load_at_the_cpm_origin() {
        let machine = machine_with(&[0x76]);
        assert_eq!(machine.cpu().regs.pc, PROGRAM_ORIGIN);
        assert_eq!(machine.cpu().read_byte(PROGRAM_ORIGIN), 0x76);
    }

    #[test]
    fn write_string_stops_at_the_delimiter() {
        // LXI D,$010b; MVI C,9; CALL 5; CALL 0; "HELLO, WORLD$"
        let mut program = vec![
            0x11, 0x0b, 0x01, // LXI D,$010b
            0x0e, 0x09, // MVI C,9
            0xcd, 0x05, 0x00, // CALL 5
            0xcd, 0x00, 0x00, // CALL 0
        ];
        program.extend_from_slice(b"HELLO, WORLD$IGNORED");

        let mut machine = machine_with(&program);
        machine.run().unwrap();
        assert!(machine.finished());
        assert_eq!(machine.console().output(), b"HELLO, WORLD");
    }

    #[test]
    fn console_out_writes_register_e() {
        // MVI E,'A'; MVI C,2; CALL 5; CALL 0
        let mut machine = machine_with(&[
            0x1e, 0x41, 0x0e, 0x02, 0xcd, 0x05, 0x00, 0xcd, 0x00, 0x00,
        ]);
        machine.run().unwrap();
        assert_eq!(machine.console().output(), b"A");
    }

    #[test]
    fn console_in_echoes_and_lands_in_a() {
        // MVI C,1; CALL 5; CALL 0
        let mut console = BufferedConsole::new();
        console.push_input(b"x");
        let mut machine = CpmMachine::new(console);
        machine.load_program(&[0x0e, 0x01, 0xcd, 0x05, 0x00, 0xcd, 0x00, 0x00]);
        machine.run().unwrap();

        assert_eq!(machine.cpu().regs.a, b'x');
        assert_eq!(machine.console().output(), b"x");
    }

    #[test]
    fn read_line_fills_the_de_buffer() {
        // LXI D,$0200; MVI C,$0a; CALL 5; CALL 0
        let mut console = BufferedConsole::new();
        console.push_input(b"HELLO WORLD\n");
        let mut machine = CpmMachine::new(console);
        machine.load_program(&[
            0x11, 0x00, 0x02, 0x0e, 0x0a, 0xcd, 0x05, 0x00, 0xcd, 0x00, 0x00,
        ]);
        machine.cpu_mut().write_byte(0x0200, 8); // max length
        machine.run().unwrap();

        let cpu = machine.cpu();
        assert_eq!(cpu.read_byte(0x0201), 8, "stored count is truncated to max");
        let stored: Vec<u8> = (0..8).map(|i| cpu.read_byte(0x0202 + i)).collect();
        assert_eq!(stored, b"HELLO WO");
    }

    #[test]
    fn unknown_bdos_function_is_fatal() {
        // MVI C,$20; CALL 5
        let mut machine = machine_with(&[0x0e, 0x20, 0xcd, 0x05, 0x00]);
        let err = machine.run().unwrap_err();
        assert!(err.to_string().contains("BDOS"), "got: {err}");
        assert!(!machine.finished());
    }

    #[test]
    fn custom_delimiter_is_honored() {
        let mut program = vec![
            0x11, 0x0b, 0x01, // LXI D,$010b
            0x0e, 0x09, // MVI C,9
            0xcd, 0x05, 0x00, // CALL 5
            0xcd, 0x00, 0x00, // CALL 0
        ];
        program.extend_from_slice(b"AB#CD$");

        let mut machine = machine_with(&program);
        machine.set_string_delimiter(b'#');
        machine.run().unwrap();
        assert_eq!(machine.console().output(), b"AB");
    }

    #[test]
    fn jumping_to_the_warm_boot_vector_terminates() {
        // JMP 0
        let mut machine = machine_with(&[0xc3, 0x00, 0x00]);
        machine.run().unwrap();
        assert!(machine.finished());
    }

    #[test]
    fn halt_terminates_the_run() {
        let mut machine = machine_with(&[0x76]);
        machine.run().unwrap();
        assert!(machine.finished());
        assert!(machine.cpu().halted());
    }
}
