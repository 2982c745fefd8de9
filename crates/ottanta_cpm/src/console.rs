use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Host side of the guest's character IO.
///
/// The machine routes BDOS console functions through this trait without
/// knowing where the characters come from or go. Errors are plain
/// `io::Error`s and reach the embedder unwrapped.
pub trait Console {
    fn write_char(&mut self, ch: u8) -> io::Result<()>;
    fn read_char(&mut self) -> io::Result<u8>;
    /// Read one line of input, without the trailing newline.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
}

/// Console backed by the process stdin and stdout.
#[derive(Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write_char(&mut self, ch: u8) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(&[ch])?;
        stdout.flush()
    }

    fn read_char(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        io::stdin().read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line.into_bytes())
    }
}

/// Scripted console for harnesses: input is served from a queue, output is
/// captured for inspection.
#[derive(Default)]
pub struct BufferedConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be served by `read_char`/`read_line`. Lines are
    /// separated by `\n`.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Everything the guest has written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }
}

impl Console for BufferedConsole {
    fn write_char(&mut self, ch: u8) -> io::Result<()> {
        self.output.push(ch);
        Ok(())
    }

    fn read_char(&mut self) -> io::Result<u8> {
        self.input.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "console input exhausted")
        })
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        while let Some(ch) = self.input.pop_front() {
            if ch == b'\n' {
                break;
            }
            line.push(ch);
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferedConsole, Console};

    #[test]
    fn buffered_console_serves_lines() {
        let mut console = BufferedConsole::new();
        console.push_input(b"first\nsecond\n");
        assert_eq!(console.read_line().unwrap(), b"first");
        assert_eq!(console.read_char().unwrap(), b's');
        assert_eq!(console.read_line().unwrap(), b"econd");
        assert!(console.read_char().is_err());
    }

    #[test]
    fn buffered_console_captures_output() {
        let mut console = BufferedConsole::new();
        console.write_char(b'h').unwrap();
        console.write_char(b'i').unwrap();
        assert_eq!(console.output(), b"hi");
    }
}
