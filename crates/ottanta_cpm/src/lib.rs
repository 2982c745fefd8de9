pub mod console;
pub mod machine;

pub use console::{BufferedConsole, Console, StdConsole};
pub use machine::{CpmMachine, DEFAULT_STRING_DELIMITER, PROGRAM_ORIGIN};
