use anyhow::{Context, Result};

use ottanta_core::CpuConfig;
use ottanta_cpm::{CpmMachine, StdConsole, PROGRAM_ORIGIN};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let trace = args.iter().any(|arg| arg == "--trace");
    let path = match args.iter().find(|arg| !arg.starts_with("--")) {
        Some(path) => path.clone(),
        None => {
            eprintln!("usage: ottanta [--trace] <program.com>");
            std::process::exit(1);
        }
    };

    let program =
        std::fs::read(&path).with_context(|| format!("failed to read {}", path))?;
    log::info!(
        "running {} ({} bytes at 0x{:04x})",
        path,
        program.len(),
        PROGRAM_ORIGIN
    );

    let config = CpuConfig::builder()
        .origin(PROGRAM_ORIGIN)
        .debug(trace)
        .build();
    let mut machine = CpmMachine::with_config(StdConsole, config);
    machine.load_program(&program);
    machine.run()
}
