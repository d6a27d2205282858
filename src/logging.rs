use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

/// Initializes the `log` facade with a terminal logger at `level`. Intended
/// to be called once by an embedding application; the engine itself only
/// ever calls `log::*!` macros and never initializes a logger on its own.
pub fn init(level: LevelFilter) {
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
}
