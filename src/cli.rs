use std::path::PathBuf;

use structopt::StructOpt;

/// Parses either `all` or a `0x`-prefixed/decimal address into
/// [`crate::flash::MASS_ERASE_SENTINEL`] or a literal address, the way
/// the reference tool's `erase=all` shorthand maps onto the same
/// sentinel the bare `erase` command uses.
pub fn parse_erase_target(src: &str) -> Result<u32, std::num::ParseIntError> {
    if src.eq_ignore_ascii_case("all") {
        return Ok(crate::flash::MASS_ERASE_SENTINEL);
    }
    parse_u32(src)
}

/// Parses a `0x`-prefixed hex literal or a plain decimal integer, since
/// addresses are naturally typed in hex on the command line.
pub fn parse_u32(src: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        src.parse()
    }
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Identify the connected target and print a summary line
    Info,
    /// Print the probe's firmware/vendor version
    Version,
    /// Blink the discovery board's user LED a few times
    Blink {
        #[structopt(long, default_value = "5")]
        cycles: u32,
    },
    /// Issue a system reset
    Reset,
    /// Resume core execution
    Run,
    /// Single-step the core
    Step,
    /// Print the current core status
    Status,
    /// Enter SWD debug mode
    Debug,
    /// Dump all ARM core registers
    Regs,
    /// Read one core register by index
    Reg { index: u8 },
    /// Write one core register by index
    Wreg {
        index: u8,
        #[structopt(parse(try_from_str = parse_u32))]
        value: u32,
    },
    /// Read target memory and print it
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        #[structopt(default_value = "4")]
        len: u16,
    },
    /// Write a 32-bit word to target memory
    Write {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        #[structopt(parse(try_from_str = parse_u32))]
        value: u32,
    },
    /// Erase a flash page/sector, or the whole chip with `all`
    Erase {
        #[structopt(parse(try_from_str = parse_erase_target))]
        target: u32,
    },
    /// Operate on the main flash region
    Flash(FlashCommand),
    /// Operate on the system memory / bootloader region
    Sys(SysCommand),
}

#[derive(StructOpt, Debug)]
pub enum FlashCommand {
    /// Program a file into flash at an address
    Write {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        filename: PathBuf,
    },
    /// Verify flash contents against a file
    Verify {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        filename: PathBuf,
    },
    /// Dump a range of flash to a file
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        #[structopt(parse(try_from_str = parse_u32))]
        len: u32,
        filename: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
pub enum SysCommand {
    /// Dump the system memory region to a file
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        #[structopt(parse(try_from_str = parse_u32))]
        len: u32,
        filename: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Program, verify, and debug STM32 targets over an STLink v2 probe")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// USB bus index to pick when more than one probe is attached
    #[structopt(short = "u", long = "usb-index", default_value = "0")]
    pub usb_index: usize,

    /// Enter the debugger before running the command instead of only
    /// when recovering from DFU mode
    #[structopt(short = "D", long = "debug")]
    pub force_debug: bool,

    /// Increase log verbosity; repeat for more detail
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbose: u8,
}
