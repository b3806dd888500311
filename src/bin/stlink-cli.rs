use anyhow::{Context, Result};
use rusb::UsbContext;
use structopt::StructOpt;

use stlink::cli::{Command, FlashCommand, Opts, SysCommand};
use stlink::error::{Error, TransportError};
use stlink::mode::TransportFactory;
use stlink::session::Session;
use stlink::transport::{
    Transport, TRANSFER_TIMEOUT, USB_ENDPOINT_IN, USB_ENDPOINT_OUT, USB_PRODUCT_ID_V1,
    USB_PRODUCT_ID_V2, USB_VENDOR_ID,
};

/// Bulk-endpoint transport backed by `rusb`, the only part of the crate
/// that knows a real USB stack exists.
struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl UsbTransport {
    fn open(usb_index: usize) -> Result<Self> {
        let context = rusb::Context::new().context("could not initialize libusb")?;
        let devices = context.devices().context("could not enumerate USB devices")?;

        let mut candidates = Vec::new();
        for device in devices.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() == USB_VENDOR_ID
                && (desc.product_id() == USB_PRODUCT_ID_V1 || desc.product_id() == USB_PRODUCT_ID_V2)
            {
                candidates.push(device);
            }
        }

        let device = candidates
            .into_iter()
            .nth(usb_index)
            .with_context(|| format!("no STLink probe found at USB index {}", usb_index))?;

        let mut handle = device.open().context("could not open STLink USB device")?;
        handle
            .claim_interface(0)
            .context("could not claim STLink USB interface")?;

        Ok(UsbTransport { handle })
    }
}

impl Transport for UsbTransport {
    fn send_command(&mut self, cmd: &[u8], len: usize) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(USB_ENDPOINT_OUT, &cmd[..len], TRANSFER_TIMEOUT)
            .map_err(|e| TransportError::Usb(e.to_string()))
    }

    fn send_data(&mut self, buf: &[u8], len: usize) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(USB_ENDPOINT_OUT, &buf[..len], TRANSFER_TIMEOUT)
            .map_err(|e| TransportError::Usb(e.to_string()))
    }

    fn recv_data(&mut self, buf: &mut [u8], len: usize) -> Result<usize, TransportError> {
        let n = self
            .handle
            .read_bulk(USB_ENDPOINT_IN, &mut buf[..len], TRANSFER_TIMEOUT)
            .map_err(|e| TransportError::Usb(e.to_string()))?;
        stlink::transport::check_transfer_len(len, n)?;
        Ok(n)
    }
}

struct UsbFactory {
    usb_index: usize,
}

impl TransportFactory<UsbTransport> for UsbFactory {
    fn open(&mut self) -> Result<UsbTransport, Error> {
        UsbTransport::open(self.usb_index)
            .map_err(|e| Error::Transport(TransportError::Usb(e.to_string())))
    }
}

fn main() -> Result<()> {
    let opts = Opts::from_args();

    let log_level = match opts.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()));
    pretty_env_logger::init();

    let mut factory = UsbFactory {
        usb_index: opts.usb_index,
    };
    let transport = factory
        .open()
        .context("could not open the STLink probe over USB")?;
    let mut session = Session::open(transport, &mut factory).context("could not enter debug mode")?;

    if opts.force_debug {
        session.protocol_mut().enter_swd()?;
    }

    run_command(&mut session, opts.command)
}

fn run_command(session: &mut Session<UsbTransport>, command: Command) -> Result<()> {
    match command {
        Command::Info => {
            session.check_identity()?;
            let summary = session.describe()?;
            println!("{}", summary);
            let probed_kb = session.probe_flash_size_kb()?;
            println!("flash size register reports {}KB", probed_kb);
        }
        Command::Version => {
            session.check_identity()?;
            let version = session.version()?;
            println!(
                "STLink v{}, JTAG v{}, SWIM v{}, USB {:04x}:{:04x}",
                version.stlink_version,
                version.jtag_version,
                version.swim_version,
                version.vendor_id,
                version.product_id
            );
        }
        Command::Blink { cycles } => session.blink(cycles)?,
        Command::Reset => session.reset()?,
        Command::Run => session.run()?,
        Command::Step => session.step()?,
        Command::Status => {
            let status = session.protocol_mut().get_status()?;
            println!("core status: {:#06x}", status);
        }
        Command::Debug => session.protocol_mut().enter_swd()?,
        Command::Regs => {
            let regs = session.protocol_mut().read_all_regs()?;
            for (i, value) in regs.iter().enumerate() {
                println!("r{:<2} = {:#010x}", i, value);
            }
        }
        Command::Reg { index } => {
            let value = session.protocol_mut().read_one_reg(index)?;
            println!("{:#010x}", value);
        }
        Command::Wreg { index, value } => {
            session.protocol_mut().write_reg(index, value)?;
        }
        Command::Read { address, len } => {
            let data = stlink::memory::read(session.protocol_mut(), address, len as usize)?;
            print_hex(address, &data);
        }
        Command::Write { address, value } => {
            stlink::memory::write_word(session.protocol_mut(), address, value)?;
        }
        Command::Erase { target } => session.erase(target)?,
        Command::Flash(cmd) => run_flash_command(session, cmd)?,
        Command::Sys(cmd) => run_sys_command(session, cmd)?,
    }
    Ok(())
}

fn run_flash_command(session: &mut Session<UsbTransport>, cmd: FlashCommand) -> Result<()> {
    match cmd {
        FlashCommand::Write { address, filename } => {
            let n = session.program(address, &filename)?;
            println!("programmed {} bytes at {:#010x}", n, address);
        }
        FlashCommand::Verify { address, filename } => {
            session
                .verify(address, &filename)
                .context("flash verification failed")?;
            println!("verify OK");
        }
        FlashCommand::Read {
            address,
            len,
            filename,
        } => {
            session.dump(address, len as usize, &filename)?;
        }
    }
    Ok(())
}

fn run_sys_command(session: &mut Session<UsbTransport>, cmd: SysCommand) -> Result<()> {
    match cmd {
        SysCommand::Read {
            address,
            len,
            filename,
        } => session.dump(address, len as usize, &filename)?,
    }
    Ok(())
}

fn print_hex(base: u32, data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("{:#010x}: ", base as usize + i * 16);
        for byte in chunk {
            print!("{:02x} ", byte);
        }
        println!();
    }
}

