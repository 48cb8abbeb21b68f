use std::path::PathBuf;
use std::process::ExitCode;

use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap::crate_version;
use log::LevelFilter;
use log::error;
use log::info;
use serdrive::SerialPort;
use serdrive::Server;

fn main() -> ExitCode {
    let matches = Command::new("serdrived")
        .version(crate_version!())
        .about("Serve a directory to a DOS-like machine over a serial line")
        .arg(
            Arg::new("debug")
                .short('D')
                .action(ArgAction::Count)
                .help("Increase log verbosity (repeatable)"),
        )
        .arg(
            Arg::new("baud")
                .short('s')
                .value_parser(clap::value_parser!(u32))
                .default_value("38400")
                .help("Serial line speed"),
        )
        .arg(
            Arg::new("device")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Serial device the driver is attached to"),
        )
        .arg(
            Arg::new("root")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value(".")
                .help("Directory served as the remote drive"),
        )
        .get_matches();

    let level = match matches.get_count("debug") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let baud = *matches.get_one::<u32>("baud").unwrap();
    let device = matches.get_one::<PathBuf>("device").unwrap();
    let root = matches.get_one::<PathBuf>("root").unwrap();

    let root = match root.canonicalize() {
        Ok(root) if root.is_dir() => root,
        Ok(root) => {
            error!("{} is not a directory", root.display());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("cannot use root directory {}: {e}", root.display());
            return ExitCode::FAILURE;
        }
    };
    let port = match SerialPort::open(device, baud) {
        Ok(port) => port,
        Err(e) => {
            error!("cannot open {}: {e}", device.display());
            return ExitCode::FAILURE;
        }
    };

    info!("serving {} on {}", root.display(), device.display());
    match Server::new(port, root).serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
