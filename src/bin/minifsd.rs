//! The MiniFS daemon.

use std::fs::OpenOptions;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, info};

use minifs::disk::{CharDisk, Disk, FileDisk};
use minifs::param::DISK_SIZE;
use minifs::{server, MiniFs, Result};

/// Serve a MiniFS disk image over TCP.
#[derive(Parser)]
#[command(name = "minifsd", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Disk image path; a fresh image is created when it does not exist.
    #[arg(short, long, default_value = "minifs.img")]
    disk: PathBuf,

    /// The image path is a minifs character device, which moves one block
    /// per transfer and cannot be resized.
    #[arg(long)]
    char_dev: bool,

    /// Write a fresh filesystem even if the target already holds one.
    #[arg(long)]
    format: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", args.port))?;

    if args.char_dev {
        let file = OpenOptions::new().read(true).write(true).open(&args.disk)?;
        let fs = open_or_mkfs(CharDisk::new(file), args.format)?;
        server::serve(fs, listener)?;
    } else {
        let fresh = args.format || !args.disk.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&args.disk)?;
        file.set_len(DISK_SIZE as u64)?;
        let fs = open_or_mkfs(FileDisk::new(file), fresh)?;
        server::serve(fs, listener)?;
    }
    Ok(())
}

fn open_or_mkfs<D: Disk>(disk: D, format: bool) -> Result<MiniFs<D>> {
    if format {
        info!("writing a fresh filesystem");
        MiniFs::mkfs(disk)
    } else {
        MiniFs::open(disk)
    }
}
