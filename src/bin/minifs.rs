//! The interactive MiniFS client: a small REPL that forwards commands to
//! the daemon and renders replies. `cd` and the two `cp` transfer legs
//! need local handling; everything else is send-and-print.

use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::process::exit;

use clap::Parser;

use minifs::param::MAXFILE;
use minifs::protocol::{self, MSG_SIZE, REPLY_TIMEOUT};

/// Connect to a MiniFS daemon.
#[derive(Parser)]
#[command(name = "minifs", version, about)]
struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1")]
    ip: String,

    /// Server port.
    #[arg(default_value_t = 8080)]
    port: u16,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{e}");
        exit(1);
    }
}

fn run(args: &Args) -> io::Result<()> {
    let user = ask_user_id()?;
    let mut stream = TcpStream::connect((args.ip.as_str(), args.port))?;
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;

    protocol::send_msg(&mut stream, &user.to_string())?;
    if !protocol::read_status(&mut stream)? {
        eprintln!("login rejected");
        return Ok(());
    }

    let mut work_path = String::from("/");
    let stdin = io::stdin();
    loop {
        print!("{work_path}$ ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["exit", ..] => {
                let _ = protocol::send_msg(&mut stream, "exit");
                break;
            }
            ["cd", _path, ..] => cmd_cd(&mut stream, line, &mut work_path)?,
            ["cp", "--from-local", local, _dest] => cmd_upload(&mut stream, line, local)?,
            ["cp", "--to-local", _src, local] => cmd_download(&mut stream, line, local)?,
            _ => cmd_plain(&mut stream, line)?,
        }
    }
    Ok(())
}

/// Reads a reply's status byte. A server that says nothing within the
/// reply timeout counts as a failure rather than a dead connection.
fn read_status(stream: &mut TcpStream) -> io::Result<bool> {
    match protocol::read_status(stream) {
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Ok(false)
        }
        other => other,
    }
}

fn ask_user_id() -> io::Result<i32> {
    let stdin = io::stdin();
    loop {
        print!("user id: ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            exit(0);
        }
        match line.trim().parse::<i32>() {
            Ok(id) if id > 0 => return Ok(id),
            _ => println!("invalid id"),
        }
    }
}

fn cmd_plain(stream: &mut TcpStream, line: &str) -> io::Result<()> {
    protocol::send_msg(stream, line)?;
    if !read_status(stream)? {
        println!("error");
    }
    let text = protocol::drain_to_string(stream)?;
    print!("{text}");
    io::stdout().flush()
}

fn cmd_cd(stream: &mut TcpStream, line: &str, work_path: &mut String) -> io::Result<()> {
    protocol::send_msg(stream, line)?;
    if read_status(stream)? {
        let reply = protocol::drain_to_string(stream)?;
        if let Some(path) = reply.lines().next() {
            *work_path = path.to_string();
        }
    } else {
        println!("error");
        print!("{}", protocol::drain_to_string(stream)?);
    }
    Ok(())
}

fn cmd_upload(stream: &mut TcpStream, line: &str, local: &str) -> io::Result<()> {
    let mut file = match File::open(local) {
        Ok(f) => f,
        Err(e) => {
            println!("{local}: {e}");
            return Ok(());
        }
    };
    let meta = file.metadata()?;
    if !meta.is_file() {
        println!("{local}: not a regular file");
        return Ok(());
    }
    if meta.len() > MAXFILE as u64 {
        println!("{local}: file too big");
        return Ok(());
    }

    protocol::send_msg(stream, line)?;
    // The first status byte only synchronises the size exchange.
    read_status(stream)?;
    protocol::send_size(stream, meta.len())?;
    if !read_status(stream)? {
        println!("error");
        print!("{}", protocol::drain_to_string(stream)?);
        return Ok(());
    }

    let mut buf = [0u8; MSG_SIZE];
    let mut left = meta.len() as usize;
    while left > 0 {
        let n = left.min(MSG_SIZE);
        file.read_exact(&mut buf[..n])?;
        stream.write_all(&buf[..n])?;
        left -= n;
    }
    Ok(())
}

fn cmd_download(stream: &mut TcpStream, line: &str, local: &str) -> io::Result<()> {
    let mut file = match File::create(local) {
        Ok(f) => f,
        Err(e) => {
            println!("{local}: {e}");
            return Ok(());
        }
    };
    protocol::send_msg(stream, line)?;
    if !read_status(stream)? {
        println!("error");
        print!("{}", protocol::drain_to_string(stream)?);
        return Ok(());
    }
    protocol::drain(stream, &mut file)?;
    Ok(())
}
