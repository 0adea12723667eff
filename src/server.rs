//! The daemon: a listener thread accepting TCP connections and one worker
//! thread per client.
//!
//! The whole image sits behind a single process-wide reader/writer lock.
//! Read-only verbs (`cd`, `pwd`, `ls`, `cat`, downloads) run under the
//! read guard, everything else under the write guard; the guard hands the
//! engine exactly the `&`/`&mut` access the verb needs, and verbs compose
//! as plain method calls below the lock. An upload holds the write guard
//! for its whole duration, client reads included.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, RwLock};
use std::thread;

use log::{debug, info, warn};

use crate::disk::Disk;
use crate::fs::{FileType, MiniFs, Session};
use crate::protocol::{self, MSG_SIZE};
use crate::Result;

const HELP: &str = "                     MiniFS commands\n\
-----------------------------------------------------------------\n\
* help                         display help\n\
* exit                         exit from MiniFS\n\
* cd path                      change current directory along path\n\
* ls [path]                    list files in current directory or by path\n\
\x20                              options: \n\
\x20                                --all    don't omit files starting with '.'\n\
* cp [options] src dest        make a copy of src at dest\n\
\x20                              options: \n\
\x20                                --from-local    copy a local file to MiniFS\n\
\x20                                --to-local      copy a file from MiniFS to local FS\n\
* rm path                      remove file or directory\n\
* mv src dest                  move src to dest\n\
* mkdir path                   create a directory\n\
* touch path                   create a file\n\
* cat path                     print contents of a file\n\
* pwd                          print path to current working directory\n\
-----------------------------------------------------------------\n";

const UNKNOWN_CMD: &str = "unknown command; type 'help' for help";
const BAD_ARGS: &str = "missing operand; type 'help' for help";

/// Accepts connections forever, spawning a worker per client.
pub fn serve<D: Disk + 'static>(fs: MiniFs<D>, listener: TcpListener) -> io::Result<()> {
    let fs = Arc::new(RwLock::new(fs));
    info!("listening on {}", listener.local_addr()?);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "?".to_string());
                    match handle_client(&fs, stream) {
                        Ok(()) => info!("client {peer} disconnected"),
                        Err(e) => warn!("client {peer}: {e}"),
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    Ok(())
}

fn handle_client<D: Disk>(fs: &RwLock<MiniFs<D>>, mut stream: TcpStream) -> io::Result<()> {
    let mut buf = [0u8; MSG_SIZE];

    // Log in: the first message is the user id, acknowledged with one
    // status byte.
    let n = protocol::recv_msg(&mut stream, &mut buf)?;
    if n == 0 {
        return Ok(());
    }
    let user: i32 = match std::str::from_utf8(&buf[..n])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|&id| id > 0)
    {
        Some(id) => id,
        None => {
            protocol::send_failure(&mut stream, "invalid user id")?;
            return Ok(());
        }
    };
    protocol::send_success(&mut stream)?;
    debug!("user {user} logged in");

    let mut sess = Session::new(user);
    loop {
        let n = protocol::recv_msg(&mut stream, &mut buf)?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf[..n]).into_owned();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            protocol::send_failure(&mut stream, UNKNOWN_CMD)?;
            continue;
        };
        debug!("user {user}: {}", line.trim_end());

        match cmd {
            "exit" => break,
            "help" => {
                protocol::send_success(&mut stream)?;
                protocol::send_msg(&mut stream, HELP)?;
            }
            "pwd" => {
                let res = fs.read().unwrap().work_path(&sess);
                reply_line(&mut stream, res)?;
            }
            "cd" => match tokens.get(1) {
                Some(path) => {
                    let res = fs.read().unwrap().chdir(&mut sess, path);
                    reply_line(&mut stream, res)?;
                }
                None => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            "ls" => {
                let (all, path) = match tokens.get(1) {
                    Some(&"--all") => (true, tokens.get(2).copied()),
                    other => (false, other.copied()),
                };
                let res = fs.read().unwrap().list(&sess, path, all);
                match res {
                    Ok(names) => {
                        protocol::send_success(&mut stream)?;
                        for name in names {
                            protocol::send_msg(&mut stream, &name)?;
                            protocol::send_msg(&mut stream, "\n")?;
                        }
                    }
                    Err(e) => protocol::send_failure(&mut stream, &e.to_string())?,
                }
            }
            "mkdir" | "touch" => match tokens.get(1) {
                Some(path) => {
                    let typ = if cmd == "mkdir" {
                        FileType::Directory
                    } else {
                        FileType::Regular
                    };
                    let res = fs.write().unwrap().create(&sess, path, typ).map(|_| ());
                    reply_unit(&mut stream, res)?;
                }
                None => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            "rm" => match tokens.get(1) {
                Some(path) => {
                    let res = fs.write().unwrap().remove(&sess, path);
                    reply_unit(&mut stream, res)?;
                }
                None => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            "mv" => match (tokens.get(1), tokens.get(2)) {
                (Some(src), Some(dest)) => {
                    let res = fs.write().unwrap().rename(&sess, src, dest);
                    reply_unit(&mut stream, res)?;
                }
                _ => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            "cat" => match tokens.get(1) {
                Some(path) => {
                    let res = fs.read().unwrap().read_contents(&sess, path);
                    reply_bytes(&mut stream, res)?;
                }
                None => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            "cp" => match tokens.get(1) {
                Some(&"--from-local") => match tokens.get(3) {
                    Some(dest) => upload(fs, &mut stream, &sess, dest)?,
                    None => protocol::send_failure(&mut stream, BAD_ARGS)?,
                },
                Some(&"--to-local") => match tokens.get(2) {
                    Some(src) => {
                        let res = fs.read().unwrap().read_contents(&sess, src);
                        reply_bytes(&mut stream, res)?;
                    }
                    None => protocol::send_failure(&mut stream, BAD_ARGS)?,
                },
                Some(src) => match tokens.get(2) {
                    Some(dest) => {
                        let res = fs.write().unwrap().copy(&sess, src, dest).map(|_| ());
                        reply_unit(&mut stream, res)?;
                    }
                    None => protocol::send_failure(&mut stream, BAD_ARGS)?,
                },
                None => protocol::send_failure(&mut stream, BAD_ARGS)?,
            },
            _ => protocol::send_failure(&mut stream, UNKNOWN_CMD)?,
        }
    }
    Ok(())
}

fn reply_unit(stream: &mut TcpStream, res: Result<()>) -> io::Result<()> {
    match res {
        Ok(()) => protocol::send_success(stream),
        Err(e) => protocol::send_failure(stream, &e.to_string()),
    }
}

fn reply_line(stream: &mut TcpStream, res: Result<String>) -> io::Result<()> {
    match res {
        Ok(text) => {
            protocol::send_success(stream)?;
            protocol::send_msg(stream, &text)?;
            protocol::send_msg(stream, "\n")
        }
        Err(e) => protocol::send_failure(stream, &e.to_string()),
    }
}

fn reply_bytes(stream: &mut TcpStream, res: Result<Vec<u8>>) -> io::Result<()> {
    match res {
        Ok(bytes) => {
            protocol::send_success(stream)?;
            stream.write_all(&bytes)
        }
        Err(e) => protocol::send_failure(stream, &e.to_string()),
    }
}

/// `cp --from-local`: acknowledge the command, take the declared size,
/// pre-flight it, then stream the content into the new file in block-sized
/// chunks. The write guard is held across the whole exchange. If an append
/// fails mid-stream the remaining bytes are still drained so the client
/// can finish sending; the committed prefix stays on disk and the failure
/// is logged.
fn upload<D: Disk>(
    fs: &RwLock<MiniFs<D>>,
    stream: &mut TcpStream,
    sess: &Session,
    dest: &str,
) -> io::Result<()> {
    let mut fs = fs.write().unwrap();
    protocol::send_success(stream)?;
    let size = protocol::recv_size(stream)? as usize;

    let ino = match fs.create_for_upload(sess, dest, size) {
        Ok(ino) => ino,
        Err(e) => return protocol::send_failure(stream, &e.to_string()),
    };
    protocol::send_success(stream)?;

    let mut buf = [0u8; MSG_SIZE];
    let mut failed = false;
    let mut left = size;
    while left > 0 {
        let n = left.min(MSG_SIZE);
        stream.read_exact(&mut buf[..n])?;
        if !failed {
            if let Err(e) = fs.append(ino, &buf[..n]) {
                warn!("upload of {dest} failed after a partial append: {e}");
                failed = true;
            }
        }
        left -= n;
    }
    Ok(())
}
