//! A minimal `ls` over 9P2000(.u): connect, log in, list a path.
//!
//! Grounded on py9p's `client.py` sample usage (`login` then `dirlist`) and
//! on the crate's own `Client` convenience surface.

use std::net::TcpStream;
use std::process::exit;

use clap::Parser;
use log::error;

use p9::{Client, Credentials};

/// Connect to a 9P server and list a path.
#[derive(Parser)]
#[command(name = "ls", about = "List a path on a 9P2000(.u) server")]
struct Args {
    /// Server address, `host:port`.
    addr: String,
    /// Path to list, relative to the attached root.
    #[arg(default_value = "/")]
    path: String,
    /// User name to attach as.
    #[arg(short = 'u', long, default_value = "none")]
    user: String,
    /// Long listing, `ls -l` style.
    #[arg(short = 'l', long)]
    long: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let stream = match TcpStream::connect(&args.addr) {
        Ok(s) => s,
        Err(e) => {
            error!("connect to {} failed: {}", args.addr, e);
            exit(1);
        }
    };

    let mut client = Client::new(stream);
    let creds = Credentials { user: args.user, passwd: String::new(), authmode: "none".to_owned() };

    if let Err(e) = client.login(&creds, "", 8192) {
        error!("login failed: {}", e);
        exit(1);
    }

    match client.ls(&args.path, args.long) {
        Ok(entries) => {
            for entry in entries {
                println!("{}", entry);
            }
        }
        Err(e) => {
            error!("ls {} failed: {}", args.path, e);
            exit(1);
        }
    }
}
