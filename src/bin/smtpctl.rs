//! `smtpctl`: the control-plane manager client, per `spec.md` §6.
//!
//! Connects to a running `smtpd`'s UDP control-plane (`-i <ip> -p <port>`)
//! and presents an interactive menu that emits the request frames
//! specified in §4.5, printing the decoded response.

use anyhow::{anyhow, Context, Result};
use maildrop_smtpd::control::{self, Response, Status};
use std::io::{self, BufRead, Write};
use std::net::UdpSocket;
use std::time::Duration;

struct Args {
    ip: String,
    port: u16,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut ip: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut next = || {
            iter.next()
                .ok_or_else(|| anyhow!("flag {} requires an argument", flag))
        };
        match flag.as_str() {
            "-i" => ip = Some(next()?.clone()),
            "-p" => {
                let raw = next()?;
                port = Some(
                    raw.parse::<u16>()
                        .map_err(|e| anyhow!("-p ('{}') must be a valid u16 port: {}", raw, e))?,
                );
            }
            other => return Err(anyhow!("unrecognized flag: {}", other)),
        }
    }
    Ok(Args {
        ip: ip.ok_or_else(|| anyhow!("-i <ip> is required"))?,
        port: port.ok_or_else(|| anyhow!("-p <port> is required"))?,
    })
}

fn usage(program: &str) -> String {
    format!("usage: {} -i <ip> -p <port>", program)
}

const MENU: &str = "\
smtpctl menu:
  0) historical connections
  1) current connections
  2) bytes transferred
  3) read transform toggle
  4) set transform on
  5) set transform off
  6) set verify on
  7) set verify off
  q) quit
";

fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let argv: Vec<String> = std::env::args().collect();
    let program = argv.first().cloned().unwrap_or_else(|| "smtpctl".to_string());
    let args = match parse_args(&argv[1..]) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}\n{}", e, usage(&program));
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&args) {
        eprintln!("smtpctl error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("binding local UDP socket")?;
    socket
        .connect((args.ip.as_str(), args.port))
        .with_context(|| format!("connecting to {}:{}", args.ip, args.port))?;
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("setting UDP read timeout")?;

    let stdin = io::stdin();
    let mut identifier: u16 = 0;

    loop {
        print!("{}> ", MENU);
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let choice = line.trim();
        if choice.eq_ignore_ascii_case("q") {
            break;
        }

        let code: u8 = match choice.parse() {
            Ok(c) => c,
            Err(_) => {
                println!("not a number, try again");
                continue;
            }
        };

        identifier = identifier.wrapping_add(1);
        let request = control::encode_request(identifier, code);
        if let Err(e) = socket.send(&request) {
            println!("send failed: {}", e);
            continue;
        }

        let mut buf = [0u8; control::RESPONSE_LEN];
        match socket.recv(&mut buf) {
            Ok(n) => match control::decode_response(&buf[..n]) {
                Some(resp) => print_response(&resp),
                None => println!("malformed response ({} bytes)", n),
            },
            Err(e) => println!("recv failed: {}", e),
        }
    }

    Ok(())
}

fn print_response(resp: &Response) {
    println!(
        "id={} status={:?} quantity={} boolean={}",
        resp.identifier, resp.status, resp.quantity, resp.boolean
    );
    if resp.status != Status::Success {
        println!("  (request failed, quantity/boolean zeroed)");
    }
}
