//! The per-connection SMTP command state machine, per `spec.md` §4.3.
//!
//! Ported from the teacher's `SmtpState`/`SmtpCommandResult` split (a state
//! enum plus a tagged outcome enum the caller matches on), generalized from
//! HELO/MAIL/RCPT/DATA/QUIT/STARTTLS to the full verb set this spec names
//! (adds EHLO-mode tracking, RSET/NOOP/VRFY/EXPN/TRFM, and multi-recipient
//! RCPT) and re-homed onto the `Connection` struct instead of an
//! async-generic `SmtpProtocol<R, W>`.

use crate::connection::Connection;
use crate::smtp::vrfy::VerifyTable;
use once_cell::sync::Lazy;
use regex::Regex;

/// States of an SMTP session, per `spec.md` §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitGreeting,
    PostGreeting,
    HaveMailFrom,
    HaveRcptTo,
    InData,
    Terminal,
}

/// Side effect the caller (the connection's I/O handler) must perform in
/// response to a processed line, beyond sending the reply text.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    None,
    OpenData,
    Quit,
}

/// The outcome of processing one command line: the reply text to queue on
/// the outbound buffer (already CRLF-terminated) and any follow-up action.
#[derive(Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub reply: String,
    pub action: Action,
}

impl StepOutcome {
    fn reply(text: impl Into<String>) -> Self {
        StepOutcome { reply: crlf(&text.into()), action: Action::None }
    }

    fn reply_action(text: impl Into<String>, action: Action) -> Self {
        StepOutcome { reply: crlf(&text.into()), action }
    }
}

/// Normalizes `text` into CRLF-terminated lines: each `\n`-delimited line
/// (its own trailing `\r`, if any, stripped first) is rejoined with a
/// single `"\r\n"`, and the whole reply gets exactly one trailing CRLF.
/// Callers may pass either a single line or an already `\n`-joined
/// multi-line reply; either way embedded `\r\n`s are never doubled.
fn crlf(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();
    let mut s = lines.join("\r\n");
    s.push_str("\r\n");
    s
}

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$")
        .unwrap()
});

static IPV6_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[A-Fa-f0-9]{1,4}:){7}[A-Fa-f0-9]{1,4}$|^(?:[A-Fa-f0-9]{1,4}:)+:(?:[A-Fa-f0-9]{1,4}:)*[A-Fa-f0-9]{0,4}$|^::$",
    )
    .unwrap()
});

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]+(\.[a-zA-Z]{2,})+$").unwrap()
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[a-zA-Z0-9]+(\.[a-zA-Z]{2,})+$").unwrap()
});

static MAIL_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*FROM\s*:\s*<([^>]*)>\s*$").unwrap()
});

static RCPT_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*TO\s*:\s*<([^>]*)>\s*$").unwrap()
});

/// True if `addr` satisfies the `local@domain` grammar from §4.3.
pub fn is_valid_email(addr: &str) -> bool {
    EMAIL_RE.is_match(addr)
}

/// True if `domain` satisfies the domain grammar from §4.3.
pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

/// True if `arg` is a domain, an IPv4 dotted-quad literal, or an IPv6
/// literal, per the EHLO argument grammar in §4.3.
pub fn is_valid_ehlo_arg(arg: &str) -> bool {
    DOMAIN_RE.is_match(arg) || IPV4_RE.is_match(arg) || IPV6_RE.is_match(arg)
}

/// Splits a command line into its uppercased verb and the raw remainder
/// (not yet trimmed beyond the single separating space).
fn split_verb(line: &str) -> (String, &str) {
    match line.find(' ') {
        Some(idx) => (line[..idx].to_ascii_uppercase(), line[idx + 1..].trim_start()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

const RECOGNIZED_VERBS: &[&str] = &[
    "HELO", "EHLO", "MAIL", "RCPT", "DATA", "RSET", "NOOP", "QUIT", "VRFY", "EXPN", "TRFM",
];

/// Advances `conn`'s parser state machine by one command line (excluding
/// the trailing CRLF). `conn.state` must not be `ParserState::InData`;
/// DATA-mode lines go through [`step_data_line`] instead. `vrfy` is the
/// loaded verify table VRFY consults regardless of the verify-enabled
/// toggle (§9(b)).
pub fn step(conn: &mut Connection, domain: &str, vrfy: &VerifyTable, line: &str) -> StepOutcome {
    debug_assert_ne!(conn.state, ParserState::InData);

    let (verb, rest) = split_verb(line);
    if !RECOGNIZED_VERBS.contains(&verb.as_str()) {
        return StepOutcome::reply("500 Command not recognized");
    }

    // QUIT is accepted from every state.
    if verb == "QUIT" {
        conn.state = ParserState::Terminal;
        return StepOutcome::reply_action(format!("221 {} service closing", domain), Action::Quit);
    }
    // RSET, NOOP, VRFY never change sequencing state and are accepted
    // wherever a command can legally arrive (any non-AwaitGreeting/InData
    // state per §4.3's per-state table, plus AwaitGreeting explicitly).
    match verb.as_str() {
        "RSET" => {
            conn.reset_transaction();
            if conn.state != ParserState::AwaitGreeting {
                conn.state = ParserState::PostGreeting;
            }
            return StepOutcome::reply("250 OK");
        }
        "NOOP" => return StepOutcome::reply("250 OK"),
        "VRFY" => {
            let result = vrfy.lookup(rest);
            return StepOutcome::reply(crate::smtp::vrfy::format_reply(&result));
        }
        _ => {}
    }

    match conn.state {
        ParserState::AwaitGreeting => step_await_greeting(conn, domain, &verb, rest),
        ParserState::PostGreeting => step_post_greeting(conn, domain, &verb, rest),
        ParserState::HaveMailFrom => step_have_mail_from(conn, &verb, rest),
        ParserState::HaveRcptTo => step_have_rcpt_to(conn, &verb, rest),
        ParserState::InData | ParserState::Terminal => {
            StepOutcome::reply("503 Bad sequence of commands")
        }
    }
}

fn step_await_greeting(conn: &mut Connection, domain: &str, verb: &str, rest: &str) -> StepOutcome {
    match verb {
        "HELO" => {
            if !is_valid_domain(rest) {
                return StepOutcome::reply("501 Syntax error in HELO argument");
            }
            conn.ehlo_mode = false;
            conn.state = ParserState::PostGreeting;
            StepOutcome::reply(format!("250-{} Hello {}", domain, rest))
        }
        "EHLO" => {
            if !is_valid_ehlo_arg(rest) {
                return StepOutcome::reply("501 Syntax error in EHLO argument");
            }
            conn.ehlo_mode = true;
            conn.state = ParserState::PostGreeting;
            StepOutcome::reply(format!("250-{} Hello {}\n250 TRFM", domain, rest))
        }
        _ => StepOutcome::reply("503 Bad sequence of commands"),
    }
}

fn step_post_greeting(conn: &mut Connection, _domain: &str, verb: &str, rest: &str) -> StepOutcome {
    match verb {
        "HELO" | "EHLO" => StepOutcome::reply("503 Already signed in"),
        "MAIL" => mail_from(conn, rest),
        "EXPN" => StepOutcome::reply("502 not implemented"),
        "TRFM" => trfm(conn),
        "RCPT" => StepOutcome::reply("503-5.5.1 Bad Sequence of Commands. Need MAIL FROM"),
        "DATA" => StepOutcome::reply("503 Need MAIL FROM and RCPT TO first"),
        _ => StepOutcome::reply("503 Bad sequence of commands"),
    }
}

fn step_have_mail_from(conn: &mut Connection, verb: &str, rest: &str) -> StepOutcome {
    match verb {
        "RCPT" => rcpt_to(conn, rest),
        "MAIL" => StepOutcome::reply("503 Sender already specified"),
        "DATA" => StepOutcome::reply("503 Need RCPT TO first"),
        "EXPN" => StepOutcome::reply("502 not implemented"),
        "TRFM" => trfm(conn),
        _ => StepOutcome::reply("503 Bad sequence of commands"),
    }
}

fn step_have_rcpt_to(conn: &mut Connection, verb: &str, rest: &str) -> StepOutcome {
    match verb {
        "RCPT" => rcpt_to(conn, rest),
        "DATA" => {
            if !rest.is_empty() {
                return StepOutcome::reply("501 Syntax error, no parameters allowed");
            }
            conn.state = ParserState::InData;
            StepOutcome::reply_action(
                "354 Start mail input; end with <CLRF>.<CLRF>",
                Action::OpenData,
            )
        }
        "MAIL" => StepOutcome::reply("503 Sender already specified"),
        "EXPN" => StepOutcome::reply("502 not implemented"),
        "TRFM" => trfm(conn),
        _ => StepOutcome::reply("503 Bad sequence of commands"),
    }
}

fn mail_from(conn: &mut Connection, rest: &str) -> StepOutcome {
    let addr = match MAIL_FROM_RE.captures(rest) {
        Some(c) => c[1].to_string(),
        None => return StepOutcome::reply("501 Syntax error in MAIL FROM parameters"),
    };
    if !is_valid_email(&addr) {
        return StepOutcome::reply("501 Syntax error in MAIL FROM parameters");
    }
    conn.envelope.sender = Some(addr);
    conn.state = ParserState::HaveMailFrom;
    StepOutcome::reply("250 OK")
}

fn rcpt_to(conn: &mut Connection, rest: &str) -> StepOutcome {
    let addr = match RCPT_TO_RE.captures(rest) {
        Some(c) => c[1].to_string(),
        None => return StepOutcome::reply("501 Syntax error in RCPT TO parameters"),
    };
    if !is_valid_email(&addr) {
        return StepOutcome::reply("501 Syntax error in RCPT TO parameters");
    }
    // §9(a): duplicates are stored once per insertion, no deduplication.
    conn.envelope.recipients.push(addr);
    conn.state = ParserState::HaveRcptTo;
    StepOutcome::reply("250 OK")
}

fn trfm(conn: &mut Connection) -> StepOutcome {
    if !conn.ehlo_mode {
        return StepOutcome::reply("502  Command not implemented");
    }
    conn.transform_flag = !conn.transform_flag;
    StepOutcome::reply("250 OK")
}

/// Outcome of feeding one line to the DATA-mode body reader.
#[derive(Debug, PartialEq, Eq)]
pub enum DataLineOutcome {
    /// A body line, dot-stuffing decoded, to append to the message file
    /// (CRLF already included).
    Append(Vec<u8>),
    /// The `.\r\n` sentinel was received; the body is complete.
    End,
}

/// Decodes one DATA-mode line per `spec.md` §4.2/§4.3: a bare `.` ends the
/// body, and an input line starting with `..` has its leading dot
/// stripped. Operates on the raw bytes of the line (CRLF already stripped
/// by the caller) so non-UTF-8 body bytes round-trip exactly (§8).
pub fn step_data_line(line: &[u8]) -> DataLineOutcome {
    if line == b"." {
        return DataLineOutcome::End;
    }
    let mut bytes = if let Some(stripped) = line.strip_prefix(b"..") {
        let mut v = Vec::with_capacity(stripped.len() + 1 + 2);
        v.push(b'.');
        v.extend_from_slice(stripped);
        v
    } else {
        line.to_vec()
    };
    bytes.extend_from_slice(b"\r\n");
    DataLineOutcome::Append(bytes)
}

#[cfg(test)]
mod tests;
