use super::*;
use crate::connection::Connection;
use crate::smtp::vrfy::VerifyTable;

fn conn() -> Connection {
    Connection::new(9, "127.0.0.1:2525".parse().unwrap())
}

fn empty_vrfy() -> VerifyTable {
    VerifyTable::load(None).unwrap()
}

#[test]
fn helo_moves_to_post_greeting_and_sets_helo_mode() {
    let mut c = conn();
    let out = step(&mut c, "mail.example.com", &empty_vrfy(), "HELO example.org");
    assert_eq!(c.state, ParserState::PostGreeting);
    assert!(!c.ehlo_mode);
    assert!(out.reply.starts_with("250-mail.example.com Hello example.org"));
}

#[test]
fn ehlo_advertises_trfm_and_sets_ehlo_mode() {
    let mut c = conn();
    let out = step(&mut c, "mail.example.com", &empty_vrfy(), "EHLO example.org");
    assert!(c.ehlo_mode);
    assert!(out.reply.starts_with("250-mail.example.com Hello example.org"));
    assert!(out.reply.contains("250 TRFM"));
    assert!(!out.reply.contains("\r\r\n"));
    assert!(out.reply.ends_with("250 TRFM\r\n"));
}

#[test]
fn helo_with_bad_domain_stays_in_await_greeting() {
    let mut c = conn();
    let out = step(&mut c, "mail.example.com", &empty_vrfy(), "HELO not a domain");
    assert_eq!(c.state, ParserState::AwaitGreeting);
    assert!(out.reply.starts_with("501"));
}

#[test]
fn trfm_without_ehlo_is_rejected() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    let out = step(&mut c, "d", &empty_vrfy(), "TRFM");
    assert!(out.reply.starts_with("502"));
    assert!(!c.transform_flag);
}

#[test]
fn trfm_in_ehlo_mode_toggles_flag() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "EHLO example.org");
    let out = step(&mut c, "d", &empty_vrfy(), "TRFM");
    assert!(out.reply.starts_with("250"));
    assert!(c.transform_flag);
    step(&mut c, "d", &empty_vrfy(), "TRFM");
    assert!(!c.transform_flag);
}

#[test]
fn rcpt_before_mail_from_is_rejected_with_bad_sequence() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    let out = step(&mut c, "d", &empty_vrfy(), "RCPT TO:<bob@example.org>");
    assert_eq!(c.state, ParserState::PostGreeting);
    assert!(out.reply.starts_with("503-5.5.1"));
}

#[test]
fn full_transaction_reaches_in_data_on_data_command() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    step(&mut c, "d", &empty_vrfy(), "MAIL FROM:<alice@example.org>");
    step(&mut c, "d", &empty_vrfy(), "RCPT TO:<bob@example.org>");
    let out = step(&mut c, "d", &empty_vrfy(), "DATA");
    assert_eq!(c.state, ParserState::InData);
    assert_eq!(out.action, Action::OpenData);
    assert!(out.reply.starts_with("354"));
}

#[test]
fn mail_from_twice_is_rejected() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    step(&mut c, "d", &empty_vrfy(), "MAIL FROM:<alice@example.org>");
    let out = step(&mut c, "d", &empty_vrfy(), "MAIL FROM:<carol@example.org>");
    assert!(out.reply.starts_with("503"));
    assert_eq!(c.envelope.sender, Some("alice@example.org".to_string()));
}

#[test]
fn malformed_mail_from_argument_is_rejected() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    let out = step(&mut c, "d", &empty_vrfy(), "MAIL FROM:alice@example.org");
    assert!(out.reply.starts_with("501"));
    assert_eq!(c.state, ParserState::PostGreeting);
}

#[test]
fn multiple_rcpt_accumulate() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    step(&mut c, "d", &empty_vrfy(), "MAIL FROM:<alice@example.org>");
    step(&mut c, "d", &empty_vrfy(), "RCPT TO:<bob@example.org>");
    step(&mut c, "d", &empty_vrfy(), "RCPT TO:<carol@example.org>");
    assert_eq!(c.envelope.recipients.len(), 2);
}

#[test]
fn quit_sets_terminal_state_and_quit_action() {
    let mut c = conn();
    let out = step(&mut c, "d", &empty_vrfy(), "QUIT");
    assert_eq!(c.state, ParserState::Terminal);
    assert_eq!(out.action, Action::Quit);
    assert!(out.reply.starts_with("221"));
}

#[test]
fn rset_clears_envelope_and_returns_to_post_greeting() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    step(&mut c, "d", &empty_vrfy(), "MAIL FROM:<alice@example.org>");
    step(&mut c, "d", &empty_vrfy(), "RSET");
    assert!(c.envelope.is_empty());
    assert_eq!(c.state, ParserState::PostGreeting);
}

#[test]
fn unrecognized_verb_is_500() {
    let mut c = conn();
    let out = step(&mut c, "d", &empty_vrfy(), "BOGUS foo");
    assert!(out.reply.starts_with("500"));
}

#[test]
fn expn_always_replies_not_implemented() {
    let mut c = conn();
    step(&mut c, "d", &empty_vrfy(), "HELO example.org");
    let out = step(&mut c, "d", &empty_vrfy(), "EXPN somelist");
    assert!(out.reply.starts_with("502"));
}

#[test]
fn data_line_dot_stuffing_strips_leading_dot() {
    match step_data_line(b"..hello") {
        DataLineOutcome::Append(bytes) => assert_eq!(bytes, b".hello\r\n"),
        other => panic!("expected Append, got {:?}", other),
    }
}

#[test]
fn bare_dot_ends_data() {
    assert_eq!(step_data_line(b"."), DataLineOutcome::End);
}

#[test]
fn ordinary_data_line_passes_through() {
    match step_data_line(b"Subject: hi") {
        DataLineOutcome::Append(bytes) => assert_eq!(bytes, b"Subject: hi\r\n"),
        other => panic!("expected Append, got {:?}", other),
    }
}

#[test]
fn email_grammar_rejects_missing_domain() {
    assert!(!is_valid_email("alice@localhost"));
    assert!(is_valid_email("alice@example.org"));
}

#[test]
fn ehlo_arg_accepts_ipv4_literal() {
    assert!(is_valid_ehlo_arg("192.168.1.10"));
}
