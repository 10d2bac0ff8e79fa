use super::*;

fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_required_flags() {
    let cfg = Config::from_args(args(&[
        "-d", "example.org", "-m", "/var/mail", "-s", "2525", "-p", "1025",
    ]))
    .unwrap();
    assert_eq!(cfg.domain, "example.org");
    assert_eq!(cfg.maildir, PathBuf::from("/var/mail"));
    assert_eq!(cfg.smtp_port, 2525);
    assert_eq!(cfg.mgmt_port, 1025);
    assert!(cfg.transform_cmd.is_none());
    assert!(cfg.vrfy_file.is_none());
}

#[test]
fn parses_optional_flags() {
    let cfg = Config::from_args(args(&[
        "-d", "example.org", "-m", "/var/mail", "-s", "2525", "-p", "1025", "-t",
        "/usr/bin/spamc", "-f", "/etc/mail/addresses",
    ]))
    .unwrap();
    assert_eq!(cfg.transform_cmd.as_deref(), Some("/usr/bin/spamc"));
    assert_eq!(cfg.vrfy_file, Some(PathBuf::from("/etc/mail/addresses")));
}

#[test]
fn missing_required_flag_errors() {
    let err = Config::from_args(args(&["-m", "/var/mail", "-s", "2525", "-p", "1025"])).unwrap_err();
    assert!(err.to_string().contains("-d"));
}

#[test]
fn bad_port_errors() {
    let err = Config::from_args(args(&[
        "-d", "example.org", "-m", "/var/mail", "-s", "not-a-port", "-p", "1025",
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("-s"));
}

#[test]
fn unrecognized_flag_errors() {
    let err = Config::from_args(args(&["-x", "foo"])).unwrap_err();
    assert!(err.to_string().contains("-x"));
}
