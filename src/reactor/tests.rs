use super::*;
use mio::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::time::Duration;

struct TestResource(UdpSocket);

impl Registrable for TestResource {
    fn raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    fn source(&mut self) -> &mut dyn Source {
        &mut self.0
    }
}

fn udp(addr: &str) -> UdpSocket {
    UdpSocket::bind(addr.parse().unwrap()).unwrap()
}

#[test]
fn register_then_wait_delivers_readable() {
    let a = udp("127.0.0.1:0");
    let a_addr = a.local_addr().unwrap();
    let b = udp("127.0.0.1:0");

    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();

    b.send_to(b"hello", a_addr).unwrap();

    reactor.wait(Some(Duration::from_secs(2))).unwrap();
    let (ready_fd, tag) = reactor.next_read().expect("expected a readable fd");
    assert_eq!(ready_fd, fd);
    assert_eq!(tag, TypeTag::ControlUdp);
    assert!(reactor.next_read().is_none());
}

#[test]
fn duplicate_register_is_noop_for_existing_bits() {
    let a = udp("127.0.0.1:0");
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();

    // A second registration on a *different* socket bound to a fresh fd is
    // a distinct fd, so exercise the no-op path directly via the stored
    // interest instead of constructing an fd collision (not reproducible
    // without raw dup()).
    assert_eq!(reactor.interest(fd), Some(Interest::READ));
}

#[test]
fn deregister_clears_entry_when_interest_empty() {
    let a = udp("127.0.0.1:0");
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();

    let returned = reactor.deregister(fd, Interest::READ, false);
    assert!(returned.is_some());
    assert!(reactor.type_tag(fd).is_none());
}

#[test]
fn deregister_preserves_other_bit() {
    let a = udp("127.0.0.1:0");
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::BOTH, TypeTag::ControlUdp)
        .unwrap();

    let returned = reactor.deregister(fd, Interest::WRITE, false);
    assert!(returned.is_none(), "entry should still be live");
    assert_eq!(reactor.interest(fd), Some(Interest::READ));
}

#[test]
fn free_data_drops_resource_on_full_deregister() {
    let a = udp("127.0.0.1:0");
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();

    let returned = reactor.deregister(fd, Interest::READ, true);
    assert!(returned.is_none());
    assert!(reactor.get_mut(fd).is_none());
}

#[test]
fn modify_interest_replaces_mask() {
    let a = udp("127.0.0.1:0");
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();

    reactor.modify_interest(fd, Interest::WRITE).unwrap();
    assert_eq!(reactor.interest(fd), Some(Interest::WRITE));
}

#[test]
fn modify_interest_on_unknown_fd_errors() {
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    assert!(reactor.modify_interest(999, Interest::READ).is_err());
}

#[test]
fn high_water_is_monotone() {
    let mut reactor: Reactor<TestResource> = Reactor::new(16).unwrap();
    let a = udp("127.0.0.1:0");
    let fd = reactor
        .register(TestResource(a), Interest::READ, TypeTag::ControlUdp)
        .unwrap();
    let before = reactor.high_water();
    assert!(before as i32 > fd || before as i32 == fd + 1);
    reactor.deregister(fd, Interest::READ, true);
    assert_eq!(reactor.high_water(), before, "high water never decreases");
}
