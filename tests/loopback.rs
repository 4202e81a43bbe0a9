//! End-to-end tests against a pseudo-terminal pair. The slave side is opened
//! through the crate as if it were a serial device; the master side plays the
//! remote end of the cable.
#![cfg(target_os = "linux")]

use nix::{
    fcntl::{self, FlockArg, OFlag},
    pty::{self, PtyMaster},
};
use serial_stream::{open_port, ByteSize, Config, Error, Parity, Port, SerialPort, StopBits};
use std::{
    fs::File,
    io::{self, Read, Write},
    os::unix::io::{AsRawFd, FromRawFd},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback() -> (PtyMaster, String) {
    init_logger();
    let master = pty::posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).expect("posix_openpt");
    pty::grantpt(&master).expect("grantpt");
    pty::unlockpt(&master).expect("unlockpt");
    let name = pty::ptsname_r(&master).expect("ptsname");
    (master, name)
}

/// Second descriptor on the master, so one thread can write it while another reads.
fn dup_master(master: &PtyMaster) -> File {
    let fd = nix::unistd::dup(master.as_raw_fd()).expect("dup");
    unsafe { File::from_raw_fd(fd) }
}

fn config(name: &str) -> Config {
    Config {
        read_timeout: Some(Duration::from_secs(5)),
        ..Config::new(name, 115200)
    }
}

fn read_n(port: &Port, n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    let mut buf = [0u8; 256];
    while out.len() < n {
        let want = (n - out.len()).min(buf.len());
        let got = port.read(&mut buf[..want]).expect("read");
        assert!(got > 0, "timed out after {} of {} bytes", out.len(), n);
        out.extend_from_slice(&buf[..got]);
    }
    out
}

#[test]
fn opens_at_115200_8n1() {
    let (_master, name) = loopback();
    let port = open_port(&Config::new(name.as_str(), 115200)).expect("open");
    assert_eq!(port.name(), name);
}

#[test]
fn round_trip_test_bytes() {
    let (mut master, name) = loopback();
    let port = open_port(&config(&name)).expect("open");

    assert_eq!(port.write(b"test").unwrap(), 4);
    let mut echoed = [0u8; 4];
    master.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"test");

    master.write_all(b"te").unwrap();
    master.write_all(b"st").unwrap();
    assert_eq!(read_n(&port, 4), b"test");
}

#[test]
fn every_frame_setting_applies() {
    let (_master, name) = loopback();
    for byte_size in [ByteSize::FIVE, ByteSize::SIX, ByteSize::SEVEN, ByteSize::EIGHT] {
        for parity in [Parity::NONE, Parity::EVEN, Parity::ODD] {
            for stop_bits in [StopBits::ONE, StopBits::TWO] {
                let config = Config {
                    byte_size,
                    parity,
                    stop_bits,
                    ..config(&name)
                };
                let port = open_port(&config).unwrap_or_else(|e| panic!("{}: {}", config, e));
                port.close().unwrap();
            }
        }
    }
}

#[test]
fn bytes_pass_through_untranslated() {
    let (mut master, name) = loopback();
    let port = open_port(&config(&name)).expect("open");
    let all: Vec<u8> = (0..=255).collect();

    master.write_all(&all).unwrap();
    assert_eq!(read_n(&port, all.len()), all);

    port.write(&all).unwrap();
    let mut echoed = vec![0u8; all.len()];
    master.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, all);
}

#[test]
fn crlf_translation() {
    let (mut master, name) = loopback();
    let port = open_port(&Config {
        crlf_translate: true,
        ..config(&name)
    })
    .expect("open");

    port.write(b"a\n").unwrap();
    let mut echoed = [0u8; 3];
    master.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"a\r\n");

    master.write_all(b"b\r").unwrap();
    assert_eq!(read_n(&port, 2), b"b\n");
}

#[test]
fn close_twice_and_use_after_close() {
    let (_master, name) = loopback();
    let port = open_port(&config(&name)).expect("open");

    port.close().expect("first close");
    assert!(matches!(port.close(), Err(Error::Closed)));
    assert!(matches!(port.read(&mut [0u8; 4]), Err(Error::Closed)));
    assert!(matches!(port.write(b"x"), Err(Error::Closed)));

    let err = (&port).write_all(b"x").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn second_open_reports_busy_device() {
    let (_master, name) = loopback();
    let first = open_port(&config(&name)).expect("open");

    match open_port(&config(&name)) {
        Err(Error::DeviceOpen { name: failed, source }) => {
            assert_eq!(failed, name);
            assert_eq!(source.kind(), io::ErrorKind::WouldBlock);
        }
        other => panic!("expected DeviceOpen, got {:?}", other),
    }

    first.close().unwrap();
    open_port(&config(&name)).expect("reopen after close");
}

#[test]
fn rejected_configs_leave_nothing_open() {
    let (_master, name) = loopback();
    let bad = [
        Config {
            byte_size: ByteSize(4),
            ..config(&name)
        },
        Config {
            stop_bits: StopBits(3),
            ..config(&name)
        },
        Config {
            parity: Parity('S'),
            ..config(&name)
        },
        Config {
            baud: 12345,
            ..config(&name)
        },
    ];
    for config in &bad {
        assert!(open_port(config).is_err(), "{}", config);
    }
    // an open left behind would still hold the exclusive lock
    open_port(&config(&name)).expect("device is still free");
}

#[test]
fn platform_open_rejects_invalid_config() {
    let (_master, name) = loopback();
    let bad = Config {
        byte_size: ByteSize(9),
        parity: Parity('X'),
        ..config(&name)
    };
    assert!(matches!(Port::open(&bad), Err(Error::ByteSize(9))));

    let bad = Config {
        parity: Parity('X'),
        ..config(&name)
    };
    assert!(matches!(Port::open(&bad), Err(Error::Parity('X'))));

    Port::open(&config(&name)).expect("device is still free");
}

#[test]
fn blocking_read_reports_hang_up() {
    let (master, name) = loopback();
    let port = open_port(&Config::new(name.as_str(), 9600)).expect("open");
    drop(master);

    let err = port.read(&mut [0u8; 8]).unwrap_err();
    match err {
        Error::Io(e) => assert!(
            matches!(e.kind(), io::ErrorKind::UnexpectedEof) || e.raw_os_error().is_some(),
            "{:?}",
            e
        ),
        other => panic!("expected an i/o error, got {:?}", other),
    }
}

#[test]
fn failed_configuration_closes_the_device() {
    init_logger();
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();

    match open_port(&config(path)) {
        Err(Error::ConfigurationApply { name, .. }) => assert_eq!(name, path),
        other => panic!("expected ConfigurationApply, got {:?}", other),
    }
    fcntl::flock(file.as_file().as_raw_fd(), FlockArg::LockExclusiveNonblock)
        .expect("lock was released with the descriptor");
}

#[test]
fn zero_length_read_is_empty() {
    let (_master, name) = loopback();
    let port = open_port(&config(&name)).expect("open");
    assert_eq!(port.read(&mut [0u8; 0]).unwrap(), 0);
}

#[test]
fn timed_out_read_returns_zero() {
    let (_master, name) = loopback();
    let port = open_port(&Config {
        read_timeout: Some(Duration::from_millis(100)),
        ..config(&name)
    })
    .expect("open");

    let start = Instant::now();
    assert_eq!(port.read(&mut [0u8; 16]).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn zero_timeout_does_not_wait() {
    let (_master, name) = loopback();
    let port = open_port(&Config {
        read_timeout: Some(Duration::ZERO),
        ..config(&name)
    })
    .expect("open");

    let start = Instant::now();
    assert_eq!(port.read(&mut [0u8; 16]).unwrap(), 0);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn blocking_read_waits_for_data() {
    let (master, name) = loopback();
    let port = open_port(&Config::new(name.as_str(), 9600)).expect("open");

    let mut feeder = dup_master(&master);
    let feed = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        feeder.write_all(b"late").unwrap();
    });

    let start = Instant::now();
    let got = read_n(&port, 4);
    assert_eq!(got, b"late");
    assert!(start.elapsed() >= Duration::from_millis(150));
    feed.join().unwrap();
}

#[test]
fn concurrent_reader_and_writer_share_one_handle() {
    const N: usize = 16 * 1024;
    let (mut master, name) = loopback();
    let port = Arc::new(open_port(&config(&name)).expect("open"));
    let pattern: Vec<u8> = (0..N).map(|i| (i % 251) as u8).collect();

    let mut feeder = dup_master(&master);
    let inbound = pattern.clone();
    let feed = thread::spawn(move || feeder.write_all(&inbound).unwrap());

    let reader = {
        let port = port.clone();
        thread::spawn(move || read_n(&port, N))
    };
    let writer = {
        let port = port.clone();
        let outbound = pattern.clone();
        thread::spawn(move || port.write(&outbound).unwrap())
    };

    let mut echoed = vec![0u8; N];
    master.read_exact(&mut echoed).unwrap();

    assert_eq!(writer.join().unwrap(), N);
    feed.join().unwrap();
    assert_eq!(reader.join().unwrap(), pattern);
    assert_eq!(echoed, pattern);
}

#[test]
fn works_through_std_io_traits() {
    let (mut master, name) = loopback();
    let mut port = open_port(&config(&name)).expect("open");

    writeln!(port, "hello").unwrap();
    port.flush().unwrap();
    let mut echoed = [0u8; 6];
    master.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hello\n");

    master.write_all(b"world").unwrap();
    let mut got = [0u8; 5];
    (&port).read_exact(&mut got).unwrap();
    assert_eq!(&got, b"world");
}
