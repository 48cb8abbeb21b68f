//! End-to-end scenarios: a driver and a server wired together over a
//! socket pair, the server executing against a scratch directory.

use std::fs;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serdrive::Attributes;
use serdrive::DosDate;
use serdrive::DosError;
use serdrive::DosTime;
use serdrive::Driver;
use serdrive::DriverConfig;
use serdrive::DriverError;
use serdrive::Fcb;
use serdrive::NameBuf;
use serdrive::Server;

fn start_server(root: &Path) -> (UnixStream, thread::JoinHandle<()>) {
    let (driver_side, server_side) = UnixStream::pair().unwrap();
    let root = root.to_path_buf();
    let handle = thread::spawn(move || {
        Server::new(server_side, root).serve().unwrap();
    });
    (driver_side, handle)
}

fn connect(root: &Path) -> (Driver<UnixStream>, thread::JoinHandle<()>) {
    let (line, handle) = start_server(root);
    let driver = Driver::new(line, DriverConfig::default()).unwrap();
    (driver, handle)
}

fn nb(name: &str, ext: &str) -> NameBuf {
    NameBuf::new(0, &[0x09], name.as_bytes(), ext.as_bytes())
}

fn nb_in(dir: &str, name: &str, ext: &str) -> NameBuf {
    let mut path = vec![0x09];
    path.extend_from_slice(dir.as_bytes());
    path.push(0x09);
    NameBuf::new(0, &path, name.as_bytes(), ext.as_bytes())
}

#[test]
fn open_read_close() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("HELLO.TXT"), b"Hello").unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x100, 0);
    driver.open(&mut fcb, &nb("HELLO", "TXT")).unwrap();
    assert_eq!(fcb.size, 5);

    let mut buf = [0u8; 64];
    let n = driver.read(&mut fcb, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Hello");
    assert_eq!(fcb.pos, 5);

    driver.close(&mut fcb).unwrap();
    drop(driver);
    server.join().unwrap();
}

#[test]
fn open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x100, 0);
    let err = driver.open(&mut fcb, &nb("MISSING", "TXT")).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::NOENT)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn create_write_truncate_close() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x200, 1);
    driver.create(&mut fcb, 0x20, &nb("NEW", "BIN")).unwrap();
    assert_eq!(driver.write(&mut fcb, &[1, 2, 3]).unwrap(), 3);
    // a zero-length write truncates at the current position
    assert_eq!(driver.write(&mut fcb, &[]).unwrap(), 0);
    driver.close(&mut fcb).unwrap();

    assert_eq!(fs::read(dir.path().join("NEW.BIN")).unwrap(), [1, 2, 3]);
    drop(driver);
    server.join().unwrap();
}

#[test]
fn coalesced_writes_arrive_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x201, 1);
    driver.create(&mut fcb, 0x20, &nb("LOG", "BIN")).unwrap();
    let mut expected = Vec::new();
    for i in 0..100u32 {
        let chunk = [i as u8; 10];
        assert_eq!(driver.write(&mut fcb, &chunk).unwrap(), 10);
        expected.extend_from_slice(&chunk);
    }
    driver.close(&mut fcb).unwrap();

    assert_eq!(fs::read(dir.path().join("LOG.BIN")).unwrap(), expected);
    drop(driver);
    server.join().unwrap();
}

#[test]
fn seek_then_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x202, 2);
    driver.create(&mut fcb, 0x20, &nb("OVR", "BIN")).unwrap();
    driver.write(&mut fcb, b"AAAA").unwrap();
    assert_eq!(driver.seek(&mut fcb, 0, 2).unwrap(), 2);
    driver.write(&mut fcb, b"BB").unwrap();
    driver.close(&mut fcb).unwrap();

    assert_eq!(fs::read(dir.path().join("OVR.BIN")).unwrap(), b"AABB");
    drop(driver);
    server.join().unwrap();
}

#[test]
fn large_write_bypasses_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let mut fcb = Fcb::new(0x203, 1);
    driver.create(&mut fcb, 0x20, &nb("BIG", "BIN")).unwrap();
    assert_eq!(driver.write(&mut fcb, &payload).unwrap(), payload.len());
    assert_eq!(fcb.size, payload.len() as u32);
    driver.close(&mut fcb).unwrap();

    assert_eq!(fs::read(dir.path().join("BIG.BIN")).unwrap(), payload);
    drop(driver);
    server.join().unwrap();
}

#[test]
fn reads_match_file_content_at_any_position() {
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..3000u32).map(|i| (i % 197) as u8).collect();
    fs::write(dir.path().join("DATA.BIN"), &content).unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x300, 0);
    driver.open(&mut fcb, &nb("DATA", "BIN")).unwrap();

    // sequential sub-block reads
    let mut gathered = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        let n = driver.read(&mut fcb, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        gathered.extend_from_slice(&buf[..n]);
    }
    assert_eq!(gathered, content);

    // scattered positions after seeks
    for &pos in &[2500u32, 0, 1024, 2999] {
        driver.seek(&mut fcb, 0, pos as i32).unwrap();
        let n = driver.read(&mut fcb, &mut buf).unwrap();
        let end = (pos as usize + buf.len()).min(content.len());
        assert_eq!(&buf[..n], &content[pos as usize..end]);
    }

    driver.close(&mut fcb).unwrap();
    drop(driver);
    server.join().unwrap();
}

#[test]
fn writes_invalidate_cached_reads() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("MIX.BIN"), b"0123456789").unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x301, 2);
    driver.open(&mut fcb, &nb("MIX", "BIN")).unwrap();

    let mut buf = [0u8; 4];
    driver.read(&mut fcb, &mut buf).unwrap();
    assert_eq!(&buf, b"0123");

    driver.seek(&mut fcb, 0, 0).unwrap();
    driver.write(&mut fcb, b"ZZ").unwrap();

    // the earlier read block must not shadow the new bytes
    driver.seek(&mut fcb, 0, 0).unwrap();
    let n = driver.read(&mut fcb, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"ZZ23");

    driver.close(&mut fcb).unwrap();
    assert_eq!(fs::read(dir.path().join("MIX.BIN")).unwrap(), b"ZZ23456789");
    drop(driver);
    server.join().unwrap();
}

#[test]
fn wildcard_listing() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["A.TXT", "AB.TXT", "README"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let (mut driver, server) = connect(dir.path());

    let first = driver
        .files(0x300, Attributes::ARCHIVE.bits(), &nb("A???????", "???"))
        .unwrap();
    assert_eq!(first.name_bytes(), b"A.TXT");
    let second = driver.nfiles(0x300).unwrap();
    assert_eq!(second.name_bytes(), b"AB.TXT");
    let err = driver.nfiles(0x300).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::NOMORE)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn enumeration_batches_across_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let mut names: Vec<String> = (0..20).map(|i| format!("F{i:02}.DAT")).collect();
    names.sort();
    for name in &names {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let (mut driver, server) = connect(dir.path());

    let mut seen = vec![
        driver
            .files(0x310, Attributes::ARCHIVE.bits(), &nb("????????", "???"))
            .unwrap(),
    ];
    while let Ok(info) = driver.nfiles(0x310) {
        seen.push(info);
    }
    let seen: Vec<Vec<u8>> = seen.iter().map(|i| i.name_bytes().to_vec()).collect();
    let expect: Vec<Vec<u8>> = names.iter().map(|n| n.as_bytes().to_vec()).collect();
    assert_eq!(seen, expect);

    drop(driver);
    server.join().unwrap();
}

#[test]
fn volume_name_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("F.TXT"), b"").unwrap();
    let (mut driver, server) = connect(dir.path());

    let label = driver
        .files(0x320, Attributes::VOLUME.bits(), &nb("????????", "???"))
        .unwrap();
    assert_eq!(label.atr, Attributes::VOLUME.bits());
    assert_eq!(label.time.get(), 0);
    assert_eq!(label.date.get(), 0);
    assert_eq!(label.filelen.get(), 0);
    assert!(
        dir.path()
            .to_string_lossy()
            .as_bytes()
            .starts_with(label.name_bytes())
    );

    drop(driver);
    server.join().unwrap();
}

#[test]
fn rename_onto_nonempty_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("SRC")).unwrap();
    fs::create_dir(dir.path().join("DST")).unwrap();
    fs::write(dir.path().join("DST/KEEP.TXT"), b"").unwrap();
    let (mut driver, server) = connect(dir.path());

    let err = driver.rename(&nb("SRC", ""), &nb("DST", "")).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::CANTREN)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn directory_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    driver.mkdir(&nb("SUB", "")).unwrap();
    assert!(dir.path().join("SUB").is_dir());
    driver.chdir(&nb("SUB", "")).unwrap();
    let err = driver.chdir(&nb("NONE", "")).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::NODIR)));

    let mut fcb = Fcb::new(0x400, 1);
    driver
        .create(&mut fcb, 0x20, &nb_in("SUB", "INNER", "TXT"))
        .unwrap();
    driver.write(&mut fcb, b"inner").unwrap();
    driver.close(&mut fcb).unwrap();
    assert_eq!(fs::read(dir.path().join("SUB/INNER.TXT")).unwrap(), b"inner");

    let err = driver.rmdir(&nb("SUB", "")).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::NOTEMPTY)));
    driver.delete(&nb_in("SUB", "INNER", "TXT")).unwrap();
    driver.rmdir(&nb("SUB", "")).unwrap();
    assert!(!dir.path().join("SUB").exists());

    drop(driver);
    server.join().unwrap();
}

#[test]
fn chmod_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("F.TXT"), b"x").unwrap();
    let (mut driver, server) = connect(dir.path());

    assert_eq!(
        driver.chmod(0xff, &nb("F", "TXT")).unwrap(),
        Attributes::ARCHIVE.bits()
    );
    assert_eq!(driver.chmod(0x01, &nb("F", "TXT")).unwrap(), 0);
    assert_eq!(
        driver.chmod(0xff, &nb("F", "TXT")).unwrap(),
        (Attributes::ARCHIVE | Attributes::READ_ONLY).bits()
    );
    assert_eq!(driver.chmod(0x00, &nb("F", "TXT")).unwrap(), 0);

    drop(driver);
    server.join().unwrap();
}

#[test]
fn filedate_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("F.TXT"), b"x").unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x500, 2);
    driver.open(&mut fcb, &nb("F", "TXT")).unwrap();
    let time = DosTime::new(12, 34, 56);
    let date = DosDate::new(2021, 7, 23);
    assert_eq!(driver.filedate(&fcb, time, date).unwrap(), (time, date));
    assert_eq!(
        driver.filedate(&fcb, DosTime(0), DosDate(0)).unwrap(),
        (time, date)
    );
    driver.close(&mut fcb).unwrap();

    let err = driver
        .filedate(&fcb, DosTime(0), DosDate(0))
        .unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::BADF)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn disk_free_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    let free = driver.dskfre().unwrap();
    assert_eq!(free.sector_size, 1024);
    assert_eq!(free.sectors_per_cluster, 128);
    assert!(free.free_bytes >= 0);
    assert_eq!(free.free_clusters, (free.free_bytes / 32768) as u16);

    drop(driver);
    server.join().unwrap();
}

#[test]
fn seek_bounds_against_served_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("S.BIN"), b"01234").unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x600, 0);
    driver.open(&mut fcb, &nb("S", "BIN")).unwrap();
    assert_eq!(driver.seek(&mut fcb, 2, 0).unwrap(), 5);
    assert_eq!(driver.seek(&mut fcb, 1, -3).unwrap(), 2);
    let err = driver.seek(&mut fcb, 2, 1).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::CANTSEEK)));
    driver.close(&mut fcb).unwrap();

    drop(driver);
    server.join().unwrap();
}

#[test]
fn fcb_key_reuse_rebinds() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ONE.TXT"), b"one").unwrap();
    fs::write(dir.path().join("TWO.TXT"), b"two!").unwrap();
    let (mut driver, server) = connect(dir.path());

    let mut fcb = Fcb::new(0x700, 0);
    driver.open(&mut fcb, &nb("ONE", "TXT")).unwrap();
    assert_eq!(fcb.size, 3);
    // the same key opened again rebinds to the new file on both ends
    let mut fcb = Fcb::new(0x700, 0);
    driver.open(&mut fcb, &nb("TWO", "TXT")).unwrap();
    assert_eq!(fcb.size, 4);
    let mut buf = [0u8; 8];
    let n = driver.read(&mut fcb, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"two!");

    driver.close(&mut fcb).unwrap();
    let err = driver.close(&mut fcb).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::BADF)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn malformed_guest_name_reports_nodir() {
    let dir = tempfile::tempdir().unwrap();
    let (mut driver, server) = connect(dir.path());

    // a lone lead byte is not a valid guest name
    let mut fcb = Fcb::new(0x800, 0);
    let bad = NameBuf::new(0, &[0x09], &[0x83], b"");
    let err = driver.open(&mut fcb, &bad).unwrap_err();
    assert!(matches!(err, DriverError::Dos(DosError::NODIR)));

    drop(driver);
    server.join().unwrap();
}

#[test]
fn timeout_then_recovery() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("HELLO.TXT"), b"Hello").unwrap();
    let (driver_side, server_side) = UnixStream::pair().unwrap();
    let config = DriverConfig {
        timeout: Duration::from_millis(200),
        ..DriverConfig::default()
    };
    let mut driver = Driver::new(driver_side, config).unwrap();

    // the server is not running yet: the request must time out
    let mut fcb = Fcb::new(0x100, 0);
    let err = driver.open(&mut fcb, &nb("HELLO", "TXT")).unwrap_err();
    assert!(matches!(err, DriverError::Timeout));
    assert_eq!(err.guest_code(), 0x1002);

    // the server comes back, consumes the stale request, and answers it
    // into the void; the driver's recovery flood must clear all of that
    let root = dir.path().to_path_buf();
    let server = thread::spawn(move || {
        Server::new(server_side, root).serve().unwrap();
    });
    thread::sleep(Duration::from_millis(500));

    driver.open(&mut fcb, &nb("HELLO", "TXT")).unwrap();
    assert_eq!(fcb.size, 5);
    let mut buf = [0u8; 16];
    let n = driver.read(&mut fcb, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Hello");
    driver.close(&mut fcb).unwrap();

    drop(driver);
    server.join().unwrap();
}

#[test]
fn probe_and_registration() {
    let dir = tempfile::tempdir().unwrap();
    let (line, server) = start_server(dir.path());
    let config = DriverConfig::parse(["/r1", "/t10"]).unwrap();
    let mut driver = Driver::new(line, config).unwrap();
    driver.init().unwrap();

    drop(driver);
    server.join().unwrap();
}
