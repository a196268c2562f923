//! Environment defaults and the pseudo-files synthesized at startup.

use vfs::VirtualFs;

/// Environment injected into the guest in addition to anything the
/// embedder passes through.
pub fn default_env() -> Vec<String> {
    vec![
        "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        "HOME=/root".to_string(),
        "USER=root".to_string(),
        "TERM=xterm-256color".to_string(),
        "LANG=C.UTF-8".to_string(),
        "HOSTNAME=emu".to_string(),
        "TZ=UTC".to_string(),
    ]
}

/// Minimal TZif v2 describing UTC with no transitions. Node's ICU and
/// musl both read it.
pub fn tzif_utc() -> Vec<u8> {
    fn body(out: &mut Vec<u8>, version: u8) {
        out.extend_from_slice(b"TZif");
        out.push(version);
        out.extend_from_slice(&[0u8; 15]);
        // isutcnt, isstdcnt, leapcnt, timecnt, typecnt, charcnt
        for count in [0u32, 0, 0, 0, 1, 4] {
            out.extend_from_slice(&count.to_be_bytes());
        }
        // One ttinfo: utoff=0, isdst=0, abbrev index 0.
        out.extend_from_slice(&0i32.to_be_bytes());
        out.push(0);
        out.push(0);
        out.extend_from_slice(b"UTC\0");
    }
    let mut out = Vec::new();
    body(&mut out, b'2');
    body(&mut out, b'2');
    out.extend_from_slice(b"\nUTC0\n");
    out
}

fn cpuinfo() -> &'static str {
    // V8 refuses to start unless the ISA line advertises the full
    // rv64imafdc profile with the Zicsr/Zifencei extensions.
    "processor\t: 0\n\
     hart\t\t: 0\n\
     isa\t\t: rv64imafdc_zicsr_zifencei\n\
     mmu\t\t: sv48\n\
     uarch\t\t: emu\n\n"
}

/// Populate /dev, /etc and /proc with the entries container userlands
/// expect. `entry_path` becomes /proc/self/exe.
pub fn install_virtual_files(fs: &mut VirtualFs, entry_path: &str) {
    for dev in [
        "/dev/null",
        "/dev/tty",
        "/dev/console",
        "/dev/pts/0",
        "/dev/ptmx",
        "/dev/urandom",
        "/dev/random",
    ] {
        if fs.resolve(dev).is_none() {
            // Content stays empty; reads are served by the I/O layer.
            fs.add_virtual_file(dev, Vec::new());
        }
    }

    if fs.resolve("/etc/passwd").is_none() {
        fs.add_virtual_file("/etc/passwd", "root:x:0:0:root:/root:/bin/sh\n");
    }
    if fs.resolve("/etc/group").is_none() {
        fs.add_virtual_file("/etc/group", "root:x:0:\n");
    }
    fs.add_virtual_file("/etc/hosts", "127.0.0.1 localhost\n");
    fs.add_virtual_file("/etc/resolv.conf", "nameserver 8.8.8.8\n");

    let tz = tzif_utc();
    fs.add_virtual_file("/etc/localtime", tz.clone());
    fs.add_virtual_file("/usr/share/zoneinfo/UTC", tz.clone());
    fs.add_virtual_file("/usr/share/zoneinfo/Etc/UTC", tz);

    fs.add_virtual_file("/proc/version_signature", "Linux 6.1.0-friscy\n");
    fs.add_virtual_file("/proc/cpuinfo", cpuinfo());
    fs.add_virtual_file("/proc/self/maps", Vec::new());
    fs.add_virtual_file("/proc/sys/vm/overcommit_memory", "0\n");
    let _ = fs.symlink(entry_path, "/proc/self/exe");

    fs.add_directory("/tmp");
    fs.add_directory("/tmp/node-compile-cache");
    fs.add_directory("/root");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tzif_layout_matches_spec() {
        let tz = tzif_utc();
        assert_eq!(&tz[0..5], b"TZif2");
        // typecnt at header offset 20 + 16, big-endian.
        assert_eq!(&tz[36..40], &1u32.to_be_bytes());
        assert_eq!(&tz[40..44], &4u32.to_be_bytes());
        // ttinfo + abbrev directly after the counts.
        assert_eq!(&tz[44..50], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(&tz[50..54], b"UTC\0");
        assert!(tz.ends_with(b"\nUTC0\n"));
        // The v2 body repeats the structure.
        assert_eq!(&tz[54..59], b"TZif2");
    }

    #[test]
    fn proc_and_dev_entries_exist() {
        let mut fs = VirtualFs::new();
        install_virtual_files(&mut fs, "/bin/busybox");
        assert!(fs.resolve("/dev/urandom").is_some());
        let isa = fs.read_file("/proc/cpuinfo").unwrap();
        assert!(String::from_utf8_lossy(&isa).contains("rv64imafdc_zicsr_zifencei"));
        assert_eq!(fs.readlink("/proc/self/exe").unwrap(), "/bin/busybox");
        assert!(fs.resolve("/tmp/node-compile-cache").is_some());
    }
}
