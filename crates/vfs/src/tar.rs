//! Tar archive loading and export.
//!
//! Accepts ustar archives plus the GNU `././@LongLink` long-name
//! extension, which is what `docker export` produces. Export writes plain
//! ustar records for regular files, directories and symlinks.

use crate::{FileKind, Node, NodeRef, VirtualFs};

const BLOCK: usize = 512;

fn parse_octal(field: &[u8]) -> u64 {
    let mut val = 0u64;
    for &b in field {
        if !(b'0'..=b'7').contains(&b) {
            break;
        }
        val = val * 8 + (b - b'0') as u64;
    }
    val
}

fn trimmed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl VirtualFs {
    /// Populate the tree from an in-memory tar archive. Missing parent
    /// directories are created on the fly; `./` prefixes are stripped.
    pub fn load_tar(&mut self, data: &[u8]) {
        let mut offset = 0usize;

        while offset + BLOCK <= data.len() {
            let header = &data[offset..offset + BLOCK];
            if header.iter().all(|&b| b == 0) {
                break;
            }

            let mut name = trimmed_str(&header[0..100]);

            // GNU long name: the entry's real name lives in the data
            // blocks of a "././@LongLink" pseudo-entry that precedes it.
            let header = if name == "././@LongLink" {
                let name_len = parse_octal(&header[124..136]) as usize;
                offset += BLOCK;
                if offset + name_len > data.len() {
                    break;
                }
                name = trimmed_str(&data[offset..offset + name_len]);
                offset += name_len.div_ceil(BLOCK) * BLOCK;
                if offset + BLOCK > data.len() {
                    break;
                }
                &data[offset..offset + BLOCK]
            } else {
                header
            };

            if &header[257..262] == b"ustar" {
                let prefix = trimmed_str(&header[345..500]);
                if !prefix.is_empty() {
                    name = format!("{}/{}", prefix, name);
                }
            }
            if let Some(stripped) = name.strip_prefix("./") {
                name = stripped.to_string();
            }
            if name.is_empty() {
                offset += BLOCK;
                continue;
            }

            let mode = parse_octal(&header[100..108]) as u32;
            let uid = parse_octal(&header[108..116]) as u32;
            let gid = parse_octal(&header[116..124]) as u32;
            let size = parse_octal(&header[124..136]);
            let mtime = parse_octal(&header[136..148]);
            let typeflag = header[156];
            let link_target = trimmed_str(&header[157..257]);

            let kind = match typeflag {
                b'0' | 0 => FileKind::Regular,
                b'1' => FileKind::Regular, // hard link, bytes shared below
                b'2' => FileKind::Symlink,
                b'3' => FileKind::CharDev,
                b'4' => FileKind::BlockDev,
                b'5' => FileKind::Directory,
                b'6' => FileKind::Fifo,
                _ => FileKind::Regular,
            };

            let node = Node::new(kind, mode & 0o7777);
            {
                let mut n = node.borrow_mut();
                n.uid = uid;
                n.gid = gid;
                n.size = size;
                n.mtime = mtime;
                if kind == FileKind::Symlink {
                    n.link_target = link_target.clone();
                }
            }

            offset += BLOCK;

            if typeflag == b'1' {
                // Hard link: a separate node sharing the target's bytes.
                let target = if link_target.starts_with('/') {
                    link_target.clone()
                } else {
                    format!("/{}", link_target)
                };
                if let Some(src) = self.resolve(&target) {
                    let mut n = node.borrow_mut();
                    n.content = src.borrow().content.clone();
                    n.size = n.content.len() as u64;
                }
            } else if kind == FileKind::Regular && size > 0 {
                let size = size as usize;
                if offset + size > data.len() {
                    break;
                }
                node.borrow_mut().content = data[offset..offset + size].to_vec();
                offset += size.div_ceil(BLOCK) * BLOCK;
            }

            self.insert(&format!("/{}", name), node);
        }
    }

    /// Serialize the tree back into a ustar archive. Only regular files,
    /// directories and symlinks are emitted; device nodes and FIFOs are
    /// synthetic and not worth round-tripping.
    pub fn export_tar(&self) -> Vec<u8> {
        let mut out = Vec::new();
        export_dir(&self.root(), "", &mut out);
        out.extend_from_slice(&[0u8; 2 * BLOCK]);
        out
    }
}

fn export_dir(dir: &NodeRef, path: &str, out: &mut Vec<u8>) {
    for (name, child) in dir.borrow().children.iter() {
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", path, name)
        };
        let node = child.borrow();
        match node.kind {
            FileKind::Directory => {
                write_header(out, &format!("{}/", child_path), &node, b'5', 0);
                drop(node);
                export_dir(child, &child_path, out);
            }
            FileKind::Regular => {
                write_header(out, &child_path, &node, b'0', node.content.len() as u64);
                out.extend_from_slice(&node.content);
                let pad = node.content.len().div_ceil(BLOCK) * BLOCK - node.content.len();
                out.extend_from_slice(&vec![0u8; pad]);
            }
            FileKind::Symlink => {
                write_header(out, &child_path, &node, b'2', 0);
            }
            _ => {}
        }
    }
}

fn write_octal(buf: &mut [u8], value: u64) {
    // Zero-padded octal, NUL terminated, like GNU tar.
    let digits = buf.len() - 1;
    let s = format!("{:0>width$o}", value, width = digits);
    buf[..digits].copy_from_slice(&s.as_bytes()[s.len() - digits..]);
    buf[digits] = 0;
}

fn write_header(out: &mut Vec<u8>, name: &str, node: &Node, typeflag: u8, size: u64) {
    let mut header = [0u8; BLOCK];

    let name_bytes = name.as_bytes();
    let n = name_bytes.len().min(100);
    header[..n].copy_from_slice(&name_bytes[..n]);

    write_octal(&mut header[100..108], node.mode as u64);
    write_octal(&mut header[108..116], node.uid as u64);
    write_octal(&mut header[116..124], node.gid as u64);
    write_octal(&mut header[124..136], size);
    write_octal(&mut header[136..148], node.mtime);
    header[156] = typeflag;
    if node.kind == FileKind::Symlink {
        let t = node.link_target.as_bytes();
        let n = t.len().min(100);
        header[157..157 + n].copy_from_slice(&t[..n]);
    }
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");

    // Checksum: computed with the checksum field itself set to spaces.
    header[148..156].copy_from_slice(&[b' '; 8]);
    let sum: u64 = header.iter().map(|&b| b as u64).sum();
    let s = format!("{:06o}\0 ", sum);
    header[148..156].copy_from_slice(s.as_bytes());

    out.extend_from_slice(&header);
}

// Long names beyond 100 bytes are rare in rootfs images; entries whose
// path exceeds the ustar field are truncated on export.

#[cfg(test)]
mod tests {
    use crate::{FileKind, VirtualFs};

    /// Build a minimal ustar archive in memory for loader tests.
    fn make_archive(entries: &[(&str, u8, &[u8], &str)]) -> Vec<u8> {
        let mut fs = VirtualFs::new();
        for (path, typeflag, content, target) in entries {
            match typeflag {
                b'5' => fs.add_directory(path),
                b'2' => {
                    fs.symlink(target, path).unwrap();
                }
                _ => fs.add_virtual_file(path, content.to_vec()),
            }
        }
        fs.export_tar()
    }

    #[test]
    fn round_trip_preserves_files_dirs_and_symlinks() {
        let tar = make_archive(&[
            ("/bin", b'5', b"", ""),
            ("/bin/busybox", b'0', b"\x7fELFdata", ""),
            ("/bin/sh", b'2', b"", "busybox"),
            ("/etc/hosts", b'0', b"127.0.0.1 localhost\n", ""),
        ]);

        let mut fs = VirtualFs::new();
        fs.load_tar(&tar);

        assert_eq!(fs.read_file("/bin/busybox").unwrap(), b"\x7fELFdata");
        assert_eq!(fs.read_file("/etc/hosts").unwrap(), b"127.0.0.1 localhost\n");
        assert_eq!(fs.readlink("/bin/sh").unwrap(), "busybox");
        assert_eq!(
            fs.resolve("/bin/sh").unwrap().borrow().content,
            b"\x7fELFdata"
        );

        // Second round trip is byte-stable.
        let tar2 = fs.export_tar();
        let mut fs2 = VirtualFs::new();
        fs2.load_tar(&tar2);
        assert_eq!(fs2.read_file("/bin/busybox").unwrap(), b"\x7fELFdata");
        assert_eq!(fs2.readlink("/bin/sh").unwrap(), "busybox");
    }

    #[test]
    fn two_zero_blocks_terminate() {
        let mut tar = make_archive(&[("/a", b'0', b"x", "")]);
        // Garbage after the terminator must be ignored.
        tar.extend_from_slice(&[0xffu8; 512]);
        let mut fs = VirtualFs::new();
        fs.load_tar(&tar);
        assert_eq!(fs.read_file("/a").unwrap(), b"x");
        assert_eq!(fs.root().borrow().children.len(), 1);
    }

    #[test]
    fn dot_slash_prefix_is_stripped() {
        // Hand-build one header with a "./etc/issue" name.
        let mut fs = VirtualFs::new();
        fs.add_virtual_file("/etc/issue", b"hi".to_vec());
        let mut tar = fs.export_tar();
        // Rewrite the name field in place.
        let name = b"./etc/issue";
        // First header is the /etc directory, second is the file.
        let hdr = 512;
        tar[hdr..hdr + 100].iter_mut().for_each(|b| *b = 0);
        tar[hdr..hdr + name.len()].copy_from_slice(name);
        // Fix checksum.
        let mut sum = 0u64;
        for i in 0..512 {
            sum += if (148..156).contains(&(i)) {
                b' ' as u64
            } else {
                tar[hdr + i] as u64
            };
        }
        let s = format!("{:06o}\0 ", sum);
        tar[hdr + 148..hdr + 156].copy_from_slice(s.as_bytes());

        let mut fs2 = VirtualFs::new();
        fs2.load_tar(&tar);
        assert_eq!(fs2.read_file("/etc/issue").unwrap(), b"hi");
    }

    #[test]
    fn missing_parents_are_created() {
        let tar = make_archive(&[("/deep/ly/nested/file", b'0', b"1", "")]);
        let mut fs = VirtualFs::new();
        fs.load_tar(&tar);
        assert_eq!(
            fs.resolve("/deep/ly").unwrap().borrow().kind,
            FileKind::Directory
        );
    }
}
