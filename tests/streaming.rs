use std::io::{self, Cursor, Read, Write};

use proptest::prelude::*;
use zipkit::{
    EncryptionMethod, EntryOptions, Zip64Option, ZipError, ZipFile, ZipInputStream,
    ZipOutputStream, ZipSettings,
};

/// A writer that cannot seek.
struct Pipe(Vec<u8>);

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn read_stream(bytes: &[u8], settings: ZipSettings) -> Vec<(String, Vec<u8>)> {
    let mut input = ZipInputStream::with_settings(bytes, settings);
    let mut entries = Vec::new();
    while let Some(entry) = input.get_next_entry().unwrap() {
        let mut content = Vec::new();
        input.read_to_end(&mut content).unwrap();
        entries.push((entry.name().to_string(), content));
    }
    entries
}

#[test]
fn non_seekable_save_is_readable_both_ways() {
    let mut zip = ZipFile::new();
    zip.add_entry_bytes("a.bin", vec![1u8; 70_000]).unwrap();
    zip.add_directory_by_name("dir").unwrap();
    zip.add_entry_str("dir/b.txt", "bee").unwrap();
    let Pipe(bytes) = zip.save_to_stream(Pipe(Vec::new())).unwrap();

    let mut reopened = ZipFile::from_bytes(bytes.clone()).unwrap();
    assert_eq!(reopened.read_entry("a.bin").unwrap(), vec![1u8; 70_000]);
    assert_eq!(reopened.read_entry("dir/b.txt").unwrap(), b"bee");
    assert_eq!(
        read_stream(&bytes, ZipSettings::default()),
        [
            ("a.bin".to_string(), vec![1u8; 70_000]),
            ("dir/".to_string(), Vec::new()),
            ("dir/b.txt".to_string(), b"bee".to_vec()),
        ]
    );
}

#[test]
fn encrypted_stream_output_with_zip64() {
    let settings = ZipSettings {
        encryption: EncryptionMethod::WinZipAes256,
        password: Some("pw".into()),
        zip64: Zip64Option::Always,
        ..ZipSettings::default()
    };
    let mut out = ZipOutputStream::with_settings(Pipe(Vec::new()), settings.clone());
    out.set_comment("streamed");
    out.put_next_entry("one.txt").unwrap();
    out.write_all(&b"one ".repeat(2000)).unwrap();
    out.put_next_entry_with("plain.txt", EntryOptions::new().encryption(EncryptionMethod::None, ""))
        .unwrap();
    out.write_all(b"not secret").unwrap();
    let Pipe(bytes) = out.finish().unwrap();

    let entries = read_stream(&bytes, settings);
    assert_eq!(entries[0].1, b"one ".repeat(2000));
    assert_eq!(entries[1].1, b"not secret");

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    assert_eq!(zip.comment(), "streamed");
    assert!(!zip.entry("plain.txt").unwrap().uses_encryption());
    assert_eq!(zip.read_entry("plain.txt").unwrap(), b"not secret");
}

#[test]
fn stream_archives_can_be_updated() {
    let mut out = ZipOutputStream::new(Vec::new());
    out.put_next_entry("keep.txt").unwrap();
    out.write_all(&b"keep ".repeat(100)).unwrap();
    out.put_next_entry("replace.txt").unwrap();
    out.write_all(b"old").unwrap();
    let bytes = out.finish().unwrap();

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    let raw = zip.read_raw("keep.txt").unwrap();
    zip.update_entry_bytes("replace.txt", b"new".to_vec()).unwrap();
    let bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    assert_eq!(zip.read_raw("keep.txt").unwrap(), raw);
    assert_eq!(zip.read_entry("keep.txt").unwrap(), b"keep ".repeat(100));
    assert_eq!(zip.read_entry("replace.txt").unwrap(), b"new");
}

#[test]
fn corrupted_stream_content_is_detected() {
    let mut out = ZipOutputStream::new(Vec::new());
    out.put_next_entry_with("a.bin", EntryOptions::new().compression_level(zipkit::CompressionLevel::None))
        .unwrap();
    out.write_all(&[9u8; 500]).unwrap();
    let mut bytes = out.finish().unwrap();
    // First content byte follows the 30-byte header, the name and the extra field.
    let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
    bytes[30 + name_len + extra_len] ^= 0xFF;

    let mut input = ZipInputStream::new(&bytes[..]);
    input.get_next_entry().unwrap().unwrap();
    let mut content = Vec::new();
    let err = ZipError::from(input.read_to_end(&mut content).unwrap_err());
    assert!(matches!(err, ZipError::CrcMismatch { .. }), "{err}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn arbitrary_contents_round_trip(
        contents in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..3000), 1..6),
        stream in any::<bool>(),
    ) {
        let mut zip = ZipFile::new();
        for (i, content) in contents.iter().enumerate() {
            zip.add_entry_bytes(&format!("dir{}/entry{i}.bin", i % 2), content.clone()).unwrap();
        }
        let bytes = if stream {
            zip.save_to_stream(Vec::new()).unwrap()
        } else {
            zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner()
        };

        let mut zip = ZipFile::from_bytes(bytes.clone()).unwrap();
        prop_assert_eq!(zip.len(), contents.len());
        for (i, content) in contents.iter().enumerate() {
            let name = format!("dir{}/entry{i}.bin", i % 2);
            prop_assert_eq!(zip.entry(&name).unwrap().crc32(), crc32fast::hash(content));
            prop_assert_eq!(&zip.read_entry(&name).unwrap(), content);
        }

        let streamed = read_stream(&bytes, ZipSettings::default());
        prop_assert_eq!(streamed.len(), contents.len());
        for ((_, read), content) in streamed.iter().zip(&contents) {
            prop_assert_eq!(read, content);
        }
    }
}
