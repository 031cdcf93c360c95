use std::cell::RefCell;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::tempdir;
use test_case::test_case;
use zipkit::{
    EntryState, ExtractExistingFileAction, ExtractOptions, ExtractOutcome, ProgressKind, ZipError,
    ZipFile,
};

/// Half random, half repetitive, so deflate has something to do.
fn sample(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data[..len / 2]);
    for (i, b) in data[len / 2..].iter_mut().enumerate() {
        *b = b"lorem ipsum dolor sit amet "[i % 27];
    }
    data
}

fn write_files(dir: &Path, sizes: &[usize]) -> Vec<(String, Vec<u8>)> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let name = format!("file{i}.bin");
            let data = sample(size, i as u64);
            fs::write(dir.join(&name), &data).unwrap();
            (name, data)
        })
        .collect()
}

#[test]
fn three_files_round_trip() {
    let dir = tempdir().unwrap();
    let files = write_files(dir.path(), &[0, 5000, 40000]);
    let archive = dir.path().join("three.zip");

    let mut zip = ZipFile::create(&archive);
    for (name, _) in &files {
        zip.add_file(dir.path().join(name), None).unwrap();
    }
    zip.save().unwrap();

    let mut zip = ZipFile::open(&archive).unwrap();
    assert_eq!(zip.len(), 3);
    for (name, data) in &files {
        let entry = zip.entry(name).unwrap();
        assert_eq!(entry.uncompressed_size(), data.len() as u64);
        assert_eq!(entry.crc32(), crc32fast::hash(data));
        let content = zip.read_entry(name).unwrap();
        assert_eq!(crc32fast::hash(&content), crc32fast::hash(data));
    }

    let out = dir.path().join("out");
    assert_eq!(zip.extract_all(&out).unwrap(), 3);
    for (name, data) in &files {
        assert_eq!(&fs::read(out.join(name)).unwrap(), data);
    }
}

#[test]
fn unmodified_entries_are_copied_byte_for_byte() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("copy.zip");
    let mut zip = ZipFile::create(&archive);
    zip.add_entry_bytes("a.bin", sample(30000, 1)).unwrap();
    zip.add_entry_str("b.txt", &"text ".repeat(1000)).unwrap();
    zip.save().unwrap();

    let mut zip = ZipFile::open(&archive).unwrap();
    let before = (zip.read_raw("a.bin").unwrap(), zip.read_raw("b.txt").unwrap());
    assert_eq!(zip.entry("a.bin").unwrap().state(), EntryState::HeaderRead);

    zip.add_entry_bytes("c.bin", sample(100, 2)).unwrap();
    zip.remove_entry("b.txt").unwrap();
    zip.add_entry_str("b.txt", &"text ".repeat(1000)).unwrap();
    zip.save().unwrap();
    assert_eq!(zip.read_raw("a.bin").unwrap(), before.0);

    let mut reopened = ZipFile::open(&archive).unwrap();
    assert_eq!(reopened.entry_names(), ["a.bin", "c.bin", "b.txt"]);
    assert_eq!(reopened.read_raw("a.bin").unwrap(), before.0);
    assert_eq!(reopened.read_raw("b.txt").unwrap(), before.1);
    assert!(reopened.entry("b.txt").unwrap().is_text());
}

#[test]
fn saving_twice_without_changes_is_stable() {
    let mut zip = ZipFile::new();
    zip.add_entry_bytes("x.bin", sample(9000, 3)).unwrap();
    let first = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let mut reopened = ZipFile::from_bytes(first.clone()).unwrap();
    let second = reopened.save_to(Cursor::new(Vec::new())).unwrap().into_inner();
    assert_eq!(first, second);
}

#[test]
fn directories_are_entries_but_not_extracted_files() {
    let dir = tempdir().unwrap();
    let mut zip = ZipFile::new();
    zip.add_directory_by_name("empty").unwrap();
    zip.add_entry_str("docs/readme.txt", "read me").unwrap();
    let bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    let empty = zip.entry("empty").unwrap();
    assert_eq!(empty.name(), "empty/");
    assert!(empty.is_directory());
    assert_eq!(empty.uncompressed_size(), 0);
    assert_ne!(empty.external_attributes() & 0x10, 0);

    assert_eq!(zip.extract_all(dir.path()).unwrap(), 1);
    assert!(dir.path().join("empty").is_dir());
    assert_eq!(fs::read_to_string(dir.path().join("docs/readme.txt")).unwrap(), "read me");
}

#[test]
fn directory_trees_are_added_and_synchronised() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("sub")).unwrap();
    fs::write(tree.join("one.txt"), "1").unwrap();
    fs::write(tree.join("sub/two.txt"), "2").unwrap();

    let mut zip = ZipFile::new();
    assert_eq!(zip.add_directory(&tree, Some("tree")).unwrap(), 4);
    assert!(zip.contains("tree/sub/two.txt"));
    assert!(zip.entry("tree/sub").unwrap().is_directory());

    fs::remove_file(tree.join("one.txt")).unwrap();
    fs::write(tree.join("three.txt"), "3").unwrap();
    let summary = zip.update_directory(&tree, Some("tree"), true).unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.removed, 1);
    assert!(!zip.contains("tree/one.txt"));
    assert_eq!(zip.read_entry("tree/three.txt").unwrap_err().kind(), zipkit::ErrorKind::State);
}

#[test_case(ExtractExistingFileAction::OverwriteSilently, Some(ExtractOutcome::Written), "new"; "overwrite")]
#[test_case(ExtractExistingFileAction::DoNotOverwrite, Some(ExtractOutcome::Skipped), "old"; "keep")]
#[test_case(ExtractExistingFileAction::Throw, None, "old"; "throw")]
fn existing_targets_follow_policy(
    action: ExtractExistingFileAction,
    outcome: Option<ExtractOutcome>,
    content: &str,
) {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("f.txt"), "old").unwrap();
    let mut zip = ZipFile::new();
    zip.add_entry_str("f.txt", "new").unwrap();
    let mut zip = ZipFile::from_bytes(zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner()).unwrap();

    let result = zip.extract_with("f.txt", dir.path(), &ExtractOptions::new().existing(action));
    match outcome {
        Some(expected) => assert_eq!(result.unwrap(), expected),
        None => assert!(matches!(result, Err(ZipError::AlreadyExists(_)))),
    }
    assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), content);
}

#[test]
fn progress_handler_can_answer_overwrite_questions() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("f.txt"), "old").unwrap();
    let mut zip = ZipFile::new();
    zip.add_entry_str("f.txt", "new").unwrap();
    let mut zip = ZipFile::from_bytes(zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner()).unwrap();
    zip.settings_mut().extract_existing = ExtractExistingFileAction::InvokeExtractProgressEvent;
    zip.set_progress_handler(|event| {
        if event.kind == ProgressKind::ExtractingExistingFile {
            event.set_overwrite(true);
        }
    });
    assert_eq!(zip.extract("f.txt", dir.path()).unwrap(), ExtractOutcome::Written);
    assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");
}

#[test]
fn cancelled_save_leaves_the_original_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("keep.zip");
    let mut zip = ZipFile::create(&archive);
    zip.add_entry_str("a.txt", "a").unwrap();
    zip.add_entry_str("b.txt", "b").unwrap();
    zip.save().unwrap();
    let original = fs::read(&archive).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&events);
    let mut zip = ZipFile::open(&archive).unwrap();
    zip.add_entry_str("c.txt", "c").unwrap();
    zip.set_progress_handler(move |event| {
        seen.borrow_mut().push(event.kind);
        if event.kind == ProgressKind::SavingBeforeEntry && event.entries_done == 2 {
            event.cancel();
        }
    });
    assert!(matches!(zip.save(), Err(ZipError::Cancelled)));
    assert_eq!(fs::read(&archive).unwrap(), original);
    assert_eq!(events.borrow()[0], ProgressKind::SavingStarted);
    assert!(!events.borrow().contains(&ProgressKind::SavingCompleted));

    zip.clear_progress_handler();
    zip.save().unwrap();
    assert_eq!(ZipFile::open(&archive).unwrap().len(), 3);
}

#[test]
fn prefixed_archives_are_readable() {
    let mut zip = ZipFile::new();
    zip.add_entry_str("inner.txt", "behind a stub").unwrap();
    let mut bytes = b"MZ self-extractor stub ".repeat(40);
    bytes.extend(zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner());

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    assert_eq!(zip.read_entry("inner.txt").unwrap(), b"behind a stub");
}

#[test]
fn comments_and_metadata_survive() {
    let mut zip = ZipFile::new();
    zip.set_comment("archive note");
    let entry = zip.add_entry_str("note.txt", "x").unwrap();
    entry.set_comment("entry note");
    let time = chrono::NaiveDate::from_ymd_opt(2021, 6, 15)
        .unwrap()
        .and_hms_opt(13, 45, 30)
        .unwrap();
    entry.set_last_modified(time);
    let bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let zip = ZipFile::from_bytes(bytes).unwrap();
    assert_eq!(zip.comment(), "archive note");
    let entry = zip.entry("note.txt").unwrap();
    assert_eq!(entry.comment(), "entry note");
    assert_eq!(entry.last_modified(), time);
}

#[test]
fn cancelling_after_the_rename_keeps_the_archive_usable() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("late.zip");
    let mut zip = ZipFile::create(&archive);
    zip.add_entry_str("a.txt", "a").unwrap();
    zip.save().unwrap();

    let mut zip = ZipFile::open(&archive).unwrap();
    zip.add_entry_str("b.txt", "b").unwrap();
    zip.set_progress_handler(|event| {
        if event.kind == ProgressKind::SavingAfterRename {
            event.cancel();
        }
    });
    assert!(matches!(zip.save(), Err(ZipError::Cancelled)));

    // The rename already happened, so the archive is bound to the new file.
    assert_eq!(ZipFile::open(&archive).unwrap().len(), 2);
    assert_eq!(zip.entry("b.txt").unwrap().state(), EntryState::Materialized);
    assert_eq!(zip.read_entry("a.txt").unwrap(), b"a");
    assert_eq!(zip.read_entry("b.txt").unwrap(), b"b");

    zip.clear_progress_handler();
    zip.add_entry_str("c.txt", "c").unwrap();
    zip.save().unwrap();
    let mut reopened = ZipFile::open(&archive).unwrap();
    assert_eq!(reopened.entry_names(), ["a.txt", "b.txt", "c.txt"]);
    assert_eq!(reopened.read_entry("b.txt").unwrap(), b"b");
}

#[test]
fn missing_source_file_fails_without_touching_the_archive() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let archive = out.join("keep.zip");
    let mut zip = ZipFile::create(&archive);
    zip.add_entry_str("a.txt", "a").unwrap();
    zip.save().unwrap();
    let original = fs::read(&archive).unwrap();

    let source = dir.path().join("gone.txt");
    fs::write(&source, "soon gone").unwrap();
    let mut zip = ZipFile::open(&archive).unwrap();
    zip.add_file(&source, None).unwrap();
    fs::remove_file(&source).unwrap();

    let err = zip.save().unwrap_err();
    assert_eq!(err.kind(), zipkit::ErrorKind::Filesystem, "{err}");
    assert_eq!(fs::read(&archive).unwrap(), original);
    let left: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(left, ["keep.zip"]);
    assert_eq!(zip.entry_names(), ["a.txt", "gone.txt"]);
    assert_eq!(zip.read_entry("a.txt").unwrap(), b"a");
}

#[test]
fn slash_named_entry_with_content_is_not_extracted_as_a_directory() {
    let dir = tempdir().unwrap();
    let mut zip = ZipFile::new();
    zip.add_entry_bytes("x/", b"payload".to_vec()).unwrap();
    let bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let mut zip = ZipFile::from_bytes(bytes).unwrap();
    let entry = zip.entry("x/").unwrap();
    assert!(!entry.is_directory());
    assert_eq!(entry.uncompressed_size(), 7);
    assert_eq!(zip.read_entry("x/").unwrap(), b"payload");

    let err = zip.extract("x/", dir.path()).unwrap_err();
    assert_eq!(err.kind(), zipkit::ErrorKind::Format, "{err}");
    assert!(!dir.path().join("x").exists());
}

/// Local header plus data of the entry at offset zero.
fn first_entry_span(bytes: &[u8]) -> usize {
    let field = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
    let compressed = u32::from_le_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]) as usize;
    30 + field(26) + field(28) + compressed
}

/// First central directory header.
fn first_central_header(bytes: &[u8]) -> &[u8] {
    let at = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
    let field = |o: usize| u16::from_le_bytes([bytes[at + o], bytes[at + o + 1]]) as usize;
    &bytes[at..at + 46 + field(28) + field(30) + field(32)]
}

#[test]
fn raw_copies_keep_stored_flags_times_and_timestamp_records() {
    let mut zip = ZipFile::with_settings(zipkit::ZipSettings {
        emit_ntfs_times: false,
        emit_unix_times: true,
        ..zipkit::ZipSettings::default()
    });
    let time = chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(8, 30, 10)
        .unwrap();
    zip.add_entry_str("a.txt", &"alpha ".repeat(500)).unwrap().set_last_modified(time);
    let mut bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    // A level hint and a DOS time in another zone than the Unix timestamp,
    // as other tools write them.
    let central = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
    for (flags, dos_time) in [(6, 10), (central + 8, central + 12)] {
        bytes[flags] |= 0x04;
        bytes[dos_time..dos_time + 2].copy_from_slice(&0x6000u16.to_le_bytes());
    }

    let mut zip = ZipFile::from_bytes(bytes.clone()).unwrap();
    assert!(!zip.settings().emit_unix_times);
    assert_eq!(zip.entry("a.txt").unwrap().last_modified(), time);
    zip.add_entry_str("b.txt", "beta").unwrap();
    let copied = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();

    let span = first_entry_span(&bytes);
    assert_eq!(&copied[..span], &bytes[..span]);
    assert_eq!(first_central_header(&copied), first_central_header(&bytes));

    let mut reopened = ZipFile::from_bytes(copied).unwrap();
    assert_eq!(reopened.entry("a.txt").unwrap().last_modified(), time);
    assert_eq!(reopened.read_entry("a.txt").unwrap(), "alpha ".repeat(500).as_bytes());
}
