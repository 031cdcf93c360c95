use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn zipkit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_zipkit"))
}

#[test]
fn create_list_and_extract() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("docs");
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("a.txt"), "alpha").unwrap();
    fs::write(dir.path().join("b.txt"), "bravo").unwrap();
    let archive = dir.path().join("out.zip");

    let status = zipkit()
        .arg("-q")
        .arg(&archive)
        .arg("-a")
        .arg(&tree)
        .arg(dir.path().join("b.txt"))
        .args(["-P", "pw", "--encrypt", "aes128", "-z", "made by a test"])
        .status()
        .unwrap();
    assert!(status.success());

    let listing = zipkit().arg("-l").arg(&archive).output().unwrap();
    assert!(listing.status.success());
    let names = String::from_utf8(listing.stdout).unwrap();
    assert_eq!(names.lines().collect::<Vec<_>>(), ["docs/", "docs/a.txt", "b.txt"]);

    let out = dir.path().join("extracted");
    let status = zipkit()
        .args(["-q", "-P", "pw", "-d"])
        .arg(&out)
        .arg(&archive)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(fs::read_to_string(out.join("docs/a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(out.join("b.txt")).unwrap(), "bravo");

    let piped = zipkit().args(["-p", "-P", "pw"]).arg(&archive).arg("b.txt").output().unwrap();
    assert_eq!(piped.stdout, b"bravo");
}

#[test]
fn wrong_password_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("s.txt"), "secret").unwrap();
    let archive = dir.path().join("s.zip");
    assert!(zipkit()
        .arg(&archive)
        .arg("-a")
        .arg(dir.path().join("s.txt"))
        .args(["-P", "right", "--encrypt", "pkzip"])
        .status()
        .unwrap()
        .success());

    let out = zipkit()
        .args(["-P", "wrong", "-p"])
        .arg(&archive)
        .output()
        .unwrap();
    assert!(!out.status.success());
}
