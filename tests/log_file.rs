use std::io::Write;
use std::path::PathBuf;
use steamsync::util::open_log_append;

fn temp_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "steamsync-log-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&root).unwrap();
    root
}

#[test]
fn reopening_the_log_preserves_existing_content() {
    let root = temp_root("append");
    let path = root.join("steamsync.log");
    std::fs::write(&path, "first batch line\n").unwrap();

    // A second invocation opening the same path must not clobber what the
    // first batch already wrote.
    let mut file = open_log_append(&path).unwrap();
    file.write_all(b"second batch line\n").unwrap();
    drop(file);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("first batch line"));
    assert!(contents.contains("second batch line"));

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn open_log_append_creates_missing_file() {
    let root = temp_root("create");
    let path = root.join("steamsync.log");

    let mut file = open_log_append(&path).unwrap();
    file.write_all(b"hello\n").unwrap();
    drop(file);

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    std::fs::remove_dir_all(&root).ok();
}
