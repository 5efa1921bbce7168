use std::io::{Read, Seek, SeekFrom, Write};
use zulu_cow::image::{BlockFile, OpenMode, StdFile};
use zulu_cow::{GroupState, OpenPathsError, StoreConfig};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn open_creates_overlay_and_never_touches_original() {
    let dir = tempfile::tempdir().unwrap();
    let original_path = dir.path().join("base.img");
    let overlay_path = dir.path().join("overlay.img");
    let original = patterned(1 << 20);

    std::fs::write(&original_path, &original).unwrap();

    let mut store = zulu_cow::open(&original_path, &overlay_path, StoreConfig::default()).unwrap();

    assert_eq!(std::fs::metadata(&overlay_path).unwrap().len(), 1 << 20);

    store.seek(SeekFrom::Start(70_000)).unwrap();
    store.write_all(&[0xC3; 3000]).unwrap();

    let mut buf = vec![0; 4000];

    store.seek(SeekFrom::Start(69_500)).unwrap();
    store.read_exact(&mut buf).unwrap();

    assert_eq!(&buf[..500], &original[69_500..70_000]);
    assert!(buf[500..3500].iter().all(|&b| b == 0xC3));
    assert_eq!(&buf[3500..], &original[73_000..73_500]);
    assert_eq!(store.sector_state(70_000 / 512), GroupState::Dirty);

    let mut expected = original.clone();
    expected[70_000..73_000].fill(0xC3);

    assert_eq!(store.recreate().unwrap(), expected);

    store.flush().unwrap();
    drop(store);

    assert_eq!(std::fs::read(&original_path).unwrap(), original);
}

#[test]
fn existing_overlay_is_resized_and_starts_clean() {
    let dir = tempfile::tempdir().unwrap();
    let original_path = dir.path().join("base.img");
    let overlay_path = dir.path().join("overlay.img");

    std::fs::write(&original_path, patterned(8192)).unwrap();
    std::fs::write(&overlay_path, vec![0xFF; 100_000]).unwrap();

    let mut store = zulu_cow::open(&original_path, &overlay_path, StoreConfig::default()).unwrap();

    assert_eq!(store.overlay().len().unwrap(), 8192);
    assert_eq!(store.bitmap().count_dirty(), 0);
    assert_eq!(store.recreate().unwrap(), patterned(8192));
}

#[test]
fn missing_original_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let original_path = dir.path().join("missing.img");
    let overlay_path = dir.path().join("overlay.img");

    let err = zulu_cow::open(&original_path, &overlay_path, StoreConfig::default()).unwrap_err();

    match err {
        OpenPathsError::OpenOriginal { path, .. } => assert_eq!(path, original_path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn read_only_file_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("base.img");

    std::fs::write(&path, patterned(1024)).unwrap();

    let mut file = StdFile::open(&path, OpenMode::ReadOnly).unwrap();

    assert!(file.write_at(0, &[1, 2, 3]).is_err());

    let mut buf = [0; 4];

    file.read_exact_at(10, &mut buf).unwrap();
    assert_eq!(&buf, &patterned(1024)[10..14]);
}

#[test]
fn std_file_extension_reads_back_as_zeroes() {
    let mut file = StdFile::from_file(tempfile::tempfile().unwrap());

    file.set_len(4096).unwrap();
    assert_eq!(file.write_at(4000, &[9; 8]).unwrap(), 8);

    let mut hole = [0xAA; 64];

    file.read_exact_at(100, &mut hole).unwrap();
    assert!(hole.iter().all(|&b| b == 0));
    assert_eq!(file.len().unwrap(), 4096);
}
