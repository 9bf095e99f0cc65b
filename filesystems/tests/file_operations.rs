// Directory and file operations across remounts

use fatvol_filesystems::{
    check_volume, format, DefaultConfig, Entry, EntryKind, FatError, FatType, FileSystem,
    FormatOptions, MemoryDevice,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn floppy() -> MemoryDevice {
    let mut dev = MemoryDevice::new(2880, 512);
    format::<DefaultConfig, _>(&mut dev, &FormatOptions::new([0xAA, 0xBB, 0xCC, 0xDD]))
        .expect("format failed");
    dev
}

fn read_to_vec<D: fatvol_filesystems::BlockDevice>(
    fs: &mut FileSystem<D, DefaultConfig>,
    entry: &Entry,
) -> Vec<u8> {
    let mut buf = vec![0u8; entry.size() as usize];
    let n = fs.read_all(entry, &mut buf).expect("read failed");
    buf.truncate(n);
    buf
}

#[test]
fn test_hello_world_survives_remount() {
    init_logging();
    let mut dev = floppy();
    {
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut file = fs.create_entry(None, "short.txt", EntryKind::File { size: 12 }).unwrap();
        assert_eq!(read_to_vec(&mut fs, &file), vec![0u8; 12]);
        let free = fs.free_clusters();
        let first = file.first_cluster();
        fs.write_all(&mut file, b"Hello World!").unwrap();
        // written into the cluster reserved at creation
        assert_eq!(file.first_cluster(), first);
        assert_eq!(fs.free_clusters(), free);
        fs.unmount(true).unwrap();
    }

    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    let file = fs.lookup(None, "SHORT.TXT").unwrap();
    assert_eq!(file.short_name(), "SHORT.TXT");
    assert_eq!(file.name(), "short.txt");
    assert_eq!(file.size(), 12);
    assert_eq!(read_to_vec(&mut fs, &file), b"Hello World!");
    fs.unmount(true).unwrap();

    assert_eq!(dev.live_mappings(), 0);
    assert_eq!(dev.double_maps(), 0);
}

#[test]
fn test_long_names_survive_remount() {
    init_logging();
    let mut dev = floppy();
    let names = [
        "Quarterly Report (final).docx",
        "naïve café notes.txt",
        "a fairly long name spanning four fragments.txt",
    ];
    {
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        for name in names {
            let mut file = fs.create_entry(None, name, EntryKind::File { size: 0 }).unwrap();
            fs.write_all(&mut file, name.as_bytes()).unwrap();
        }
        fs.unmount(true).unwrap();
    }

    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    let listed: Vec<String> = fs
        .iter_dir(None)
        .unwrap()
        .map(|e| e.unwrap().name().to_string())
        .collect();
    assert_eq!(listed, names);
    for name in names {
        let file = fs.lookup(None, name).unwrap();
        assert_eq!(read_to_vec(&mut fs, &file), name.as_bytes());
    }
}

#[test]
fn test_delete_non_empty_directory() {
    init_logging();
    let mut dev = floppy();
    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    let dir = fs.create_entry(None, "projects", EntryKind::Directory).unwrap();
    fs.create_entry(Some(&dir), "plan.md", EntryKind::File { size: 64 }).unwrap();

    assert!(matches!(fs.delete(dir), Err(FatError::NotEmpty)));
    // nothing changed
    let dir = fs.open_path("/projects").unwrap().unwrap();
    assert!(fs.lookup(Some(&dir), "plan.md").is_ok());
}

#[test]
fn test_move_keeps_cluster_chain() {
    init_logging();
    let mut dev = floppy();
    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    let archive = fs.create_entry(None, "archive", EntryKind::Directory).unwrap();
    let mut file = fs.create_entry(None, "draft.txt", EntryKind::File { size: 0 }).unwrap();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    fs.write_all(&mut file, &payload).unwrap();
    let first = file.first_cluster();
    let free = fs.free_clusters();

    let moved = fs.rename(file, Some(&archive), "Final version.txt").unwrap();
    assert_eq!(moved.first_cluster(), first);
    assert_eq!(moved.size(), 5000);
    assert_eq!(fs.free_clusters(), free);
    assert!(matches!(fs.lookup(None, "draft.txt"), Err(FatError::NotFound)));

    let found = fs.open_path("/archive/final VERSION.txt").unwrap().unwrap();
    assert_eq!(found.first_cluster(), first);
    assert_eq!(read_to_vec(&mut fs, &found), payload);
}

#[test]
fn test_move_onto_existing_name_rejected() {
    init_logging();
    let mut dev = floppy();
    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    fs.create_entry(None, "one.txt", EntryKind::File { size: 0 }).unwrap();
    let two = fs.create_entry(None, "two.txt", EntryKind::File { size: 0 }).unwrap();
    assert!(matches!(fs.rename(two, None, "ONE.TXT"), Err(FatError::AlreadyExists)));
    assert!(fs.lookup(None, "two.txt").is_ok());
}

#[test]
fn test_tree_on_fat32_stays_consistent() {
    init_logging();
    let mut dev = MemoryDevice::new(70_000, 512);
    let mut options = FormatOptions::new([1; 4]);
    options.fat_type = Some(FatType::Fat32);
    format::<DefaultConfig, _>(&mut dev, &options).unwrap();

    fn assert_consistent(fs: &mut FileSystem<&mut MemoryDevice, DefaultConfig>, step: &str) {
        let report = check_volume(fs).unwrap();
        assert!(report.is_clean(), "after {}: {:?}", step, report.issues);
    }

    {
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let src = fs.create_entry(None, "src", EntryKind::Directory).unwrap();
        let nested = fs.create_entry(Some(&src), "nested dir", EntryKind::Directory).unwrap();
        assert_consistent(&mut fs, "mkdir");
        for i in 0..30 {
            let name = format!("module number {}.rs", i);
            let mut file = fs.create_entry(Some(&nested), &name, EntryKind::File { size: 0 }).unwrap();
            assert_consistent(&mut fs, &format!("create {}", name));
            fs.write_all(&mut file, &vec![i as u8; 700 * (i % 4)]).unwrap();
            assert_consistent(&mut fs, &format!("write {}", name));
        }
        for i in (0..30).step_by(3) {
            let name = format!("module number {}.rs", i);
            let file = fs.lookup(Some(&nested), &name).unwrap();
            fs.delete(file).unwrap();
            assert_consistent(&mut fs, &format!("delete {}", name));
        }
        let nested = fs.lookup(Some(&src), "nested dir").unwrap();
        fs.rename(nested, None, "moved").unwrap();

        let report = check_volume(&mut fs).unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.files, 20);
        assert_eq!(report.directories, 3);
        fs.unmount(true).unwrap();
    }

    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    assert!(!fs.was_dirty());
    let moved = fs.open_path("/moved").unwrap().unwrap();
    assert_eq!(fs.iter_dir(Some(&moved)).unwrap().count(), 20);
    let file = fs.lookup(Some(&moved), "module number 5.rs").unwrap();
    assert_eq!(read_to_vec(&mut fs, &file), vec![5u8; 700]);
    let report = check_volume(&mut fs).unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);

    drop(fs);
    assert_eq!(dev.live_mappings(), 0);
    assert_eq!(dev.double_maps(), 0);
}

#[test]
fn test_commit_failure_releases_mappings() {
    init_logging();
    let mut dev = floppy();
    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
    let mut file = fs.create_entry(None, "f.bin", EntryKind::File { size: 0 }).unwrap();
    let device = fs.unmount(true).unwrap();

    device.fail_commits_after(2);
    let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut *device).unwrap();
    let result = fs.write_all(&mut file, &[1u8; 4096]);
    assert!(matches!(result, Err(FatError::Device(_))));
    drop(fs);
    assert_eq!(device.live_mappings(), 0);
    assert_eq!(device.double_maps(), 0);
}
