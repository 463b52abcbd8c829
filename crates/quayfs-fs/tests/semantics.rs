//! End-to-end scenarios exercising the gateway and POSIX surfaces
//! together over a mounted in-memory volume.

mod common;

use common::{mount_volume, root_ctx};

use quayfs_errors::ErrorKind;
use quayfs_fs::flock::{FlockCommand, FlockRequest, FlockType};
use quayfs_fs::types::InodeNumber;

#[test]
fn test_put_complete_then_get_object() {
    let fs = mount_volume("V");

    fs.mount.middleware_put_container("a", &[], &[]).unwrap();
    let put = fs
        .mount
        .middleware_put_complete(
            "a",
            "b/c.txt",
            &["seg-1".to_string()],
            &[17],
            br#"{"Content-Type":"text/plain"}"#,
        )
        .unwrap();

    let object = fs.mount.middleware_get_object("/a/b/c.txt", &[]).unwrap();
    assert_eq!(object.file_size, 17);
    assert_eq!(object.ino, put.ino);
    assert_eq!(object.read_plan.len(), 1);
    assert_eq!(object.read_plan[0].object_path, "seg-1");
    assert_eq!(object.read_plan[0].offset, 0);
    assert_eq!(object.read_plan[0].length, 17);
    assert_eq!(object.metadata, br#"{"Content-Type":"text/plain"}"#);
}

#[test]
fn test_container_listing_order_and_dir_flags() {
    let fs = mount_volume("V");

    fs.mount.middleware_put_container("c", &[], &[]).unwrap();
    fs.mount
        .middleware_put_complete("c", "d/f", &["seg-1".to_string()], &[4], b"")
        .unwrap();
    fs.mount
        .middleware_put_complete("c", "d-README", &["seg-2".to_string()], &[2], b"")
        .unwrap();

    let listing = fs.mount.middleware_get_container("c", 100, "", "").unwrap();
    let summary: Vec<(&str, bool)> = listing
        .iter()
        .map(|entry| (entry.basename.as_str(), entry.is_dir))
        .collect();
    assert_eq!(
        summary,
        vec![("d", true), ("d-README", false), ("d/f", false)]
    );
}

#[test]
fn test_put_container_compare_and_swap_chain() {
    let fs = mount_volume("V");

    fs.mount
        .middleware_put_container("fresh", &[], &[1, 2, 3])
        .unwrap();
    let head = fs.mount.middleware_head_response("fresh").unwrap();
    assert_eq!(head.metadata, vec![1, 2, 3]);

    fs.mount
        .middleware_put_container("fresh", &[1, 2, 3], &[9])
        .unwrap();

    match fs.mount.middleware_put_container("fresh", &[1, 2, 3], &[8]) {
        Err(err) => assert_eq!(err.kind(), ErrorKind::TryAgain),
        other => panic!("expected TryAgain, got {:?}", other),
    }
    let head = fs.mount.middleware_head_response("fresh").unwrap();
    assert_eq!(head.metadata, vec![9]);
}

#[test]
fn test_flock_conflict_then_release() {
    let fs = mount_volume("V");
    let ctx = root_ctx();
    let dir = fs
        .mount
        .mkdir(&ctx, InodeNumber::ROOT, "dir", 0o755)
        .unwrap();
    let file = fs.mount.create(&ctx, dir, "file", 0o644).unwrap();

    let holder = FlockRequest {
        pid: 1,
        start: 0,
        length: 10,
        flock_type: FlockType::Write,
    };
    fs.mount
        .flock(&ctx, file, FlockCommand::SetLk, &holder)
        .unwrap();

    let contender = FlockRequest {
        pid: 2,
        start: 5,
        length: 10,
        flock_type: FlockType::Write,
    };
    match fs.mount.flock(&ctx, file, FlockCommand::SetLk, &contender) {
        Err(err) => assert_eq!(err.kind(), ErrorKind::TryAgain),
        other => panic!("expected TryAgain, got {:?}", other),
    }

    let release = FlockRequest {
        pid: 1,
        start: 0,
        length: 10,
        flock_type: FlockType::Unlock,
    };
    fs.mount
        .flock(&ctx, file, FlockCommand::SetLk, &release)
        .unwrap();

    fs.mount
        .flock(&ctx, file, FlockCommand::SetLk, &contender)
        .unwrap();
}

#[test]
fn test_symlinked_directory_resolves_to_same_inode() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    let dir_a = fs.mount.mkdir(&ctx, InodeNumber::ROOT, "a", 0o755).unwrap();
    let dir_b = fs.mount.mkdir(&ctx, dir_a, "b", 0o755).unwrap();
    let file_c = fs.mount.create(&ctx, dir_b, "c", 0o644).unwrap();
    fs.mount.symlink(&ctx, dir_a, "link", "/a/b").unwrap();

    let through_link = fs.mount.middleware_head_response("/a/link/c").unwrap();
    assert_eq!(through_link.ino, file_c);
    let direct = fs.mount.middleware_head_response("/a/b/c").unwrap();
    assert_eq!(direct.ino, through_link.ino);
}

#[test]
fn test_symlink_loop_reports_too_many_symlinks() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    let dir_a = fs.mount.mkdir(&ctx, InodeNumber::ROOT, "a", 0o755).unwrap();
    fs.mount.symlink(&ctx, dir_a, "loop", "/a/loop").unwrap();

    match fs.mount.middleware_head_response("/a/loop") {
        Err(err) => assert_eq!(err.kind(), ErrorKind::TooManySymlinks),
        other => panic!("expected TooManySymlinks, got {:?}", other),
    }
}

#[test]
fn test_put_complete_through_symlinked_directory() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    fs.mount.middleware_put_container("c", &[], &[]).unwrap();
    let container = fs.mount.lookup(&ctx, InodeNumber::ROOT, "c").unwrap();
    let real = fs.mount.mkdir(&ctx, container, "real", 0o755).unwrap();
    fs.mount.symlink(&ctx, container, "alias", "real").unwrap();

    let put = fs
        .mount
        .middleware_put_complete("c", "alias/obj", &["seg".to_string()], &[3], b"")
        .unwrap();

    // The object landed in the real directory.
    assert_eq!(fs.mount.lookup(&ctx, real, "obj").unwrap(), put.ino);
}

#[test]
fn test_link_count_matches_directory_references() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    let dir = fs.mount.mkdir(&ctx, InodeNumber::ROOT, "d", 0o755).unwrap();
    let file = fs.mount.create(&ctx, dir, "f", 0o644).unwrap();
    fs.mount.link(&ctx, dir, "g", file).unwrap();

    // Two entries reference the file.
    assert_eq!(fs.mount.getstat(&ctx, file).unwrap().nlink, 2);
    // The directory is referenced by the root entry plus its own ".";
    // no subdirectories yet.
    assert_eq!(fs.mount.getstat(&ctx, dir).unwrap().nlink, 2);

    let sub = fs.mount.mkdir(&ctx, dir, "sub", 0o755).unwrap();
    // The child's ".." adds one more reference.
    assert_eq!(fs.mount.getstat(&ctx, dir).unwrap().nlink, 3);
    assert_eq!(fs.mount.getstat(&ctx, sub).unwrap().nlink, 2);

    // The collaborator agrees with the stat view.
    use quayfs_fs::volume::VolumeHandle;
    assert_eq!(fs.volume.get_link_count(dir).unwrap(), 3);
}

#[test]
fn test_readdir_pagination_no_duplicates_no_gaps() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    let mut expected = vec![".".to_string(), "..".to_string()];
    for index in 0..20 {
        let name = format!("file-{:02}", index);
        fs.mount
            .create(&ctx, InodeNumber::ROOT, &name, 0o644)
            .unwrap();
        expected.push(name);
    }
    expected.sort();

    for page_size in [1u64, 3, 7, 64] {
        let mut collected = Vec::new();
        let mut prev = String::new();
        loop {
            let (entries, _, more) = fs
                .mount
                .readdir(&ctx, InodeNumber::ROOT, &prev, page_size, 0)
                .unwrap();
            if entries.is_empty() {
                break;
            }
            prev = entries.last().unwrap().basename.clone();
            collected.extend(entries.into_iter().map(|e| e.basename));
            if !more {
                break;
            }
        }
        assert_eq!(collected, expected, "page size {}", page_size);
    }
}

#[test]
fn test_unmount_leaves_other_mounts_working() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    let second = fs
        .registry
        .mount("V", quayfs_fs::MountOptions::default())
        .unwrap();
    fs.registry.unmount(second.id()).unwrap();

    fs.mount
        .create(&ctx, InodeNumber::ROOT, "still-works", 0o644)
        .unwrap();
}

#[test]
fn test_counters_track_operations() {
    let fs = mount_volume("V");
    let ctx = root_ctx();

    fs.mount
        .create(&ctx, InodeNumber::ROOT, "f", 0o644)
        .unwrap();
    fs.mount.getstat(&ctx, fs.mount.lookup(&ctx, InodeNumber::ROOT, "f").unwrap()).unwrap();

    let counters = fs.registry.counters();
    assert_eq!(counters.get(quayfs_fs::metrics::FsOp::Create), 1);
    assert_eq!(counters.get(quayfs_fs::metrics::FsOp::Lookup), 1);
    assert_eq!(counters.get(quayfs_fs::metrics::FsOp::Getstat), 1);
}
