// ABOUTME: Directory removal with optional overwrite of file contents.
// ABOUTME: Used to make sure staged artifact bytes do not outlive the task.

use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

const CHUNK: usize = 64 * 1024;

/// Remove `dir` and everything below it.
///
/// Read-only files and directories are made writable first, so bundles that
/// ship restrictive modes can still be removed. With `secure` set, every
/// regular file is also overwritten with random bytes and synced. Symlinks
/// are removed, never followed. A missing directory is not an error.
///
/// Removal is always attempted, even when an earlier step failed; the first
/// error encountered is returned.
pub fn wipe_dir(dir: &Path, secure: bool) -> io::Result<()> {
    match fs::symlink_metadata(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    let mut first_err = None;
    prepare_tree(dir, secure, &mut first_err);
    let removed = fs::remove_dir_all(dir);

    match (removed, first_err) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(e)) => Err(e),
        (Ok(()), None) => Ok(()),
    }
}

/// Make every entry under `dir` writable and, when `secure`, scramble file
/// contents. Keeps going after failures and records only the first one.
fn prepare_tree(dir: &Path, secure: bool, first_err: &mut Option<io::Error>) {
    note(first_err, make_writable(dir, true));
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            note(first_err, Err(e));
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                note(first_err, Err(e));
                continue;
            }
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => prepare_tree(&path, secure, first_err),
            Ok(ft) if ft.is_file() => {
                let res = make_writable(&path, false)
                    .and_then(|()| if secure { overwrite_file(&path) } else { Ok(()) });
                note(first_err, res);
            }
            Ok(_) => {}
            Err(e) => note(first_err, Err(e)),
        }
    }
}

fn note(first_err: &mut Option<io::Error>, res: io::Result<()>) {
    if let Err(e) = res {
        first_err.get_or_insert(e);
    }
}

#[cfg(unix)]
fn make_writable(path: &Path, is_dir: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::symlink_metadata(path)?.permissions();
    let wanted = if is_dir { 0o700 } else { 0o600 };
    if perms.mode() & wanted != wanted {
        perms.set_mode(perms.mode() | wanted);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(path: &Path, _is_dir: bool) -> io::Result<()> {
    let mut perms = fs::symlink_metadata(path)?.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn overwrite_file(path: &Path) -> io::Result<()> {
    let len = fs::symlink_metadata(path)?.len();
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; CHUNK];

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK as u64) as usize;
        rng.fill_bytes(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_replaces_contents_before_removal() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.env");
        let original = vec![b'A'; CHUNK + 17];
        fs::write(&secret, &original).unwrap();

        overwrite_file(&secret).unwrap();

        let scrambled = fs::read(&secret).unwrap();
        assert_eq!(scrambled.len(), original.len());
        assert_ne!(scrambled, original);
    }

    #[test]
    fn wipe_removes_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stage");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/values.yaml"), "password: hunter2").unwrap();
        fs::write(root.join("top"), "x").unwrap();

        wipe_dir(&root, true).unwrap();
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn wipe_clears_read_only_entries_in_both_modes() {
        use std::os::unix::fs::PermissionsExt;

        for secure in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("stage");
            fs::create_dir_all(root.join("locked")).unwrap();
            let file = root.join("locked/values.yaml");
            fs::write(&file, "password: hunter2").unwrap();
            fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();
            fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o555)).unwrap();

            wipe_dir(&root, secure).unwrap();
            assert!(!root.exists(), "secure = {secure}");
        }
    }

    #[test]
    fn wiping_missing_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        wipe_dir(&dir.path().join("gone"), true).unwrap();
    }
}
