//! POSIX syscall wrappers backing each protocol operation, plus the
//! `errno` → [`ResponseStatus`] mapping table.

use std::ffi::CString;
use std::io;

use crate::protocol::{DiskStats, FileStat, DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE};
use crate::protocol::{OpenMode, ResponseStatus};

pub type OpResult<T> = Result<T, ResponseStatus>;

/// Maps the current `errno` to a protocol status, per the agent's fixed table.
pub fn status_from_errno(err: &io::Error) -> ResponseStatus {
    match err.raw_os_error() {
        Some(libc::EACCES) => ResponseStatus::AccessDenied,
        Some(libc::ENOENT) => ResponseStatus::FileNotFound,
        Some(libc::EEXIST) => ResponseStatus::FileExists,
        Some(libc::ENOTDIR) => ResponseStatus::NotADirectory,
        Some(libc::EISDIR) => ResponseStatus::NotAFile,
        Some(libc::ENOTEMPTY) => ResponseStatus::DirectoryNotEmpty,
        _ => ResponseStatus::GenericFailure,
    }
}

fn cpath(path: &str) -> OpResult<CString> {
    CString::new(path).map_err(|_| ResponseStatus::GenericFailure)
}

fn last_errno_status() -> ResponseStatus {
    status_from_errno(&io::Error::last_os_error())
}

pub fn stat_file(path: &str) -> OpResult<FileStat> {
    let c_path = cpath(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::stat(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(FileStat {
        mode: st.st_mode as u16,
        size: st.st_size as u64,
        access_time: st.st_atime as u64,
        write_time: st.st_mtime as u64,
    })
}

/// One entry of a directory stream: either a base name with its stat, or a
/// status for an entry whose stat failed (iteration still continues).
pub enum DirEntryResult {
    Entry { name: String, stat: FileStat },
    Failed { name: String, status: ResponseStatus },
}

/// An open directory, stepped one entry at a time (`.`/`..` already
/// filtered out) so the caller can interleave stepping with writing frames.
pub struct DirStream {
    dir: *mut libc::DIR,
    parent: String,
}

impl DirStream {
    /// Opens `path` for listing. Returns an error only if the directory
    /// itself could not be opened.
    pub fn open(path: &str) -> OpResult<Self> {
        let c_path = cpath(path)?;
        let dir = unsafe { libc::opendir(c_path.as_ptr()) };
        if dir.is_null() {
            return Err(last_errno_status());
        }
        Ok(DirStream { dir, parent: path.trim_end_matches('/').to_string() })
    }
}

impl Iterator for DirStream {
    type Item = DirEntryResult;

    fn next(&mut self) -> Option<DirEntryResult> {
        loop {
            unsafe { *libc::__errno_location() = 0 };
            let entry = unsafe { libc::readdir(self.dir) };
            if entry.is_null() {
                return None;
            }
            let name = unsafe {
                std::ffi::CStr::from_ptr((*entry).d_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            };
            if name == "." || name == ".." {
                continue;
            }
            let full_path = format!("{}/{}", self.parent, name);
            return Some(match stat_file(&full_path) {
                Ok(stat) => DirEntryResult::Entry { name, stat },
                Err(status) => DirEntryResult::Failed { name, status },
            });
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.dir);
        }
    }
}

// SAFETY: the stream is only ever touched by the single thread that owns
// the dispatcher loop; no two threads share one `DIR*`.
unsafe impl Send for DirStream {}

pub fn create_directory(path: &str) -> OpResult<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::mkdir(c_path.as_ptr(), DEFAULT_DIRECTORY_MODE as libc::mode_t) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

pub fn move_entry(from: &str, to: &str, overwrite: bool) -> OpResult<()> {
    if !overwrite && stat_file(to).is_ok() {
        return Err(ResponseStatus::FileExists);
    }
    let c_from = cpath(from)?;
    let c_to = cpath(to)?;
    let rc = unsafe { libc::rename(c_from.as_ptr(), c_to.as_ptr()) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

/// Success iff the parent directory grants R+W+X to the effective user.
/// Root has no parent, which is always denied.
fn parent_grants_rwx(path: &str) -> OpResult<()> {
    let trimmed = path.trim_end_matches('/');
    let idx = match trimmed.rfind('/') {
        Some(0) => return Err(ResponseStatus::AccessDenied),
        Some(i) => i,
        None => return Err(ResponseStatus::AccessDenied),
    };
    let parent = &trimmed[..idx];
    let c_parent = cpath(parent)?;
    let rc = unsafe {
        libc::faccessat(
            libc::AT_FDCWD,
            c_parent.as_ptr(),
            libc::R_OK | libc::W_OK | libc::X_OK,
            0,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(last_errno_status())
    }
}

pub fn check_remove_file(path: &str) -> OpResult<()> {
    parent_grants_rwx(path)
}

/// Corrected POSIX semantics: success is `faccessat` returning 0. The
/// reference implementation this was distilled from inverted this check.
pub fn check_remove_directory(path: &str) -> OpResult<()> {
    parent_grants_rwx(path)?;

    let c_path = cpath(path)?;
    let dir = unsafe { libc::opendir(c_path.as_ptr()) };
    if dir.is_null() {
        return Err(last_errno_status());
    }
    let mut has_entries = false;
    loop {
        unsafe { *libc::__errno_location() = 0 };
        let entry = unsafe { libc::readdir(dir) };
        if entry.is_null() {
            break;
        }
        let name = unsafe {
            std::ffi::CStr::from_ptr((*entry).d_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        if name != "." && name != ".." {
            has_entries = true;
            break;
        }
    }
    unsafe { libc::closedir(dir) };
    if has_entries {
        Err(ResponseStatus::DirectoryNotEmpty)
    } else {
        Ok(())
    }
}

pub fn remove_file(path: &str) -> OpResult<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::unlink(c_path.as_ptr()) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

pub fn remove_directory(path: &str) -> OpResult<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::rmdir(c_path.as_ptr()) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

fn posix_flags(read: bool, write: bool, mode: OpenMode) -> i32 {
    let access = match (read, write) {
        (true, true) => libc::O_RDWR,
        (true, false) => libc::O_RDONLY,
        (false, true) => libc::O_WRONLY,
        (false, false) => libc::O_RDONLY,
    };
    let extra = match mode {
        OpenMode::OpenOnly => 0,
        OpenMode::CreateIfNotExist => libc::O_CREAT,
        OpenMode::Truncate => libc::O_TRUNC,
        OpenMode::CreateOrTruncate => libc::O_CREAT | libc::O_TRUNC,
        OpenMode::CreateAlways => libc::O_CREAT | libc::O_EXCL,
    };
    access | extra
}

/// Opens `path`. Refuses with `GenericFailure` if neither read nor write is
/// requested (mirrors the protocol's own refusal, independent of errno).
pub fn open_handle(path: &str, read: bool, write: bool, mode: OpenMode) -> OpResult<u32> {
    if !read && !write {
        return Err(ResponseStatus::GenericFailure);
    }
    let c_path = cpath(path)?;
    let flags = posix_flags(read, write, mode);
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, DEFAULT_FILE_MODE as libc::mode_t) };
    if fd < 0 {
        return Err(last_errno_status());
    }
    Ok(fd as u32)
}

/// Always succeeds; errors from the underlying `close` are swallowed.
pub fn close_handle(handle: u32) {
    unsafe {
        libc::close(handle as i32);
    }
}

pub fn read_handle(handle: u32, length: u32, offset: u64) -> OpResult<Vec<u8>> {
    let fd = handle as i32;
    if unsafe { libc::lseek(fd, offset as libc::off_t, libc::SEEK_SET) } < 0 {
        return Err(last_errno_status());
    }
    let mut buf = vec![0u8; length as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
            )
        };
        if n < 0 {
            return Err(last_errno_status());
        }
        if n == 0 {
            break; // EOF: short read is expected and not an error.
        }
        filled += n as usize;
    }
    buf.truncate(filled);
    Ok(buf)
}

pub fn write_handle(handle: u32, offset: u64, data: &[u8]) -> OpResult<()> {
    let fd = handle as i32;
    if unsafe { libc::lseek(fd, offset as libc::off_t, libc::SEEK_SET) } < 0 {
        return Err(last_errno_status());
    }
    let mut written = 0usize;
    while written < data.len() {
        let n = unsafe {
            libc::write(
                fd,
                data[written..].as_ptr() as *const libc::c_void,
                data.len() - written,
            )
        };
        if n < 0 {
            return Err(last_errno_status());
        }
        written += n as usize;
    }
    Ok(())
}

pub fn truncate_handle(handle: u32, new_length: u64) -> OpResult<()> {
    let rc = unsafe { libc::ftruncate(handle as i32, new_length as libc::off_t) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

/// `-1` (as sent over the wire) means "leave unchanged", independently per
/// timestamp field.
pub fn set_file_time(path: &str, atime: i64, mtime: i64) -> OpResult<()> {
    let c_path = cpath(path)?;
    let to_spec = |v: i64| -> libc::timespec {
        if v < 0 {
            libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_OMIT }
        } else {
            libc::timespec { tv_sec: v as libc::time_t, tv_nsec: 0 }
        }
    };
    let times = [to_spec(atime), to_spec(mtime)];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    Ok(())
}

pub fn get_disk_stats(mount_root: &str) -> OpResult<DiskStats> {
    let c_path = cpath(mount_root)?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
    if rc != 0 {
        return Err(last_errno_status());
    }
    let block_size = vfs.f_frsize as u64;
    Ok(DiskStats {
        free_bytes: block_size * vfs.f_bfree as u64,
        available_bytes: block_size * vfs.f_bavail as u64,
        total_bytes: block_size * vfs.f_blocks as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn stat_and_create_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("child");
        create_directory(sub.to_str().unwrap()).unwrap();
        let stat = stat_file(sub.to_str().unwrap()).unwrap();
        assert!(stat.mode as u32 & libc::S_IFDIR != 0);
    }

    #[test]
    fn check_remove_directory_rejects_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();
        let status = check_remove_directory(dir.path().to_str().unwrap());
        assert_eq!(status, Err(ResponseStatus::DirectoryNotEmpty));
    }

    #[test]
    fn check_remove_directory_allows_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("empty");
        fs::create_dir(&sub).unwrap();
        assert!(check_remove_directory(sub.to_str().unwrap()).is_ok());
    }

    #[test]
    fn read_past_eof_yields_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"0123456789").unwrap();
        let fd = open_handle(path.to_str().unwrap(), true, false, OpenMode::OpenOnly).unwrap();
        let data = read_handle(fd, 100, 0).unwrap();
        assert_eq!(data.len(), 10);
        let more = read_handle(fd, 100, 10).unwrap();
        assert!(more.is_empty());
        close_handle(fd);
    }

    #[test]
    fn move_entry_refuses_overwrite_of_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"1").unwrap();
        fs::write(&b, b"2").unwrap();
        let status = move_entry(a.to_str().unwrap(), b.to_str().unwrap(), false);
        assert_eq!(status, Err(ResponseStatus::FileExists));
    }
}
