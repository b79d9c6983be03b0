//! Filesystem callback adapter: implements the host driver's callback table
//! against a [`Connection`], and the narrow interface a native driver
//! binding must satisfy to be mountable (the binding itself is external
//! glue, out of scope here — see spec §1/§6).

use std::sync::{Mutex, Weak};

use crate::error::DriverStatus;
use crate::host::Connection;
use crate::protocol::{FileStat, OpenMode, OpenModeByte};

/// Disposition the driver requests when opening a path, mirroring the
/// handful of Win32 `CreateFile` dispositions the reference design maps
/// from (`CREATE_ALWAYS`/`CREATE_NEW`/`OPEN_ALWAYS`/`OPEN_EXISTING`/
/// `TRUNCATE_EXISTING`); named generically since no concrete native API is
/// bound here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    CreateAlways,
    CreateNew,
    OpenAlways,
    OpenExisting,
    TruncateExisting,
}

/// The per-handle state the driver owns from open to close.
#[derive(Debug, Clone, Copy)]
pub struct FileContext {
    pub handle: Option<u32>,
    pub read_access: bool,
    pub write_access: bool,
    pub delete_on_close: bool,
    pub is_directory: bool,
}

/// Volume metadata reported at mount.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub volume_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub filesystem_name: String,
}

const VOLUME_SERIAL: u32 = 0x4E41_4E44; // fixed constant, matches spec §6.
const MAX_COMPONENT_LENGTH: u32 = 255;

/// The callback table a native filesystem driver binding invokes. Lock,
/// security-descriptor, and stream-enumeration callbacks are permitted to
/// return "not implemented" by the binding itself and are not modelled here.
pub trait DriverCallbacks: Send + Sync {
    fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        want_read: bool,
        want_write: bool,
        is_directory_request: bool,
    ) -> (DriverStatus, Option<FileContext>);
    fn cleanup(&self, path: &str, ctx: &FileContext);
    fn close_file(&self, ctx: FileContext);
    fn read_file(&self, ctx: &FileContext, offset: u64, length: u32) -> (DriverStatus, Vec<u8>);
    fn write_file(&self, ctx: &FileContext, offset: u64, data: &[u8]) -> DriverStatus;
    fn flush_file_buffers(&self, ctx: &FileContext) -> DriverStatus;
    fn get_file_information(&self, path: &str) -> (DriverStatus, Option<FileStat>);
    fn find_files(&self, path: &str, consumer: &mut dyn FnMut(&str, FileStat)) -> DriverStatus;
    fn set_file_attributes(&self, path: &str) -> DriverStatus;
    fn set_file_time(&self, path: &str, atime: i64, mtime: i64) -> DriverStatus;
    fn delete_file(&self, path: &str) -> DriverStatus;
    fn delete_directory(&self, path: &str) -> DriverStatus;
    fn move_file(&self, from: &str, to: &str, overwrite: bool) -> DriverStatus;
    fn set_end_of_file(&self, ctx: &FileContext, new_length: u64) -> DriverStatus;
    fn set_allocation_size(&self, ctx: &FileContext, new_size: u64) -> DriverStatus;
    fn get_disk_free_space(&self) -> (DriverStatus, Option<crate::protocol::DiskStats>);
    fn get_volume_information(&self) -> VolumeInfo;
    fn mounted(&self);
    fn unmounted(&self);
}

/// Anything a [`DeviceInstance`](crate::device::DeviceInstance) can be
/// unmounted through, so [`FilesystemAdapter`] never outlives the instance
/// it borrows from (a dead weak reference is itself a clean "already
/// unmounted" signal).
pub trait UnmountOnFailure {
    fn request_unmount(&self);
}

/// Implements [`DriverCallbacks`] against one connection. Holds only a
/// `Weak` reference to its owning device instance so the two can never form
/// an ownership cycle.
pub struct FilesystemAdapter<O: UnmountOnFailure> {
    connection: Weak<Connection>,
    owner: Weak<O>,
    volume_name: String,
    open_files: Mutex<std::collections::HashMap<u32, FileContext>>,
}

impl<O: UnmountOnFailure> FilesystemAdapter<O> {
    pub fn new(connection: Weak<Connection>, owner: Weak<O>, volume_name: String) -> Self {
        FilesystemAdapter {
            connection,
            owner,
            volume_name,
            open_files: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn connection(&self) -> Option<std::sync::Arc<Connection>> {
        self.connection.upgrade()
    }

    fn on_transport_failure(&self) -> DriverStatus {
        if let Some(owner) = self.owner.upgrade() {
            owner.request_unmount();
        }
        DriverStatus::Unsuccessful
    }

    fn disposition_to_open_mode(disposition: CreateDisposition) -> OpenMode {
        match disposition {
            CreateDisposition::CreateAlways => OpenMode::CreateOrTruncate,
            CreateDisposition::CreateNew => OpenMode::CreateAlways,
            CreateDisposition::OpenAlways => OpenMode::CreateIfNotExist,
            CreateDisposition::OpenExisting => OpenMode::OpenOnly,
            CreateDisposition::TruncateExisting => OpenMode::Truncate,
        }
    }
}

impl<O: UnmountOnFailure + Send + Sync> DriverCallbacks for FilesystemAdapter<O> {
    fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        want_read: bool,
        want_write: bool,
        is_directory_request: bool,
    ) -> (DriverStatus, Option<FileContext>) {
        let Some(conn) = self.connection() else {
            return (self.on_transport_failure(), None);
        };

        let existing = conn.stat_file(path);
        let (exists, existing_is_dir) = match &existing {
            Ok(stat) => (true, stat.is_dir()),
            Err(_) => (false, false),
        };

        if is_directory_request {
            let status = if matches!(
                disposition,
                CreateDisposition::OpenAlways
                    | CreateDisposition::CreateNew
                    | CreateDisposition::CreateAlways
            ) {
                match conn.create_directory(path) {
                    Ok(()) => DriverStatus::Success,
                    Err(crate::error::ProtocolError::Status(s)) => s.into(),
                    Err(_) => return (self.on_transport_failure(), None),
                }
            } else if exists && existing_is_dir {
                DriverStatus::Success
            } else if !exists {
                DriverStatus::ObjectNameNotFound
            } else {
                DriverStatus::NotADirectory
            };
            return (status, Some(FileContext {
                handle: None,
                read_access: true,
                write_access: false,
                delete_on_close: false,
                is_directory: true,
            }));
        }

        let (mut read_access, mut write_access) = (want_read, want_write);
        let is_creating = matches!(
            disposition,
            CreateDisposition::CreateAlways
                | CreateDisposition::CreateNew
                | CreateDisposition::OpenAlways
        );
        if !read_access && !write_access && is_creating {
            read_access = true;
        }

        // Metadata-only opens on an existing file skip OpenHandle entirely.
        if !read_access && !write_access && exists {
            return (
                DriverStatus::Success,
                Some(FileContext {
                    handle: None,
                    read_access: false,
                    write_access: false,
                    delete_on_close: false,
                    is_directory: false,
                }),
            );
        }

        let mode = Self::disposition_to_open_mode(disposition);
        let open_mode_byte = OpenModeByte { read: read_access, write: write_access, mode };
        match conn.open_handle(path, open_mode_byte) {
            Ok(handle) => {
                let mut status = DriverStatus::Success;
                if exists
                    && matches!(disposition, CreateDisposition::OpenAlways | CreateDisposition::CreateAlways)
                {
                    status = DriverStatus::ObjectNameCollision;
                }
                let ctx = FileContext {
                    handle,
                    read_access,
                    write_access,
                    delete_on_close: false,
                    is_directory: false,
                };
                if let Some(h) = handle {
                    self.open_files.lock().unwrap().insert(h, ctx);
                }
                (status, Some(ctx))
            }
            Err(crate::error::ProtocolError::Status(s)) => (s.into(), None),
            Err(_) => (self.on_transport_failure(), None),
        }
    }

    fn cleanup(&self, path: &str, ctx: &FileContext) {
        if !ctx.delete_on_close {
            return;
        }
        let Some(conn) = self.connection() else { return };
        let _ = if ctx.is_directory {
            conn.check_remove_directory(path).and_then(|_| conn.remove_directory(path))
        } else {
            conn.remove_file(path)
        };
    }

    fn close_file(&self, ctx: FileContext) {
        if let Some(handle) = ctx.handle {
            if let Some(conn) = self.connection() {
                let _ = conn.close_handle(handle);
            }
            self.open_files.lock().unwrap().remove(&handle);
        }
    }

    fn read_file(&self, ctx: &FileContext, offset: u64, length: u32) -> (DriverStatus, Vec<u8>) {
        if !ctx.read_access {
            return (DriverStatus::AccessDenied, Vec::new());
        }
        let Some(handle) = ctx.handle else { return (DriverStatus::AccessDenied, Vec::new()) };
        let Some(conn) = self.connection() else { return (self.on_transport_failure(), Vec::new()) };
        match conn.read_handle(handle, length, offset) {
            Ok(data) => (DriverStatus::Success, data),
            Err(crate::error::ProtocolError::Status(s)) => (s.into(), Vec::new()),
            Err(_) => (self.on_transport_failure(), Vec::new()),
        }
    }

    fn write_file(&self, ctx: &FileContext, offset: u64, data: &[u8]) -> DriverStatus {
        if !ctx.write_access {
            return DriverStatus::AccessDenied;
        }
        let Some(handle) = ctx.handle else { return DriverStatus::AccessDenied };
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.write_handle(handle, offset, data) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    fn flush_file_buffers(&self, _ctx: &FileContext) -> DriverStatus {
        DriverStatus::Success
    }

    fn get_file_information(&self, path: &str) -> (DriverStatus, Option<FileStat>) {
        let Some(conn) = self.connection() else { return (self.on_transport_failure(), None) };
        match conn.stat_file(path) {
            Ok(stat) => (DriverStatus::Success, Some(stat)),
            Err(crate::error::ProtocolError::Status(s)) => (s.into(), None),
            Err(_) => (self.on_transport_failure(), None),
        }
    }

    fn find_files(&self, path: &str, consumer: &mut dyn FnMut(&str, FileStat)) -> DriverStatus {
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.list_file_stats(path, |name, stat| consumer(name, stat)) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    fn set_file_attributes(&self, _path: &str) -> DriverStatus {
        // No attribute bits beyond mode are modelled on the wire; the
        // driver binding handles any host-only attribute bits itself.
        DriverStatus::Success
    }

    fn set_file_time(&self, path: &str, atime: i64, mtime: i64) -> DriverStatus {
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.set_file_time(path, atime, mtime) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    /// Only checks that removal would be permitted; the actual removal
    /// happens in `cleanup` once the handle is released with
    /// `delete_on_close` set, so a file still open elsewhere is never
    /// pulled out from under it.
    fn delete_file(&self, path: &str) -> DriverStatus {
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.check_remove_file(path) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    /// Only checks that removal would be permitted; see `delete_file`.
    fn delete_directory(&self, path: &str) -> DriverStatus {
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.check_remove_directory(path) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    fn move_file(&self, from: &str, to: &str, overwrite: bool) -> DriverStatus {
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.move_entry(from, to, overwrite) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    fn set_end_of_file(&self, ctx: &FileContext, new_length: u64) -> DriverStatus {
        let Some(handle) = ctx.handle else { return DriverStatus::AccessDenied };
        let Some(conn) = self.connection() else { return self.on_transport_failure() };
        match conn.truncate_handle(handle, new_length) {
            Ok(()) => DriverStatus::Success,
            Err(crate::error::ProtocolError::Status(s)) => s.into(),
            Err(_) => self.on_transport_failure(),
        }
    }

    fn set_allocation_size(&self, ctx: &FileContext, new_size: u64) -> DriverStatus {
        self.set_end_of_file(ctx, new_size)
    }

    fn get_disk_free_space(&self) -> (DriverStatus, Option<crate::protocol::DiskStats>) {
        let Some(conn) = self.connection() else { return (self.on_transport_failure(), None) };
        match conn.get_disk_stats() {
            Ok(stats) => (DriverStatus::Success, Some(stats)),
            Err(crate::error::ProtocolError::Status(s)) => (s.into(), None),
            Err(_) => (self.on_transport_failure(), None),
        }
    }

    fn get_volume_information(&self) -> VolumeInfo {
        VolumeInfo {
            volume_name: self.volume_name.clone(),
            serial_number: VOLUME_SERIAL,
            max_component_length: MAX_COMPONENT_LENGTH,
            filesystem_name: "NTFS".to_string(),
        }
    }

    fn mounted(&self) {}

    fn unmounted(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopOwner;
    impl UnmountOnFailure for NoopOwner {
        fn request_unmount(&self) {}
    }

    #[test]
    fn disposition_maps_match_reference_table() {
        assert_eq!(
            FilesystemAdapter::<NoopOwner>::disposition_to_open_mode(CreateDisposition::CreateAlways),
            OpenMode::CreateOrTruncate
        );
        assert_eq!(
            FilesystemAdapter::<NoopOwner>::disposition_to_open_mode(CreateDisposition::CreateNew),
            OpenMode::CreateAlways
        );
        assert_eq!(
            FilesystemAdapter::<NoopOwner>::disposition_to_open_mode(CreateDisposition::OpenAlways),
            OpenMode::CreateIfNotExist
        );
        assert_eq!(
            FilesystemAdapter::<NoopOwner>::disposition_to_open_mode(CreateDisposition::OpenExisting),
            OpenMode::OpenOnly
        );
        assert_eq!(
            FilesystemAdapter::<NoopOwner>::disposition_to_open_mode(CreateDisposition::TruncateExisting),
            OpenMode::Truncate
        );
    }
}
