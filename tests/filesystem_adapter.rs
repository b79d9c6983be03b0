//! End-to-end coverage of the callback adapter against a real agent: open
//! dispositions, delete-on-close, and directory creation through the driver
//! surface rather than the raw `Connection` API.

mod common;

use std::sync::{Arc, Weak};

use common::Fixture;
use nandroid_bridge::callback::{CreateDisposition, DriverCallbacks, FilesystemAdapter, UnmountOnFailure};

struct NoopOwner;
impl UnmountOnFailure for NoopOwner {
    fn request_unmount(&self) {}
}

fn adapter(fx: &Fixture) -> FilesystemAdapter<NoopOwner> {
    FilesystemAdapter::new(Arc::downgrade(&fx.conn), Weak::new(), "NANDROID".to_string())
}

#[test]
fn create_new_on_existing_file_reports_collision() {
    let fx = Fixture::new();
    fx.write_file("a.txt", b"x");
    let path = fx.device_path("a.txt");
    let adapter = adapter(&fx);

    let (status, ctx) = adapter.create_file(&path, CreateDisposition::CreateNew, true, false, false);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::ObjectNameCollision);
    let ctx = ctx.unwrap();
    adapter.close_file(ctx);
}

#[test]
fn open_existing_on_missing_file_reports_not_found() {
    let fx = Fixture::new();
    let path = fx.device_path("nope.txt");
    let adapter = adapter(&fx);

    let (status, ctx) =
        adapter.create_file(&path, CreateDisposition::OpenExisting, true, false, false);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::ObjectNameNotFound);
    assert!(ctx.is_none());
}

#[test]
fn cleanup_with_delete_on_close_removes_the_file() {
    let fx = Fixture::new();
    fx.write_file("temp.txt", b"scratch");
    let path = fx.device_path("temp.txt");
    let adapter = adapter(&fx);

    let (status, ctx) =
        adapter.create_file(&path, CreateDisposition::OpenExisting, true, true, false);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::Success);
    let mut ctx = ctx.unwrap();
    ctx.delete_on_close = true;

    adapter.cleanup(&path, &ctx);
    adapter.close_file(ctx);

    assert!(!fx.path("temp.txt").exists());
}

#[test]
fn write_then_read_round_trips_through_the_real_agent() {
    let fx = Fixture::new();
    let path = fx.device_path("rw.txt");
    let adapter = adapter(&fx);

    let (status, ctx) =
        adapter.create_file(&path, CreateDisposition::CreateAlways, true, true, false);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::Success);
    let ctx = ctx.unwrap();

    let write_status = adapter.write_file(&ctx, 0, b"payload");
    assert_eq!(write_status, nandroid_bridge::error::DriverStatus::Success);

    let (read_status, data) = adapter.read_file(&ctx, 0, 7);
    assert_eq!(read_status, nandroid_bridge::error::DriverStatus::Success);
    assert_eq!(data, b"payload");

    adapter.close_file(ctx);
}

#[test]
fn delete_directory_only_checks_removability_cleanup_does_the_removal() {
    let fx = Fixture::new();
    let path = fx.device_path("newdir");
    let adapter = adapter(&fx);

    let (status, ctx) =
        adapter.create_file(&path, CreateDisposition::CreateAlways, false, false, true);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::Success);
    let mut ctx = ctx.unwrap();
    assert!(ctx.is_directory);
    assert!(fx.path("newdir").is_dir());

    // The delete callback is a permission check, not a removal: the
    // directory survives it untouched.
    let status = adapter.delete_directory(&path);
    assert_eq!(status, nandroid_bridge::error::DriverStatus::Success);
    assert!(fx.path("newdir").is_dir());

    // Removal only happens once the handle is released with
    // delete_on_close set.
    ctx.delete_on_close = true;
    adapter.cleanup(&path, &ctx);
    adapter.close_file(ctx);
    assert!(!fx.path("newdir").exists());
}
