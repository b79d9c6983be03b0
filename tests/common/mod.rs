//! Shared fixture for end-to-end tests: runs the real agent dispatch loop
//! against a temp directory standing in for the device's mount root, and
//! connects a real `Connection` to it over loopback.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use nandroid_bridge::agent;
use nandroid_bridge::host::Connection;
use nandroid_bridge::wire::{FrameReader, FrameWriter};
use tempfile::TempDir;

pub struct Fixture {
    pub tempdir: TempDir,
    pub conn: Arc<Connection>,
    agent_thread: Option<std::thread::JoinHandle<()>>,
}

impl Fixture {
    pub fn new() -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        let mount_root = tempdir.path().to_path_buf();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let agent_thread = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_one(stream, &mount_root);
        });

        let conn = Connection::connect(
            addr,
            4096,
            false,
            nandroid_bridge::caches::STAT_TTL,
            nandroid_bridge::caches::STAT_SCAN_PERIOD,
        )
        .expect("connect to test agent");
        Fixture { tempdir, conn: Arc::new(conn), agent_thread: Some(agent_thread) }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    pub fn write_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).expect("write fixture file");
    }

    pub fn create_dir(&self, name: &str) {
        std::fs::create_dir(self.path(name)).expect("create fixture dir");
    }

    /// The agent operates on real filesystem paths; a "device path" here is
    /// just the tempdir-relative path the fake mount root actually has.
    pub fn device_path(&self, name: &str) -> String {
        if name.is_empty() {
            self.tempdir.path().to_str().unwrap().to_string()
        } else {
            self.path(name).to_str().unwrap().to_string()
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Some(thread) = self.agent_thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve_one(stream: TcpStream, mount_root: &std::path::Path) {
    stream.set_nodelay(true).unwrap();
    let read_half = stream.try_clone().unwrap();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(stream);
    agent::run_handshake(&mut reader, &mut writer).unwrap();
    let _ = agent::serve(reader, writer, mount_root.to_str().unwrap());
}
