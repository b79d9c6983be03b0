//! Thin wrapper over the external device-bridge CLI (`adb` by default):
//! `devices`, `push`, `shell`, `forward`.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// The device-side fixed listen port the bridge forwards to.
pub const AGENT_DEVICE_PORT: u16 = 8626;

/// Where the agent binary is pushed to on the device.
pub const AGENT_DEST_PATH: &str = "/data/local/tmp/nandroid-agentd";

/// One line of `bridge devices` output: a serial with status `"device"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedDevice {
    pub serial: String,
}

/// A resolved path to the bridge binary (`adb` or equivalent), invoked via
/// `std::process::Command`. Resolved once and shared, per the tracker's
/// single memoised lookup.
#[derive(Debug, Clone)]
pub struct Bridge {
    binary: String,
}

impl Bridge {
    pub fn new(binary: impl Into<String>) -> Self {
        Bridge { binary: binary.into() }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn command_for(&self, serial: &str) -> Command {
        let mut cmd = self.command();
        cmd.arg("-s").arg(serial);
        cmd
    }

    /// Lists currently authorized devices, filtering out unauthorized /
    /// offline entries the same way `adb devices` tab-delimits them.
    pub fn list_devices(&self) -> io::Result<Vec<AuthorizedDevice>> {
        let output = self.command().arg("devices").output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let serial = parts.next()?.trim();
                let status = parts.next()?.trim();
                if serial.is_empty() || status != "device" {
                    return None;
                }
                Some(AuthorizedDevice { serial: serial.to_string() })
            })
            .collect())
    }

    pub fn push(&self, serial: &str, local: &Path, remote: &str) -> io::Result<()> {
        run(self.command_for(serial).arg("push").arg(local).arg(remote))
    }

    pub fn chmod_executable(&self, serial: &str, remote_path: &str) -> io::Result<()> {
        run(self.command_for(serial).args(["shell", "chmod", "+x", remote_path]))
    }

    pub fn forward(&self, serial: &str, host_port: u16, device_port: u16) -> io::Result<()> {
        run(self.command_for(serial).args([
            "forward",
            &format!("tcp:{host_port}"),
            &format!("tcp:{device_port}"),
        ]))
    }

    pub fn kill_by_name(&self, serial: &str, process_name: &str) -> io::Result<()> {
        run(self.command_for(serial).args(["shell", "pkill", process_name]))
    }

    /// Spawns the agent binary on the device, returning the child so the
    /// caller can capture stdout/stderr and wait on exit.
    pub fn spawn_agent(&self, serial: &str, remote_path: &str) -> io::Result<std::process::Child> {
        self.command_for(serial)
            .args(["shell", remote_path])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

fn run(cmd: &mut Command) -> io::Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("bridge command exited with {status}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devices_output_filtering_unauthorized() {
        let text = "List of devices attached\nABC123\tdevice\nXYZ999\tunauthorized\n\n";
        let parsed: Vec<_> = text
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let serial = parts.next()?.trim();
                let status = parts.next()?.trim();
                if serial.is_empty() || status != "device" {
                    return None;
                }
                Some(AuthorizedDevice { serial: serial.to_string() })
            })
            .collect();
        assert_eq!(parsed, vec![AuthorizedDevice { serial: "ABC123".into() }]);
    }
}
