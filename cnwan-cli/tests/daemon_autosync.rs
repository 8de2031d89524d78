use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const SNAPSHOT: &str = "\
name: web
namespace: shop
endpoints:
  e1:
    name: e1
    address: 10.0.0.1
    port: 80
";

fn cnwan_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_cnwan") {
        return PathBuf::from(path);
    }

    let this_test = std::env::current_exe().expect("current_exe");
    let deps_dir = this_test.parent().expect("deps dir");
    let debug_dir = deps_dir.parent().expect("debug dir");

    let direct = {
        #[cfg(windows)]
        {
            debug_dir.join("cnwan.exe")
        }
        #[cfg(not(windows))]
        {
            debug_dir.join("cnwan")
        }
    };
    if direct.exists() {
        return direct;
    }

    let mut candidates: Vec<_> = std::fs::read_dir(deps_dir)
        .expect("read deps dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            name.starts_with("cnwan-") && !name.ends_with(".d") && p.is_file()
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .expect("unable to locate cnwan binary in target/debug or target/debug/deps")
}

fn command(binary: &Path, home: &Path) -> Command {
    let mut cmd = Command::new(binary);
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("CNWAN_PROJECT")
        .env_remove("CNWAN_REGION");
    cmd
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = command(&binary, &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = command(&self.binary, &self.home)
            .args(["daemon", "stop"])
            .status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn daemon_status(binary: &Path, home: &Path) -> Option<serde_json::Value> {
    let output = command(binary, home).args(["daemon", "status"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn daemon_running(binary: &Path, home: &Path) -> bool {
    daemon_status(binary, home)
        .and_then(|v| v.get("running").and_then(|r| r.as_bool()))
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn snapshot_file_change_reaches_the_daemon() {
    let home = TempDir::new().expect("home");
    let binary = cnwan_bin_path();

    // Nothing listens on port 1, so every sync fails fast with a transport
    // error that the daemon records per service.
    let init = command(&binary, home.path())
        .args([
            "init",
            "--project",
            "acme",
            "--region",
            "us-west1",
            "--api-base-url",
            "http://127.0.0.1:1/v1",
        ])
        .output()
        .expect("run init");
    assert!(init.status.success());

    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || daemon_running(&binary, home.path())),
        "daemon did not report running state in time",
    );

    let services = home.path().join(".cnwan/services");
    std::fs::create_dir_all(&services).expect("services dir");
    std::fs::write(services.join("shop.web.yaml"), SNAPSHOT).expect("write snapshot");

    let recorded = wait_until(Duration::from_secs(10), || {
        daemon_status(&binary, home.path())
            .and_then(|status| status.get("services").cloned())
            .and_then(|services| services.as_array().cloned())
            .map(|services| {
                services.iter().any(|s| {
                    s["service"] == "web"
                        && s["ok"] == serde_json::Value::Bool(false)
                        && s["action"] == "apply"
                })
            })
            .unwrap_or(false)
    });
    assert!(recorded, "daemon did not record the failed apply in time");

    let status = command(&binary, home.path())
        .arg("status")
        .output()
        .expect("run status");
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("daemon running"), "{stdout}");
    assert!(stdout.contains("apply failed"), "{stdout}");

    let queued = command(&binary, home.path())
        .args(["apply", "--daemon"])
        .arg(services.join("shop.web.yaml"))
        .output()
        .expect("run apply --daemon");
    assert!(!queued.status.success());
    assert!(String::from_utf8_lossy(&queued.stderr).contains("daemon could not apply snapshot"));

    daemon.stop();
    assert!(!home.path().join(".cnwan/daemon.sock").exists());
}
