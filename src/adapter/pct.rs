//! Proxmox container adapter - shells out to `pct` and keeps every bit of
//! output parsing on this side of the [`GuestAdapter`] boundary.
//!
//! The engine only ever sees typed [`AspectState`] verdicts; the text munging
//! of `pct config` / `pct status` output lives here and nowhere else.

use anyhow::Context;
use convergent::{Aspect, AspectState, Error, GuestAdapter, GuestId, GuestSpec, Result};
use log::debug;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Marker file inside a guest listing installed features, one per line.
const FEATURES_MARKER: &str = "/etc/hatchery-features";

/// Name of the snapshot taken when a guest finishes converging.
const SNAPSHOT_NAME: &str = "converged";

/// How often `wait_ready` probes the guest.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Adapter driving Proxmox containers through the `pct` CLI.
pub struct PctAdapter {
    /// Command name; overridable for tests and wrapper scripts
    command: String,
}

impl Default for PctAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PctAdapter {
    pub fn new() -> Self {
        Self {
            command: "pct".to_string(),
        }
    }

    /// Use an alternative `pct`-compatible command.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run a pct subcommand, capturing output.
    fn run(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {}", self.command))
            .map_err(|e| Error::Other(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(stderr.trim()))
        }
    }

    fn run_args(&self, args: &[&str]) -> Result<String> {
        let owned: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.run(&owned)
    }

    /// `pct config <id>` output, or None when the guest is not defined.
    fn config_of(&self, id: GuestId) -> Result<Option<String>> {
        match self.run_args(&["config", &id.to_string()]) {
            Ok(output) => Ok(Some(output)),
            Err(Error::Permanent { ref message }) if message.contains("does not exist") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Value of a `key: value` line in pct config output.
    fn config_value(config: &str, key: &str) -> Option<String> {
        config.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim().to_string())
        })
    }

    fn inspect_base_config(&self, id: GuestId, desired: &GuestSpec) -> Result<AspectState> {
        let Some(config) = self.config_of(id)? else {
            return Ok(AspectState::Absent);
        };

        let hostname = Self::config_value(&config, "hostname").unwrap_or_default();
        if hostname != desired.config.hostname {
            return Ok(AspectState::Divergent {
                detail: format!("hostname {hostname:?} != {:?}", desired.config.hostname),
            });
        }

        if let Some(net) = &desired.config.network {
            let current = Self::config_value(&config, "net0").unwrap_or_default();
            if !current.contains(&format!("bridge={}", net.bridge)) {
                return Ok(AspectState::Divergent {
                    detail: format!("net0 not on bridge {}", net.bridge),
                });
            }
            if let Some(address) = &net.address
                && !current.contains(&format!("ip={address}"))
            {
                return Ok(AspectState::Divergent {
                    detail: format!("net0 address != {address}"),
                });
            }
        }

        Ok(AspectState::Matching)
    }

    fn inspect_storage(&self, id: GuestId, desired: &GuestSpec) -> Result<AspectState> {
        let Some(config) = self.config_of(id)? else {
            return Ok(AspectState::Absent);
        };
        let Some(rootfs) = Self::config_value(&config, "rootfs") else {
            return Ok(AspectState::Absent);
        };

        // rootfs: local-lvm:vm-950-disk-0,size=64G
        let size_gb = rootfs
            .split(',')
            .find_map(|part| part.strip_prefix("size="))
            .and_then(|s| s.strip_suffix('G'))
            .and_then(|s| s.parse::<u64>().ok());

        match size_gb {
            Some(current) if current >= desired.config.disk_gb => Ok(AspectState::Matching),
            Some(current) => Ok(AspectState::Divergent {
                detail: format!("rootfs {current}G < {}G", desired.config.disk_gb),
            }),
            None => Ok(AspectState::Divergent {
                detail: format!("rootfs has no parseable size: {rootfs}"),
            }),
        }
    }

    fn inspect_sizing(&self, id: GuestId, desired: &GuestSpec) -> Result<AspectState> {
        let Some(config) = self.config_of(id)? else {
            return Ok(AspectState::Absent);
        };

        let cores = Self::config_value(&config, "cores")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(0);
        let memory = Self::config_value(&config, "memory")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if cores == desired.config.cores && memory == desired.config.memory_mb {
            Ok(AspectState::Matching)
        } else {
            Ok(AspectState::Divergent {
                detail: format!(
                    "cores {cores}/{} memory {memory}/{}",
                    desired.config.cores, desired.config.memory_mb
                ),
            })
        }
    }

    fn inspect_power(&self, id: GuestId) -> Result<AspectState> {
        match self.run_args(&["status", &id.to_string()]) {
            Ok(output) if output.contains("running") => Ok(AspectState::Matching),
            Ok(output) => Ok(AspectState::Divergent {
                detail: output.trim().to_string(),
            }),
            Err(Error::Permanent { ref message }) if message.contains("does not exist") => {
                Ok(AspectState::Absent)
            }
            Err(e) => Err(e),
        }
    }

    fn inspect_features(&self, id: GuestId, desired: &GuestSpec) -> Result<AspectState> {
        if desired.config.features.is_empty() {
            return Ok(AspectState::Matching);
        }
        let installed = match self.run_args(&["exec", &id.to_string(), "--", "cat", FEATURES_MARKER])
        {
            Ok(output) => output,
            // No marker yet means nothing installed.
            Err(Error::Permanent { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        let installed: Vec<&str> = installed.lines().map(str::trim).collect();
        let missing: Vec<&String> = desired
            .config
            .features
            .iter()
            .filter(|f| !installed.contains(&f.as_str()))
            .collect();

        if missing.is_empty() {
            Ok(AspectState::Matching)
        } else {
            Ok(AspectState::Divergent {
                detail: format!(
                    "missing features: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
        }
    }

    fn inspect_health(&self, id: GuestId) -> Result<AspectState> {
        match self.run_args(&[
            "exec",
            &id.to_string(),
            "--",
            "systemctl",
            "is-system-running",
            "--wait",
        ]) {
            Ok(output) if output.trim() == "running" => Ok(AspectState::Matching),
            Ok(output) => Ok(AspectState::Divergent {
                detail: format!("system state: {}", output.trim()),
            }),
            Err(Error::Permanent { message }) => Ok(AspectState::Divergent { detail: message }),
            Err(e) => Err(e),
        }
    }

    fn inspect_snapshot(&self, id: GuestId) -> Result<AspectState> {
        let output = self.run_args(&["listsnapshot", &id.to_string()])?;
        if output.lines().any(|line| line.contains(SNAPSHOT_NAME)) {
            Ok(AspectState::Matching)
        } else {
            Ok(AspectState::Absent)
        }
    }

    fn apply_definition(&self, id: GuestId, desired: &GuestSpec) -> Result<()> {
        match desired.clone_from {
            Some(template) => {
                self.run_args(&[
                    "clone",
                    &template.to_string(),
                    &id.to_string(),
                    "--hostname",
                    &desired.config.hostname,
                ])?;
            }
            None => {
                self.run_args(&[
                    "create",
                    &id.to_string(),
                    "--hostname",
                    &desired.config.hostname,
                    "--cores",
                    &desired.config.cores.to_string(),
                    "--memory",
                    &desired.config.memory_mb.to_string(),
                ])?;
            }
        }
        Ok(())
    }

    fn apply_base_config(&self, id: GuestId, desired: &GuestSpec) -> Result<()> {
        let mut args = vec![
            "set".to_string(),
            id.to_string(),
            "--hostname".to_string(),
            desired.config.hostname.clone(),
        ];
        if let Some(net) = &desired.config.network {
            let mut net0 = format!("name=eth0,bridge={}", net.bridge);
            match &net.address {
                Some(address) => {
                    net0.push_str(&format!(",ip={address}"));
                    if let Some(gateway) = &net.gateway {
                        net0.push_str(&format!(",gw={gateway}"));
                    }
                }
                None => net0.push_str(",ip=dhcp"),
            }
            args.push("--net0".to_string());
            args.push(net0);
        }
        self.run(&args)?;
        Ok(())
    }

    fn apply_features(&self, id: GuestId, desired: &GuestSpec) -> Result<()> {
        // One installer run per declared feature; installers are expected to
        // be idempotent and to append to the marker on success.
        for feature in &desired.config.features {
            self.run_args(&[
                "exec",
                &id.to_string(),
                "--",
                &format!("/usr/local/share/hatchery/features/{feature}.sh"),
            ])?;
            self.run_args(&[
                "exec",
                &id.to_string(),
                "--",
                "sh",
                "-c",
                &format!(
                    "grep -qx '{feature}' {FEATURES_MARKER} 2>/dev/null || echo '{feature}' >> {FEATURES_MARKER}"
                ),
            ])?;
        }
        Ok(())
    }
}

impl GuestAdapter for PctAdapter {
    fn exists(&self, id: GuestId) -> Result<bool> {
        Ok(self.config_of(id)?.is_some())
    }

    fn inspect(&self, id: GuestId, aspect: Aspect, desired: &GuestSpec) -> Result<AspectState> {
        match aspect {
            Aspect::Definition => Ok(if self.config_of(id)?.is_some() {
                AspectState::Matching
            } else {
                AspectState::Absent
            }),
            Aspect::BaseConfig => self.inspect_base_config(id, desired),
            Aspect::Storage => self.inspect_storage(id, desired),
            Aspect::Sizing => self.inspect_sizing(id, desired),
            Aspect::Power => self.inspect_power(id),
            Aspect::Features => self.inspect_features(id, desired),
            Aspect::Health => self.inspect_health(id),
            Aspect::Snapshot => self.inspect_snapshot(id),
        }
    }

    fn apply(&self, id: GuestId, aspect: Aspect, desired: &GuestSpec) -> Result<()> {
        match aspect {
            Aspect::Definition => self.apply_definition(id, desired),
            Aspect::BaseConfig => self.apply_base_config(id, desired),
            Aspect::Storage => {
                self.run_args(&[
                    "resize",
                    &id.to_string(),
                    "rootfs",
                    &format!("{}G", desired.config.disk_gb),
                ])?;
                Ok(())
            }
            Aspect::Sizing => {
                self.run_args(&[
                    "set",
                    &id.to_string(),
                    "--cores",
                    &desired.config.cores.to_string(),
                    "--memory",
                    &desired.config.memory_mb.to_string(),
                ])?;
                Ok(())
            }
            Aspect::Power => self.start(id),
            Aspect::Features => self.apply_features(id, desired),
            // Health has no corrective action; the engine never applies it.
            Aspect::Health => Err(Error::permanent(format!(
                "guest {id}: health cannot be applied"
            ))),
            Aspect::Snapshot => {
                self.run_args(&["snapshot", &id.to_string(), SNAPSHOT_NAME])?;
                Ok(())
            }
        }
    }

    fn start(&self, id: GuestId) -> Result<()> {
        self.run_args(&["start", &id.to_string()])?;
        Ok(())
    }

    fn stop(&self, id: GuestId) -> Result<()> {
        self.run_args(&["stop", &id.to_string()])?;
        Ok(())
    }

    fn delete(&self, id: GuestId) -> Result<()> {
        self.run_args(&["destroy", &id.to_string(), "--purge"])?;
        Ok(())
    }

    fn wait_ready(&self, id: GuestId, timeout: Duration, cancel: &AtomicBool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            if self
                .run_args(&["exec", &id.to_string(), "--", "true"])
                .is_ok()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ReadyTimeout {
                    id,
                    seconds: timeout.as_secs(),
                });
            }
            thread::sleep(READY_POLL_INTERVAL.min(timeout));
        }
    }
}

/// Classify a failed pct invocation from its stderr.
///
/// Lock contention and connectivity hiccups are transient; unknown guests
/// and invalid requests are permanent.
fn classify_failure(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();

    if lower.contains("can't lock")
        || lower.contains("got lock timeout")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("temporarily unavailable")
    {
        return Error::transient(stderr.to_string());
    }

    Error::permanent(stderr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_lock_contention_transient() {
        let err = classify_failure("trying to acquire lock... can't lock file - got timeout");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_unknown_guest_permanent() {
        let err = classify_failure("Configuration file 'nodes/pve/lxc/999.conf' does not exist");
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    fn stub_command(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("pct-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_stub_command_config_output() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_command(dir.path(), "printf 'hostname: web-1\\ncores: 2\\n'");
        let adapter = PctAdapter::with_command(stub);
        assert!(adapter.exists(GuestId(200)).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_stub_command_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_command(
            dir.path(),
            "echo \"trying to acquire lock... can't lock file - got timeout\" >&2\nexit 5",
        );
        let adapter = PctAdapter::with_command(stub);
        let err = adapter.start(GuestId(200)).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_value_parsing() {
        let config = "arch: amd64\nhostname: worker-1\ncores: 4\nmemory: 8192\nrootfs: local-lvm:vm-950-disk-0,size=64G\n";
        assert_eq!(
            PctAdapter::config_value(config, "hostname").as_deref(),
            Some("worker-1")
        );
        assert_eq!(
            PctAdapter::config_value(config, "cores").as_deref(),
            Some("4")
        );
        assert_eq!(PctAdapter::config_value(config, "net0"), None);
    }
}
