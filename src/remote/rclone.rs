//! rclone-backed remote source: `rclone listremotes` + `rclone about --json`.

#![allow(missing_docs)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::core::config::RemotesConfig;
use crate::core::errors::{LobbyError, Result};
use crate::core::units::clamp_non_negative;
use crate::remote::source::{RemoteDiscovery, RemoteProbe, RemoteUsage, dedup_remote_names};

const WAIT_POLL: Duration = Duration::from_millis(20);
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Read one byte field of `rclone about --json`. Missing, null, negative and
/// non-integer values count as zero.
fn byte_field(body: &Map<String, Value>, key: &str) -> u64 {
    body.get(key)
        .and_then(Value::as_i64)
        .map_or(0, clamp_non_negative)
}

/// Parse the JSON body printed by `rclone about --json`.
///
/// Anything other than a JSON object is malformed; serde would otherwise
/// accept an array as a positional struct.
pub fn parse_about_json(remote: &str, raw: &str) -> Result<RemoteUsage> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LobbyError::probe(remote, "empty response"));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| LobbyError::probe(remote, format!("unparsable response: {e}")))?;
    let Value::Object(body) = value else {
        return Err(LobbyError::probe(remote, "response is not a JSON object"));
    };
    Ok(RemoteUsage {
        total: byte_field(&body, "total"),
        used: byte_field(&body, "used"),
        other: byte_field(&body, "other"),
        free: byte_field(&body, "free"),
    })
}

/// Parse `rclone listremotes` output: whitespace separated names.
#[must_use]
pub fn parse_listremotes(raw: &str) -> Vec<String> {
    dedup_remote_names(raw.split_whitespace().map(str::to_string).collect())
}

/// Remote source that shells out to the rclone binary.
#[derive(Debug, Clone)]
pub struct RcloneSource {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl RcloneSource {
    #[must_use]
    pub fn new(bin: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &RemotesConfig) -> Self {
        Self::new(config.rclone_bin.clone(), config.probe_timeout())
    }

    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    fn run(&self, args: &[&str], label: &str) -> Result<CapturedOutput> {
        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LobbyError::probe(label, format!("failed to spawn {}: {e}", self.bin.display())))?;
        wait_with_deadline(child, self.timeout, label)
    }
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Wait for `child`, killing it once `timeout` elapses. Pipes are drained on
/// helper threads so a chatty child cannot block on a full pipe.
fn wait_with_deadline(
    mut child: Child,
    timeout: Option<Duration>,
    label: &str,
) -> Result<CapturedOutput> {
    let stdout_reader = child.stdout.take().map(spawn_drain);
    let stderr_reader = child.stderr.take().map(spawn_drain);
    let deadline = timeout.map(|t| (Instant::now() + t, t));

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(LobbyError::probe(label, format!("wait failed: {e}"))),
        }
        if let Some((at, limit)) = deadline
            && Instant::now() >= at
        {
            let _ = child.kill();
            let _ = child.wait();
            // A grandchild may still hold the pipes open; leave its drains detached.
            let grace = Some(Instant::now() + DRAIN_GRACE);
            drop(join_drain(stdout_reader, grace));
            drop(join_drain(stderr_reader, grace));
            return Err(LobbyError::ProbeTimeout {
                remote: label.to_string(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            });
        }
        thread::sleep(WAIT_POLL);
    };

    let until = deadline.map(|(at, _)| at.max(Instant::now() + DRAIN_GRACE));
    let stdout = join_drain(stdout_reader, until);
    let stderr = join_drain(stderr_reader, until);
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Join a drain thread, giving up at `until`. An abandoned drain exits on its
/// own once the last holder of the pipe closes it.
fn join_drain(handle: Option<thread::JoinHandle<String>>, until: Option<Instant>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    if let Some(until) = until {
        while !handle.is_finished() {
            if Instant::now() >= until {
                return String::new();
            }
            thread::sleep(WAIT_POLL);
        }
    }
    handle.join().unwrap_or_default()
}

impl RcloneSource {
    /// Run `rclone listremotes`. Spawn failures and non-zero exits are
    /// discovery errors.
    pub fn discover(&self) -> Result<Vec<String>> {
        let out = self
            .run(&["listremotes"], "listremotes")
            .map_err(|e| LobbyError::Discovery {
                details: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(LobbyError::Discovery {
                details: format!(
                    "rclone listremotes exited with {}: {}",
                    out.status,
                    out.stderr.trim()
                ),
            });
        }
        Ok(parse_listremotes(&out.stdout))
    }
}

impl RemoteDiscovery for RcloneSource {
    fn list_remotes(&self) -> Vec<String> {
        self.discover().unwrap_or_else(|err| {
            log::warn!("{err}");
            Vec::new()
        })
    }
}

impl RemoteProbe for RcloneSource {
    fn describe(&self, remote: &str) -> Result<RemoteUsage> {
        let out = self.run(&["about", remote, "--json"], remote)?;
        if !out.status.success() {
            let reason = out.stderr.lines().next().unwrap_or("").trim();
            return Err(LobbyError::probe(
                remote,
                format!("rclone about exited with {}: {reason}", out.status),
            ));
        }
        parse_about_json(remote, &out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_about_payload() {
        let raw = r#"{"total":10737418240,"used":4294967296,"other":1024,"trashed":0,"free":6442450944}"#;
        let usage = parse_about_json("a:", raw).expect("parse");
        assert_eq!(usage.total, 10 << 30);
        assert_eq!(usage.used, 4 << 30);
        assert_eq!(usage.other, 1024);
        assert_eq!(usage.free, 6 << 30);
    }

    #[test]
    fn missing_and_negative_fields_become_zero() {
        let usage = parse_about_json("a:", r#"{"used": 5, "free": -3, "total": null}"#)
            .expect("parse");
        assert_eq!(usage.total, 0);
        assert_eq!(usage.used, 5);
        assert_eq!(usage.other, 0);
        assert_eq!(usage.free, 0);
    }

    #[test]
    fn empty_or_garbage_output_is_a_probe_failure() {
        assert_eq!(parse_about_json("a:", "  \n").unwrap_err().code(), "DLB-2002");
        assert_eq!(parse_about_json("a:", "Total: 15 GiB").unwrap_err().code(), "DLB-2002");
        assert!(parse_about_json("a:", "[1,2]").is_err());
        assert!(parse_about_json("a:", "[10737418240, 0, 0, 0]").is_err());
        assert_eq!(parse_about_json("a:", "42").unwrap_err().code(), "DLB-2002");
        assert!(parse_about_json("a:", "null").is_err());
    }

    #[test]
    fn listremotes_splits_on_whitespace() {
        let names = parse_listremotes("gdrive:\nwork:\n\nphotos:  gdrive:\n");
        assert_eq!(names, vec!["gdrive:", "work:", "photos:"]);
    }

    #[test]
    fn missing_binary_fails_closed() {
        let source = RcloneSource::new("/nonexistent/dlb/rclone", None);
        assert!(source.list_remotes().is_empty());
        assert_eq!(source.discover().unwrap_err().code(), "DLB-2001");
        let err = source.describe("a:").unwrap_err();
        assert_eq!(err.code(), "DLB-2002");
    }

    #[cfg(unix)]
    #[test]
    fn slow_probe_is_killed_at_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("rclone");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let source = RcloneSource::new(&script, Some(Duration::from_millis(100)));
        let started = Instant::now();
        let err = source.describe("slow:").unwrap_err();
        assert!(matches!(err, LobbyError::ProbeTimeout { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn background_child_holding_stdout_does_not_outlive_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("rclone");
        std::fs::write(
            &script,
            "#!/bin/sh\n(sleep 5) &\necho '{\"total\":1,\"used\":0,\"free\":1}'\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let source = RcloneSource::new(&script, Some(Duration::from_millis(300)));
        let started = Instant::now();
        let _ = source.describe("held:");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn failing_listremotes_is_a_discovery_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("rclone");
        std::fs::write(&script, "#!/bin/sh\necho 'config file not found' >&2\nexit 3\n")
            .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let source = RcloneSource::new(&script, None);
        let err = source.discover().unwrap_err();
        assert!(matches!(err, LobbyError::Discovery { .. }), "{err}");
        assert!(err.to_string().contains("config file not found"));
        assert!(source.list_remotes().is_empty());
    }
}
