//! Stand-in model worker for pool tests: a stdlib-only Python script that
//! speaks the frame protocol without loading any model.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tempfile::TempDir;

use super::WorkerLaunch;

/// `argv`: mode, spawn log. Every start appends the pid to the spawn log and
/// `describe` answers with the pid as `num_classes`.
/// Modes: `ok`, `once` (exit after the first reply), `no_pong` (answer pings
/// with `busy`), `garbage` (one undecodable reply while `<log>.garbage` exists).
const SCRIPT: &str = r#"
import os
import struct
import sys

mode, log = sys.argv[1], sys.argv[2]
with open(log, "a") as f:
    f.write(f"{os.getpid()}\n")


def pack(value):
    if value is None:
        return b"\xc0"
    if value is True:
        return b"\xc3"
    if value is False:
        return b"\xc2"
    if isinstance(value, int):
        return b"\xcf" + struct.pack(">Q", value)
    if isinstance(value, str):
        raw = value.encode()
        return b"\xd9" + bytes([len(raw)]) + raw
    out = bytes([0x80 | len(value)])
    for key, item in value.items():
        out += pack(key) + pack(item)
    return out


def send(payload):
    sys.stdout.buffer.write(struct.pack(">I", len(payload)) + payload)
    sys.stdout.buffer.flush()


stdin = sys.stdin.buffer
while True:
    header = stdin.read(4)
    if len(header) < 4:
        sys.exit(0)
    (length,) = struct.unpack(">I", header)
    payload = stdin.read(length)
    # fixmap, fixstr "type", fixstr <kind>
    kind = payload[7:7 + (payload[6] & 0x1F)].decode()
    if kind == "shutdown":
        sys.exit(0)
    marker = log + ".garbage"
    if mode == "garbage" and os.path.exists(marker):
        os.remove(marker)
        send(b"\xc1\xc1\xc1")
        continue
    if kind == "ping":
        reply = {"type": "busy" if mode == "no_pong" else "pong"}
    elif kind == "describe":
        reply = {
            "type": "describe",
            "keypoint_dim": 1662,
            "num_classes": os.getpid(),
            "generator_loaded": False,
        }
    elif kind == "extract":
        reply = {"type": "landmarks", "pose": None, "face": None,
                 "left_hand": None, "right_hand": None}
    elif kind == "release":
        reply = {"type": "released"}
    else:
        reply = {"type": "error", "kind": "bad_request", "message": kind}
    send(pack(reply))
    if mode == "once":
        sys.exit(0)
"#;

pub(crate) struct FakeWorker {
    _dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl FakeWorker {
    /// `None` when no `python3` is on the path.
    pub(crate) fn new() -> Option<Self> {
        let python = Command::new("python3")
            .args(["-c", "pass"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !python.is_ok_and(|s| s.success()) {
            eprintln!("python3 not found, skipping live worker test");
            return None;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_worker.py");
        std::fs::write(&script, SCRIPT).unwrap();
        let log = dir.path().join("spawns.log");
        Some(Self {
            _dir: dir,
            script,
            log,
        })
    }

    pub(crate) fn launch(&self, mode: &str) -> WorkerLaunch {
        WorkerLaunch {
            python_bin: "python3".into(),
            script: self.script.clone(),
            args: vec![mode.to_string(), self.log.display().to_string()],
        }
    }

    /// Pids of every process started so far, oldest first.
    pub(crate) fn spawned(&self) -> Vec<usize> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// Make the next reply of a `garbage` worker undecodable.
    pub(crate) fn arm_garbage(&self) {
        let mut marker = self.log.clone().into_os_string();
        marker.push(".garbage");
        std::fs::write(marker, b"").unwrap();
    }
}
