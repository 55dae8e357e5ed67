// Daemon configuration collaborator: the global default-sample-rate entry
//
// The sound server reads `default-sample-rate = N` from its daemon config.
// Rewrites preserve every unrelated line, try the system-wide file first and
// fall back to the per-user file (creating it when absent), matching how the
// daemon itself resolves its configuration. Applying a new rate restarts the
// server process, since the daemon only reads the file at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// System-wide daemon configuration file.
pub const SYSTEM_DAEMON_CONF: &str = "/etc/pulse/daemon.conf";

const RATE_KEY: &str = "default-sample-rate";

/// Delay between killing and restarting the server.
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Per-user daemon configuration file, when a home directory exists.
pub fn user_daemon_conf() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pulse").join("daemon.conf"))
}

fn parse_rate(text: &str) -> Option<u32> {
    for line in text.lines() {
        let line = line.trim_start();
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix(RATE_KEY) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                if let Ok(rate) = value.trim().parse() {
                    return Some(rate);
                }
            }
        }
    }
    None
}

/// Read the configured default sample rate from one config file.
///
/// Returns `Ok(None)` when the file has no (parsable) entry.
pub fn read_default_sample_rate(path: &Path) -> Result<Option<u32>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading daemon config {}", path.display()))?;
    Ok(parse_rate(&text))
}

/// Rewrite one config file's default sample rate, preserving every other
/// line. The entry is appended when absent; the file is created when missing.
pub fn write_default_sample_rate(path: &Path, rate: u32) -> Result<()> {
    if !(8_000..=192_000).contains(&rate) {
        bail!("sample rate {rate} is out of range (8000-192000 Hz)");
    }

    let existing = fs::read_to_string(path).unwrap_or_default();
    let mut rewritten = String::with_capacity(existing.len() + 32);
    let mut replaced = false;
    for line in existing.lines() {
        if line.trim_start().starts_with(RATE_KEY) {
            rewritten.push_str(&format!("{RATE_KEY} = {rate}\n"));
            replaced = true;
        } else {
            rewritten.push_str(line);
            rewritten.push('\n');
        }
    }
    if !replaced {
        rewritten.push_str(&format!("{RATE_KEY} = {rate}\n"));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }
    fs::write(path, rewritten)
        .with_context(|| format!("writing daemon config {}", path.display()))?;
    Ok(())
}

/// Write the new rate to the system config, falling back to the per-user one.
/// Returns the path that was actually updated.
pub fn set_default_sample_rate(rate: u32) -> Result<PathBuf> {
    let system = PathBuf::from(SYSTEM_DAEMON_CONF);
    if write_default_sample_rate(&system, rate).is_ok() {
        return Ok(system);
    }
    let user = user_daemon_conf().context("no per-user config directory available")?;
    write_default_sample_rate(&user, rate)?;
    Ok(user)
}

/// Update the configured rate and restart the server so it takes effect.
pub fn apply_default_sample_rate(rate: u32) -> Result<()> {
    let path = set_default_sample_rate(rate)?;
    info!(rate, path = %path.display(), "daemon sample rate updated");
    restart_server()
}

fn restart_server() -> Result<()> {
    let running = Command::new("pulseaudio")
        .arg("--check")
        .status()
        .context("checking whether the sound server is running")?
        .success();

    if running {
        let killed = Command::new("pulseaudio")
            .arg("--kill")
            .status()
            .context("stopping the sound server")?
            .success();
        if !killed {
            bail!("failed to stop the running sound server");
        }
        thread::sleep(RESTART_DELAY);
    }

    let started = Command::new("pulseaudio")
        .arg("--start")
        .status()
        .context("starting the sound server")?
        .success();
    if !started {
        warn!("sound server did not restart cleanly");
        bail!("failed to restart the sound server");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_skips_comments() {
        let text = "; default-sample-rate = 48000\n# default-sample-rate = 96000\ndefault-sample-rate = 44100\n";
        assert_eq!(parse_rate(text), Some(44100));
        assert_eq!(parse_rate("flat-volumes = no\n"), None);
    }

    #[test]
    fn test_rewrite_preserves_unrelated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.conf");
        fs::write(&path, "flat-volumes = no\ndefault-sample-rate = 44100\nnice-level = -11\n")
            .unwrap();

        write_default_sample_rate(&path, 48000).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("flat-volumes = no"));
        assert!(text.contains("nice-level = -11"));
        assert!(text.contains("default-sample-rate = 48000"));
        assert!(!text.contains("44100"));
        assert_eq!(read_default_sample_rate(&path).unwrap(), Some(48000));
    }

    #[test]
    fn test_entry_appended_and_file_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulse").join("daemon.conf");

        write_default_sample_rate(&path, 96000).unwrap();
        assert_eq!(read_default_sample_rate(&path).unwrap(), Some(96000));
    }

    #[test]
    fn test_out_of_range_rate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.conf");
        assert!(write_default_sample_rate(&path, 5000).is_err());
        assert!(write_default_sample_rate(&path, 400_000).is_err());
        assert!(!path.exists());
    }
}
