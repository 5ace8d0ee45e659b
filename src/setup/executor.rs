use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use super::error::{Result, SetupError};
use super::steps::CommandSpec;

const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Captured result of one external command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A command that could not be started at all
    pub fn launch_failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            code: None,
            stdout: String::new(),
            stderr: error.to_string(),
        }
    }
}

/// Run a command to completion in `workdir`, capturing both streams in full
pub fn run_captured(cmd: &CommandSpec, workdir: &Path, input: Option<&str>) -> Result<CommandOutput> {
    debug!("Running in {:?}: {}", workdir, cmd.display());

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(workdir)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        match stdin.write_all(input.as_bytes()) {
            // The command exited without reading its input; its exit code says the rest
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                warn!("{} closed stdin early", cmd.program);
            }
            other => other?,
        }
    }

    let output = child.wait_with_output()?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn systemctl(args: &[&str]) -> Result<()> {
    debug!("Running: systemctl {:?}", args);

    let status = Command::new("systemctl")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(SetupError::Command(format!(
            "systemctl {} failed with code {:?}",
            args.join(" "),
            status.code()
        )))
    }
}

pub fn stop_unit(unit: &str) -> Result<()> {
    info!("Stopping {}", unit);
    systemctl(&["stop", unit])
}

pub fn start_unit(unit: &str) -> Result<()> {
    info!("Starting {}", unit);
    systemctl(&["start", unit])
}

/// Stop and remove the systemd unit plus the cron entry that re-run the wizard.
/// Every part tolerates already being gone, so calling this twice is harmless.
pub fn disable_autostart(unit: &str, cron_marker: &str) {
    info!("Disabling autostart for {}", unit);

    if let Err(e) = systemctl(&["stop", unit]) {
        warn!("Failed to stop {}: {}", unit, e);
    }
    if let Err(e) = systemctl(&["disable", unit]) {
        warn!("Failed to disable {}: {}", unit, e);
    }

    let unit_path = Path::new(SYSTEMD_UNIT_DIR).join(format!("{unit}.service"));
    if unit_path.exists() {
        if let Err(e) = std::fs::remove_file(&unit_path) {
            warn!("Failed to remove {:?}: {}", unit_path, e);
        }
    }

    if let Err(e) = systemctl(&["daemon-reload"]) {
        warn!("Failed to reload systemd: {}", e);
    }

    if let Err(e) = remove_cron_entries(cron_marker) {
        warn!("Failed to remove cron entries: {}", e);
    }
}

/// Rewrite the current user's crontab without lines containing `marker`
pub fn remove_cron_entries(marker: &str) -> Result<()> {
    let output = Command::new("crontab").arg("-l").output()?;

    if !output.status.success() {
        // No crontab installed
        debug!("crontab -l exited with {:?}, nothing to remove", output.status.code());
        return Ok(());
    }

    let current = String::from_utf8_lossy(&output.stdout);
    let filtered = filter_cron_lines(&current, marker);
    if filtered == current {
        return Ok(());
    }

    let mut child = Command::new("crontab").arg("-").stdin(Stdio::piped()).spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(filtered.as_bytes())?;
    }

    let status = child.wait()?;
    if status.success() {
        info!("Removed crontab entries matching {:?}", marker);
        Ok(())
    } else {
        Err(SetupError::Command(format!(
            "crontab - failed with code {:?}",
            status.code()
        )))
    }
}

fn filter_cron_lines(crontab: &str, marker: &str) -> String {
    crontab
        .lines()
        .filter(|line| !line.contains(marker))
        .map(|line| format!("{line}\n"))
        .collect()
}

pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}
