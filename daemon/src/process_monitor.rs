use anyhow::{bail, Context, Result};
use std::process::Command;
use std::sync::Mutex;
use sysinfo::{ProcessesToUpdate, System};

use crate::snapshot::{ListingFormat, Platform};

/// Produces the raw process-listing text consumed by [`crate::snapshot::normalize`].
///
/// Implementations are synchronous and expected to return quickly; the scheduler
/// runs them on a blocking thread.
pub trait ProcessLister: Send + Sync {
    fn list_processes(&self) -> Result<String>;

    /// Layout of the text returned by [`ProcessLister::list_processes`].
    fn format(&self) -> ListingFormat;
}

/// Runs an external listing command (`ps -A`, `tasklist`) and returns its stdout.
pub struct CommandLister {
    program: String,
    args: Vec<String>,
    format: ListingFormat,
}

impl CommandLister {
    /// `argv[0]` is the program, the rest are its arguments.
    pub fn new(argv: &[String], format: ListingFormat) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("process listing command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            format,
        })
    }
}

impl ProcessLister for CommandLister {
    fn list_processes(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to run `{}`", self.program))?;
        if !output.status.success() {
            bail!("`{}` exited with {}", self.program, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn format(&self) -> ListingFormat {
        self.format
    }
}

/// In-process listing through `sysinfo`, rendered in `ps -A` layout so it goes
/// through the same normalizer as the command output.
pub struct SysinfoLister {
    sys: Mutex<System>,
}

impl SysinfoLister {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLister for SysinfoLister {
    fn list_processes(&self) -> Result<String> {
        let mut sys = self
            .sys
            .lock()
            .map_err(|_| anyhow::anyhow!("sysinfo state poisoned"))?;
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut out = String::from("PID TTY TIME CMD\n");
        for (pid, process) in sys.processes() {
            let name = process.name().to_string_lossy();
            out.push_str(&format!("{} ? 00:00:00 {name}\n", pid.as_u32()));
        }
        Ok(out)
    }

    fn format(&self) -> ListingFormat {
        ListingFormat::for_platform(Platform::Posix)
    }
}
