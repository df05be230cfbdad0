// NETBENCH MANAGED PROCESS
// OWNS ONE SPAWNED CHILD AND ITS PROCESS GROUP.
//
// EVERY CHILD IS PLACED IN ITS OWN PROCESS GROUP SO SIGNALS REACH ANYTHING IT
// FORKS (SSH, SHELL WRAPPERS), AND GETS PR_SET_PDEATHSIG SO IT DIES WITH THE
// RUNNER. DROP ALWAYS LEAVES THE GROUP DEAD AND REAPED: SIGINT, 500MS GRACE,
// SIGKILL, WAIT.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DROP_GRACE: Duration = Duration::from_millis(500);

pub struct ManagedProcess {
    role: String,
    child: Option<Child>,
    pgid: i32,
}

impl ManagedProcess {
    pub fn spawn(role: &str, mut cmd: Command) -> Result<Self> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        cmd.process_group(0);
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
                Ok(())
            });
        }
        let child = cmd.spawn().map_err(|source| Error::Spawn { program, source })?;
        let pgid = child.id() as i32;
        debug!(role, pid = pgid, "spawned");
        Ok(Self {
            role: role.to_string(),
            child: Some(child),
            pgid,
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn pid(&self) -> u32 {
        self.pgid as u32
    }

    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    // BLOCK UNTIL EXIT. A RAISED CANCEL FLAG STOPS THE GROUP AND RETURNS Interrupted.
    pub fn wait_until_exit(&mut self, cancel: &AtomicBool) -> Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_status()? {
                self.child = None;
                return Ok(status);
            }
            if cancel.load(Ordering::Relaxed) {
                self.stop();
                return Err(Error::Interrupted);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    // POLL FOR A SELF-INITIATED EXIT. None WHEN STILL RUNNING AT THE DEADLINE.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_status()? {
                self.child = None;
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Waits up to `timeout` for the process to exit on its own. Past the
    /// deadline the whole group is killed, reaped, and `ShutdownTimeout` returned.
    pub fn shutdown(mut self, timeout: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.wait_timeout(timeout)? {
            return Ok(status);
        }
        warn!(role = %self.role, pid = self.pgid, "no exit within {:?}, killing process group", timeout);
        self.kill();
        Err(Error::ShutdownTimeout {
            role: self.role.clone(),
            pid: self.pgid as u32,
            timeout,
        })
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            unsafe {
                libc::killpg(self.pgid, libc::SIGKILL);
            }
            let _ = child.wait();
        }
    }

    pub fn stop(&mut self) {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return,
        };
        if let Ok(Some(_)) = child.try_wait() {
            self.child = None;
            return;
        }
        unsafe {
            libc::killpg(self.pgid, libc::SIGINT);
        }
        let deadline = Instant::now() + DROP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    self.child = None;
                    return;
                }
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        self.kill();
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn wait_until_exit_returns_status() {
        let mut p = ManagedProcess::spawn("t", sh("exit 3")).unwrap();
        let status = p.wait_until_exit(&AtomicBool::new(false)).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn cancel_flag_interrupts_wait() {
        let mut p = ManagedProcess::spawn("t", sh("sleep 30")).unwrap();
        let start = Instant::now();
        let err = p.wait_until_exit(&AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn shutdown_kills_stubborn_process() {
        let p = ManagedProcess::spawn("stubborn", sh("trap '' INT TERM; while :; do sleep 1; done")).unwrap();
        let start = Instant::now();
        let err = p.shutdown(Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, Error::ShutdownTimeout { ref role, .. } if role == "stubborn"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn shutdown_returns_clean_exit() {
        let p = ManagedProcess::spawn("quick", sh("exit 0")).unwrap();
        assert!(p.shutdown(Duration::from_secs(5)).unwrap().success());
    }

    #[test]
    fn spawn_failure_names_program() {
        let err = ManagedProcess::spawn("x", Command::new("/nonexistent/netbench-bin")).err().unwrap();
        assert!(matches!(err, Error::Spawn { ref program, .. } if program == "/nonexistent/netbench-bin"));
    }

    #[test]
    fn drop_reaps_running_group() {
        let p = ManagedProcess::spawn("t", sh("sleep 30")).unwrap();
        let pid = p.pid() as i32;
        drop(p);
        // GROUP IS GONE: SIGNAL 0 FAILS WITH ESRCH
        let rc = unsafe { libc::killpg(pid, 0) };
        assert_eq!(rc, -1);
    }
}
