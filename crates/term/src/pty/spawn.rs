// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY backend: `forkpty` + non-blocking master fd driven by tokio's
//! `AsyncFd`. Both halves share the master so reads and writes can proceed
//! concurrently, matching how a session's loops use them.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::future::BoxFuture;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;

use super::{ExitStatus, ProcessHandle, PtyFactory, PtyReader, PtyStream, PtyWriter};

/// Newtype so `AsyncFd` can own the master fd.
#[derive(Debug)]
struct MasterFd(OwnedFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Spawner for child programs on native PTYs.
pub struct NativePtyFactory {
    cols: u16,
    rows: u16,
}

impl NativePtyFactory {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for NativePtyFactory {
    fn default() -> Self {
        Self::new(200, 50)
    }
}

impl PtyFactory for NativePtyFactory {
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    fn start(
        &self,
        command: &str,
        args: &[String],
    ) -> anyhow::Result<(Box<dyn PtyStream>, Option<Box<dyn ProcessHandle>>)> {
        if command.is_empty() {
            bail!("empty command");
        }

        let winsize = Winsize {
            ws_col: self.cols,
            ws_row: self.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("GESTALT", "1");

                let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
                for word in std::iter::once(command).chain(args.iter().map(String::as_str)) {
                    match CString::new(word.as_bytes()) {
                        Ok(c) => argv.push(c),
                        Err(_) => std::process::exit(127),
                    }
                }
                let _ = execvp(&argv[0], &argv);
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master).context("set master nonblocking")?;
                let afd =
                    Arc::new(AsyncFd::new(MasterFd(master)).context("AsyncFd::new failed")?);
                let stream = NativePty {
                    master: Arc::clone(&afd),
                    halves: Mutex::new(Some((
                        Box::new(NativeReader { master: Arc::clone(&afd) }) as Box<dyn PtyReader>,
                        Box::new(NativeWriter { master: afd }) as Box<dyn PtyWriter>,
                    ))),
                    child_pid: child,
                };
                let process = NativeProcess { pid: child, status: None };
                Ok((Box::new(stream), Some(Box::new(process))))
            }
        }
    }
}

/// Master side of a spawned PTY.
pub struct NativePty {
    master: Arc<AsyncFd<MasterFd>>,
    halves: Mutex<Option<(Box<dyn PtyReader>, Box<dyn PtyWriter>)>>,
    child_pid: Pid,
}

impl PtyStream for NativePty {
    fn split(&self) -> anyhow::Result<(Box<dyn PtyReader>, Box<dyn PtyWriter>)> {
        self.halves.lock().take().context("pty already split")
    }

    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", io::Error::last_os_error());
        }
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        // Drop any unsplit halves; the fd itself closes once the loops drop
        // their shared references. Killing the child unblocks them.
        self.halves.lock().take();
        Ok(())
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        // Safety net against leaking the fork when the stream is dropped
        // without a session ever owning the child.
        reap_if_live(self.child_pid);
    }
}

struct NativeReader {
    master: Arc<AsyncFd<MasterFd>>,
}

impl PtyReader for NativeReader {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            loop {
                let mut guard = self.master.readable().await?;
                match guard.try_io(|inner| {
                    nix::unistd::read(&inner.get_ref().0, buf).map_err(io_err)
                }) {
                    Ok(Ok(n)) => return Ok(n),
                    // EIO from the master means the slave side is gone.
                    Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
        })
    }
}

struct NativeWriter {
    master: Arc<AsyncFd<MasterFd>>,
}

impl PtyWriter for NativeWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut offset = 0;
            while offset < data.len() {
                let mut guard = self.master.writable().await?;
                match guard.try_io(|inner| {
                    nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(io_err)
                }) {
                    Ok(Ok(n)) => offset += n,
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
            Ok(())
        })
    }
}

/// Child handle that kills and reaps via `nix`.
pub struct NativeProcess {
    pid: Pid,
    status: Option<ExitStatus>,
}

impl ProcessHandle for NativeProcess {
    fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(WaitStatus::Exited(_, code)) => {
                self.status = Some(ExitStatus { code: Some(code), signal: None });
                false
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                self.status = Some(ExitStatus { code: None, signal: Some(sig as i32) });
                false
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            // Already gone is fine.
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("kill failed: {e}")),
        }
    }

    fn wait(&mut self) -> BoxFuture<'_, anyhow::Result<ExitStatus>> {
        Box::pin(async move {
            if let Some(status) = self.status {
                return Ok(status);
            }
            let pid = self.pid;
            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
                .await
                .context("join wait thread")??;
            self.status = Some(status);
            Ok(status)
        })
    }
}

impl Drop for NativeProcess {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        reap_if_live(self.pid);
    }
}

/// Best-effort graceful shutdown for a child nobody reaped: SIGHUP, a short
/// grace period, then SIGKILL and a non-blocking reap. No-op when the child
/// already exited or was reaped elsewhere.
fn reap_if_live(pid: Pid) {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => {}
        _ => return,
    }
    let _ = kill(pid, Signal::SIGHUP);
    std::thread::sleep(std::time::Duration::from_millis(50));
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            // ECHILD: someone already reaped it.
            Err(nix::errno::Errno::ECHILD) => {
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
