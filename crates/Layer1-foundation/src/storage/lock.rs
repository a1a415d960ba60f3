//! 파일 단위 배타 잠금
//!
//! Unix 에서는 `flock(LOCK_EX | LOCK_NB)` 를 폴링한다. flock 은 열린 파일
//! 설명자 단위라서 같은 프로세스 안의 두 핸들도 서로 배제된다.
//! 잠금 파일은 해제 후에도 남겨 둔다 (삭제하면 대기자와 경쟁이 생긴다).

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// 잠금 대상 파일
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    poll: Duration,
}

/// 잠금 가드 - drop 시 해제
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(2),
            poll: Duration::from_millis(25),
        }
    }

    /// 획득 대기 시간 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 재시도 간격 설정
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 한 번만 시도. 다른 보유자가 있으면 `Ok(None)`.
    pub fn try_lock(&self) -> Result<Option<FileLockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        try_lock_file(&self.path)
    }

    /// 타임아웃까지 폴링. 경합/타임아웃은 에러가 아니라 `Ok(None)`.
    pub async fn acquire(&self) -> Result<Option<FileLockGuard>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(guard) = self.try_lock()? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                trace!(path = %self.path.display(), "lock not acquired before timeout");
                return Ok(None);
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock_file(path: &Path) -> Result<Option<FileLockGuard>> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| Error::Storage(format!("Cannot open lock file {}: {}", path.display(), e)))?;

    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(Some(FileLockGuard {
            file,
            path: path.to_path_buf(),
        }));
    }

    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(None)
    } else {
        Err(Error::Storage(format!(
            "flock failed on {}: {}",
            path.display(),
            err
        )))
    }
}

#[cfg(not(unix))]
fn try_lock_file(path: &Path) -> Result<Option<FileLockGuard>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(FileLockGuard {
            file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(Error::Storage(format!(
            "Cannot create lock file {}: {}",
            path.display(),
            e
        ))),
    }
}

impl Drop for FileLockGuard {
    #[cfg(unix)]
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
