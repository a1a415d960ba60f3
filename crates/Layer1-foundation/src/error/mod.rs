//! Error types for omc-team
//!
//! 모든 에러를 중앙에서 관리. 오케스트레이션 에러는 `Display` 접두사가
//! 고정되어 있어 호출자가 패턴 매칭할 수 있다.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// omc-team 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("lock_not_acquired:{scope}")]
    LockNotAcquired { scope: String },

    // ========================================================================
    // Pane / Worker 관련
    // ========================================================================
    #[error("pane_command_failed:{op}:{message}")]
    PaneCommand { op: String, message: String },

    #[error("worker_launch_failed:{worker}:{reason}")]
    WorkerLaunchFailed { worker: String, reason: String },

    #[error("worker_notify_failed:{worker}:{stage}")]
    WorkerNotifyFailed { worker: String, stage: String },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockNotAcquired { .. })
    }

    /// 안정적인 에러 코드 (Display 접두사와 동일)
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
            Error::LockNotAcquired { .. } => "lock_not_acquired",
            Error::PaneCommand { .. } => "pane_command_failed",
            Error::WorkerLaunchFailed { .. } => "worker_launch_failed",
            Error::WorkerNotifyFailed { .. } => "worker_notify_failed",
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }

    /// Pane 명령 에러 생성 헬퍼
    pub fn pane(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PaneCommand {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Worker 알림 실패 에러 생성 헬퍼
    pub fn notify_failed(worker: impl Into<String>, stage: impl Into<String>) -> Self {
        Error::WorkerNotifyFailed {
            worker: worker.into(),
            stage: stage.into(),
        }
    }

    /// Worker 실행 실패 에러 생성 헬퍼
    pub fn launch_failed(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::WorkerLaunchFailed {
            worker: worker.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_failed_display_is_pattern_matchable() {
        let err = Error::notify_failed("worker-2", "initial-inbox");
        assert_eq!(err.to_string(), "worker_notify_failed:worker-2:initial-inbox");
        assert!(err.to_string().starts_with(err.code()));
    }

    #[test]
    fn test_pane_error_prefix() {
        let err = Error::pane("split", "no such pane %9");
        assert_eq!(err.to_string(), "pane_command_failed:split:no such pane %9");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lock_contention_is_retryable() {
        let err = Error::LockNotAcquired {
            scope: "alpha/3".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "lock_not_acquired:alpha/3");
    }
}
