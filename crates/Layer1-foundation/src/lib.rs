//! # team-foundation
//!
//! Foundation layer for omc-team:
//! - Error: 중앙 에러 타입 (패턴 매칭 가능한 접두사)
//! - Config: RuntimeSettings (기본값 + 글로벌/프로젝트 파일 + 환경 변수)
//! - Storage: JsonStore (원자적 쓰기), FileLock (task 단위 배타 잠금)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{RuntimeSettings, SETTINGS_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{FileLock, FileLockGuard, JsonStore};
