//! Storage module for omc-team
//!
//! - `json`: JSON - 팀 상태 파일 저장/로드 (원자적 쓰기)
//! - `lock`: 파일 단위 배타 잠금

mod json;
mod lock;

// JSON Storage (범용)
pub use json::JsonStore;

// File Lock
pub use lock::{FileLock, FileLockGuard};
