//! Config - 런타임 설정 관리
//!
//! - `settings.rs` - RuntimeSettings (타이밍, 임계값, agent 실행 파일)

mod settings;

pub use settings::{RuntimeSettings, SETTINGS_FILE};
