//! Runtime Settings - 팀 런타임 타이밍/임계값 설정
//!
//! 로드 순서 (뒤가 우선):
//! 1. 기본값
//! 2. 글로벌 (`~/.config/omc/team-settings.json`)
//! 3. 프로젝트 (`<cwd>/.omc/team-settings.json`)
//! 4. `OMC_TEAM_*` 환경 변수

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const SETTINGS_FILE: &str = "team-settings.json";

/// 팀 런타임 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Watchdog tick 주기
    pub watchdog_interval_ms: u64,
    /// heartbeat 가 이보다 오래되면 stalled
    pub stall_threshold_ms: u64,
    /// 연속 stalled tick 이 이 값에 도달하면 worker 를 죽은 것으로 처리
    pub unresponsive_kill_threshold: u32,
    /// 연속 tick 실패 상한 (도달 시 watchdog 중단)
    pub watchdog_failure_ceiling: u32,
    /// interactive worker 부팅 대기
    pub interactive_warmup_ms: u64,
    /// trust 확인 키 입력 후 대기
    pub trust_confirm_delay_ms: u64,
    /// 키 입력 전달 시도 횟수
    pub send_retry_attempts: u32,
    /// 키 입력 재시도 간격 (고정)
    pub send_retry_backoff_ms: u64,
    /// task 잠금 획득 대기 시간
    pub lock_timeout_ms: u64,
    /// task 잠금 재시도 간격
    pub lock_poll_ms: u64,
    /// shutdown ack 대기 기본 타임아웃
    pub shutdown_timeout_ms: u64,
    /// shutdown ack 폴링 간격
    pub shutdown_poll_ms: u64,
    /// 최대 동시 worker 수
    pub max_workers: usize,
    /// agent 타입별 실행 파일 경로 override
    pub agent_commands: HashMap<String, String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: 1_000,
            stall_threshold_ms: 60_000,
            unresponsive_kill_threshold: 3,
            watchdog_failure_ceiling: 3,
            interactive_warmup_ms: 4_000,
            trust_confirm_delay_ms: 800,
            send_retry_attempts: 4,
            send_retry_backoff_ms: 500,
            lock_timeout_ms: 2_000,
            lock_poll_ms: 25,
            shutdown_timeout_ms: 15_000,
            shutdown_poll_ms: 500,
            max_workers: 20,
            agent_commands: HashMap::new(),
        }
    }
}

/// 파일에서 읽은 부분 설정 (있는 값만 덮어씀)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialSettings {
    watchdog_interval_ms: Option<u64>,
    stall_threshold_ms: Option<u64>,
    unresponsive_kill_threshold: Option<u32>,
    watchdog_failure_ceiling: Option<u32>,
    interactive_warmup_ms: Option<u64>,
    trust_confirm_delay_ms: Option<u64>,
    send_retry_attempts: Option<u32>,
    send_retry_backoff_ms: Option<u64>,
    lock_timeout_ms: Option<u64>,
    lock_poll_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    shutdown_poll_ms: Option<u64>,
    max_workers: Option<usize>,
    #[serde(default)]
    agent_commands: HashMap<String, String>,
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 테스트용 - 모든 대기 시간을 밀리초 단위로 줄인 설정
    pub fn for_tests() -> Self {
        Self {
            watchdog_interval_ms: 20,
            stall_threshold_ms: 60_000,
            interactive_warmup_ms: 0,
            trust_confirm_delay_ms: 0,
            send_retry_attempts: 3,
            send_retry_backoff_ms: 1,
            lock_timeout_ms: 200,
            lock_poll_ms: 2,
            shutdown_timeout_ms: 500,
            shutdown_poll_ms: 10,
            ..Self::default()
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 + 환경 변수 병합 로드
    pub fn load(cwd: &Path) -> Result<Self> {
        let mut settings = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(partial) = global.load_optional::<PartialSettings>(SETTINGS_FILE)? {
                debug!("Applying global team settings");
                settings.merge(partial);
            }
        }

        // 2. 프로젝트 설정
        let project = JsonStore::project(cwd);
        if let Some(partial) = project.load_optional::<PartialSettings>(SETTINGS_FILE)? {
            debug!("Applying project team settings");
            settings.merge(partial);
        }

        // 3. 환경 변수
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// 부분 설정 병합 (other 가 우선)
    fn merge(&mut self, other: PartialSettings) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = other.$field { self.$field = v; })*
            };
        }
        take!(
            watchdog_interval_ms,
            stall_threshold_ms,
            unresponsive_kill_threshold,
            watchdog_failure_ceiling,
            interactive_warmup_ms,
            trust_confirm_delay_ms,
            send_retry_attempts,
            send_retry_backoff_ms,
            lock_timeout_ms,
            lock_poll_ms,
            shutdown_timeout_ms,
            shutdown_poll_ms,
            max_workers
        );
        self.agent_commands.extend(other.agent_commands);
    }

    /// `OMC_TEAM_<FIELD>` 환경 변수 적용
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, raw)))
        }

        macro_rules! env_field {
            ($($field:ident => $key:literal),* $(,)?) => {
                $(if let Some(raw) = lookup($key) { self.$field = parse($key, raw)?; })*
            };
        }
        env_field!(
            watchdog_interval_ms => "OMC_TEAM_WATCHDOG_INTERVAL_MS",
            stall_threshold_ms => "OMC_TEAM_STALL_THRESHOLD_MS",
            unresponsive_kill_threshold => "OMC_TEAM_UNRESPONSIVE_KILL_THRESHOLD",
            watchdog_failure_ceiling => "OMC_TEAM_WATCHDOG_FAILURE_CEILING",
            interactive_warmup_ms => "OMC_TEAM_INTERACTIVE_WARMUP_MS",
            send_retry_attempts => "OMC_TEAM_SEND_RETRY_ATTEMPTS",
            send_retry_backoff_ms => "OMC_TEAM_SEND_RETRY_BACKOFF_MS",
            shutdown_timeout_ms => "OMC_TEAM_SHUTDOWN_TIMEOUT_MS",
            max_workers => "OMC_TEAM_MAX_WORKERS",
        );
        Ok(())
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_interval_ms == 0 {
            return Err(Error::Config("watchdogIntervalMs must be > 0".to_string()));
        }
        if self.unresponsive_kill_threshold == 0 {
            return Err(Error::Config(
                "unresponsiveKillThreshold must be > 0".to_string(),
            ));
        }
        if self.watchdog_failure_ceiling == 0 {
            return Err(Error::Config("watchdogFailureCeiling must be > 0".to_string()));
        }
        if self.send_retry_attempts == 0 {
            return Err(Error::Config("sendRetryAttempts must be > 0".to_string()));
        }
        if self.max_workers == 0 {
            return Err(Error::Config("maxWorkers must be > 0".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Duration 접근자
    // ========================================================================

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn interactive_warmup(&self) -> Duration {
        Duration::from_millis(self.interactive_warmup_ms)
    }

    pub fn trust_confirm_delay(&self) -> Duration {
        Duration::from_millis(self.trust_confirm_delay_ms)
    }

    pub fn send_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.send_retry_backoff_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    /// agent 타입의 실행 파일 override
    pub fn agent_command(&self, agent_type: &str) -> Option<&str> {
        self.agent_commands.get(agent_type).map(|s| s.as_str())
    }
}
