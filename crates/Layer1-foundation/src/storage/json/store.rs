//! JSON 파일 저장소
//!
//! 쓰기는 항상 임시 파일 + rename 으로 수행되어, 다른 프로세스가
//! 읽는 도중에 반쯤 쓰인 파일을 보는 일이 없다.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// JSON 파일 저장소 (디렉토리 기준)
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 글로벌 설정 디렉토리 (~/.config/omc/)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join("omc");
        Ok(Self::new(dir))
    }

    /// 프로젝트 디렉토리 (<root>/.omc/)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(".omc"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// 하위 디렉토리 저장소
    pub fn child(&self, dir: &str) -> Self {
        Self::new(self.base_dir.join(dir))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// JSON 로드
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// JSON 로드 (Optional) - 파일이 없으면 None, 파싱 실패는 에러
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// JSON 저장 (임시 파일 + rename)
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Storage(format!("Failed to serialize: {}", e)))?;
        write_atomic(&path, content.as_bytes())
    }

    /// 텍스트 저장 (임시 파일 + rename)
    pub fn save_text(&self, filename: &str, text: &str) -> Result<()> {
        self.ensure_dir()?;
        write_atomic(&self.file_path(filename), text.as_bytes())
    }

    /// 텍스트 로드 (Optional)
    pub fn load_text(&self, filename: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.file_path(filename)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 파일 존재 여부
    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }

    /// 파일 삭제 (없으면 무시)
    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.file_path(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// 디렉토리 전체 삭제 (없으면 무시)
    pub fn remove_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.base_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove {}: {}",
                self.base_dir.display(),
                e
            ))),
        }
    }
}

/// 같은 디렉토리의 임시 파일에 쓴 뒤 rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Invalid file path: {}", path.display())))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let tmp = path.with_file_name(format!(".{}.tmp-{}-{}", file_name, std::process::id(), nanos));

    std::fs::write(&tmp, bytes)
        .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Storage(format!(
            "Failed to rename into {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}
