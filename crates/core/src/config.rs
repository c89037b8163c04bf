//! 설정 관리 — metricast.toml 파싱 및 런타임 설정

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Metricast 워커 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// 요청 수신(버스) 설정
    pub bus: BusConfig,
    /// 업스트림 캐시 설정
    pub cache: CacheConfig,
    /// 요청 엔진 설정
    pub engine: EngineConfig,
    /// 컴포지트 정의 문서 설정
    pub composites: CompositesConfig,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

/// 요청 수신(버스) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 수신 바인드 주소
    pub bind_addr: String,
    /// 요청 처리 제한 시간 (초)
    pub request_timeout_secs: u64,
    /// 최대 동시 연결 수
    pub max_connections: usize,
    /// 워커 태스크 수. 각 워커는 한 번에 요청 하나만 처리합니다.
    pub workers: usize,
}

/// 업스트림 캐시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 캐시 서비스 주소
    pub addr: String,
    /// 연결 제한 시간 (초)
    pub connect_timeout_secs: u64,
    /// 호출 제한 시간 (초)
    pub request_timeout_secs: u64,
}

/// 요청 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `period` 파라미터 기본값 (초)
    pub default_period: u64,
}

/// 컴포지트 정의 문서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositesConfig {
    /// 정의 XML 경로
    pub path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9810".to_owned(),
            request_timeout_secs: 15,
            max_connections: 256,
            workers: 4,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9820".to_owned(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_period: 60 }
    }
}

impl Default for CompositesConfig {
    fn default() -> Self {
        Self {
            path: "composites.xml".to_owned(),
        }
    }
}

impl WorkerConfig {
    /// 설정 파일을 읽어 파싱합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::ParseFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.log_format != "json" && self.general.log_format != "pretty" {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("'{}' is not 'json' or 'pretty'", self.general.log_format),
            });
        }
        if self.bus.bind_addr.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bus.bind_addr".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.bus.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.bus.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.request_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.cache.addr.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache.addr".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.engine.default_period == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.default_period".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.composites.path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "composites.path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}
