//! 도메인 타입 — 캐시 샘플과 결과 행
//!
//! 업스트림 캐시가 돌려주는 원시 샘플과, 요청 엔진이 최종적으로
//! 내보내는 행 레코드를 정의합니다.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// 캐시가 보관하는 OID 하나의 원시 샘플
///
/// `value`와 `time` 중 하나라도 없으면 값 단계에서 해당 행은
/// 조용히 버려집니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sample {
    /// 샘플 값 (없으면 undefined)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// 샘플 시각 (epoch 초)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

impl Sample {
    /// 값과 시각을 모두 가진 샘플을 생성합니다.
    pub fn new(value: impl Into<Value>, time: u64) -> Self {
        Self {
            value: Some(value.into()),
            time: Some(time),
        }
    }

    /// 값만 가진 샘플을 생성합니다 (스캔 응답 형태).
    pub fn value_only(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            time: None,
        }
    }

    /// 값과 시각이 모두 채워진 완전한 샘플인지 확인합니다.
    pub fn is_complete(&self) -> bool {
        self.value.is_some() && self.time.is_some()
    }
}

/// 호스트 하나가 돌려준 OID → 샘플 맵
pub type OidSamples = HashMap<String, Sample>;

/// 캐시 `get`/`get_rate` 호출의 응답
///
/// 와이어 형태: `{"results": {host: {oid: {value, time}}}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheReply {
    /// 호스트별 샘플 맵. 데이터가 없는 호스트는 키 자체가 없을 수 있습니다.
    #[serde(default)]
    pub results: HashMap<String, OidSamples>,
}

impl CacheReply {
    /// 특정 호스트의 샘플 맵을 꺼냅니다.
    pub fn take_host(&mut self, host: &str) -> OidSamples {
        self.results.remove(host).unwrap_or_default()
    }
}

/// 최종 출력 행 레코드
///
/// 스캔 트리의 리프 하나가 행 하나가 됩니다. `fields`에는 스캔 var 이름과
/// 선언된 val id만 등장하며, `time`은 샘플 시각 또는 요청 시각입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    /// 행 시각 (epoch 초)
    pub time: u64,
    /// 논리 값 이름 → 스칼라 값
    pub fields: BTreeMap<String, Value>,
}

impl RowRecord {
    /// 시각만 가진 빈 행을 생성합니다.
    pub fn new(time: u64) -> Self {
        Self {
            time,
            fields: BTreeMap::new(),
        }
    }

    /// 필드를 추가한 행을 반환합니다 (테스트 편의용 빌더).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// 필드 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl fmt::Display for RowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowRecord[time={}", self.time)?;
        for (name, value) in &self.fields {
            write!(f, " {name}={value}")?;
        }
        write!(f, "]")
    }
}

// 행은 {"time": …, "<field>": …} 형태의 평평한 맵으로 직렬화됩니다.
impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("time", &self.time)?;
        for (name, value) in &self.fields {
            if name != "time" {
                map.serialize_entry(name, value)?;
            }
        }
        map.end()
    }
}
