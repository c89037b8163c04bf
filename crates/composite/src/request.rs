//! 요청 오케스트레이터 — 5단계 파이프라인
//!
//! `do_scans → digest_scans → do_vals → digest_vals → do_functions`
//! 단계 사이에는 명시적 배리어가 있습니다: 한 단계의 모든 캐시 호출이
//! 끝나야 다음 단계가 시작됩니다. 단계를 병렬화하지 마십시오 —
//! 트리밍과 digest는 이전 단계의 버퍼가 최종 상태라고 가정합니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::{debug, warn};

use metricast_core::cache::CacheClient;
use metricast_core::composite::CompositeDef;
use metricast_core::types::RowRecord;
use metricast_core::value::Value;

use crate::error::CompositeError;
use crate::function::{FunctionTable, apply_functions};
use crate::scan::{CombinedScan, ScanEntry, digest_scans, run_scans};
use crate::tree::{SampleLeaf, Tree};
use crate::value::{digest_vals, run_vals};

/// `period` 파라미터 기본값 (초)
pub const DEFAULT_PERIOD: u64 = 60;

/// 컴포지트 요청 하나의 파라미터
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    /// 대상 호스트 목록
    pub hosts: Vec<String>,
    /// 율 계산 주기 (초)
    pub period: u64,
    /// `var=regex` 형태의 제외 패턴
    pub exclude_regexp: Vec<String>,
}

impl CompositeRequest {
    /// 기본 period로 요청을 생성합니다.
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            period: DEFAULT_PERIOD,
            exclude_regexp: Vec::new(),
        }
    }

    /// period를 지정합니다.
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// 제외 패턴을 지정합니다.
    pub fn with_exclude_regexp(mut self, exclude_regexp: Vec<String>) -> Self {
        self.exclude_regexp = exclude_regexp;
        self
    }
}

/// 요청 하나가 쓰는 결과 버퍼
///
/// 요청 진입 시 만들어지고 오케스트레이터의 단계와 그 콜백만이
/// 변경하며, 성공 콜백 이후 해제됩니다.
#[derive(Debug, Default)]
pub(crate) struct RequestBuffers {
    /// host → 스캔 결과 (문서 순서)
    pub scans: HashMap<String, Vec<ScanEntry>>,
    /// host → 제외된 OID 집합
    pub scan_exclude: HashMap<String, HashSet<String>>,
    /// host → scan id → 스캔 문자열 트리
    pub scan_vals: HashMap<String, HashMap<String, Tree<SampleLeaf>>>,
    /// digest_scans 이후: host → 결합 스캔 트리
    pub combined: HashMap<String, CombinedScan>,
    /// host → (val id, 값 트리) (문서 순서)
    pub vals: HashMap<String, Vec<(String, Tree<SampleLeaf>)>>,
    /// host → 호스트 변수
    pub hostvars: HashMap<String, HashMap<String, Value>>,
    /// host → 최종 행 배열
    pub rows: HashMap<String, Vec<RowRecord>>,
}

/// 컴포지트 요청 엔진
///
/// 캐시 클라이언트와 함수 테이블을 공유하며, 요청마다 독립된 버퍼로
/// 파이프라인을 실행합니다.
pub struct CompositeEngine<C> {
    cache: Arc<C>,
    functions: FunctionTable,
}

impl<C: CacheClient> CompositeEngine<C> {
    /// 엔진을 생성합니다.
    pub fn new(cache: Arc<C>) -> Self {
        Self {
            cache,
            functions: FunctionTable::new(),
        }
    }

    /// 요청을 실행하고 호스트별 행 배열을 돌려줍니다.
    ///
    /// 요청된 모든 호스트가 결과 맵에 나타나며, 데이터가 없는 호스트는
    /// 빈 배열을 갖습니다.
    pub async fn execute(
        &self,
        composite: &CompositeDef,
        request: &CompositeRequest,
    ) -> Result<HashMap<String, Vec<RowRecord>>, CompositeError> {
        let instance = composite.instance("default")?;
        let excludes = parse_excludes(&request.exclude_regexp);
        let mut buffers = RequestBuffers::default();

        debug!(
            composite = %composite.id,
            hosts = request.hosts.len(),
            scans = instance.scans.len(),
            vals = instance.vals.len(),
            "request pipeline starting"
        );

        run_scans(
            &self.cache,
            instance,
            &request.hosts,
            &excludes,
            &mut buffers,
        )
        .await?;
        digest_scans(&request.hosts, &mut buffers);

        run_vals(
            &self.cache,
            instance,
            &request.hosts,
            request.period,
            &mut buffers,
        )
        .await?;
        digest_vals(instance, &request.hosts, &mut buffers, wall_clock());

        apply_functions(
            &self.functions,
            instance,
            &mut buffers.rows,
            &buffers.hostvars,
        );

        let mut result = buffers.rows;
        for host in &request.hosts {
            result.entry(host.clone()).or_default();
        }
        Ok(result)
    }
}

/// `var=regex` 항목을 var별 컴파일된 패턴 목록으로 묶습니다.
///
/// 형식이 어긋난 항목과 컴파일되지 않는 패턴은 경고와 함께 건너뜁니다.
fn parse_excludes(entries: &[String]) -> HashMap<String, Vec<Regex>> {
    let mut grouped: HashMap<String, Vec<Regex>> = HashMap::new();
    for entry in entries {
        let Some((var, pattern)) = entry.split_once('=') else {
            warn!(entry = %entry, "exclude entry is not var=regex, skipped");
            continue;
        };
        match Regex::new(pattern) {
            Ok(re) => grouped.entry(var.to_owned()).or_default().push(re),
            Err(e) => {
                warn!(entry = %entry, error = %e, "invalid exclude pattern, skipped");
            }
        }
    }
    grouped
}

/// 현재 벽시계를 epoch 초로 돌려줍니다.
fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let request = CompositeRequest::new(vec!["h".to_owned()]);
        assert_eq!(request.period, 60);
        assert!(request.exclude_regexp.is_empty());
    }

    #[test]
    fn parse_excludes_groups_by_var() {
        let entries = vec![
            "name=^eth1$".to_owned(),
            "name=^lo$".to_owned(),
            "slot=^9$".to_owned(),
        ];
        let grouped = parse_excludes(&entries);
        assert_eq!(grouped["name"].len(), 2);
        assert_eq!(grouped["slot"].len(), 1);
    }

    #[test]
    fn parse_excludes_skips_malformed_entries() {
        let entries = vec!["no-equals-sign".to_owned(), "name=[broken".to_owned()];
        let grouped = parse_excludes(&entries);
        assert!(grouped.is_empty());
    }

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(wall_clock() > 1_577_836_800);
    }
}
