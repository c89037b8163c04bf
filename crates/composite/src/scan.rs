//! 스캔 엔진 — 인덱스 발견, 제외 필터링, 의존 스캔 결합
//!
//! 스캔마다 캐시 호출 하나를 동시에 내보내고, 완료는 문서 순서대로
//! 직렬 처리합니다. 스캔 간 제외 상호작용이 결정적이 되도록 하는
//! 순서화입니다.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, error};

use metricast_core::cache::CacheClient;
use metricast_core::composite::{InstanceDef, ScanDef};
use metricast_core::types::{CacheReply, OidSamples};

use crate::error::CompositeError;
use crate::oidmap::{OidMap, blank_tree, sample_tree};
use crate::request::RequestBuffers;
use crate::tree::Tree;

/// 스캔 하나의 결과 트리 (블랭크)
#[derive(Debug, Clone)]
pub(crate) struct ScanEntry {
    /// 스캔 id
    pub id: String,
    /// 차원 이름 순서
    pub legend: Vec<String>,
    /// 키 존재만 담는 블랭크 트리
    pub tree: Tree<()>,
}

/// digest_scans가 만든 호스트별 결합 스캔 트리
#[derive(Debug, Clone)]
pub(crate) struct CombinedScan {
    /// 결합 트리의 차원 순서 (가장 깊은 스캔의 legend)
    pub legend: Vec<String>,
    /// 결합 블랭크 트리
    pub tree: Tree<()>,
}

/// 스캔 패턴의 OID 맵을 만듭니다.
///
/// 패턴의 `*` 와일드카드는 스캔의 `var` 이름으로 치환한 뒤 파싱하므로,
/// legend에는 익명 위치 대신 논리 이름이 들어갑니다.
pub(crate) fn scan_oid_map(scan: &ScanDef) -> OidMap {
    let pattern = scan
        .oid
        .split('.')
        .map(|tok| if tok == "*" { scan.var.as_str() } else { tok })
        .collect::<Vec<_>>()
        .join(".");
    OidMap::parse(&pattern)
}

/// 모든 스캔을 팬아웃하고 완료를 문서 순서로 접습니다.
pub(crate) async fn run_scans<C: CacheClient>(
    cache: &Arc<C>,
    instance: &InstanceDef,
    hosts: &[String],
    excludes: &HashMap<String, Vec<Regex>>,
    buffers: &mut RequestBuffers,
) -> Result<(), CompositeError> {
    let mut pending = Vec::with_capacity(instance.scans.len());

    for (idx, scan) in instance.scans.iter().enumerate() {
        let map = scan_oid_map(scan);
        let oid_base = map.oid_base();
        let cache = Arc::clone(cache);
        let nodes = hosts.to_vec();
        debug!(scan = %scan.id, oid_base = %oid_base, "dispatching scan");
        let handle = tokio::spawn(async move { cache.get(&nodes, &oid_base).await });
        pending.push((idx, map, handle));
    }

    for (idx, map, handle) in pending {
        let scan = &instance.scans[idx];
        match handle.await {
            Ok(Ok(reply)) => scan_cb(scan, &map, reply, excludes, hosts, buffers),
            Ok(Err(e)) => {
                // 업스트림 실패는 요청을 죽이지 않습니다. 해당 스캔이
                // 빠진 채 진행되고 행이 줄어들 뿐입니다.
                error!(scan = %scan.id, error = %e, "scan fetch failed");
            }
            Err(e) => return Err(CompositeError::Join(e.to_string())),
        }
    }

    Ok(())
}

/// 스캔 완료 콜백: 제외 기록 → 트리 적재
fn scan_cb(
    scan: &ScanDef,
    map: &OidMap,
    mut reply: CacheReply,
    excludes: &HashMap<String, Vec<Regex>>,
    hosts: &[String],
    buffers: &mut RequestBuffers,
) {
    let scan_excludes = excludes.get(&scan.var);

    for host in hosts {
        let samples = reply.take_host(host);
        let excluded = buffers.scan_exclude.entry(host.clone()).or_default();

        // 1차: 값이 제외 패턴에 매칭되는 OID를 블랙리스트에 기록
        if let Some(regexes) = scan_excludes {
            for (oid, sample) in &samples {
                let Some(text) = sample.value.as_ref().and_then(|v| v.as_text()) else {
                    continue;
                };
                if regexes.iter().any(|re| re.is_match(&text)) {
                    excluded.insert(oid.clone());
                }
            }
        }

        // exclude-only 스캔은 블랙리스트만 기여합니다.
        if scan.exclude_only {
            continue;
        }

        // 2차: 블랙리스트에 없는 OID만 유지
        let retained: OidSamples = samples
            .into_iter()
            .filter(|(oid, _)| !excluded.contains(oid))
            .collect();

        debug!(
            host = %host,
            scan = %scan.id,
            rows = retained.len(),
            "scan rows retained"
        );

        let tree = blank_tree(retained.keys().map(String::as_str), map);
        let vals_tree = sample_tree(&retained, map, false);

        buffers.scans.entry(host.clone()).or_default().push(ScanEntry {
            id: scan.id.clone(),
            legend: map.legend(),
            tree,
        });
        buffers
            .scan_vals
            .entry(host.clone())
            .or_default()
            .insert(scan.id.clone(), vals_tree);
    }
}

/// 호스트별로 스캔 트리를 결합합니다.
///
/// 가장 깊은 legend의 스캔이 주 스캔이 되고 (동률은 문서 순서 우선),
/// 마지막 앞의 각 legend 위치에 대해 그 이름을 id로 가진 스캔의 키를
/// 합집합으로 병합합니다.
pub(crate) fn digest_scans(hosts: &[String], buffers: &mut RequestBuffers) {
    for host in hosts {
        let Some(entries) = buffers.scans.get(host) else {
            continue;
        };
        if entries.is_empty() {
            continue;
        }

        let mut main = 0;
        for (idx, entry) in entries.iter().enumerate().skip(1) {
            if entry.legend.len() > entries[main].legend.len() {
                main = idx;
            }
        }

        let legend = entries[main].legend.clone();
        let mut tree = entries[main].tree.clone();
        let depth = legend.len();

        for dep_name in legend.iter().take(depth.saturating_sub(1)) {
            if let Some(dep) = entries.iter().find(|e| &e.id == dep_name) {
                tree.merge_keys(&dep.tree, depth);
            }
        }

        buffers
            .combined
            .insert(host.clone(), CombinedScan { legend, tree });
    }
}
