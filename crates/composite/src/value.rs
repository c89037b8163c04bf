//! 값 엔진 — 값 OID 조회, 스캔 트리 기준 트리밍, 행 digest
//!
//! 호스트 변수 조회와 val별 조회가 병렬로 나가고, 완료는 문서 순서로
//! 접힙니다. `get_rate`가 호스트 단위라서 OID 조회는 호스트별로
//! 분리됩니다.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use metricast_core::cache::CacheClient;
use metricast_core::composite::{InstanceDef, ValSource};
use metricast_core::types::OidSamples;
use metricast_core::value::Value;

use crate::error::CompositeError;
use crate::oidmap::{OidMap, sample_tree};
use crate::request::RequestBuffers;
use crate::tree::{RowCell, SampleLeaf, Tree};

/// 호스트 변수가 저장되는 OID 접두사
const HOSTVAR_PREFIX: &str = "vars.";
/// 호스트 변수 조회 패턴
const HOSTVAR_MATCH: &str = "vars.*";

/// 호스트 변수와 모든 val 조회를 팬아웃하고 문서 순서로 접습니다.
pub(crate) async fn run_vals<C: CacheClient>(
    cache: &Arc<C>,
    instance: &InstanceDef,
    hosts: &[String],
    period: u64,
    buffers: &mut RequestBuffers,
) -> Result<(), CompositeError> {
    // 호스트 변수 조회를 먼저 내보냅니다.
    let hostvar_handle = {
        let cache = Arc::clone(cache);
        let nodes = hosts.to_vec();
        tokio::spawn(async move { cache.get(&nodes, HOSTVAR_MATCH).await })
    };

    // OID val 조회: get_rate가 호스트 단위이므로 호스트별로 분리합니다.
    let mut pending = Vec::new();
    for (val_idx, val) in instance.vals.iter().enumerate() {
        let Some(ValSource::Oid { oid, rate }) = &val.source else {
            continue;
        };
        if val.id.is_empty() {
            continue; // 아래 var 경로와 함께 보고됩니다.
        }
        let map = OidMap::parse(oid);
        let oid_base = map.oid_base();
        for host in hosts {
            let cache = Arc::clone(cache);
            let node = vec![host.clone()];
            let base = oid_base.clone();
            let rate = *rate;
            let handle = tokio::spawn(async move {
                if rate {
                    cache.get_rate(&node, period, &base).await
                } else {
                    cache.get(&node, &base).await
                }
            });
            pending.push((val_idx, host.clone(), map.clone(), handle));
        }
    }

    // 해결된 값 트리: (val 인덱스, host) → 트리.
    // 마지막에 문서 순서대로 버퍼에 적재합니다.
    let mut resolved: HashMap<(usize, String), Tree<SampleLeaf>> = HashMap::new();

    // var 기반 val은 조회 없이 즉시 해결됩니다.
    for (val_idx, val) in instance.vals.iter().enumerate() {
        if val.id.is_empty() {
            error!("val missing id, skipped");
            continue;
        }
        match &val.source {
            None => {
                error!(val = %val.id, "val has neither oid nor var, skipped");
            }
            Some(ValSource::Var(var)) if var == "node" => {
                for host in hosts {
                    let tree = Tree::Leaf(SampleLeaf {
                        value: Value::str(host.as_str()),
                        time: None,
                    });
                    resolved.insert((val_idx, host.clone()), tree);
                }
            }
            Some(ValSource::Var(var)) => {
                if !instance.scans.iter().any(|s| &s.id == var) {
                    error!(val = %val.id, var = %var, "val references unknown scan, skipped");
                    continue;
                }
                for host in hosts {
                    let Some(tree) = buffers.scan_vals.get(host).and_then(|m| m.get(var)) else {
                        continue;
                    };
                    resolved.insert((val_idx, host.clone()), tree.clone());
                }
            }
            Some(ValSource::Oid { .. }) => {} // 위에서 팬아웃됨
        }
    }

    // 호스트 변수 완료 처리
    match hostvar_handle.await {
        Ok(Ok(mut reply)) => {
            for host in hosts {
                let samples = reply.take_host(host);
                if samples.is_empty() {
                    continue;
                }
                let vars = buffers.hostvars.entry(host.clone()).or_default();
                for (oid, sample) in samples {
                    let Some(name) = oid.strip_prefix(HOSTVAR_PREFIX) else {
                        continue;
                    };
                    if let Some(value) = sample.value {
                        vars.insert(name.to_owned(), value);
                    }
                }
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, "host variable fetch failed");
        }
        Err(e) => return Err(CompositeError::Join(e.to_string())),
    }

    // val 조회 완료를 문서 순서로 접습니다.
    for (val_idx, host, map, handle) in pending {
        let val = &instance.vals[val_idx];
        match handle.await {
            Ok(Ok(mut reply)) => {
                let samples = reply.take_host(&host);
                let tree = val_cb(&val.id, &map, samples, &host, instance, buffers);
                resolved.insert((val_idx, host), tree);
            }
            Ok(Err(e)) => {
                error!(val = %val.id, host = %host, error = %e, "value fetch failed");
            }
            Err(e) => return Err(CompositeError::Join(e.to_string())),
        }
    }

    // 문서 순서대로 적재합니다.
    for host in hosts {
        for (val_idx, val) in instance.vals.iter().enumerate() {
            if let Some(tree) = resolved.remove(&(val_idx, host.clone())) {
                buffers
                    .vals
                    .entry(host.clone())
                    .or_default()
                    .push((val.id.clone(), tree));
            }
        }
    }

    Ok(())
}

/// 값 조회 완료 콜백: 불완전 샘플 제거 → 트리 변환 → 트리밍
fn val_cb(
    val_id: &str,
    map: &OidMap,
    samples: OidSamples,
    host: &str,
    instance: &InstanceDef,
    buffers: &RequestBuffers,
) -> Tree<SampleLeaf> {
    // value와 time이 모두 있는 행만 살아남습니다.
    let complete: OidSamples = samples
        .into_iter()
        .filter(|(_, sample)| sample.is_complete())
        .collect();

    let mut tree = sample_tree(&complete, map, true);

    // 스캔 단계에서 걸러진 행을 잘라냅니다.
    let scan_tree = combined_tree(instance, host, buffers);
    tree.trim_against(&scan_tree);

    debug!(host = %host, val = %val_id, rows = tree.leaf_count(), "value rows after trim");
    tree
}

/// 호스트의 결합 스캔 트리를 돌려줍니다.
///
/// 스캔이 하나도 선언되지 않은 컴포지트는 루트 리프 하나짜리 골격을
/// 씁니다 (스칼라 OID 조합, 호스트당 행 하나). 스캔이 선언되었지만
/// 결합 트리가 없는 호스트는 빈 트리입니다.
fn combined_tree(instance: &InstanceDef, host: &str, buffers: &RequestBuffers) -> Tree<()> {
    match buffers.combined.get(host) {
        Some(combined) => combined.tree.clone(),
        None if instance.scans.is_empty() => Tree::Leaf(()),
        None => Tree::node(),
    }
}

/// 결합 스캔 트리를 골격으로 복제하고, 스캔 문자열과 val 트리를
/// 문서 순서로 부착한 뒤 행 배열로 평탄화합니다.
pub(crate) fn digest_vals(
    instance: &InstanceDef,
    hosts: &[String],
    buffers: &mut RequestBuffers,
    now: u64,
) {
    for host in hosts {
        let base = combined_tree(instance, host, buffers);
        let mut skeleton: Tree<RowCell> = base.map_leaves(&|_| RowCell::default());

        // 스캔 문자열을 var 이름으로 부착합니다. 행 방출 조건에는
        // 기여하지 않습니다.
        for scan in &instance.scans {
            if scan.exclude_only {
                continue;
            }
            if let Some(tree) = buffers.scan_vals.get(host).and_then(|m| m.get(&scan.id)) {
                skeleton.attach(tree, &scan.var, false);
            }
        }

        // 선언된 val을 문서 순서로 부착합니다.
        if let Some(val_trees) = buffers.vals.get(host) {
            for (val_id, tree) in val_trees {
                skeleton.attach(tree, val_id, true);
            }
        }

        let rows = skeleton.flatten(now);
        debug!(host = %host, rows = rows.len(), "digested rows");
        buffers.rows.insert(host.clone(), rows);
    }
}
