//! OID 맵 — 변수 위치를 가진 OID 패턴의 파싱과 트리 변환
//!
//! `1.3.6.1.2.1.31.1.1.1.6.name` 같은 패턴에서 식별자 토큰(`name`)은
//! 변수 위치가 됩니다. 실제 OID 집합을 변수 위치의 값으로 키잉되는
//! 중첩 트리로 접습니다.

use metricast_core::types::OidSamples;
use metricast_core::value::Value;

use crate::tree::{SampleLeaf, Tree};

/// 파싱된 OID 패턴
#[derive(Debug, Clone, PartialEq)]
pub struct OidMap {
    /// 점으로 나눈 패턴 토큰
    split: Vec<String>,
    /// 변수 위치 (패턴 순서)
    vars: Vec<OidVar>,
    /// 첫 변수 앞의 마지막 숫자 토큰 인덱스
    trunk: usize,
}

/// 패턴의 변수 위치 하나
#[derive(Debug, Clone, PartialEq)]
pub struct OidVar {
    /// 논리 이름
    pub name: String,
    /// 토큰 인덱스
    pub index: usize,
}

impl OidMap {
    /// 패턴을 파싱합니다.
    ///
    /// 식별자 문법(`^[A-Za-z][A-Za-z0-9_-]*$`)에 맞는 토큰과 `*`는
    /// 변수 위치로 기록됩니다. 변수가 없으면 trunk는 마지막 토큰이고
    /// 패턴 전체가 스칼라 OID 베이스입니다.
    pub fn parse(pattern: &str) -> Self {
        let split: Vec<String> = pattern.split('.').map(str::to_owned).collect();

        let vars: Vec<OidVar> = split
            .iter()
            .enumerate()
            .filter(|(_, tok)| is_var_token(tok))
            .map(|(index, tok)| OidVar {
                name: tok.clone(),
                index,
            })
            .collect();

        let trunk = match vars.first() {
            None => split.len().saturating_sub(1),
            Some(first) => (0..first.index)
                .rev()
                .find(|i| is_numeric_token(&split[*i]))
                .unwrap_or(0),
        };

        Self { split, vars, trunk }
    }

    /// 고정 접두사 (`trunk`까지의 토큰)를 반환합니다.
    pub fn oid_base(&self) -> String {
        self.split[..=self.trunk].join(".")
    }

    /// 변수 이름들을 패턴 순서로 반환합니다. 트리의 차원 순서입니다.
    pub fn legend(&self) -> Vec<String> {
        self.vars.iter().map(|v| v.name.clone()).collect()
    }

    /// 변수가 하나도 없는 스칼라 패턴인지 확인합니다.
    pub fn is_scalar(&self) -> bool {
        self.vars.is_empty()
    }

    /// OID 하나에서 변수 위치의 토큰 값을 뽑습니다.
    ///
    /// 가장 깊은 변수 위치보다 짧은 OID는 `None`으로 버려집니다.
    /// 패턴보다 긴 꼬리 토큰은 무시합니다.
    fn var_keys(&self, oid: &str) -> Option<Vec<String>> {
        if self.vars.is_empty() {
            return Some(Vec::new());
        }
        let tokens: Vec<&str> = oid.split('.').collect();
        self.vars
            .iter()
            .map(|var| tokens.get(var.index).map(|t| (*t).to_owned()))
            .collect()
    }
}

/// OID 집합을 블랭크 트리로 접습니다. 리프는 키 존재만 의미합니다.
pub fn blank_tree<'a>(oids: impl IntoIterator<Item = &'a str>, map: &OidMap) -> Tree<()> {
    let mut sorted: Vec<&str> = oids.into_iter().collect();
    sorted.sort_unstable();

    let mut tree = Tree::node();
    for oid in sorted {
        if let Some(keys) = map.var_keys(oid) {
            tree.insert_path(&keys, ());
        }
    }
    tree
}

/// OID 샘플 집합을 값 트리로 접습니다.
///
/// `keep_time=false`는 스캔 모드입니다: 시각을 버려 행 시각은 이후
/// 값 단계가 한 번만 찍게 합니다. 입력 순서와 무관하게 결정적입니다.
pub fn sample_tree(samples: &OidSamples, map: &OidMap, keep_time: bool) -> Tree<SampleLeaf> {
    let mut sorted: Vec<(&String, &metricast_core::types::Sample)> = samples.iter().collect();
    sorted.sort_unstable_by_key(|(oid, _)| oid.as_str());

    let mut tree = Tree::node();
    for (oid, sample) in sorted {
        let Some(keys) = map.var_keys(oid) else {
            continue;
        };
        let leaf = SampleLeaf {
            value: sample.value.clone().unwrap_or(Value::Undefined),
            time: if keep_time { sample.time } else { None },
        };
        tree.insert_path(&keys, leaf);
    }
    tree
}

/// 식별자 문법 `^[A-Za-z][A-Za-z0-9_-]*$` 또는 와일드카드 `*`.
fn is_var_token(tok: &str) -> bool {
    if tok == "*" {
        return true;
    }
    let mut chars = tok.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

fn is_numeric_token(tok: &str) -> bool {
    !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit())
}
