//! 인덱스 트리 — 스캔과 값의 다차원 인덱스 관계를 보존하는 자료구조
//!
//! 스캔이 발견한 인덱스 값들을 경로로 하는 접두사 트라이입니다.
//! 내부 노드와 리프를 태그된 변형으로 구분하므로, 리프 페이로드와
//! 자식 맵이 섞이는 일이 없습니다.
//!
//! 리프 페이로드는 용도별로 다릅니다:
//! - `()` — 스캔 단계의 블랭크 트리 (키 존재만 의미)
//! - [`SampleLeaf`] — 스캔 문자열/값 트리
//! - [`RowCell`] — digest 단계의 행 골격

use std::collections::BTreeMap;

use metricast_core::types::RowRecord;
use metricast_core::value::Value;

/// 인덱스 값으로 키잉되는 중첩 트리
#[derive(Debug, Clone, PartialEq)]
pub enum Tree<L> {
    /// 내부 노드: 인덱스 값 → 하위 트리
    Node(BTreeMap<String, Tree<L>>),
    /// 리프
    Leaf(L),
}

/// 스캔/값 트리의 리프
///
/// 스캔 트리는 `time`을 버리고 값만 유지합니다 (행 시각은 값 단계가
/// 한 번만 찍습니다). 값 트리는 둘 다 유지합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLeaf {
    /// 샘플 값
    pub value: Value,
    /// 샘플 시각 (epoch 초)
    pub time: Option<u64>,
}

/// digest 단계의 행 골격 리프
///
/// 스캔 var 이름과 val id가 필드로 붙고, 첫 번째로 시각을 가진 값이
/// 행 시각을 결정합니다. 선언된 val이 하나라도 값을 붙인 리프만
/// 행으로 방출됩니다. 스캔 문자열만 붙은 리프는 방출되지 않습니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowCell {
    /// 논리 값 이름 → 스칼라 값
    pub fields: BTreeMap<String, Value>,
    /// 행 시각 (최초 설정만 유지)
    pub time: Option<u64>,
    /// 선언된 val의 기여 여부 (방출 조건)
    pub emit: bool,
}

impl<L> Tree<L> {
    /// 빈 내부 노드를 생성합니다.
    pub fn node() -> Self {
        Self::Node(BTreeMap::new())
    }

    /// 리프인지 확인합니다.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// 자식이 하나도 없는 내부 노드인지 확인합니다.
    pub fn is_empty_node(&self) -> bool {
        matches!(self, Self::Node(children) if children.is_empty())
    }

    /// 경로 끝에 리프를 삽입합니다. 중간 노드는 필요 시 생성됩니다.
    ///
    /// 빈 경로는 트리 전체를 리프로 바꿉니다 (스칼라 OID 베이스의
    /// 평평한 값 트리).
    pub fn insert_path(&mut self, path: &[String], leaf: L) {
        match path.split_first() {
            None => *self = Self::Leaf(leaf),
            Some((head, rest)) => {
                if self.is_leaf() {
                    *self = Self::node();
                }
                let Self::Node(children) = self else {
                    unreachable!()
                };
                children
                    .entry(head.clone())
                    .or_insert_with(Self::node)
                    .insert_path(rest, leaf);
            }
        }
    }

    /// 리프 수를 셉니다.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Node(children) => children.values().map(Tree::leaf_count).sum(),
        }
    }

    /// 리프를 변환하여 같은 모양의 트리를 만듭니다.
    pub fn map_leaves<M>(&self, f: &impl Fn(&L) -> M) -> Tree<M> {
        match self {
            Self::Leaf(leaf) => Tree::Leaf(f(leaf)),
            Self::Node(children) => Tree::Node(
                children
                    .iter()
                    .map(|(k, child)| (k.clone(), child.map_leaves(f)))
                    .collect(),
            ),
        }
    }
}

impl Tree<()> {
    /// 다른 스캔 트리의 키를 이 트리에 합집합으로 병합합니다.
    ///
    /// 이미 있는 키는 그대로 두고 (리프에서 만나는 병합은 기존 리프를
    /// 건드리지 않음), 없는 키만 추가합니다. `remaining_depth`는 이
    /// 위치에서 전체 legend 깊이까지 남은 레벨 수입니다. 기증 트리가
    /// 전체 깊이보다 얕게 끝나는 키는 리프 없는 가지(빈 노드)로
    /// 삽입되어 키 존재만 기여하고 출력 행은 만들지 않습니다.
    pub fn merge_keys(&mut self, donor: &Tree<()>, remaining_depth: usize) {
        let (Self::Node(children), Tree::Node(donor_children)) = (&mut *self, donor) else {
            // 리프에 도달한 병합은 기존 쪽을 유지합니다.
            return;
        };

        for (key, donor_child) in donor_children {
            let next_depth = remaining_depth.saturating_sub(1);
            match children.get_mut(key) {
                Some(child) => child.merge_keys(donor_child, next_depth),
                None => {
                    children.insert(key.clone(), graft(donor_child, next_depth));
                }
            }
        }
    }
}

/// 기증 서브트리를 남은 깊이에 맞춰 변환합니다.
///
/// 남은 깊이가 0이면 블랭크 리프가 되고, 그보다 얕게 끝나는 리프는
/// 빈 가지가 됩니다.
fn graft(donor: &Tree<()>, remaining_depth: usize) -> Tree<()> {
    match donor {
        Tree::Leaf(()) => {
            if remaining_depth == 0 {
                Tree::Leaf(())
            } else {
                Tree::node()
            }
        }
        Tree::Node(children) => Tree::Node(
            children
                .iter()
                .map(|(k, child)| (k.clone(), graft(child, remaining_depth.saturating_sub(1))))
                .collect(),
        ),
    }
}

impl Tree<SampleLeaf> {
    /// 스캔 트리에 없는 키를 값 트리에서 삭제합니다.
    ///
    /// 스캔 단계에서 걸러진 행이 원시 캐시 데이터에 남아 있으면
    /// 여기서 떨어져 나갑니다. 리프는 절대 잘리지 않습니다.
    pub fn trim_against(&mut self, scan: &Tree<()>) {
        let Self::Node(children) = self else {
            return;
        };

        match scan {
            Tree::Node(scan_children) => {
                children.retain(|key, _| scan_children.contains_key(key));
                for (key, child) in children.iter_mut() {
                    if let Some(scan_child) = scan_children.get(key) {
                        child.trim_against(scan_child);
                    }
                }
            }
            // 스캔 쪽이 리프면 그 아래에 키는 존재하지 않습니다.
            Tree::Leaf(()) => children.clear(),
        }
    }
}

impl Tree<RowCell> {
    /// 값 트리를 골격에 붙입니다.
    ///
    /// 골격 리프와 값 리프가 만나면 `field`에 값을 할당하고, 행 시각이
    /// 아직 없으면 샘플 시각을 찍습니다. 값 트리가 골격보다 얕게
    /// 끝나면 (평평한 값) 같은 값이 그 아래 모든 리프로 전파됩니다.
    ///
    /// `mark_emit`은 선언된 val의 부착에만 true입니다. 스캔 문자열
    /// 부착은 행 방출을 일으키지 않습니다.
    pub fn attach(&mut self, value: &Tree<SampleLeaf>, field: &str, mark_emit: bool) {
        match (&mut *self, value) {
            (Self::Leaf(cell), Tree::Leaf(sample)) => {
                if sample.value.is_defined() {
                    cell.fields.insert(field.to_owned(), sample.value.clone());
                    if cell.time.is_none() {
                        cell.time = sample.time;
                    }
                    cell.emit |= mark_emit;
                }
            }
            (Self::Node(children), Tree::Leaf(_)) => {
                for child in children.values_mut() {
                    child.attach(value, field, mark_emit);
                }
            }
            (Self::Node(children), Tree::Node(value_children)) => {
                for (key, child) in children.iter_mut() {
                    if let Some(value_child) = value_children.get(key) {
                        child.attach(value_child, field, mark_emit);
                    }
                }
            }
            // 값 트리가 골격보다 깊은 경우는 trim이 이미 막았습니다.
            (Self::Leaf(_), Tree::Node(_)) => {}
        }
    }

    /// 골격을 행 배열로 평탄화합니다.
    ///
    /// 선언된 val이 값을 붙인 리프만 행이 되고, 시각이 없는 행은 요청
    /// 시각으로 찍힙니다. 키 순서대로 순회하므로 출력은 결정적입니다.
    pub fn flatten(&self, fallback_time: u64) -> Vec<RowRecord> {
        let mut rows = Vec::new();
        self.flatten_into(fallback_time, &mut rows);
        rows
    }

    fn flatten_into(&self, fallback_time: u64, rows: &mut Vec<RowRecord>) {
        match self {
            Self::Leaf(cell) => {
                if cell.emit {
                    rows.push(RowRecord {
                        time: cell.time.unwrap_or(fallback_time),
                        fields: cell.fields.clone(),
                    });
                }
            }
            Self::Node(children) => {
                for child in children.values() {
                    child.flatten_into(fallback_time, rows);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| (*k).to_owned()).collect()
    }

    fn sample(value: impl Into<Value>, time: Option<u64>) -> SampleLeaf {
        SampleLeaf {
            value: value.into(),
            time,
        }
    }

    #[test]
    fn insert_path_builds_nested_nodes() {
        let mut tree: Tree<()> = Tree::node();
        tree.insert_path(&path(&["1", "2"]), ());
        tree.insert_path(&path(&["1", "3"]), ());
        tree.insert_path(&path(&["4", "5"]), ());
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn empty_path_makes_flat_leaf() {
        let mut tree: Tree<SampleLeaf> = Tree::node();
        tree.insert_path(&[], sample(5.0, Some(100)));
        assert!(tree.is_leaf());
    }

    #[test]
    fn merge_is_union_and_preserves_existing() {
        let mut combined: Tree<()> = Tree::node();
        combined.insert_path(&path(&["1"]), ());
        combined.insert_path(&path(&["2"]), ());

        let mut donor: Tree<()> = Tree::node();
        donor.insert_path(&path(&["2"]), ());
        donor.insert_path(&path(&["3"]), ());

        combined.merge_keys(&donor, 1);
        let Tree::Node(children) = &combined else {
            panic!("expected node");
        };
        assert_eq!(children.len(), 3);
        assert!(children["3"].is_leaf());
    }

    #[test]
    fn merge_with_itself_is_idempotent() {
        let mut combined: Tree<()> = Tree::node();
        combined.insert_path(&path(&["1", "a"]), ());
        combined.insert_path(&path(&["2", "b"]), ());
        let snapshot = combined.clone();

        let donor = combined.clone();
        combined.merge_keys(&donor, 2);
        assert_eq!(combined, snapshot);
    }

    #[test]
    fn shallow_donor_key_becomes_empty_branch() {
        // legend 깊이 2의 트리에 깊이 1 스캔을 병합하면, 새 키는
        // 리프 없는 가지가 되어 출력 행을 만들지 않습니다.
        let mut combined: Tree<()> = Tree::node();
        combined.insert_path(&path(&["1", "a"]), ());

        let mut donor: Tree<()> = Tree::node();
        donor.insert_path(&path(&["1"]), ());
        donor.insert_path(&path(&["9"]), ());

        combined.merge_keys(&donor, 2);
        let Tree::Node(children) = &combined else {
            panic!("expected node");
        };
        // 기존 "1"은 그대로, 새 "9"는 빈 노드
        assert_eq!(children["1"].leaf_count(), 1);
        assert!(children["9"].is_empty_node());
    }

    #[test]
    fn trim_deletes_keys_absent_from_scan() {
        let mut value: Tree<SampleLeaf> = Tree::node();
        value.insert_path(&path(&["1"]), sample(100.0, Some(1000)));
        value.insert_path(&path(&["2"]), sample(200.0, Some(1000)));
        value.insert_path(&path(&["3"]), sample(300.0, Some(1000)));

        let mut scan: Tree<()> = Tree::node();
        scan.insert_path(&path(&["1"]), ());
        scan.insert_path(&path(&["3"]), ());

        value.trim_against(&scan);
        assert_eq!(value.leaf_count(), 2);
        let Tree::Node(children) = &value else {
            panic!("expected node");
        };
        assert!(!children.contains_key("2"));
    }

    #[test]
    fn trim_stops_at_leaves() {
        let mut value: Tree<SampleLeaf> = Tree::Leaf(sample(5.0, Some(10)));
        let scan: Tree<()> = Tree::node();
        value.trim_against(&scan);
        assert!(value.is_leaf());
    }

    #[test]
    fn trim_empties_value_subtree_deeper_than_scan() {
        let mut value: Tree<SampleLeaf> = Tree::node();
        value.insert_path(&path(&["1", "x"]), sample(1.0, Some(10)));

        let mut scan: Tree<()> = Tree::node();
        scan.insert_path(&path(&["1"]), ());

        value.trim_against(&scan);
        let Tree::Node(children) = &value else {
            panic!("expected node");
        };
        assert!(children["1"].is_empty_node());
    }

    #[test]
    fn attach_assigns_field_and_first_time_wins() {
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1"]), RowCell::default());

        let mut octets: Tree<SampleLeaf> = Tree::node();
        octets.insert_path(&path(&["1"]), sample(100.0, Some(1000)));
        skeleton.attach(&octets, "octets", true);

        let mut errors: Tree<SampleLeaf> = Tree::node();
        errors.insert_path(&path(&["1"]), sample(7.0, Some(2000)));
        skeleton.attach(&errors, "errors", true);

        let rows = skeleton.flatten(9999);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, 1000); // 먼저 붙은 시각 유지
        assert_eq!(rows[0].get("octets"), Some(&Value::Num(100.0)));
        assert_eq!(rows[0].get("errors"), Some(&Value::Num(7.0)));
    }

    #[test]
    fn attach_skips_undefined_values() {
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1"]), RowCell::default());

        let mut value: Tree<SampleLeaf> = Tree::node();
        value.insert_path(&path(&["1"]), sample(Value::Undefined, Some(1000)));
        skeleton.attach(&value, "v", true);

        assert!(skeleton.flatten(0).is_empty());
    }

    #[test]
    fn scan_only_fields_do_not_emit_rows() {
        // 스캔 문자열만 붙은 리프는 행이 되지 않습니다.
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1"]), RowCell::default());

        let mut scanned: Tree<SampleLeaf> = Tree::node();
        scanned.insert_path(&path(&["1"]), sample("eth0", None));
        skeleton.attach(&scanned, "name", false);
        assert!(skeleton.flatten(0).is_empty());

        // 이후 val이 붙으면 스캔 필드를 포함한 행이 방출됩니다.
        let mut octets: Tree<SampleLeaf> = Tree::node();
        octets.insert_path(&path(&["1"]), sample(100.0, Some(1000)));
        skeleton.attach(&octets, "octets", true);

        let rows = skeleton.flatten(0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::str("eth0")));
        assert_eq!(rows[0].get("octets"), Some(&Value::Num(100.0)));
    }

    #[test]
    fn flat_value_propagates_to_all_leaves() {
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1", "a"]), RowCell::default());
        skeleton.insert_path(&path(&["1", "b"]), RowCell::default());
        skeleton.insert_path(&path(&["2", "c"]), RowCell::default());

        let flat: Tree<SampleLeaf> = Tree::Leaf(sample("host-7", None));
        skeleton.attach(&flat, "device", true);

        let rows = skeleton.flatten(500);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.get("device"), Some(&Value::str("host-7")));
            assert_eq!(row.time, 500); // 샘플 시각이 없어 요청 시각 사용
        }
    }

    #[test]
    fn partially_flat_value_propagates_below_its_depth() {
        // 깊이 1 값 트리가 깊이 2 골격의 하위 리프 전체에 전파됩니다.
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1", "a"]), RowCell::default());
        skeleton.insert_path(&path(&["1", "b"]), RowCell::default());
        skeleton.insert_path(&path(&["2", "c"]), RowCell::default());

        let mut shallow: Tree<SampleLeaf> = Tree::node();
        shallow.insert_path(&path(&["1"]), sample("up", None));
        skeleton.attach(&shallow, "status", true);

        let rows = skeleton.flatten(0);
        // "2" 가지에는 값이 없어 행이 나오지 않습니다.
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get("status"), Some(&Value::str("up")));
        }
    }

    #[test]
    fn untouched_leaves_emit_nothing() {
        let mut skeleton: Tree<RowCell> = Tree::node();
        skeleton.insert_path(&path(&["1"]), RowCell::default());
        assert!(skeleton.flatten(0).is_empty());
    }
}
