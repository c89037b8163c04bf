//! 함수 엔진 — 값별 변환 체인의 컴파일과 적용
//!
//! `<fctn>` 체인은 요청당 한 번 컴파일됩니다: 정규식은 미리 컴파일하고
//! RPN 프로그램은 토크나이즈해 두어 행마다 재파싱하지 않습니다.
//! 알 수 없는 함수 이름은 (val id, host)당 한 번만 로그를 남기고,
//! 해당 행의 값을 undefined로 만든 뒤 체인을 중단합니다.

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use tracing::{error, warn};

use metricast_core::composite::{FctnDef, InstanceDef};
use metricast_core::types::RowRecord;
use metricast_core::value::Value;

use crate::rpn::RpnProgram;

/// 함수 실행 문맥 — 현재 행, 호스트 변수, 호스트 이름
pub struct FnCtx<'a> {
    /// 현재 행의 필드 (val id / 스캔 var → 값)
    pub row: &'a BTreeMap<String, Value>,
    /// `vars.*`에서 가져온 호스트 변수
    pub hostvars: &'a HashMap<String, Value>,
    /// 현재 호스트 이름
    pub host: &'a str,
}

/// 스칼라 함수: 현재 값과 fctn 정의를 받아 새 값을 돌려줍니다.
type ScalarFn = fn(Value, &FctnDef) -> Value;

/// 불변 함수 디스패치 테이블
///
/// 프로그램 시작 시 한 번 만들어 워커 수명 동안 공유합니다.
pub struct FunctionTable {
    scalars: HashMap<&'static str, ScalarFn>,
}

impl FunctionTable {
    /// 내장 함수 테이블을 생성합니다.
    pub fn new() -> Self {
        let mut scalars: HashMap<&'static str, ScalarFn> = HashMap::new();
        scalars.insert("sum", fn_sum);
        scalars.insert("max", fn_max_min);
        scalars.insert("min", fn_max_min);
        scalars.insert("+", fn_add);
        scalars.insert("-", fn_sub);
        scalars.insert("*", fn_mul);
        scalars.insert("/", fn_div);
        scalars.insert("%", fn_mod);
        scalars.insert("ln", fn_ln);
        scalars.insert("log10", fn_log10);
        Self { scalars }
    }

    /// fctn 체인을 컴파일합니다.
    pub(crate) fn compile_chain(&self, fctns: &[FctnDef]) -> Vec<CompiledFctn> {
        fctns
            .iter()
            .map(|fctn| match fctn.name.as_str() {
                "rpn" => CompiledFctn::Rpn(RpnProgram::compile(
                    fctn.value.as_deref().unwrap_or(""),
                )),
                "regexp" => CompiledFctn::Regexp(compile_operand_regex(fctn)),
                "replace" => CompiledFctn::Replace(
                    compile_operand_regex(fctn),
                    fctn.with.clone().unwrap_or_default(),
                ),
                name => match self.scalars.get(name) {
                    Some(func) => CompiledFctn::Scalar(*func, fctn.clone()),
                    None => CompiledFctn::Unknown(fctn.name.clone()),
                },
            })
            .collect()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// 컴파일된 변환 하나
pub(crate) enum CompiledFctn {
    /// 단순 스칼라 함수
    Scalar(ScalarFn, FctnDef),
    /// `regexp` — 매치 시 캡처 그룹 1, 아니면 값 통과
    Regexp(Option<Regex>),
    /// `replace` — 패턴을 with 속성으로 치환
    Replace(Option<Regex>, String),
    /// `rpn` 프로그램
    Rpn(RpnProgram),
    /// 등록되지 않은 이름 (적용 시점에 로그)
    Unknown(String),
}

fn compile_operand_regex(fctn: &FctnDef) -> Option<Regex> {
    let pattern = fctn.value.as_deref()?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(function = %fctn.name, pattern = %pattern, error = %e,
                "invalid function pattern, values will pass through");
            None
        }
    }
}

/// 모든 호스트의 모든 행에 함수 체인을 적용합니다.
///
/// 체인은 val 문서 순서대로, 함수는 체인 내 문서 순서대로 적용됩니다.
pub(crate) fn apply_functions(
    table: &FunctionTable,
    instance: &InstanceDef,
    rows: &mut HashMap<String, Vec<RowRecord>>,
    hostvars: &HashMap<String, HashMap<String, Value>>,
) {
    // f_map: fctn 자식을 가진 val만 컴파일합니다.
    let f_map: Vec<(&str, Vec<CompiledFctn>)> = instance
        .vals
        .iter()
        .filter(|val| !val.fctns.is_empty() && !val.id.is_empty())
        .map(|val| (val.id.as_str(), table.compile_chain(&val.fctns)))
        .collect();

    if f_map.is_empty() {
        return;
    }

    let empty_hostvars = HashMap::new();
    let mut warned: HashSet<(String, String)> = HashSet::new();

    for (host, host_rows) in rows.iter_mut() {
        let hostvars = hostvars.get(host).unwrap_or(&empty_hostvars);
        for row in host_rows.iter_mut() {
            for (val_id, chain) in &f_map {
                if !row.fields.contains_key(*val_id) {
                    continue;
                }
                let mut value = row.fields.get(*val_id).cloned().unwrap_or_default();

                for fctn in chain {
                    match fctn {
                        CompiledFctn::Scalar(func, def) => value = func(value, def),
                        CompiledFctn::Regexp(re) => value = apply_regexp(value, re.as_ref()),
                        CompiledFctn::Replace(re, with) => {
                            value = apply_replace(value, re.as_ref(), with);
                        }
                        CompiledFctn::Rpn(program) => {
                            let ctx = FnCtx {
                                row: &row.fields,
                                hostvars,
                                host: host.as_str(),
                            };
                            value = program.run(value, &ctx);
                        }
                        CompiledFctn::Unknown(name) => {
                            if warned.insert(((*val_id).to_owned(), host.clone())) {
                                error!(host = %host, val = %val_id, function = %name,
                                    "unknown function, aborting chain");
                            }
                            value = Value::Undefined;
                            break;
                        }
                    }
                }

                row.fields.insert((*val_id).to_owned(), value);
            }
        }
    }
}

// --- 내장 스칼라 함수 ---
// undefined 입력은 undefined를 낳습니다 (sum만 0으로 보정).

fn fn_sum(value: Value, _fctn: &FctnDef) -> Value {
    Value::num(value.as_num().unwrap_or(0.0))
}

/// 단일 값 축약이므로 max와 min은 동일하게 동작합니다.
fn fn_max_min(value: Value, _fctn: &FctnDef) -> Value {
    value.as_num().map(Value::num).unwrap_or(Value::Undefined)
}

fn operand_num(fctn: &FctnDef) -> Option<f64> {
    fctn.value
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

fn arith(value: Value, fctn: &FctnDef, f: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (value.as_num(), operand_num(fctn)) {
        (Some(a), Some(b)) => f(a, b).map(Value::num).unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

fn fn_add(value: Value, fctn: &FctnDef) -> Value {
    arith(value, fctn, |a, b| Some(a + b))
}

fn fn_sub(value: Value, fctn: &FctnDef) -> Value {
    arith(value, fctn, |a, b| Some(a - b))
}

fn fn_mul(value: Value, fctn: &FctnDef) -> Value {
    arith(value, fctn, |a, b| Some(a * b))
}

fn fn_div(value: Value, fctn: &FctnDef) -> Value {
    arith(value, fctn, |a, b| if b == 0.0 { None } else { Some(a / b) })
}

fn fn_mod(value: Value, fctn: &FctnDef) -> Value {
    arith(value, fctn, |a, b| if b == 0.0 { None } else { Some(a % b) })
}

fn fn_ln(value: Value, _fctn: &FctnDef) -> Value {
    match value.as_num() {
        Some(a) if a > 0.0 => Value::num(a.ln()),
        _ => Value::Undefined,
    }
}

fn fn_log10(value: Value, _fctn: &FctnDef) -> Value {
    match value.as_num() {
        Some(a) if a > 0.0 => Value::num(a.log10()),
        _ => Value::Undefined,
    }
}

/// `regexp`: 매치되면 캡처 그룹 1, 그룹이 없거나 매치되지 않으면 값 통과.
fn apply_regexp(value: Value, re: Option<&Regex>) -> Value {
    let Some(re) = re else { return value };
    let Some(text) = value.as_text() else {
        return Value::Undefined;
    };
    match re.captures(&text).and_then(|caps| caps.get(1)) {
        Some(group) => Value::str(group.as_str()),
        None => value,
    }
}

/// `replace`: 패턴의 첫 매치를 with 속성으로 치환합니다.
fn apply_replace(value: Value, re: Option<&Regex>, with: &str) -> Value {
    let Some(re) = re else { return value };
    let Some(text) = value.as_text() else {
        return Value::Undefined;
    };
    Value::Str(re.replace(&text, with).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricast_core::composite::ValDef;

    fn fctn(name: &str, value: Option<&str>) -> FctnDef {
        FctnDef {
            name: name.to_owned(),
            value: value.map(str::to_owned),
            with: None,
        }
    }

    fn apply_one(table: &FunctionTable, def: &FctnDef, value: Value) -> Value {
        let chain = table.compile_chain(std::slice::from_ref(def));
        let row = BTreeMap::new();
        let hostvars = HashMap::new();
        let ctx = FnCtx {
            row: &row,
            hostvars: &hostvars,
            host: "h",
        };
        let mut v = value;
        for c in &chain {
            v = match c {
                CompiledFctn::Scalar(f, d) => f(v, d),
                CompiledFctn::Regexp(re) => apply_regexp(v, re.as_ref()),
                CompiledFctn::Replace(re, with) => apply_replace(v, re.as_ref(), with),
                CompiledFctn::Rpn(p) => p.run(v, &ctx),
                CompiledFctn::Unknown(_) => Value::Undefined,
            };
        }
        v
    }

    #[test]
    fn arithmetic_with_operand() {
        let table = FunctionTable::new();
        assert_eq!(
            apply_one(&table, &fctn("*", Some("8")), Value::Num(5.0)),
            Value::Num(40.0)
        );
        assert_eq!(
            apply_one(&table, &fctn("-", Some("2")), Value::Num(5.0)),
            Value::Num(3.0)
        );
        assert_eq!(
            apply_one(&table, &fctn("/", Some("0")), Value::Num(5.0)),
            Value::Undefined
        );
        assert_eq!(
            apply_one(&table, &fctn("+", Some("1")), Value::Undefined),
            Value::Undefined
        );
    }

    #[test]
    fn sum_coerces_undefined_to_zero() {
        let table = FunctionTable::new();
        assert_eq!(
            apply_one(&table, &fctn("sum", None), Value::Undefined),
            Value::Num(0.0)
        );
        assert_eq!(
            apply_one(&table, &fctn("max", None), Value::Undefined),
            Value::Undefined
        );
        assert_eq!(
            apply_one(&table, &fctn("min", None), Value::Num(7.0)),
            Value::Num(7.0)
        );
    }

    #[test]
    fn log_functions_guard_domain() {
        let table = FunctionTable::new();
        assert_eq!(
            apply_one(&table, &fctn("ln", None), Value::Num(0.0)),
            Value::Undefined
        );
        assert_eq!(
            apply_one(&table, &fctn("log10", None), Value::Num(1000.0)),
            Value::Num(3.0)
        );
    }

    #[test]
    fn regexp_extracts_or_passes_through() {
        let table = FunctionTable::new();
        assert_eq!(
            apply_one(&table, &fctn("regexp", Some("^(eth)")), Value::str("eth0")),
            Value::str("eth")
        );
        // 매치 실패: 값 통과
        assert_eq!(
            apply_one(&table, &fctn("regexp", Some("^wan")), Value::str("eth0")),
            Value::str("eth0")
        );
        // 캡처 그룹 없는 패턴: 값 그대로
        assert_eq!(
            apply_one(&table, &fctn("regexp", Some("^eth")), Value::str("eth0")),
            Value::str("eth0")
        );
    }

    #[test]
    fn replace_uses_with_attribute() {
        let table = FunctionTable::new();
        let def = FctnDef {
            name: "replace".to_owned(),
            value: Some("^eth".to_owned()),
            with: Some("lan".to_owned()),
        };
        assert_eq!(
            apply_one(&table, &def, Value::str("eth0")),
            Value::str("lan0")
        );
        // 매치되지 않는 패턴은 no-op
        let def = FctnDef {
            name: "replace".to_owned(),
            value: Some("^wan".to_owned()),
            with: Some("lan".to_owned()),
        };
        assert_eq!(
            apply_one(&table, &def, Value::str("eth0")),
            Value::str("eth0")
        );
    }

    #[test]
    fn apply_functions_runs_chain_in_document_order() {
        let table = FunctionTable::new();
        let mut instance = InstanceDef::default();
        instance.vals.push(ValDef {
            id: "v".to_owned(),
            source: None,
            fctns: vec![fctn("*", Some("8")), fctn("rpn", Some("1000 /"))],
        });

        let mut rows = HashMap::new();
        rows.insert(
            "h".to_owned(),
            vec![RowRecord::new(100).with_field("v", 125.0)],
        );
        let hostvars = HashMap::new();

        apply_functions(&table, &instance, &mut rows, &hostvars);
        assert_eq!(rows["h"][0].get("v"), Some(&Value::Num(1.0)));
    }

    #[test]
    fn unknown_function_aborts_chain_with_undefined() {
        let table = FunctionTable::new();
        let mut instance = InstanceDef::default();
        instance.vals.push(ValDef {
            id: "v".to_owned(),
            source: None,
            fctns: vec![fctn("no-such-fn", None), fctn("*", Some("8"))],
        });

        let mut rows = HashMap::new();
        rows.insert(
            "h".to_owned(),
            vec![RowRecord::new(100).with_field("v", 5.0)],
        );
        let hostvars = HashMap::new();

        apply_functions(&table, &instance, &mut rows, &hostvars);
        assert_eq!(rows["h"][0].get("v"), Some(&Value::Undefined));
    }

    #[test]
    fn rows_without_the_val_are_untouched() {
        let table = FunctionTable::new();
        let mut instance = InstanceDef::default();
        instance.vals.push(ValDef {
            id: "v".to_owned(),
            source: None,
            fctns: vec![fctn("*", Some("2"))],
        });

        let mut rows = HashMap::new();
        rows.insert(
            "h".to_owned(),
            vec![RowRecord::new(100).with_field("other", 5.0)],
        );
        let hostvars = HashMap::new();

        apply_functions(&table, &instance, &mut rows, &hostvars);
        assert_eq!(rows["h"][0].get("other"), Some(&Value::Num(5.0)));
        assert!(rows["h"][0].get("v").is_none());
    }

    #[test]
    fn rpn_sees_hostvars_and_host() {
        let table = FunctionTable::new();
        let mut instance = InstanceDef::default();
        instance.vals.push(ValDef {
            id: "label".to_owned(),
            source: None,
            fctns: vec![fctn("rpn", Some("pop @ '-' concat #rack concat"))],
        });

        let mut rows = HashMap::new();
        rows.insert(
            "h7".to_owned(),
            vec![RowRecord::new(100).with_field("label", "x")],
        );
        let mut hv = HashMap::new();
        hv.insert("rack".to_owned(), Value::str("r12"));
        let mut hostvars = HashMap::new();
        hostvars.insert("h7".to_owned(), hv);

        apply_functions(&table, &instance, &mut rows, &hostvars);
        assert_eq!(rows["h7"][0].get("label"), Some(&Value::str("h7-r12")));
    }
}
