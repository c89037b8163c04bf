//! 컴포지트 정의 — XML 문서 파싱 및 조회
//!
//! 워커가 노출하는 RPC 메서드 하나당 컴포지트 정의 하나가 대응합니다.
//! 정의 문서는 기동 시 한 번 로드되어 워커 수명 동안 불변입니다.
//!
//! 문서 형태:
//! ```text
//! /config/composite[@id][@description?]
//!     /instance[@hostType]
//!         /scan[@id][@oid][@var][@exclude-only?]
//!         /input[@id][@required?]
//!         /result/val[@id][@var?][@oid?][@type?]
//!             /fctn[@name][@value?][@with?]
//! ```

use std::collections::HashMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::DefinitionError;

/// 로드된 컴포지트 정의 집합
///
/// id로 컴포지트를 조회하고, RPC 메서드 레지스트리 구성을 위한
/// id 목록을 제공합니다.
#[derive(Debug, Clone, Default)]
pub struct CompositeSet {
    composites: Vec<CompositeDef>,
}

/// 컴포지트 정의 하나 (RPC 메서드 하나)
#[derive(Debug, Clone)]
pub struct CompositeDef {
    /// 컴포지트 이름. RPC 메서드명으로 쓰입니다.
    pub id: String,
    /// 사람이 읽는 설명
    pub description: Option<String>,
    /// hostType별 인스턴스 블록
    pub instances: Vec<InstanceDef>,
}

/// hostType 하나에 대한 인스턴스 블록
#[derive(Debug, Clone, Default)]
pub struct InstanceDef {
    /// 인스턴스가 적용되는 hostType (기본값 `default`)
    pub host_type: String,
    /// 인덱스 스캔 정의 (문서 순서 유지)
    pub scans: Vec<ScanDef>,
    /// 선언된 요청 파라미터
    pub inputs: Vec<InputDef>,
    /// 결과 값 정의 (문서 순서 유지)
    pub vals: Vec<ValDef>,
}

/// 인덱스 스캔 정의
#[derive(Debug, Clone)]
pub struct ScanDef {
    /// 스캔 이름. 의존 스캔 결합과 `<val var="…">` 참조에 쓰입니다.
    pub id: String,
    /// 변수 위치를 포함한 OID 패턴 (예: `1.3.6.1.2.1.31.1.1.1.18.*`)
    pub oid: String,
    /// 와일드카드 위치가 갖는 논리 이름
    pub var: String,
    /// true면 이 스캔은 제외 목록만 채우고 행을 만들지 않습니다.
    pub exclude_only: bool,
}

/// 선언된 요청 파라미터
#[derive(Debug, Clone)]
pub struct InputDef {
    /// 파라미터 이름
    pub id: String,
    /// 필수 여부
    pub required: bool,
}

/// 결과 값 정의
///
/// `id`가 비어 있거나 `source`가 없는 val은 로드 시점이 아니라
/// 요청 시점에 에러 로그와 함께 건너뜁니다.
#[derive(Debug, Clone, Default)]
pub struct ValDef {
    /// 출력 값 이름
    pub id: String,
    /// 값의 출처 (스캔 변수 또는 OID)
    pub source: Option<ValSource>,
    /// 문서 순서대로 적용되는 변환 함수 체인
    pub fctns: Vec<FctnDef>,
}

/// 값의 출처
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValSource {
    /// 스캔 결과 또는 예약어 `node`에서 복사
    Var(String),
    /// OID 조회 (`rate`면 캐시의 율 변환 사용)
    Oid {
        /// 변수 위치를 포함한 OID 패턴
        oid: String,
        /// `type="rate"` 여부
        rate: bool,
    },
}

/// 변환 함수 정의
#[derive(Debug, Clone, Default)]
pub struct FctnDef {
    /// 함수 이름 (예: `rpn`, `replace`, `*`)
    pub name: String,
    /// 피연산자
    pub value: Option<String>,
    /// `replace`의 치환 문자열
    pub with: Option<String>,
}

impl CompositeSet {
    /// XML 문자열에서 정의 집합을 파싱합니다.
    pub fn from_xml_str(xml: &str) -> Result<Self, DefinitionError> {
        let mut reader = Reader::from_str(xml);

        let mut set = CompositeSet::default();
        let mut composite: Option<CompositeDef> = None;
        let mut instance: Option<InstanceDef> = None;
        let mut val: Option<ValDef> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let tag = tag_name(e);
                    match tag.as_str() {
                        "composite" => composite = Some(parse_composite(e)?),
                        "instance" => instance = Some(parse_instance(e)),
                        "val" => val = Some(parse_val(e)),
                        "scan" => {
                            if let Some(inst) = instance.as_mut() {
                                inst.scans.push(parse_scan(e)?);
                            }
                        }
                        "input" => {
                            if let Some(inst) = instance.as_mut() {
                                inst.inputs.push(parse_input(e)?);
                            }
                        }
                        "fctn" => {
                            if let Some(v) = val.as_mut() {
                                v.fctns.push(parse_fctn(e)?);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    let tag = tag_name(e);
                    match tag.as_str() {
                        "scan" => {
                            if let Some(inst) = instance.as_mut() {
                                inst.scans.push(parse_scan(e)?);
                            }
                        }
                        "input" => {
                            if let Some(inst) = instance.as_mut() {
                                inst.inputs.push(parse_input(e)?);
                            }
                        }
                        "val" => {
                            if let Some(inst) = instance.as_mut() {
                                inst.vals.push(parse_val(e));
                            }
                        }
                        "fctn" => {
                            if let Some(v) = val.as_mut() {
                                v.fctns.push(parse_fctn(e)?);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "val" => {
                            if let (Some(inst), Some(v)) = (instance.as_mut(), val.take()) {
                                inst.vals.push(v);
                            }
                        }
                        "instance" => {
                            if let (Some(c), Some(inst)) = (composite.as_mut(), instance.take()) {
                                c.instances.push(inst);
                            }
                        }
                        "composite" => {
                            if let Some(c) = composite.take() {
                                if set.composites.iter().any(|existing| existing.id == c.id) {
                                    return Err(DefinitionError::DuplicateComposite { id: c.id });
                                }
                                set.composites.push(c);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DefinitionError::Xml {
                        reason: e.to_string(),
                    });
                }
                _ => {}
            }
        }

        Ok(set)
    }

    /// 정의 파일을 읽어 파싱합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let xml = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DefinitionError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                DefinitionError::Xml {
                    reason: e.to_string(),
                }
            }
        })?;
        Self::from_xml_str(&xml)
    }

    /// id로 컴포지트를 조회합니다.
    pub fn get(&self, id: &str) -> Result<&CompositeDef, DefinitionError> {
        self.composites
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DefinitionError::UnknownComposite { id: id.to_owned() })
    }

    /// 모든 컴포지트 id를 문서 순서로 반환합니다.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.composites.iter().map(|c| c.id.as_str())
    }

    /// 정의된 컴포지트 수
    pub fn len(&self) -> usize {
        self.composites.len()
    }

    /// 정의가 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }
}

impl CompositeDef {
    /// hostType에 해당하는 인스턴스 블록을 선택합니다.
    ///
    /// 정확히 일치하는 블록이 없으면 `default` 블록으로 폴백합니다.
    pub fn instance(&self, host_type: &str) -> Result<&InstanceDef, DefinitionError> {
        self.instances
            .iter()
            .find(|i| i.host_type == host_type)
            .or_else(|| self.instances.iter().find(|i| i.host_type == "default"))
            .ok_or_else(|| DefinitionError::NoInstance {
                composite: self.id.clone(),
                host_type: host_type.to_owned(),
            })
    }
}

impl ValDef {
    /// `type="rate"` OID 값인지 확인합니다.
    pub fn is_rate(&self) -> bool {
        matches!(self.source, Some(ValSource::Oid { rate: true, .. }))
    }
}

/// 시작 태그의 이름을 문자열로 꺼냅니다.
fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// 시작 태그의 속성을 맵으로 꺼냅니다.
fn parse_attrs(e: &BytesStart) -> HashMap<String, String> {
    e.attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string());
            (key, value)
        })
        .collect()
}

/// 속성 맵에서 필수 속성을 꺼냅니다.
fn required_attr(
    attrs: &HashMap<String, String>,
    element: &str,
    attr: &str,
) -> Result<String, DefinitionError> {
    attrs
        .get(attr)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| DefinitionError::MissingAttr {
            element: element.to_owned(),
            attr: attr.to_owned(),
        })
}

/// 불리언 속성 해석: 존재하면서 "false"/"0"/"no"가 아니면 참.
fn bool_attr(attrs: &HashMap<String, String>, attr: &str) -> bool {
    match attrs.get(attr) {
        Some(v) => !matches!(v.as_str(), "false" | "0" | "no"),
        None => false,
    }
}

fn parse_composite(e: &BytesStart) -> Result<CompositeDef, DefinitionError> {
    let attrs = parse_attrs(e);
    Ok(CompositeDef {
        id: required_attr(&attrs, "composite", "id")?,
        description: attrs.get("description").cloned(),
        instances: Vec::new(),
    })
}

fn parse_instance(e: &BytesStart) -> InstanceDef {
    let attrs = parse_attrs(e);
    InstanceDef {
        host_type: attrs
            .get("hostType")
            .cloned()
            .unwrap_or_else(|| "default".to_owned()),
        ..InstanceDef::default()
    }
}

fn parse_scan(e: &BytesStart) -> Result<ScanDef, DefinitionError> {
    let attrs = parse_attrs(e);
    Ok(ScanDef {
        id: required_attr(&attrs, "scan", "id")?,
        oid: required_attr(&attrs, "scan", "oid")?,
        var: required_attr(&attrs, "scan", "var")?,
        exclude_only: bool_attr(&attrs, "exclude-only"),
    })
}

fn parse_input(e: &BytesStart) -> Result<InputDef, DefinitionError> {
    let attrs = parse_attrs(e);
    Ok(InputDef {
        id: required_attr(&attrs, "input", "id")?,
        required: bool_attr(&attrs, "required"),
    })
}

// val은 의도적으로 관대하게 파싱합니다. id가 비거나 출처가 없는 val은
// 요청 시점에 로그와 함께 건너뜁니다.
fn parse_val(e: &BytesStart) -> ValDef {
    let attrs = parse_attrs(e);
    let source = if let Some(oid) = attrs.get("oid").filter(|v| !v.is_empty()) {
        Some(ValSource::Oid {
            oid: oid.clone(),
            rate: attrs.get("type").map(|t| t == "rate").unwrap_or(false),
        })
    } else {
        attrs
            .get("var")
            .filter(|v| !v.is_empty())
            .map(|v| ValSource::Var(v.clone()))
    };

    ValDef {
        id: attrs.get("id").cloned().unwrap_or_default(),
        source,
        fctns: Vec::new(),
    }
}

fn parse_fctn(e: &BytesStart) -> Result<FctnDef, DefinitionError> {
    let attrs = parse_attrs(e);
    Ok(FctnDef {
        name: required_attr(&attrs, "fctn", "name")?,
        value: attrs.get("value").cloned(),
        with: attrs.get("with").cloned(),
    })
}
