//! 값 타입 — undefined를 일급으로 다루는 스칼라 값
//!
//! 캐시 샘플, 변환 파이프라인, RPN 스택이 공유하는 값 표현입니다.
//! undefined는 대부분의 연산을 오염시키는 별도 상태이며,
//! 절대 숫자 0으로 붕괴시키지 않습니다.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// 파이프라인 스칼라 값
///
/// 산술 연산은 [`Value::as_num`]의 숫자 해석을 따르고,
/// 문자열 연산은 [`Value::as_text`]를 따릅니다.
/// 해석 불가능한 입력은 undefined로 전파됩니다.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// 정의되지 않은 값
    #[default]
    Undefined,
    /// 숫자 값 (유한한 f64만 유지)
    Num(f64),
    /// 문자열 값
    Str(String),
}

impl Value {
    /// 숫자 값을 생성합니다. NaN/무한대는 undefined가 됩니다.
    pub fn num(n: f64) -> Self {
        if n.is_finite() {
            Self::Num(n)
        } else {
            Self::Undefined
        }
    }

    /// 문자열 값을 생성합니다.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// 정의된 값인지 확인합니다.
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// 숫자로 해석합니다.
    ///
    /// 문자열은 십진수로 파싱을 시도하며, 실패하면 `None`입니다.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Undefined => None,
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// 문자열로 해석합니다. undefined는 `None`입니다.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Undefined => None,
            Self::Num(n) => Some(format_num(*n)),
            Self::Str(s) => Some(s.clone()),
        }
    }

    /// 참/거짓 판정: 정의되어 있고, 0이 아니고, 비어 있지 않으면 참.
    ///
    /// 문자열 `"0"`은 거짓으로 취급합니다.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty() && s != "0",
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::num(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "(undef)"),
            Self::Num(n) => write!(f, "{}", format_num(*n)),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// 정수로 떨어지는 숫자는 소수점 없이 표기합니다.
fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined => serializer.serialize_none(),
            Self::Num(n) => {
                // 정수 값은 정수로 내보내 JSON 출력에 불필요한 소수점이 남지 않게 합니다.
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, a string, or null")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::num(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(Value::num(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::num(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Str(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::num(if v { 1.0 } else { 0.0 }))
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Undefined)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Undefined)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
