#![doc = include_str!("../README.md")]

pub mod cache;
pub mod composite;
pub mod config;
pub mod error;
pub mod types;
pub mod value;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    CacheError, ConfigError, DefinitionError, EngineError, MetricastError, RpcError,
};

// 설정
pub use config::WorkerConfig;

// 컴포지트 정의
pub use composite::{
    CompositeDef, CompositeSet, FctnDef, InputDef, InstanceDef, ScanDef, ValDef, ValSource,
};

// 캐시 계약
pub use cache::CacheClient;

// 도메인 타입
pub use types::{CacheReply, OidSamples, RowRecord, Sample};
pub use value::Value;
