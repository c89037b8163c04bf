//! 컴포지트 엔진 에러 타입
//!
//! [`CompositeError`]는 요청 파이프라인 자체가 진행 불가능한 상황만
//! 표현합니다. 호스트 단위의 업스트림 실패나 정의 문제(id 없는 val 등)는
//! 에러가 아니라 로그와 빈 결과로 처리됩니다.
//! `From<CompositeError> for MetricastError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use metricast_core::error::{DefinitionError, EngineError, MetricastError};

/// 컴포지트 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    /// 컴포지트 정의 조회 실패 (인스턴스 블록 없음 등)
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// 팬아웃 태스크 합류 실패
    #[error("task join failed: {0}")]
    Join(String),
}

impl From<CompositeError> for MetricastError {
    fn from(err: CompositeError) -> Self {
        match err {
            CompositeError::Definition(e) => MetricastError::Definition(e),
            CompositeError::Join(reason) => MetricastError::Engine(EngineError::Join(reason)),
        }
    }
}
