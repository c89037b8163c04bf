//! 에러 타입 — 도메인별 에러 정의

/// Metricast 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum MetricastError {
    /// 런타임 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 컴포지트 정의 문서 관련 에러
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// 업스트림 캐시 통신 에러
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// RPC 프레임/파라미터 에러
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// 요청 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 런타임 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 컴포지트 정의 문서 에러
///
/// 정의 XML 로딩 시점에만 발생합니다. 요청 시점의 정의 문제
/// (id 없는 val, 존재하지 않는 스캔 참조 등)는 에러로 전파하지 않고
/// 해당 val만 건너뜁니다.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// 정의 파일을 찾을 수 없음
    #[error("definition file not found: {path}")]
    FileNotFound { path: String },

    /// XML 파싱 실패
    #[error("failed to parse definition xml: {reason}")]
    Xml { reason: String },

    /// 필수 속성 누락
    #[error("element <{element}> missing required attribute '{attr}'")]
    MissingAttr { element: String, attr: String },

    /// 동일 id의 컴포지트 중복 정의
    #[error("duplicate composite id '{id}'")]
    DuplicateComposite { id: String },

    /// 존재하지 않는 컴포지트 참조
    #[error("unknown composite '{id}'")]
    UnknownComposite { id: String },

    /// 요청된 hostType의 인스턴스 블록 없음
    #[error("composite '{composite}' has no instance for hostType '{host_type}'")]
    NoInstance { composite: String, host_type: String },
}

/// 업스트림 캐시 통신 에러
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 연결 실패
    #[error("cache connection failed: {0}")]
    Connection(String),

    /// 요청 전송/응답 수신 실패
    #[error("cache request failed: {0}")]
    Request(String),

    /// 응답 디코딩 실패
    #[error("failed to decode cache reply: {0}")]
    Decode(String),

    /// 연결이 종료되어 응답을 받을 수 없음
    #[error("cache connection closed")]
    Closed,
}

/// RPC 프레임/파라미터 에러
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// 프레임 파싱 실패
    #[error("malformed rpc frame: {reason}")]
    Frame { reason: String },

    /// 등록되지 않은 메서드 호출
    #[error("unknown method '{method}'")]
    UnknownMethod { method: String },

    /// 필수 파라미터 누락
    #[error("missing required parameter '{param}'")]
    MissingParam { param: String },

    /// 파라미터 형식 오류
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParam { param: String, reason: String },

    /// 요청 처리 시간 초과
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// 요청 엔진 에러
///
/// `metricast-composite`의 내부 에러가 상위 레이어로 전파될 때
/// 이 타입으로 변환됩니다.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 파이프라인 단계 실행 실패
    #[error("stage '{stage}' failed: {reason}")]
    Stage { stage: String, reason: String },

    /// 내부 태스크 합류 실패
    #[error("task join failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "bus.workers".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bus.workers"));
        assert!(msg.contains("greater than 0"));
    }

    #[test]
    fn definition_error_display() {
        let err = DefinitionError::MissingAttr {
            element: "scan".to_owned(),
            attr: "oid".to_owned(),
        };
        assert!(err.to_string().contains("<scan>"));
        assert!(err.to_string().contains("'oid'"));
    }

    #[test]
    fn domain_errors_convert_to_top_level() {
        let err: MetricastError = CacheError::Closed.into();
        assert!(matches!(err, MetricastError::Cache(_)));

        let err: MetricastError = RpcError::UnknownMethod {
            method: "nope".to_owned(),
        }
        .into();
        assert!(matches!(err, MetricastError::Rpc(_)));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MetricastError = io.into();
        assert!(matches!(err, MetricastError::Io(_)));
    }
}
