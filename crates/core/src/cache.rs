//! 캐시 클라이언트 추상화
//!
//! [`CacheClient`] trait은 업스트림 캐시 서비스의 두 연산만을 계약으로
//! 노출합니다. 운영 환경에서는 RPC 구현이, 테스트에서는 고정 응답을
//! 돌려주는 mock이 이 trait을 구현합니다.

use std::future::Future;

use crate::error::CacheError;
use crate::types::CacheReply;

/// 업스트림 캐시 서비스 계약
///
/// 요청 엔진은 이 trait을 통해서만 캐시와 통신합니다.
/// `Send + Sync + 'static` 바운드는 스캔/값 단계의 동시 팬아웃에서
/// 클라이언트를 태스크 간 안전하게 공유하기 위한 것입니다.
///
/// # 구현 예시
/// ```ignore
/// struct StaticCache { reply: CacheReply }
///
/// impl CacheClient for StaticCache {
///     async fn get(&self, _nodes: &[String], _oidmatch: &str)
///         -> Result<CacheReply, CacheError>
///     {
///         Ok(self.reply.clone())
///     }
///
///     async fn get_rate(&self, _nodes: &[String], _period: u64, _oidmatch: &str)
///         -> Result<CacheReply, CacheError>
///     {
///         Ok(self.reply.clone())
///     }
/// }
/// ```
pub trait CacheClient: Send + Sync + 'static {
    /// 접두사에 매칭되는 원시 샘플을 조회합니다.
    ///
    /// `oidmatch` 접두사 아래의 모든 OID가 호스트별로 반환됩니다.
    /// 데이터가 없는 호스트는 응답에서 빠질 수 있습니다.
    fn get(
        &self,
        nodes: &[String],
        oidmatch: &str,
    ) -> impl Future<Output = Result<CacheReply, CacheError>> + Send;

    /// 접두사에 매칭되는 샘플을 초당 변화율로 조회합니다.
    ///
    /// `period`초 간격의 연속된 카운터 읽기 차분을 캐시가 계산해
    /// 돌려줍니다. 율 계산이 불가능한 OID는 `value` 없이 반환될 수 있고,
    /// 그런 행은 값 단계에서 버려집니다.
    fn get_rate(
        &self,
        nodes: &[String],
        period: u64,
        oidmatch: &str,
    ) -> impl Future<Output = Result<CacheReply, CacheError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OidSamples, Sample};
    use std::collections::HashMap;

    struct StaticCache {
        reply: CacheReply,
    }

    impl CacheClient for StaticCache {
        async fn get(&self, _nodes: &[String], _oidmatch: &str) -> Result<CacheReply, CacheError> {
            Ok(self.reply.clone())
        }

        async fn get_rate(
            &self,
            _nodes: &[String],
            _period: u64,
            _oidmatch: &str,
        ) -> Result<CacheReply, CacheError> {
            Err(CacheError::Request("rates unavailable".to_owned()))
        }
    }

    #[tokio::test]
    async fn trait_is_implementable_with_async_fn() {
        let mut samples = OidSamples::new();
        samples.insert("1.2.3.1".to_owned(), Sample::new("eth0", 1000));
        let mut results = HashMap::new();
        results.insert("h".to_owned(), samples);

        let cache = StaticCache {
            reply: CacheReply { results },
        };

        let nodes = vec!["h".to_owned()];
        let reply = cache.get(&nodes, "1.2.3").await.unwrap();
        assert_eq!(reply.results["h"].len(), 1);

        let err = cache.get_rate(&nodes, 60, "1.2.3").await.unwrap_err();
        assert!(matches!(err, CacheError::Request(_)));
    }
}
