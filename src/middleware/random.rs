use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::{Middleware, TaskRequest};
use crate::constants::MIDDLEWARE_RANDOM;
use crate::errors::MiddlewareError;

/// Orders the candidate backends by an unbiased shuffle.
#[derive(Debug, Clone)]
pub struct RandomRanker {
    service_list: Vec<String>,
}

impl RandomRanker {
    pub fn new(service_list: Vec<String>) -> Self {
        Self { service_list }
    }

    pub fn rank(&self, candidate_backends: &[String]) -> Vec<String> {
        let mut ranked = candidate_backends.to_vec();
        ranked.shuffle(&mut rand::thread_rng());
        ranked
    }
}

#[async_trait]
impl Middleware for RandomRanker {
    fn name(&self) -> &str {
        MIDDLEWARE_RANDOM
    }

    async fn apply(&self, mut request: TaskRequest) -> Result<TaskRequest, MiddlewareError> {
        request.ensure_json_object()?;
        request.tes_uris = self.rank(request.candidates(&self.service_list));
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn backends() -> Vec<String> {
        (1..=5).map(|i| format!("https://tes-{i}.example.org")).collect()
    }

    #[test]
    fn test_rank_is_a_permutation() {
        let ranker = RandomRanker::new(backends());
        let ranked = ranker.rank(&backends());
        assert_eq!(ranked.len(), 5);
        let expected: HashSet<_> = backends().into_iter().collect();
        assert_eq!(ranked.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[test]
    fn test_rank_eventually_changes_order() {
        let ranker = RandomRanker::new(backends());
        let original = backends();
        let changed = (0..50).any(|_| ranker.rank(&original) != original);
        assert!(changed);
    }

    #[test]
    fn test_rank_empty_list() {
        assert!(RandomRanker::new(vec![]).rank(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_apply_sets_tes_uris() {
        let ranker = RandomRanker::new(backends());
        let request = ranker
            .apply(TaskRequest::new(json!({"executors": []})))
            .await
            .unwrap();
        assert_eq!(request.tes_uris.len(), 5);
    }

    #[tokio::test]
    async fn test_apply_shuffles_earlier_choice() {
        let ranker = RandomRanker::new(backends());
        let chosen = vec![
            "https://tes-2.example.org".to_string(),
            "https://tes-4.example.org".to_string(),
        ];
        let mut request = TaskRequest::new(json!({"executors": []}));
        request.tes_uris = chosen.clone();

        let request = ranker.apply(request).await.unwrap();
        let expected: HashSet<_> = chosen.into_iter().collect();
        assert_eq!(request.tes_uris.into_iter().collect::<HashSet<_>>(), expected);
    }
}
