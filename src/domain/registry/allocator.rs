//! Slot allocation: hands out collision-free `(uri, idx)` pairs across the
//! configured list endpoints and keeps the per-type pools topped up.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng as _;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::common::models::{ListConfiguration, ListType, SlotPair};

use super::queue::{QueueError, SlotQueue};
use super::sources::{ListConfigSource, SourceError};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("No endpoints found in configuration")]
    NoEndpoints,
    #[error(
        "Not enough indexes to refill queues: {list_type} needed {needed}, available {available}"
    )]
    InsufficientIndexSpace {
        list_type: ListType,
        needed: usize,
        available: usize,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Draws `total_count` distinct `(uri, idx)` pairs across `endpoints`.
///
/// Indices are drawn uniformly in `[0, max_index_per_endpoint)` by rejection
/// sampling: duplicate draws within one endpoint are simply retried, so the
/// pairs for any single endpoint are always unique. Collection stops early
/// once enough pairs exist and the result is truncated to the exact count.
///
/// Callers must ensure `total_count <= endpoints.len() * max_index_per_endpoint`,
/// otherwise an endpoint would be asked for more unique indices than it can
/// hold.
pub fn allocate(
    endpoints: &[String],
    total_count: usize,
    max_index_per_endpoint: u32,
) -> Vec<SlotPair> {
    if endpoints.is_empty() || total_count == 0 || max_index_per_endpoint == 0 {
        return Vec::new();
    }

    let per_endpoint = total_count.div_ceil(total_count.min(endpoints.len()));
    debug!(per_endpoint, "selecting indexes per endpoint");

    let mut result = Vec::with_capacity(total_count);
    let mut rng = rand::rng();

    for endpoint in endpoints {
        let mut selected: HashSet<u32> = HashSet::with_capacity(per_endpoint);
        while selected.len() < per_endpoint {
            selected.insert(rng.random_range(0..max_index_per_endpoint));
        }

        for idx in selected {
            result.push(SlotPair {
                uri: endpoint.clone(),
                idx,
            });
        }

        if result.len() >= total_count {
            break;
        }
    }

    result.truncate(total_count);
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRefill {
    pub previous_depth: usize,
    pub messages_added: usize,
    pub new_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Both pools are at or above the target depth.
    NotNeeded {
        bitstring_depth: usize,
        token_depth: usize,
    },
    Refilled {
        bitstring: QueueRefill,
        token: QueueRefill,
    },
}

/// Keeps the two slot pools filled from the configured endpoints.
pub struct SlotAllocator {
    lists: Arc<dyn ListConfigSource>,
    bitstring_queue: Arc<dyn SlotQueue>,
    token_queue: Arc<dyn SlotQueue>,
    target_depth: usize,
}

impl SlotAllocator {
    pub fn new(
        lists: Arc<dyn ListConfigSource>,
        bitstring_queue: Arc<dyn SlotQueue>,
        token_queue: Arc<dyn SlotQueue>,
        target_depth: usize,
    ) -> Self {
        Self {
            lists,
            bitstring_queue,
            token_queue,
            target_depth,
        }
    }

    /// Tops up both pools towards the target depth. This is both the initial
    /// bulk run (empty pools) and the periodic refill.
    pub async fn refill(&self) -> Result<RefillOutcome, AllocationError> {
        let bitstring_depth = self.bitstring_queue.depth().await?;
        let token_depth = self.token_queue.depth().await?;

        let bitstring_needed = self.target_depth.saturating_sub(bitstring_depth);
        let token_needed = self.target_depth.saturating_sub(token_depth);
        debug!(
            bitstring_depth,
            token_depth, bitstring_needed, token_needed, "computed queue refills"
        );

        if bitstring_needed == 0 && token_needed == 0 {
            info!("all queues are at or above target depth, no refill needed");
            return Ok(RefillOutcome::NotNeeded {
                bitstring_depth,
                token_depth,
            });
        }

        let config = self.lists.load().await?;
        let max_index = validated_max_index(&config)?;

        let bitstring_added = self
            .refill_pool(
                &config,
                ListType::BitstringStatusList,
                bitstring_needed,
                max_index,
            )
            .await?;
        let token_added = self
            .refill_pool(&config, ListType::TokenStatusList, token_needed, max_index)
            .await?;

        info!(
            bitstring_added,
            token_added, "refilled slot pools"
        );

        Ok(RefillOutcome::Refilled {
            bitstring: QueueRefill {
                previous_depth: bitstring_depth,
                messages_added: bitstring_added,
                new_depth: bitstring_depth + bitstring_added,
            },
            token: QueueRefill {
                previous_depth: token_depth,
                messages_added: token_added,
                new_depth: token_depth + token_added,
            },
        })
    }

    /// Refill run for a single list type with a caller-supplied size.
    pub async fn refill_list(
        &self,
        list_type: ListType,
        count: usize,
    ) -> Result<usize, AllocationError> {
        let config = self.lists.load().await?;
        let max_index = validated_max_index(&config)?;
        self.refill_pool(&config, list_type, count, max_index).await
    }

    async fn refill_pool(
        &self,
        config: &ListConfiguration,
        list_type: ListType,
        needed: usize,
        max_index: u32,
    ) -> Result<usize, AllocationError> {
        if needed == 0 {
            return Ok(0);
        }

        let endpoints: Vec<String> = config
            .endpoints(list_type)
            .iter()
            .map(|e| e.uri.clone())
            .collect();

        let available = endpoints.len() * max_index as usize;
        if needed > available {
            return Err(AllocationError::InsufficientIndexSpace {
                list_type,
                needed,
                available,
            });
        }

        let pairs = allocate(&endpoints, needed, max_index);
        let queue = match list_type {
            ListType::BitstringStatusList => &self.bitstring_queue,
            ListType::TokenStatusList => &self.token_queue,
        };
        queue.push_batch(&pairs).await?;
        Ok(pairs.len())
    }
}

fn validated_max_index(config: &ListConfiguration) -> Result<u32, AllocationError> {
    let max_index = config.max_index_per_endpoint();
    if !config.has_endpoints() || max_index == 0 {
        return Err(AllocationError::NoEndpoints);
    }
    Ok(max_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::ListEndpoint;
    use crate::domain::registry::queue::InMemorySlotQueue;
    use crate::domain::registry::sources::StaticListConfiguration;

    fn endpoint(uri: &str, max_indices: u32) -> ListEndpoint {
        ListEndpoint {
            created: "2025-01-05T14:00:00Z".to_string(),
            uri: uri.to_string(),
            max_indices,
            format: "statuslist+jwt".to_string(),
        }
    }

    fn uris(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn allocate_returns_exactly_n_distinct_pairs() {
        for (endpoints, total, max_index) in [
            (uris(&["a"]), 10, 100),
            (uris(&["a", "b"]), 7, 10),
            (uris(&["a", "b", "c"]), 30, 10),
            (uris(&["a", "b"]), 20, 10),
            (uris(&["a", "b", "c"]), 2, 5),
        ] {
            let pairs = allocate(&endpoints, total, max_index);
            assert_eq!(pairs.len(), total, "endpoints={endpoints:?}");

            let distinct: HashSet<(String, u32)> =
                pairs.iter().map(|p| (p.uri.clone(), p.idx)).collect();
            assert_eq!(distinct.len(), total, "pairs must be unique");

            assert!(pairs.iter().all(|p| p.idx < max_index));
            assert!(pairs.iter().all(|p| endpoints.contains(&p.uri)));
        }
    }

    #[test]
    fn allocate_degenerate_inputs_yield_nothing() {
        assert!(allocate(&[], 10, 100).is_empty());
        assert!(allocate(&uris(&["a"]), 0, 100).is_empty());
        assert!(allocate(&uris(&["a"]), 10, 0).is_empty());
    }

    #[test]
    fn allocate_full_endpoint_space() {
        // Exactly as many slots as the endpoint can hold.
        let pairs = allocate(&uris(&["a"]), 16, 16);
        let indices: HashSet<u32> = pairs.iter().map(|p| p.idx).collect();
        assert_eq!(indices.len(), 16);
        assert!(indices.iter().all(|&i| i < 16));
    }

    fn allocator(
        config: ListConfiguration,
        target_depth: usize,
    ) -> (SlotAllocator, Arc<InMemorySlotQueue>, Arc<InMemorySlotQueue>) {
        let bitstring = Arc::new(InMemorySlotQueue::new());
        let token = Arc::new(InMemorySlotQueue::new());
        let allocator = SlotAllocator::new(
            Arc::new(StaticListConfiguration(config)),
            bitstring.clone(),
            token.clone(),
            target_depth,
        );
        (allocator, bitstring, token)
    }

    #[tokio::test]
    async fn refill_fills_both_pools_to_target() {
        let config = ListConfiguration {
            bitstring_status_list: vec![endpoint("https://crs.example.test/b/AAA", 1000)],
            token_status_list: vec![
                endpoint("https://crs.example.test/t/BBB", 1000),
                endpoint("https://crs.example.test/t/CCC", 1000),
            ],
        };
        let (allocator, bitstring, token) = allocator(config, 100);

        let outcome = allocator.refill().await.unwrap();
        assert_eq!(
            outcome,
            RefillOutcome::Refilled {
                bitstring: QueueRefill {
                    previous_depth: 0,
                    messages_added: 100,
                    new_depth: 100
                },
                token: QueueRefill {
                    previous_depth: 0,
                    messages_added: 100,
                    new_depth: 100
                },
            }
        );
        assert_eq!(bitstring.depth().await.unwrap(), 100);
        assert_eq!(token.depth().await.unwrap(), 100);

        // A second run finds both pools full.
        let outcome = allocator.refill().await.unwrap();
        assert_eq!(
            outcome,
            RefillOutcome::NotNeeded {
                bitstring_depth: 100,
                token_depth: 100
            }
        );
    }

    #[tokio::test]
    async fn refill_rejects_insufficient_index_space() {
        let config = ListConfiguration {
            bitstring_status_list: vec![endpoint("https://crs.example.test/b/AAA", 10)],
            token_status_list: vec![endpoint("https://crs.example.test/t/BBB", 10)],
        };
        let (allocator, _, _) = allocator(config, 50);

        let err = allocator.refill().await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InsufficientIndexSpace {
                needed: 50,
                available: 10,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refill_rejects_empty_configuration() {
        let (allocator, _, _) = allocator(ListConfiguration::default(), 50);
        assert!(matches!(
            allocator.refill().await.unwrap_err(),
            AllocationError::NoEndpoints
        ));
    }

    #[tokio::test]
    async fn refill_list_tops_up_one_pool_only() {
        let config = ListConfiguration {
            bitstring_status_list: vec![endpoint("https://crs.example.test/b/AAA", 1000)],
            token_status_list: vec![endpoint("https://crs.example.test/t/BBB", 1000)],
        };
        let (allocator, bitstring, token) = allocator(config, 100);

        let added = allocator
            .refill_list(ListType::TokenStatusList, 25)
            .await
            .unwrap();
        assert_eq!(added, 25);
        assert_eq!(token.depth().await.unwrap(), 25);
        assert_eq!(bitstring.depth().await.unwrap(), 0);
    }
}
