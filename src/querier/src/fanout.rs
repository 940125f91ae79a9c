// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Concurrent dispatch of one call per target across all server groups.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use promfed_client::Error as ClientError;
use promfed_repr::MergeError;

use crate::server_group::ServerGroup;

/// An error from a fan-out.
///
/// Individual downstream failures are absorbed: any single successful
/// response makes the fan-out a success. Only a failure of every target, or
/// a failure folding a response into the running result, is surfaced.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("unable to fetch from downstream servers (all {total} requests failed)")]
    AllDownstreamsFailed { total: usize },
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Dispatches `call` once per `(group, target)` pair, concurrently, and folds
/// every successful outcome into `accumulate`.
///
/// `call` is invoked in configuration order with the group's ordinal, the
/// group, and the target base URL, and returns the future one worker task
/// runs. Workers deliver their outcome over a channel sized for every
/// outcome, so a send never blocks; a closed channel tells a worker the
/// orchestrator is gone and it exits quietly. Outstanding workers are aborted
/// on every exit path, including the caller dropping this future.
///
/// An error from `accumulate` is fatal and surfaces immediately.
pub async fn fanout<T, C, Fut, A>(
    groups: &[ServerGroup],
    call: C,
    mut accumulate: A,
) -> Result<(), FanoutError>
where
    T: Send + 'static,
    C: Fn(usize, &ServerGroup, &Url) -> Fut,
    Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    A: FnMut(&ServerGroup, T) -> Result<(), MergeError>,
{
    let total: usize = groups.iter().map(|group| group.targets().len()).sum();
    let (tx, mut rx) = mpsc::channel::<(usize, Result<T, ClientError>)>(total.max(1));
    let mut workers = AbortOnDrop(Vec::with_capacity(total));

    for (index, group) in groups.iter().enumerate() {
        for target in group.targets() {
            let future = call(index, group, target);
            let tx = tx.clone();
            workers.0.push(tokio::spawn(async move {
                let outcome = future.await;
                // A closed channel means the orchestrator already returned;
                // there is nobody left to deliver to.
                let _ = tx.send((index, outcome)).await;
            }));
        }
    }
    drop(tx);

    let mut failed = 0;
    for _ in 0..total {
        let Some((index, outcome)) = rx.recv().await else {
            break;
        };
        match outcome {
            Ok(result) => accumulate(&groups[index], result)?,
            Err(error) => {
                failed += 1;
                debug!(group = %groups[index].name, %error, "downstream fetch failed");
            }
        }
    }

    if failed == total {
        return Err(FanoutError::AllDownstreamsFailed { total });
    }
    Ok(())
}

struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use promfed_repr::{Metric, Sample, Timestamp, Value, ValueType};

    use super::*;

    fn group(name: &str, targets: usize) -> ServerGroup {
        ServerGroup {
            name: name.into(),
            labels: Metric::default(),
            targets: (0..targets)
                .map(|i| format!("http://{}-{}:9090", name, i).parse().unwrap())
                .collect(),
        }
    }

    fn sample(job: &str, value: f64) -> Sample {
        let metric: Metric = [("job".to_string(), job.to_string())].into_iter().collect();
        Sample::new(metric, Timestamp::from_millis(10), value)
    }

    #[tokio::test]
    async fn partial_failure_is_success() {
        // Three targets; two fail, one returns a two-sample vector.
        let groups = vec![group("east", 3)];
        let mut merged: Option<Value> = None;
        fanout(
            &groups,
            |_, _, target| {
                let fails = !target.as_str().contains("east-2");
                async move {
                    if fails {
                        Err(ClientError::MissingData)
                    } else {
                        Ok(Value::Vector(vec![sample("x", 1.0), sample("y", 2.0)]))
                    }
                }
            },
            |_, value| {
                merged = Some(match merged.take() {
                    None => value,
                    Some(held) => promfed_repr::merge_values(held, value)?,
                });
                Ok(())
            },
        )
        .await
        .unwrap();

        let merged = merged.unwrap();
        assert_eq!(merged.value_type(), ValueType::Vector);
        match merged {
            Value::Vector(samples) => assert_eq!(samples.len(), 2),
            other => panic!("expected vector, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn total_failure_is_an_error() {
        let groups = vec![group("east", 2), group("west", 1)];
        let result = fanout(
            &groups,
            |_, _, _| async { Err::<Value, _>(ClientError::MissingData) },
            |_, _| Ok(()),
        )
        .await;
        assert!(matches!(
            result,
            Err(FanoutError::AllDownstreamsFailed { total: 3 })
        ));
    }

    #[tokio::test]
    async fn no_targets_is_an_error() {
        let result = fanout(
            &[],
            |_, _, _| async { Ok(Value::Vector(Vec::new())) },
            |_, _| Ok(()),
        )
        .await;
        assert!(matches!(
            result,
            Err(FanoutError::AllDownstreamsFailed { total: 0 })
        ));
    }

    #[tokio::test]
    async fn accumulate_error_is_fatal() {
        // Mismatched result types from two healthy targets surface the merge
        // error instead of being absorbed.
        let groups = vec![group("east", 2)];
        let mut merged: Option<Value> = None;
        let result = fanout(
            &groups,
            |_, _, target| {
                let scalar = target.as_str().contains("east-0");
                async move {
                    if scalar {
                        Ok(Value::Scalar(Default::default()))
                    } else {
                        Ok(Value::Vector(Vec::new()))
                    }
                }
            },
            |_, value| {
                merged = Some(match merged.take() {
                    None => value,
                    Some(held) => promfed_repr::merge_values(held, value)?,
                });
                Ok(())
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(FanoutError::Merge(MergeError::MismatchedTypes { .. }))
        ));
    }

    #[tokio::test]
    async fn group_identity_reaches_accumulate() {
        let groups = vec![group("east", 1), group("west", 1)];
        let mut seen = Vec::new();
        fanout(
            &groups,
            |index, _, _| async move { Ok(index) },
            |group, index| {
                seen.push((group.name.clone(), index));
                Ok(())
            },
        )
        .await
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec![("east".to_string(), 0), ("west".to_string(), 1)]);
    }
}
