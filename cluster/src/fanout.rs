use crate::pool::Connection;
use futures::future::join_all;
use gpctl_common::{FanoutError, GpError, Result};
use std::future::Future;
use std::sync::Arc;

/// Run `work` once per connection, all concurrently, and wait for every
/// unit to finish. Failures are collected in connection order; a unit whose
/// connection is torn down while in flight fails with a connectivity error.
pub async fn execute_rpc<F, Fut>(
    connections: &[Arc<Connection>],
    work: F,
) -> std::result::Result<(), FanoutError>
where
    F: Fn(Arc<Connection>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let units = connections.iter().map(|conn| {
        let conn = conn.clone();
        let unit = work(conn.clone());
        async move {
            let result = tokio::select! {
                result = unit => result,
                _ = conn.closed() => Err(GpError::Connectivity {
                    host: conn.hostname.clone(),
                    message: "connection closed".to_string(),
                }),
            };
            (conn.hostname.clone(), result)
        }
    });

    collect_failures(join_all(units).await)
}

/// Join arbitrary keyed futures the same way as [`execute_rpc`]
pub async fn join_all_errors<I, Fut>(tasks: I) -> std::result::Result<(), FanoutError>
where
    I: IntoIterator<Item = (String, Fut)>,
    Fut: Future<Output = Result<()>>,
{
    let (keys, futures): (Vec<String>, Vec<Fut>) = tasks.into_iter().unzip();
    let results = join_all(futures).await;
    collect_failures(keys.into_iter().zip(results))
}

fn collect_failures(
    results: impl IntoIterator<Item = (String, Result<()>)>,
) -> std::result::Result<(), FanoutError> {
    let mut failures = FanoutError::new();
    for (host, result) in results {
        if let Err(e) = result {
            failures.push(host, e);
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}
