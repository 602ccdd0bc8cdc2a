//! Bounded-restart supervision for the background actors.
//!
//! An actor loop that returns an error or panics is relaunched up to a
//! fixed budget; after that it is stopped permanently and a critical event
//! is raised. The budget and the terminal state are explicit so both are
//! testable.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::events::{EventSink, Severity};

/// Run `factory`'s future under supervision.
///
/// The factory is invoked once per launch so each restart gets a fresh
/// future over the same shared state. A clean `Ok(())` return stops the
/// supervisor without consuming the restart budget.
pub(crate) fn spawn_supervised<F, Fut>(
    name: &'static str,
    max_restarts: u32,
    events: Arc<dyn EventSink>,
    mut factory: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts = 0u32;
        loop {
            let handle = tokio::spawn(factory());
            match handle.await {
                Ok(Ok(())) => {
                    debug!(actor = name, "Actor stopped cleanly");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(actor = name, error = %e, "Actor loop failed");
                }
                Err(join_err) => {
                    warn!(actor = name, error = %join_err, "Actor loop panicked");
                }
            }
            restarts += 1;
            if restarts > max_restarts {
                error!(
                    actor = name,
                    restarts, "Restart budget exhausted, actor stopped permanently"
                );
                events.emit(
                    "actor_stopped",
                    name,
                    json!({ "restarts": restarts }),
                    Severity::Critical,
                );
                return;
            }
            warn!(actor = name, restart = restarts, max_restarts, "Restarting actor");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::events::RecordingSink;

    #[tokio::test]
    async fn stops_after_budget_and_raises_event() {
        let sink = Arc::new(RecordingSink::new());
        let handle = spawn_supervised("flaky", 2, sink.clone(), || async {
            Err(Error::Registry("boom".into()))
        });
        handle.await.unwrap();
        // 1 launch + 2 restarts, then the critical event.
        assert_eq!(sink.count("actor_stopped"), 1);
        assert_eq!(sink.last("actor_stopped").unwrap().severity, Severity::Critical);
    }

    #[tokio::test]
    async fn clean_return_does_not_raise() {
        let sink = Arc::new(RecordingSink::new());
        let handle = spawn_supervised("oneshot", 2, sink.clone(), || async { Ok(()) });
        handle.await.unwrap();
        assert_eq!(sink.count("actor_stopped"), 0);
    }

    #[tokio::test]
    async fn panicking_actor_consumes_budget() {
        let sink = Arc::new(RecordingSink::new());
        let handle = spawn_supervised("panicky", 1, sink.clone(), || async {
            panic!("kaboom");
            #[allow(unreachable_code)]
            Ok(())
        });
        handle.await.unwrap();
        assert_eq!(sink.count("actor_stopped"), 1);
    }
}
