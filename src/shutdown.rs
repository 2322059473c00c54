use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, future};
use tokio::select;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const FORCED_EXIT_CODE: i32 = 130;

/// Cancels the returned token on SIGINT or SIGTERM.
///
/// A second signal exits the process right away, without waiting for the
/// job to be removed. The listener stops once the token is cancelled by
/// anyone else.
pub fn spawn_shutdown_listener() -> CancellationToken {
    let token = CancellationToken::new();

    tokio::spawn(handle_signals(
        os_signals(),
        token.clone(),
        |_| std::process::exit(FORCED_EXIT_CODE),
    ));

    token
}

/// Names of the termination signals as they arrive.
fn os_signals() -> BoxStream<'static, &'static str> {
    let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).ok();

    stream::unfold(sigterm, |mut sigterm| async move {
        let received = {
            let term_future = async {
                if let Some(ref mut sigterm) = sigterm {
                    sigterm.recv().await;
                } else {
                    future::pending::<()>().await
                }
            };

            select! {
                res = signal::ctrl_c() => match res {
                    Ok(()) => Some("SIGINT"),
                    Err(e) => {
                        warn!("Failed to listen for SIGINT: {:?}", e);
                        None
                    }
                },
                _ = term_future => Some("SIGTERM"),
            }
        };
        received.map(|name| (name, sigterm))
    })
    .boxed()
}

pub(crate) async fn handle_signals<S, F>(
    mut signals: S,
    shutdown: CancellationToken,
    force_exit: F,
) where
    S: Stream<Item = &'static str> + Unpin,
    F: FnOnce(&'static str),
{
    let first = select! {
        received = signals.next() => received,
        _ = shutdown.cancelled() => return,
    };
    let Some(first) = first else {
        return;
    };
    info!("Received {first}. Stopping the job...");
    shutdown.cancel();

    if let Some(second) = signals.next().await {
        error!("Received {second} while stopping. Exiting without removing the job.");
        force_exit(second);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_token_starts_uncancelled() {
        let token = spawn_shutdown_listener();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn test_first_signal_cancels() {
        let (tx, rx) = mpsc::unbounded();
        let token = CancellationToken::new();
        let mut forced = None;

        tx.unbounded_send("SIGTERM").unwrap();
        drop(tx);
        handle_signals(rx, token.clone(), |name| forced = Some(name)).await;

        assert!(token.is_cancelled());
        assert_eq!(forced, None);
    }

    #[tokio::test]
    async fn test_second_signal_forces_exit() {
        let (tx, rx) = mpsc::unbounded();
        let token = CancellationToken::new();
        let mut forced = None;

        tx.unbounded_send("SIGINT").unwrap();
        tx.unbounded_send("SIGINT").unwrap();
        handle_signals(rx, token.clone(), |name| forced = Some(name)).await;

        assert!(token.is_cancelled());
        assert_eq!(forced, Some("SIGINT"));
    }

    #[tokio::test]
    async fn test_stops_when_cancelled_elsewhere() {
        let (_tx, rx) = mpsc::unbounded::<&'static str>();
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            handle_signals(rx, token, |_| panic!("no signal was sent")),
        )
        .await
        .expect("listener returns");
    }
}
