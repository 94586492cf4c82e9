//! Outbound half of the tunnel: serializes lookups onto the shared
//! connection.
//!
//! Responses carry no request identifier, so correctness depends on a
//! strict write-then-await-one-reply cycle with a single writer. Callers
//! hand their lookups to this task over a bounded queue and block on a
//! one-shot reply slot; the task owns the tunnel write half exclusively.

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warren_dns_domain::RelayError;

use crate::listener::{Activity, Termination};
use crate::tunnel::framing;

/// An in-flight lookup awaiting one tunnel round trip. The reply slot is
/// fulfilled exactly once, possibly with an empty list.
pub(crate) struct PendingRequest {
    pub name: String,
    pub reply: oneshot::Sender<Vec<String>>,
}

/// Handle the query path uses to resolve names across the tunnel.
#[derive(Clone)]
pub struct RemoteResolver {
    requests: mpsc::Sender<PendingRequest>,
}

impl RemoteResolver {
    pub(crate) fn new(requests: mpsc::Sender<PendingRequest>) -> Self {
        Self { requests }
    }

    /// Resolves `name` on the remote peer.
    ///
    /// Returns an empty list when the peer knows no addresses for the
    /// name or the tunnel is out of service. Never fails: by the time the
    /// correlator stops consuming requests, every reply slot it will ever
    /// see has been fulfilled, and a dropped slot reads as empty here.
    pub async fn resolve(&self, name: &str) -> Vec<String> {
        let (reply, response) = oneshot::channel();
        let request = PendingRequest {
            name: name.to_string(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }
}

/// Runs the correlation loop until the request source is exhausted.
///
/// While accepting, each request is written to the tunnel and the next
/// decoded address list is awaited before another request is taken. A
/// write failure or an interrupt moves the loop into a drain phase where
/// every remaining request is fulfilled empty without touching the
/// tunnel, so no caller stays blocked once the tunnel is out of service.
/// Exactly one termination event is emitted, at the moment the loop stops
/// accepting; the drain keeps running after it.
pub(crate) async fn run_correlator<W>(
    mut tunnel: W,
    mut requests: mpsc::Receiver<PendingRequest>,
    mut deliveries: mpsc::Receiver<Vec<String>>,
    interrupt: CancellationToken,
    terminations: mpsc::Sender<Termination>,
) where
    W: AsyncWrite + Unpin,
{
    let error = loop {
        let request = tokio::select! {
            biased;
            _ = interrupt.cancelled() => break None,
            request = requests.recv() => request,
        };
        // Source exhausted: nothing left to drain either.
        let Some(request) = request else { break None };

        if let Err(e) = framing::send_message(&mut tunnel, &request.name).await {
            let _ = request.reply.send(Vec::new());
            break Some(e);
        }

        tokio::select! {
            biased;
            delivery = deliveries.recv() => match delivery {
                Some(addresses) => {
                    let _ = request.reply.send(addresses);
                }
                None => {
                    // Reader died mid round trip.
                    let _ = request.reply.send(Vec::new());
                    break None;
                }
            },
            _ = interrupt.cancelled() => {
                let _ = request.reply.send(Vec::new());
                break None;
            }
        }
    };

    if let Some(e) = &error {
        warn!(error = %e, "tunnel write failed, draining pending lookups");
    }
    let _ = terminations
        .send(Termination {
            activity: Activity::Correlator,
            error,
        })
        .await;

    while let Some(request) = requests.recv().await {
        let _ = request.reply.send(Vec::new());
    }

    debug!("correlator closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::framing::{receive_frame, send_frame};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        resolver: RemoteResolver,
        delivery_tx: mpsc::Sender<Vec<String>>,
        interrupt: CancellationToken,
        term_rx: mpsc::Receiver<Termination>,
        peer: tokio::io::DuplexStream,
    }

    fn spawn_correlator() -> Harness {
        let (write_half, peer) = tokio::io::duplex(4096);
        let (request_tx, request_rx) = mpsc::channel(8);
        let (delivery_tx, delivery_rx) = mpsc::channel(1);
        let (term_tx, term_rx) = mpsc::channel(4);
        let interrupt = CancellationToken::new();

        tokio::spawn(run_correlator(
            write_half,
            request_rx,
            delivery_rx,
            interrupt.clone(),
            term_tx,
        ));

        Harness {
            resolver: RemoteResolver::new(request_tx),
            delivery_tx,
            interrupt,
            term_rx,
            peer,
        }
    }

    #[tokio::test]
    async fn resolves_one_round_trip() {
        let mut harness = spawn_correlator();

        let lookup = tokio::spawn({
            let resolver = harness.resolver.clone();
            async move { resolver.resolve("host1").await }
        });

        let name: Option<String> = receive_frame(&mut harness.peer).await.unwrap();
        assert_eq!(name.as_deref(), Some("host1"));

        harness
            .delivery_tx
            .send(vec!["10.0.0.5".to_string()])
            .await
            .unwrap();
        assert_eq!(lookup.await.unwrap(), vec!["10.0.0.5"]);
    }

    #[tokio::test]
    async fn second_write_waits_for_first_reply() {
        let mut harness = spawn_correlator();

        let first = tokio::spawn({
            let resolver = harness.resolver.clone();
            async move { resolver.resolve("alpha").await }
        });
        let second = tokio::spawn({
            let resolver = harness.resolver.clone();
            async move { resolver.resolve("beta").await }
        });

        let sent: String = receive_frame(&mut harness.peer).await.unwrap().unwrap();
        assert!(sent == "alpha" || sent == "beta");

        // Until the first reply is delivered, no second name may reach the
        // tunnel.
        let early = timeout(
            Duration::from_millis(100),
            receive_frame::<_, String>(&mut harness.peer),
        )
        .await;
        assert!(early.is_err());

        harness
            .delivery_tx
            .send(vec!["10.0.0.1".to_string()])
            .await
            .unwrap();

        let other: String = receive_frame(&mut harness.peer).await.unwrap().unwrap();
        assert_ne!(other, sent);
        harness
            .delivery_tx
            .send(vec!["10.0.0.2".to_string()])
            .await
            .unwrap();

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn interrupt_resolves_in_flight_request_empty() {
        let mut harness = spawn_correlator();

        let lookup = tokio::spawn({
            let resolver = harness.resolver.clone();
            async move { resolver.resolve("host1").await }
        });

        // Wait for the write, then interrupt instead of replying.
        let _: Option<String> = receive_frame(&mut harness.peer).await.unwrap();
        harness.interrupt.cancel();

        assert!(lookup.await.unwrap().is_empty());
        let termination = harness.term_rx.recv().await.unwrap();
        assert_eq!(termination.activity, Activity::Correlator);
        assert!(termination.error.is_none());
    }

    #[tokio::test]
    async fn drains_with_empty_replies_after_interrupt() {
        let mut harness = spawn_correlator();

        harness.interrupt.cancel();
        let termination = harness.term_rx.recv().await.unwrap();
        assert_eq!(termination.activity, Activity::Correlator);
        assert!(termination.error.is_none());

        // Late lookups resolve empty instead of blocking forever, and the
        // tunnel sees no traffic for them.
        let addresses = timeout(
            Duration::from_secs(1),
            harness.resolver.resolve("late"),
        )
        .await
        .unwrap();
        assert!(addresses.is_empty());

        let quiet = timeout(
            Duration::from_millis(100),
            receive_frame::<_, String>(&mut harness.peer),
        )
        .await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn write_failure_reports_error_and_drains() {
        let mut harness = spawn_correlator();
        drop(harness.peer);

        let addresses = harness.resolver.resolve("gamma").await;
        assert!(addresses.is_empty());

        let termination = harness.term_rx.recv().await.unwrap();
        assert_eq!(termination.activity, Activity::Correlator);
        assert!(matches!(
            termination.error,
            Some(RelayError::TunnelSend(_))
        ));

        assert!(harness.resolver.resolve("after").await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_request_source_terminates_the_loop() {
        let harness = spawn_correlator();
        let mut term_rx = harness.term_rx;
        drop(harness.resolver);
        drop(harness.delivery_tx);

        let termination = term_rx.recv().await.unwrap();
        assert_eq!(termination.activity, Activity::Correlator);
        assert!(termination.error.is_none());
    }
}
