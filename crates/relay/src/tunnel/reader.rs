//! Inbound half of the tunnel: decodes framed address lists and hands
//! them to the correlator. This task never writes to the tunnel.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::listener::{Activity, Termination};
use crate::tunnel::framing;

pub(crate) async fn run_reader<R>(
    mut tunnel: R,
    deliveries: mpsc::Sender<Vec<String>>,
    stop: CancellationToken,
    terminations: mpsc::Sender<Termination>,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        let decoded = tokio::select! {
            biased;
            _ = stop.cancelled() => break None,
            decoded = framing::receive_message(&mut tunnel) => decoded,
        };

        match decoded {
            Ok(Some(addresses)) => {
                if deliveries.send(addresses).await.is_err() {
                    // Correlator is gone; nothing left to deliver to.
                    break None;
                }
            }
            // Clean end of stream.
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };

    debug!("tunnel reader closed");
    let _ = terminations
        .send(Termination {
            activity: Activity::Reader,
            error,
        })
        .await;
}
