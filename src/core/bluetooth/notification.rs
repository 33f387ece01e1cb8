//! Notification pumping for the `bluest` backend
//! `Characteristic::notify` borrows the characteristic, so a small task owns
//! the handle and forwards payloads into a channel the session can keep.

use bluest::Characteristic;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::core::bluetooth::connection::transport;
use crate::core::bluetooth::device::NotificationStream;
use crate::core::bluetooth::error::{BleError, BleResult};

/// Aborts the forwarding task once the stream is dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Enables notifications on `characteristic` and returns an owned payload stream.
/// Resolves only after the subscription is confirmed.
pub async fn owned_notifications(characteristic: Characteristic) -> BleResult<NotificationStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (subscribed_tx, subscribed_rx) = oneshot::channel();
    let uuid = characteristic.uuid();

    let task = tokio::spawn(async move {
        let mut notifications = match characteristic.notify().await {
            Ok(stream) => {
                let _ = subscribed_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = subscribed_tx.send(Err(transport(e)));
                return;
            }
        };
        while let Some(result) = notifications.next().await {
            if tx.send(result.map_err(transport)).is_err() {
                break;
            }
        }
        debug!("Notification stream of {} ended", uuid);
    });
    let guard = AbortOnDrop(task.abort_handle());

    subscribed_rx.await.map_err(|_| {
        BleError::Transport(format!("subscription task for {} ended early", uuid))
    })??;

    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|item| (item, (rx, guard)))
    });
    Ok(stream.boxed())
}
