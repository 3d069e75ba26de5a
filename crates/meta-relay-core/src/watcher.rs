use tokio::sync::broadcast;
use tracing::info;

use crate::domain::{Confirmation, ConfirmationSignal, TransactionHandle};
use crate::ports::{ReceiptPort, RelayError};

const SIGNAL_CAPACITY: usize = 16;

pub struct ConfirmationWatcher<K>
where
    K: ReceiptPort,
{
    pub receipts: K,
    signals: broadcast::Sender<ConfirmationSignal>,
}

impl<K> ConfirmationWatcher<K>
where
    K: ReceiptPort,
{
    pub fn new(receipts: K) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { receipts, signals }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationSignal> {
        self.signals.subscribe()
    }

    /// Wait for inclusion of `handle`, consuming it.
    pub async fn await_once(&self, handle: TransactionHandle) -> Result<Confirmation, RelayError> {
        let receipt = self.receipts.wait_for_receipt(handle.hash()).await?;
        let confirmation = Confirmation::from(receipt);
        info!(
            tx_hash = %confirmation.tx_hash,
            block = confirmation.block_number,
            success = confirmation.success,
            "transaction included"
        );
        // No subscribers is fine.
        let _ = self.signals.send(confirmation.signal());
        Ok(confirmation)
    }
}
