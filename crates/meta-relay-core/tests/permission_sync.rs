use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use tokio::sync::Notify;

use meta_relay_core::{
    ConfirmationSignal, ErrorKind, PermissionKey, PermissionReadPort, PermissionState,
    PermissionStateSync, RelayError,
};

/// Permission reader whose next read can be parked until released.
#[derive(Default)]
struct GatedReader {
    values: Mutex<HashMap<PermissionKey, u8>>,
    park_next: AtomicBool,
    gate: Notify,
}

impl GatedReader {
    fn set(&self, key: PermissionKey, level: u8) {
        self.values.lock().expect("values").insert(key, level);
    }
}

impl PermissionReadPort for GatedReader {
    async fn read_operator_permission(
        &self,
        _agreement: Address,
        key: PermissionKey,
    ) -> Result<PermissionState, RelayError> {
        // The value is taken when the read is issued, like a node answering
        // at the current head.
        let level = self
            .values
            .lock()
            .map_err(|e| RelayError::Transport(e.to_string()))?
            .get(&key)
            .copied()
            .unwrap_or_default();
        if self.park_next.swap(false, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        Ok(PermissionState(level))
    }
}

fn key(owner: u8) -> PermissionKey {
    PermissionKey {
        token: Address::with_last_byte(0xa1),
        owner: Address::with_last_byte(owner),
        operator: Address::with_last_byte(0xb2),
    }
}

fn sync() -> PermissionStateSync<GatedReader> {
    PermissionStateSync::new(GatedReader::default(), Address::with_last_byte(0x20))
}

#[tokio::test]
async fn mount_reads_the_tracked_key() {
    let sync = sync();
    sync.reader.set(key(1), 4);
    assert_eq!(sync.current(), None);

    let state = sync.mount(key(1)).await.expect("mount");
    assert_eq!(state, PermissionState(4));
    assert_eq!(sync.current(), Some(PermissionState(4)));
    assert_eq!(sync.tracked_key().expect("key"), Some(key(1)));
}

#[tokio::test]
async fn late_stale_read_does_not_overwrite_newer_value() {
    let sync = sync();
    sync.mount(key(1)).await.expect("mount");

    sync.reader.park_next.store(true, Ordering::SeqCst);
    let (stale, ()) = tokio::join!(sync.refresh_tracked(), async {
        // The parked read saw 0; the chain moves on and a newer read lands first.
        tokio::task::yield_now().await;
        sync.reader.set(key(1), 4);
        let fresh = sync.refresh_tracked().await.expect("fresh read");
        assert_eq!(fresh, PermissionState(4));
        sync.reader.gate.notify_waiters();
    });

    assert_eq!(stale.expect("stale read"), PermissionState::NONE);
    let snapshot = sync.snapshot().expect("snapshot");
    assert_eq!(snapshot.state, PermissionState(4));
    assert_eq!(snapshot.sequence, 3);
}

#[tokio::test]
async fn owner_change_switches_the_tracked_key() {
    let sync = sync();
    sync.reader.set(key(1), 4);
    sync.reader.set(key(2), 1);
    sync.mount(key(1)).await.expect("mount");

    let state = sync
        .owner_changed(Address::with_last_byte(2))
        .await
        .expect("owner change");
    assert_eq!(state, PermissionState(1));
    assert_eq!(sync.snapshot().map(|s| s.key), Some(key(2)));

    // Reads for a key no longer tracked are returned but not stored.
    let other = sync.refresh(key(1)).await.expect("untracked read");
    assert_eq!(other, PermissionState(4));
    assert_eq!(sync.current(), Some(PermissionState(1)));
}

#[tokio::test]
async fn only_successful_confirmations_trigger_a_refresh() {
    let sync = sync();
    sync.mount(key(1)).await.expect("mount");
    sync.reader.set(key(1), 4);

    let failed = ConfirmationSignal {
        tx_hash: B256::repeat_byte(1),
        success: false,
    };
    assert_eq!(sync.handle_signal(&failed).await.expect("failed signal"), None);
    assert_eq!(sync.current(), Some(PermissionState::NONE));

    let confirmed = ConfirmationSignal {
        tx_hash: B256::repeat_byte(2),
        success: true,
    };
    assert_eq!(
        sync.handle_signal(&confirmed).await.expect("signal"),
        Some(PermissionState(4))
    );
    assert_eq!(sync.current(), Some(PermissionState(4)));
}

#[tokio::test]
async fn refresh_requires_a_mounted_key() {
    let sync = sync();
    let err = sync.refresh_tracked().await.expect_err("not mounted");
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(sync
        .owner_changed(Address::with_last_byte(1))
        .await
        .is_err());
}
