use std::sync::Mutex;

use alloy::primitives::Address;
use tracing::debug;

use crate::domain::{ConfirmationSignal, PermissionKey, PermissionState};
use crate::ports::{PermissionReadPort, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub key: PermissionKey,
    pub state: PermissionState,
    /// Issue order of the read that produced this snapshot.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct SyncState {
    key: Option<PermissionKey>,
    current: Option<PermissionSnapshot>,
    issued: u64,
}

/// Mirrors one on-chain permission value. Never written locally.
pub struct PermissionStateSync<A>
where
    A: PermissionReadPort,
{
    pub reader: A,
    agreement: Address,
    inner: Mutex<SyncState>,
}

impl<A> PermissionStateSync<A>
where
    A: PermissionReadPort,
{
    pub fn new(reader: A, agreement: Address) -> Self {
        Self {
            reader,
            agreement,
            inner: Mutex::new(SyncState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SyncState>, RelayError> {
        self.inner
            .lock()
            .map_err(|e| RelayError::Transport(format!("permission sync lock poisoned: {e}")))
    }

    /// Read `key` from the agreement.
    ///
    /// The tracked snapshot only moves forward: a read that finishes after a
    /// later-issued read for the same key is returned but not stored.
    pub async fn refresh(&self, key: PermissionKey) -> Result<PermissionState, RelayError> {
        let sequence = {
            let mut g = self.lock()?;
            g.issued = g.issued.saturating_add(1);
            g.issued
        };

        let state = self
            .reader
            .read_operator_permission(self.agreement, key)
            .await?;

        let mut g = self.lock()?;
        let newer = g.current.map_or(true, |c| c.key != key || c.sequence < sequence);
        if g.key == Some(key) && newer {
            g.current = Some(PermissionSnapshot {
                key,
                state,
                sequence,
            });
        }
        debug!(token = %key.token, owner = %key.owner, operator = %key.operator, %state, sequence, "permission read");
        Ok(state)
    }

    /// Start tracking `key` and read it.
    pub async fn mount(&self, key: PermissionKey) -> Result<PermissionState, RelayError> {
        {
            let mut g = self.lock()?;
            g.key = Some(key);
            g.current = None;
        }
        self.refresh(key).await
    }

    pub async fn owner_changed(&self, owner: Address) -> Result<PermissionState, RelayError> {
        let key = {
            let g = self.lock()?;
            let mut key = g
                .key
                .ok_or_else(|| RelayError::Config("permission sync is not mounted".to_owned()))?;
            key.owner = owner;
            key
        };
        self.mount(key).await
    }

    /// Explicit user-requested refresh of the tracked key.
    pub async fn refresh_tracked(&self) -> Result<PermissionState, RelayError> {
        let key = self
            .tracked_key()?
            .ok_or_else(|| RelayError::Config("permission sync is not mounted".to_owned()))?;
        self.refresh(key).await
    }

    /// Re-read after a successful confirmation; failed ones leave the value alone.
    pub async fn handle_signal(
        &self,
        signal: &ConfirmationSignal,
    ) -> Result<Option<PermissionState>, RelayError> {
        if !signal.success {
            return Ok(None);
        }
        match self.tracked_key()? {
            Some(key) => self.refresh(key).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn tracked_key(&self) -> Result<Option<PermissionKey>, RelayError> {
        Ok(self.lock()?.key)
    }

    pub fn current(&self) -> Option<PermissionState> {
        self.snapshot().map(|s| s.state)
    }

    pub fn snapshot(&self) -> Option<PermissionSnapshot> {
        self.inner.lock().ok().and_then(|g| g.current)
    }
}
