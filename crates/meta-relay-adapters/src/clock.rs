use meta_relay_core::{ClockPort, RelayError};

#[derive(Debug, Clone, Default)]
pub struct SystemClockAdapter;

impl ClockPort for SystemClockAdapter {
    fn now_secs(&self) -> Result<u64, RelayError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| RelayError::Transport(format!("time error: {e}")))?;
        Ok(now.as_secs())
    }
}
