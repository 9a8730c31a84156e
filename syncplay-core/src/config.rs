use std::time::Duration;

/// The configuration of the sync play coordinator
#[derive(Debug, Clone)]
pub struct SyncPlayConfig {
    /// How much deviation is tolerated from a client supplied timestamp, in milliseconds.
    ///
    /// Reported times further from server time than this are clamped to server time.
    pub time_sync_offset_ms: i64,
    /// How much divergence is tolerated for client position reports, in milliseconds.
    pub max_playback_offset_ms: i64,
    /// The ping assumed for a member before its first ping report, in milliseconds.
    pub default_ping_ms: f64,
    /// How long a group may remain empty before it is removed.
    ///
    /// With a zero grace period, empty groups are removed immediately.
    pub empty_group_grace: Duration,
    /// How often the background sweep checks for empty groups.
    pub sweep_interval: Duration,
}

impl Default for SyncPlayConfig {
    fn default() -> Self {
        Self {
            time_sync_offset_ms: 2000,
            max_playback_offset_ms: 500,
            default_ping_ms: 500.,
            empty_group_grace: Duration::ZERO,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl SyncPlayConfig {
    /// The time sync offset as a chrono duration, for timestamp arithmetic.
    pub fn time_sync_offset(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.time_sync_offset_ms)
    }

    /// The max playback offset in ticks.
    pub fn max_playback_offset_ticks(&self) -> i64 {
        self.max_playback_offset_ms * crate::TICKS_PER_MILLISECOND
    }
}
