//! Hardware-independent RTC integration.
//!
//! An enabled RTC gives a node an independent time source, which makes it a
//! time authority for mesh time-sync adoption and keeps timestamps sane
//! while the gateway is offline.

/// RTC module families the adapter can report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RtcKind {
    #[default]
    None,
    Ds3231,
    Ds1307,
    Pcf8523,
    Pcf8563,
    SocInternal,
}

/// Implemented by the host for its RTC hardware and handed to
/// `Mesh::enable_rtc`.
pub trait RtcAdapter {
    /// Initialize the hardware; false aborts enablement.
    fn begin(&mut self) -> bool;

    /// Whether the module is present and responding.
    fn is_available(&self) -> bool;

    /// Current Unix timestamp in seconds.
    fn unix_time(&self) -> u32;

    /// Set the clock; false aborts an NTP sync.
    fn set_unix_time(&mut self, timestamp: u32) -> bool;

    fn kind(&self) -> RtcKind;
}

/// Owns the optional adapter and the sync bookkeeping.
#[derive(Default)]
pub(crate) struct RtcManager {
    adapter: Option<Box<dyn RtcAdapter>>,
    last_sync_ms: u64,
}

impl RtcManager {
    pub fn enable(&mut self, mut adapter: Box<dyn RtcAdapter>) -> bool {
        if !adapter.begin() {
            log::error!("rtc: initialization failed");
            return false;
        }
        if !adapter.is_available() {
            log::error!("rtc: module not responding");
            return false;
        }
        log::info!("rtc: enabled ({:?})", adapter.kind());
        self.adapter = Some(adapter);
        true
    }

    pub fn disable(&mut self) {
        self.adapter = None;
        log::info!("rtc: disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.adapter.as_ref().is_some_and(|adapter| adapter.is_available())
    }

    /// Unix time from the module, or 0 when unavailable.
    pub fn time(&self) -> u32 {
        match &self.adapter {
            Some(adapter) if adapter.is_available() => adapter.unix_time(),
            _ => 0,
        }
    }

    pub fn sync_from_ntp(&mut self, timestamp: u32, now_ms: u64) -> bool {
        if timestamp == 0 {
            log::error!("rtc: refusing to sync to zero timestamp");
            return false;
        }
        let Some(adapter) = self.adapter.as_mut() else {
            log::error!("rtc: sync requested while disabled");
            return false;
        };
        if !adapter.set_unix_time(timestamp) {
            log::error!("rtc: failed to set time");
            return false;
        }
        self.last_sync_ms = now_ms;
        log::info!("rtc: synced to {timestamp}");
        true
    }

    /// Milliseconds since the last successful sync, 0 if never synced.
    pub fn time_since_last_sync(&self, now_ms: u64) -> u64 {
        if self.last_sync_ms == 0 {
            return 0;
        }
        now_ms.wrapping_sub(self.last_sync_ms)
    }

    pub fn kind(&self) -> RtcKind {
        match &self.adapter {
            Some(adapter) if adapter.is_available() => adapter.kind(),
            _ => RtcKind::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRtc {
        begin_ok: bool,
        available: bool,
        time: u32,
    }

    impl RtcAdapter for FakeRtc {
        fn begin(&mut self) -> bool {
            self.begin_ok
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn unix_time(&self) -> u32 {
            self.time
        }
        fn set_unix_time(&mut self, timestamp: u32) -> bool {
            self.time = timestamp;
            true
        }
        fn kind(&self) -> RtcKind {
            RtcKind::Ds3231
        }
    }

    #[test]
    fn enable_rejects_failed_begin() {
        let mut manager = RtcManager::default();
        assert!(!manager.enable(Box::new(FakeRtc { begin_ok: false, available: true, time: 0 })));
        assert!(!manager.is_enabled());
    }

    #[test]
    fn enable_rejects_unavailable_module() {
        let mut manager = RtcManager::default();
        assert!(!manager.enable(Box::new(FakeRtc { begin_ok: true, available: false, time: 0 })));
        assert!(!manager.is_enabled());
    }

    #[test]
    fn sync_guards_zero_and_disabled() {
        let mut manager = RtcManager::default();
        assert!(!manager.sync_from_ntp(1_700_000_000, 10));

        assert!(manager.enable(Box::new(FakeRtc { begin_ok: true, available: true, time: 5 })));
        assert!(!manager.sync_from_ntp(0, 10));
        assert!(manager.sync_from_ntp(1_700_000_000, 10));
        assert_eq!(manager.time(), 1_700_000_000);
        assert_eq!(manager.time_since_last_sync(250), 240);
        assert_eq!(manager.kind(), RtcKind::Ds3231);
    }
}
