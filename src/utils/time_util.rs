use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// seconds since [UNIX_EPOCH], truncated to the 32 bits the format stores
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |now| now.as_secs() as u32)
}

/// convert an on-disk timestamp back to a [SystemTime],
/// the format has no sub-second resolution
pub fn to_system_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

/// convert a [SystemTime] to an on-disk timestamp,
/// times before [UNIX_EPOCH] are clamped to it
pub fn from_system_time(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_drops_sub_second_part() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 999_999_999);
        let secs = from_system_time(time);
        assert_eq!(secs, 1_700_000_000);
        assert_eq!(
            to_system_time(secs),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_before_epoch_is_clamped() {
        let time = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(from_system_time(time), 0);
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(now() > 1_577_836_800);
    }
}
