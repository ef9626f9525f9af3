use cidre::cm;

use crate::MediaTime;

impl From<cm::Time> for MediaTime {
    fn from(time: cm::Time) -> Self {
        if !time.is_valid() {
            return MediaTime::new(0, 0);
        }

        MediaTime::new(time.value, time.scale)
    }
}

impl From<MediaTime> for cm::Time {
    fn from(time: MediaTime) -> Self {
        if !time.is_valid() {
            return cm::Time::invalid();
        }

        cm::Time::new(time.value, time.timescale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cm_time_round_trip() {
        let time = MediaTime::new(1001, 30_000);
        let cm_time: cm::Time = time.into();

        assert_eq!(cm_time.value, 1001);
        assert_eq!(cm_time.scale, 30_000);
        assert_eq!(MediaTime::from(cm_time), time);
        assert!(!MediaTime::from(cm::Time::invalid()).is_valid());
    }
}
