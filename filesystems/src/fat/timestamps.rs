// MS-DOS date/time conversion and the wall-clock time source

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use fatvol_core::{Clock, DosTimestamp};

/// Convert FAT date/time to a calendar time.
/// FAT date: bits 15-9: year (0=1980), bits 8-5: month, bits 4-0: day
/// FAT time: bits 15-11: hours, bits 10-5: minutes, bits 4-0: seconds/2
pub fn to_naive(stamp: DosTimestamp) -> Option<NaiveDateTime> {
    let year = ((stamp.date >> 9) & 0x7F) as i32 + 1980;
    let month = ((stamp.date >> 5) & 0x0F) as u32;
    let day = (stamp.date & 0x1F) as u32;

    let hour = ((stamp.time >> 11) & 0x1F) as u32;
    let minute = ((stamp.time >> 5) & 0x3F) as u32;
    // centiseconds carry the odd second
    let second = ((stamp.time & 0x1F) * 2) as u32 + stamp.centiseconds as u32 / 100;
    let millis = (stamp.centiseconds as u32 % 100) * 10;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)
}

/// Convert a calendar time to FAT date/time, clamped to 1980..=2107
pub fn from_naive(datetime: NaiveDateTime) -> DosTimestamp {
    let year = datetime.year();
    if year < 1980 {
        return DosTimestamp::EPOCH;
    }
    if year > 2107 {
        // 2107-12-31 23:59:58
        return DosTimestamp {
            date: (127 << 9) | (12 << 5) | 31,
            time: (23 << 11) | (59 << 5) | 29,
            centiseconds: 0,
        };
    }

    let second = datetime.second();
    let date = (((year - 1980) as u16) << 9) | ((datetime.month() as u16) << 5) | datetime.day() as u16;
    let time = ((datetime.hour() as u16) << 11) | ((datetime.minute() as u16) << 5) | (second / 2) as u16;
    let centiseconds = ((second % 2) * 100 + datetime.nanosecond().min(999_999_999) / 10_000_000) as u8;

    DosTimestamp {
        date,
        time,
        centiseconds,
    }
}

/// Local wall-clock time via chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DosTimestamp {
        from_naive(Local::now().naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        let epoch = to_naive(DosTimestamp::EPOCH).unwrap();
        assert_eq!(epoch.to_string(), "1980-01-01 00:00:00");
        assert_eq!(from_naive(epoch), DosTimestamp::EPOCH);
    }

    #[test]
    fn test_round_trip() {
        let datetime = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(13, 45, 31, 250)
            .unwrap();
        let stamp = from_naive(datetime);
        assert_eq!(stamp.date, (44 << 9) | (2 << 5) | 29);
        assert_eq!(stamp.time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(stamp.centiseconds, 125);
        assert_eq!(to_naive(stamp), Some(datetime));
    }

    #[test]
    fn test_clamps_range() {
        let early = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(from_naive(early), DosTimestamp::EPOCH);
        let late = NaiveDate::from_ymd_opt(2200, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(to_naive(from_naive(late)).unwrap().to_string(), "2107-12-31 23:59:58");
    }

    #[test]
    fn test_invalid_date() {
        let stamp = DosTimestamp {
            date: 0,
            time: 0,
            centiseconds: 0,
        };
        assert_eq!(to_naive(stamp), None);
    }
}
