//! Best-effort presentation timestamps
//!
//! Containers and capture drivers do not always fill pts, and some fill dts
//! with garbage. We count how often each of them goes backwards and trust the
//! one that misbehaves less. When neither is present the previous guess is
//! extrapolated by one frame duration, starting from zero, so a stream without
//! any timestamps still gets increasing ones.

#[derive(Debug, Default, Clone)]
pub struct BestEffortTimestamp {
    faulty_pts: u64,
    faulty_dts: u64,
    last_pts: Option<i64>,
    last_dts: Option<i64>,
    last_guess: Option<i64>,
}

impl BestEffortTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guess(&mut self, pts: Option<i64>, dts: Option<i64>, duration: i64) -> i64 {
        if let Some(dts) = dts {
            if self.last_dts.is_some_and(|last| dts <= last) {
                self.faulty_dts += 1;
            }
            self.last_dts = Some(dts);
        }
        if let Some(pts) = pts {
            if self.last_pts.is_some_and(|last| pts <= last) {
                self.faulty_pts += 1;
            }
            self.last_pts = Some(pts);
        }

        let guess = match (pts, dts) {
            (Some(pts), _) if self.faulty_pts <= self.faulty_dts || dts.is_none() => pts,
            (_, Some(dts)) => dts,
            (Some(pts), None) => pts,
            (None, None) => self.last_guess.map_or(0, |last| last + duration.max(1)),
        };

        self.last_guess = Some(guess);
        guess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_pts_when_both_monotonic() {
        let mut ts = BestEffortTimestamp::new();
        assert_eq!(ts.guess(Some(10), Some(9), 1), 10);
        assert_eq!(ts.guess(Some(11), Some(10), 1), 11);
    }

    #[test]
    fn falls_back_to_dts_when_pts_is_faulty() {
        let mut ts = BestEffortTimestamp::new();
        ts.guess(Some(5), Some(1), 1);
        ts.guess(Some(3), Some(2), 1);
        assert_eq!(ts.guess(Some(4), Some(3), 1), 3);
    }

    #[test]
    fn extrapolates_when_nothing_is_known() {
        let mut ts = BestEffortTimestamp::new();
        assert_eq!(ts.guess(None, None, 1), 0);
        assert_eq!(ts.guess(None, None, 1), 1);
        ts.guess(Some(100), None, 1);
        assert_eq!(ts.guess(None, None, 4), 104);
        assert_eq!(ts.guess(None, None, 0), 105);
    }
}
