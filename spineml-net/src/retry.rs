use crate::{Error, Result};

/// Counts consecutive reads that returned no data.
///
/// The counter is reset by any read that made progress. Once the count
/// exceeds the configured maximum, recording another empty read results in
/// a timeout error.
#[derive(Debug, Clone)]
pub struct IdleCounter {
    count: u32,
    max: u32,
}

impl IdleCounter {
    pub fn new(max: u32) -> Self {
        IdleCounter { count: 0, max }
    }

    /// Records an empty read.
    pub fn record_idle(&mut self) -> Result<()> {
        self.count = self.count.saturating_add(1);
        if self.count > self.max {
            return Err(Error::TimedOut { reads: self.count });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_only_after_exceeding_max() {
        let mut counter = IdleCounter::new(3);
        assert_eq!(counter.max(), 3);
        for _ in 0..3 {
            assert!(counter.record_idle().is_ok());
        }
        assert!(matches!(
            counter.record_idle(),
            Err(Error::TimedOut { reads: 4 })
        ));
    }

    #[test]
    fn reset_restarts_count() {
        let mut counter = IdleCounter::new(2);
        counter.record_idle().unwrap();
        counter.record_idle().unwrap();
        counter.reset();
        assert_eq!(counter.count(), 0);
        counter.record_idle().unwrap();
        counter.record_idle().unwrap();
        assert!(counter.record_idle().is_err());
    }
}
