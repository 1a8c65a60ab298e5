use std::sync::Mutex;

/// Counters collected for one rule between two reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StatisticsSnapshot {
    pub(crate) request_count: u64,
    pub(crate) sampled_count: u64,
    pub(crate) borrow_count: u64,
}

/// Decision counters of a rule.
///
/// All three counters are updated together for one decision, and
/// [`Statistics::snapshot`] reads and resets them as one step, so a decision
/// racing a report is counted entirely in one report or the next.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    counters: Mutex<StatisticsSnapshot>,
}

impl Statistics {
    pub(crate) fn record(&self, sampled: bool, borrowed: bool) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.request_count += 1;
        if sampled {
            counters.sampled_count += 1;
        }
        if borrowed {
            counters.borrow_count += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> StatisticsSnapshot {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *counters)
    }
}
