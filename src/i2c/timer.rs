// Licensed under the Apache-2.0 license

//! Tick-driven timeout with a bounded retry budget.

/// What a single tick produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerEvent {
    /// A period elapsed but retries remain. Informational only.
    Timeout,
    /// The last retry period elapsed; the transaction must be aborted.
    RetryExhausted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryTimer {
    period: u16,
    count: u16,
    budget_reload: u8,
    retry_budget: u8,
    start: bool,
    active: bool,
    expired: bool,
    retry_exhausted: bool,
}

impl RetryTimer {
    #[must_use]
    pub const fn new(period: u16, retry_budget: u8) -> Self {
        Self {
            period,
            count: 0,
            budget_reload: retry_budget,
            retry_budget,
            start: false,
            active: false,
            expired: false,
            retry_exhausted: false,
        }
    }

    /// Starts the countdown unless it is already running.
    ///
    /// A fresh arm reloads both the period and the retry budget.
    pub fn arm(&mut self) {
        self.start = true;
        if !self.active {
            self.count = self.period;
            self.retry_budget = self.budget_reload;
            self.active = true;
            self.expired = false;
            self.retry_exhausted = false;
        }
    }

    pub fn disarm(&mut self) {
        self.start = false;
        self.active = false;
    }

    /// Returns the timer to its power-on state.
    pub fn reset(&mut self) {
        *self = Self::new(self.period, self.budget_reload);
    }

    /// Advances one poll tick.
    pub fn tick(&mut self) -> Option<TimerEvent> {
        if !self.active {
            return None;
        }
        self.count = self.count.saturating_sub(1);
        if self.count > 0 {
            return None;
        }
        self.retry_budget = self.retry_budget.saturating_sub(1);
        self.expired = true;
        if self.retry_budget == 0 {
            self.retry_exhausted = true;
            self.active = false;
            self.start = false;
            Some(TimerEvent::RetryExhausted)
        } else {
            self.count = self.period;
            Some(TimerEvent::Timeout)
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.expired
    }

    #[must_use]
    pub const fn is_retry_exhausted(&self) -> bool {
        self.retry_exhausted
    }

    #[must_use]
    pub const fn retries_left(&self) -> u8 {
        self.retry_budget
    }

    #[must_use]
    pub const fn period(&self) -> u16 {
        self.period
    }
}
