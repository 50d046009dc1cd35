//! LLM spend budgets: per-run cap plus daily/monthly windows.
//!
//! Budgets are enforced *before* any external call: a step whose estimated
//! cost would breach a cap is rejected with `BudgetExceeded`. Estimates are
//! reserved up front and adjusted to actuals on completion, so the running
//! total never silently drifts past the cap between check and call.

use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::adapters::ClockAdapter;
use crate::error::{AutoPrError, Result};

/// Per-run spend budget (USD).
#[derive(Debug)]
pub struct RunBudget {
    cap: f64,
    spent: Mutex<f64>,
}

impl RunBudget {
    pub fn new(cap: f64) -> Self {
        Self {
            cap,
            spent: Mutex::new(0.0),
        }
    }

    /// A budget that never rejects (for workflows without LLM steps).
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY)
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn spent(&self) -> f64 {
        *self.spent.lock()
    }

    pub fn remaining(&self) -> f64 {
        (self.cap - self.spent()).max(0.0)
    }

    /// Reserve an estimated spend; rejects before any external call.
    pub fn try_charge(&self, estimated: f64) -> Result<()> {
        let mut spent = self.spent.lock();
        if *spent + estimated > self.cap {
            return Err(AutoPrError::BudgetExceeded {
                scope: "run".to_string(),
                estimated,
                remaining: (self.cap - *spent).max(0.0),
            });
        }
        *spent += estimated;
        Ok(())
    }

    /// Adjust a reservation to the actual cost after the call.
    pub fn settle(&self, estimated: f64, actual: f64) {
        let mut spent = self.spent.lock();
        *spent = (*spent - estimated + actual).max(0.0);
    }

    /// Release a reservation whose call never completed.
    pub fn release(&self, estimated: f64) {
        self.settle(estimated, 0.0);
    }
}

#[derive(Debug)]
struct LedgerWindows {
    day: NaiveDate,
    day_spent: f64,
    month: (i32, u32),
    month_spent: f64,
}

/// Process-wide daily/monthly spend ledger.
pub struct BudgetLedger {
    daily_cap: f64,
    monthly_cap: f64,
    clock: Arc<dyn ClockAdapter>,
    windows: Mutex<LedgerWindows>,
}

impl BudgetLedger {
    pub fn new(daily_cap: f64, monthly_cap: f64, clock: Arc<dyn ClockAdapter>) -> Self {
        let now = clock.now().date_naive();
        Self {
            daily_cap,
            monthly_cap,
            clock,
            windows: Mutex::new(LedgerWindows {
                day: now,
                day_spent: 0.0,
                month: (now.year(), now.month()),
                month_spent: 0.0,
            }),
        }
    }

    fn roll(&self, windows: &mut LedgerWindows) {
        let today = self.clock.now().date_naive();
        if windows.day != today {
            windows.day = today;
            windows.day_spent = 0.0;
        }
        let month = (today.year(), today.month());
        if windows.month != month {
            windows.month = month;
            windows.month_spent = 0.0;
        }
    }

    /// Remaining spend across the tighter of the two windows.
    pub fn remaining(&self) -> f64 {
        let mut windows = self.windows.lock();
        self.roll(&mut windows);
        let day_left = (self.daily_cap - windows.day_spent).max(0.0);
        let month_left = (self.monthly_cap - windows.month_spent).max(0.0);
        day_left.min(month_left)
    }

    /// Reserve an estimated spend against both windows.
    pub fn try_charge(&self, estimated: f64) -> Result<()> {
        let mut windows = self.windows.lock();
        self.roll(&mut windows);
        if windows.day_spent + estimated > self.daily_cap {
            return Err(AutoPrError::BudgetExceeded {
                scope: "daily".to_string(),
                estimated,
                remaining: (self.daily_cap - windows.day_spent).max(0.0),
            });
        }
        if windows.month_spent + estimated > self.monthly_cap {
            return Err(AutoPrError::BudgetExceeded {
                scope: "monthly".to_string(),
                estimated,
                remaining: (self.monthly_cap - windows.month_spent).max(0.0),
            });
        }
        windows.day_spent += estimated;
        windows.month_spent += estimated;
        Ok(())
    }

    pub fn settle(&self, estimated: f64, actual: f64) {
        let mut windows = self.windows.lock();
        windows.day_spent = (windows.day_spent - estimated + actual).max(0.0);
        windows.month_spent = (windows.month_spent - estimated + actual).max(0.0);
    }

    pub fn release(&self, estimated: f64) {
        self.settle(estimated, 0.0);
    }
}
