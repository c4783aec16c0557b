use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Changed,
    Unchanged { retries: u32 },
    Exhausted,
}

#[derive(Debug)]
pub struct RunState {
    iteration: u32,
    retries: u32,
    max_no_change: u32,
    baseline: HashSet<String>,
}

impl RunState {
    pub fn new(max_no_change: u32) -> Self {
        Self {
            iteration: 0,
            retries: 0,
            max_no_change: max_no_change.max(1),
            baseline: HashSet::new(),
        }
    }

    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    // The baseline starts empty: a first iteration with no labels already
    // counts as unchanged.
    pub fn observe<'a>(&mut self, labels: impl IntoIterator<Item = &'a str>) -> Observation {
        let current: HashSet<String> = labels.into_iter().map(str::to_string).collect();
        if current == self.baseline {
            self.retries += 1;
            if self.retries >= self.max_no_change {
                return Observation::Exhausted;
            }
            return Observation::Unchanged {
                retries: self.retries,
            };
        }
        self.retries = 0;
        self.baseline = current;
        Observation::Changed
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.iteration, self.max_no_change)
    }
}

pub fn progress_percent(iteration: u32, max_no_change: u32) -> u8 {
    let numerator = 100 * u64::from(iteration);
    let denominator = u64::from(iteration) + u64::from(max_no_change);
    if denominator == 0 {
        return 0;
    }
    let ceil = numerator.div_ceil(denominator);
    ceil.min(99) as u8
}
