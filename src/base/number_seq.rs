/// Fixed-window sequence of samples with a decaying average on top.
///
/// Used for pause timings: the window answers "what were the last N pauses
/// like" while `davg` tracks the long-running trend.
pub struct TruncatedSeq {
    num: usize,
    sum: f64,
    sum_of_squares: f64,

    davg: f64,
    dvariance: f64,
    alpha: f64,

    sequence: Box<[f64]>,
    next: usize,
}

impl TruncatedSeq {
    pub fn new(length: usize, alpha: f64) -> Self {
        Self {
            num: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            davg: 0.0,
            dvariance: 0.0,
            alpha,
            sequence: vec![0.0; length.max(1)].into_boxed_slice(),
            next: 0,
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn add(&mut self, val: f64) {
        if self.num == 0 {
            self.davg = val;
            self.dvariance = 0.0;
        } else {
            let diff = val - self.davg;
            let incr = self.alpha * diff;
            self.davg += incr;
            self.dvariance = (1.0 - self.alpha) * (self.dvariance + diff * incr);
        }

        let old_val = self.sequence[self.next];

        self.sum -= old_val;
        self.sum_of_squares -= old_val * old_val;

        self.sum += val;
        self.sum_of_squares += val * val;

        self.sequence[self.next] = val;
        self.next = (self.next + 1) % self.sequence.len();

        if self.num < self.sequence.len() {
            self.num += 1;
        }
    }

    pub fn maximum(&self) -> f64 {
        self.sequence[..self.num]
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }

    pub fn last(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            let last_index = (self.next + self.sequence.len() - 1) % self.sequence.len();
            self.sequence[last_index]
        }
    }

    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    pub fn variance(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }

        let result = self.sum_of_squares / self.num as f64 - self.avg() * self.avg();
        result.max(0.0)
    }

    pub fn sd(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn davg(&self) -> f64 {
        self.davg
    }

    pub fn dvariance(&self) -> f64 {
        self.dvariance.max(0.0)
    }
}
