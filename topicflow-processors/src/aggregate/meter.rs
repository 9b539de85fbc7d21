/// Number of samples kept for the percentiles.
const RESERVOIR_SIZE: usize = 1028;

/// Names of the summary fields produced by [`Meter::summary`], in output order.
pub const SUMMARY_FIELDS: [&str; 9] = ["count", "sum", "min", "max", "mean", "p50", "p75", "p95", "p99"];

const PERCENTILES: [f64; 4] = [0.5, 0.75, 0.95, 0.99];

/// Running distribution of one metric within a time bin. Exact count, sum, min and max;
/// percentiles come from a uniform sample (Vitter's algorithm R) of bounded size.
#[derive(Debug, Clone, Default)]
pub struct Meter {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    reservoir: Vec<f64>,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;

        if self.reservoir.len() < RESERVOIR_SIZE {
            self.reservoir.push(value);
        } else {
            let slot = rand::random_range(0..self.count) as usize;
            if slot < RESERVOIR_SIZE {
                self.reservoir[slot] = value;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Summary values named by [`SUMMARY_FIELDS`]. An empty meter summarizes to zeros.
    pub fn summary(&self) -> Vec<(&'static str, f64)> {
        if self.count == 0 {
            return SUMMARY_FIELDS.iter().map(|f| (*f, 0.0)).collect();
        }
        let mut sorted = self.reservoir.clone();
        sorted.sort_by(f64::total_cmp);

        let mut summary = vec![
            ("count", self.count as f64),
            ("sum", self.sum),
            ("min", self.min),
            ("max", self.max),
            ("mean", self.sum / self.count as f64),
        ];
        for (field, q) in SUMMARY_FIELDS[5..].iter().zip(PERCENTILES) {
            summary.push((*field, quantile(&sorted, q)));
        }
        summary
    }
}

/// Nearest-rank quantile of a sorted, non-empty sample.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
