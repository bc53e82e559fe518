use std::time::Duration;

/// Latency of the timed candidate iterations, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchStats {
    pub iterations: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub sum_ms: f64,
}

impl Default for BenchStats {
    fn default() -> Self {
        Self {
            iterations: 0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            sum_ms: 0.0,
        }
    }
}

impl BenchStats {
    pub fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1.0e3;
        self.iterations += 1;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.sum_ms += ms;
    }

    /// Mean latency; NaN before the first sample.
    pub fn avg_ms(&self) -> f64 {
        if self.iterations == 0 {
            return f64::NAN;
        }
        self.sum_ms / self.iterations as f64
    }
}

/// Achieved compute and memory rates of a timed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub gflops: f64,
    /// Bytes read and written per iteration over mean latency, in GB/s.
    pub dram_gbps: f64,
}

impl Throughput {
    /// `mflops` and `bytes` describe one iteration.
    pub fn from_stats(stats: &BenchStats, mflops: f64, bytes: usize) -> Self {
        // MFLOP per millisecond is GFLOP per second; MB per millisecond is GB per second.
        let gflops = if stats.sum_ms > 0.0 {
            mflops * stats.iterations as f64 / stats.sum_ms
        } else {
            f64::NAN
        };
        let avg_ms = stats.avg_ms();
        let dram_gbps = if avg_ms > 0.0 {
            bytes as f64 / 1.0e6 / avg_ms
        } else {
            f64::NAN
        };
        Self { gflops, dram_gbps }
    }
}

pub fn format_ms(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.3}")
    } else {
        "n/a".to_string()
    }
}

/// One-line benchmark summary: `min / max / avg ms | gflops | dram throughput`.
pub fn benchmark_line(label: &str, stats: &BenchStats, throughput: &Throughput) -> String {
    format!(
        "{label}: time cost min = {} ms | max = {} ms | avg = {} ms | gflops = {} G | dram thrp = {} GB/s",
        format_ms(stats.min_ms),
        format_ms(stats.max_ms),
        format_ms(stats.avg_ms()),
        format_ms(throughput.gflops),
        format_ms(throughput.dram_gbps),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_min_max_and_mean() {
        let mut stats = BenchStats::default();
        for ms in [4, 2, 6] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.iterations, 3);
        assert!((stats.min_ms - 2.0).abs() < 1e-9);
        assert!((stats.max_ms - 6.0).abs() < 1e-9);
        assert!((stats.avg_ms() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn throughput_uses_total_and_mean_time() {
        let stats = BenchStats {
            iterations: 4,
            min_ms: 1.0,
            max_ms: 3.0,
            sum_ms: 8.0,
        };
        let throughput = Throughput::from_stats(&stats, 10.0, 4_000_000);
        assert!((throughput.gflops - 5.0).abs() < 1e-9);
        assert!((throughput.dram_gbps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_print_placeholders() {
        let stats = BenchStats::default();
        let throughput = Throughput::from_stats(&stats, 1.0, 1);
        let line = benchmark_line("relu", &stats, &throughput);
        assert!(line.starts_with("relu: time cost min = n/a ms"));
        assert!(line.contains("gflops = n/a"));
    }
}
