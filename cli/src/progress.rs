use std::io::{stderr, IsTerminal, Write};
use std::time::{Duration, Instant};

/// Returns true once per period, gating how often the meter redraws.
struct Periodic {
    last: Instant,
    period: Duration,
}

impl Periodic {
    fn new(period: Duration) -> Self {
        Periodic {
            last: Instant::now(),
            period,
        }
    }

    fn elapsed(&mut self) -> bool {
        if self.last.elapsed() > self.period {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Percent meter on standard error.
///
/// Drawn only when requested, the size is known and standard error is
/// a terminal, so piping `blksum` somewhere never mixes the meter
/// into captured output.
pub struct Progress {
    total: u64,
    enabled: bool,
    periodic: Periodic,
}

impl Progress {
    pub fn new(requested: bool, total: Option<u64>) -> Progress {
        Progress {
            total: total.unwrap_or(0),
            enabled: requested && total.is_some() && stderr().is_terminal(),
            periodic: Periodic::new(Duration::from_millis(100)),
        }
    }

    pub fn update(&mut self, done: u64) {
        if !self.enabled || !self.periodic.elapsed() {
            return;
        }
        let percent = if self.total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / self.total as f64
        };
        let _ = write!(stderr(), "\r{percent:6.2}% ");
    }

    pub fn finish(&mut self) {
        if self.enabled {
            // Wipe the meter so the digest line stands alone.
            let _ = write!(stderr(), "\r         \r");
        }
    }
}

/// Format a byte count the way humans read it.
pub fn humansize(bytes: u64) -> String {
    const KIB: u64 = 1 << 10;
    const MIB: u64 = 1 << 20;
    const GIB: u64 = 1 << 30;
    const TIB: u64 = 1 << 40;

    if bytes < KIB {
        format!("{bytes} bytes")
    } else if bytes < MIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes < TIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    }
}
