use std::io::{self, Write};
use std::time::Instant;

/// Elapsed-stamped status lines on stderr; stdout stays reserved for the
/// result record.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.line(msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.line(&format!("[warn] {}", msg.as_ref()));
    }

    pub fn step(&self, label: &str, current: usize, total: usize) {
        let total = total.max(1);
        let current = current.min(total);
        self.line(&format!("{label} {current}/{total}"));
    }

    fn line(&self, msg: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {msg}");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::fmt_elapsed;

    #[test]
    fn elapsed_formats_minutes_and_hours() {
        assert_eq!(fmt_elapsed(0.0), "00:00");
        assert_eq!(fmt_elapsed(75.0), "01:15");
        assert_eq!(fmt_elapsed(3661.0), "01:01:01");
    }
}
