use std::time::Duration;

/// Doubling reconnect delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
  base: Duration,
  max: Duration,
  next: Duration,
}

impl Backoff {
  pub fn new(base: Duration, max: Duration) -> Self {
    let max = max.max(base);
    Self {
      base,
      max,
      next: base,
    }
  }

  /// Delay to wait before the next attempt; advances the sequence.
  pub fn next_delay(&mut self) -> Duration {
    let delay = self.next;
    self.next = self.next.saturating_mul(2).min(self.max);
    delay
  }

  /// Back to the base delay, after a successful open.
  pub fn reset(&mut self) {
    self.next = self.base;
  }
}
