//! Incremental decoder for the `text/event-stream` format.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
  /// The `event:` label, if any.
  pub event: Option<String>,
  /// All `data:` lines joined with `\n`.
  pub data: String,
  /// Last event id seen on the stream.
  pub id: Option<String>,
}

/// Turns arbitrary byte chunks into frames. Chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence or between `\r` and `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
  line: Vec<u8>,
  skip_lf: bool,
  event: Option<String>,
  data: String,
  has_data: bool,
  last_id: Option<String>,
}

impl SseDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed a chunk, returning every frame it completes.
  pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    for &byte in chunk {
      if self.skip_lf {
        self.skip_lf = false;
        if byte == b'\n' {
          continue;
        }
      }
      match byte {
        b'\n' => self.end_line(&mut frames),
        b'\r' => {
          self.end_line(&mut frames);
          self.skip_lf = true;
        }
        _ => self.line.push(byte),
      }
    }
    frames
  }

  fn end_line(&mut self, frames: &mut Vec<SseFrame>) {
    let raw = std::mem::take(&mut self.line);
    let line = String::from_utf8_lossy(&raw);

    if line.is_empty() {
      self.dispatch(frames);
      return;
    }
    if line.starts_with(':') {
      return;
    }

    let (field, value) = match line.split_once(':') {
      Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
      None => (line.as_ref(), ""),
    };

    match field {
      "event" => self.event = Some(value.to_string()),
      "data" => {
        if self.has_data {
          self.data.push('\n');
        }
        self.data.push_str(value);
        self.has_data = true;
      }
      "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
      _ => {}
    }
  }

  fn dispatch(&mut self, frames: &mut Vec<SseFrame>) {
    let event = self.event.take();
    if !self.has_data {
      return;
    }
    self.has_data = false;
    frames.push(SseFrame {
      event: event.filter(|e| !e.is_empty()),
      data: std::mem::take(&mut self.data),
      id: self.last_id.clone(),
    });
  }
}
