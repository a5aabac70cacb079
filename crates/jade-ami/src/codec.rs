//! Block framing for the manager protocol.
//!
//! Wire format:
//!   banner line (once, no colon)
//!   Key: Value CRLF
//!   Key: Value CRLF
//!   CRLF                      ← blank line ends the block
//!
//! Keys are matched case-insensitively. Values keep their case.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on a single line, banner included.
const MAX_LINE: usize = 8 * 1024;
/// Upper bound on the number of fields in one block.
const MAX_FIELDS: usize = 256;

// ─── Block ───────────────────────────────────────────────────────────────────

/// One key:value block, in wire order. Keys may repeat (e.g. `Variable`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
  fields: Vec<(String, String)>,
}

impl Block {
  /// Start an action block: `Action: <name>`.
  pub fn action(name: &str) -> Self {
    Self::default().with("Action", name)
  }

  pub fn with(mut self, key: &str, value: impl AsRef<str>) -> Self {
    self.push(key, value.as_ref());
    self
  }

  /// Append a field. Line breaks in the value are flattened to spaces so a
  /// value can never terminate the block early.
  pub fn push(&mut self, key: &str, value: &str) {
    let value = value.replace(['\r', '\n'], " ");
    self.fields.push((key.to_owned(), value));
  }

  /// First value for `key`, case-insensitive.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .fields
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(key))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_empty(&self) -> bool { self.fields.is_empty() }

  /// `Event` value, if this is an event block.
  pub fn event(&self) -> Option<&str> { self.get("Event") }

  /// `Response` value, if this is a response block.
  pub fn response(&self) -> Option<&str> { self.get("Response") }

  pub fn action_id(&self) -> Option<&str> { self.get("ActionID") }

  /// Serialise with CRLF line endings and the terminating blank line.
  pub fn encode(&self) -> String {
    let mut out = String::new();
    for (k, v) in &self.fields {
      out.push_str(k);
      out.push_str(": ");
      out.push_str(v);
      out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
  }
}

/// Split `Key: Value`. Lines without a colon yield `None`.
pub(crate) fn parse_line(line: &str) -> Option<(&str, &str)> {
  let (key, value) = line.split_once(':')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some((key, value.trim()))
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Reads blocks off a byte stream.
///
/// The partial line and the partial block live in the reader, and bytes
/// only leave the buffered stream once they are copied into them. A call to
/// [`BlockReader::next_block`] that is cancelled (by a timeout or a
/// `select!`) therefore resumes where it stopped on the next call.
#[derive(Debug)]
pub struct BlockReader<R> {
  inner:       BufReader<R>,
  line:        Vec<u8>,
  partial:     Block,
  seen_banner: bool,
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner:       BufReader::new(inner),
      line:        Vec::new(),
      partial:     Block::default(),
      seen_banner: false,
    }
  }

  /// Move bytes into `self.line` up to and including the next `\n`.
  /// Returns `false` at end of stream. Fails as soon as the line outgrows
  /// [`MAX_LINE`], without waiting for its end.
  async fn fill_line(&mut self) -> Result<bool> {
    loop {
      let available = self.inner.fill_buf().await?;
      if available.is_empty() {
        return Ok(false);
      }
      let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
        Some(end) => (&available[..=end], true),
        None => (available, false),
      };
      let taken = chunk.len();
      self.line.extend_from_slice(chunk);
      self.inner.consume(taken);

      // Two bytes of slack for the CRLF terminator.
      if self.line.len() > MAX_LINE + 2 {
        return Err(Error::MalformedBlock(format!("line longer than {MAX_LINE} bytes")));
      }
      if complete {
        return Ok(true);
      }
    }
  }

  /// The next complete block. `Ok(None)` on a clean end of stream between
  /// blocks; a stream that ends mid-block is an error.
  pub async fn next_block(&mut self) -> Result<Option<Block>> {
    loop {
      if !self.fill_line().await? {
        if self.partial.is_empty() && self.line.is_empty() {
          return Ok(None);
        }
        return Err(Error::ConnectionClosed);
      }

      let raw = std::mem::take(&mut self.line);
      let text = String::from_utf8_lossy(&raw);
      let line = text.trim_end_matches(['\r', '\n']);
      if line.len() > MAX_LINE {
        return Err(Error::MalformedBlock(format!("line longer than {MAX_LINE} bytes")));
      }

      if line.is_empty() {
        if self.partial.is_empty() {
          continue;
        }
        let block = std::mem::take(&mut self.partial);
        debug!(?block, "manager block received");
        return Ok(Some(block));
      }

      match parse_line(line) {
        Some((key, value)) => {
          self.seen_banner = true;
          if self.partial.fields.len() >= MAX_FIELDS {
            return Err(Error::MalformedBlock(format!(
              "more than {MAX_FIELDS} fields"
            )));
          }
          self.partial.fields.push((key.to_owned(), value.to_owned()));
        }
        None if !self.seen_banner => {
          self.seen_banner = true;
          debug!(banner = line, "manager banner");
        }
        // Not key:value; skip it rather than reject the whole block.
        None => debug!(line, "ignoring unrecognised manager line"),
      }
    }
  }
}

/// Write one block and flush.
pub async fn write_block<W: AsyncWrite + Unpin>(writer: &mut W, block: &Block) -> Result<()> {
  // Never log whole actions; Login carries the secret.
  debug!(action = block.get("Action").unwrap_or_default(), "manager block sent");
  writer.write_all(block.encode().as_bytes()).await?;
  writer.flush().await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[test]
  fn encode_uses_crlf_and_blank_line() {
    let block = Block::action("Login").with("Username", "jade").with("Secret", "s3cret");
    assert_eq!(
      block.encode(),
      "Action: Login\r\nUsername: jade\r\nSecret: s3cret\r\n\r\n"
    );
  }

  #[test]
  fn values_cannot_smuggle_line_breaks() {
    let block = Block::action("UserEvent").with("Text", "hello\r\n\r\nAction: Logoff");
    assert_eq!(block.encode().matches("\r\n\r\n").count(), 1);
  }

  #[test]
  fn keys_are_case_insensitive() {
    let block = Block::default().with("ActionID", "7");
    assert_eq!(block.get("actionid"), Some("7"));
    assert_eq!(block.action_id(), Some("7"));
  }

  #[test]
  fn line_splitting() {
    assert_eq!(parse_line("Event: Hangup"), Some(("Event", "Hangup")));
    assert_eq!(parse_line("Text: it's 10:30"), Some(("Text", "it's 10:30")));
    assert_eq!(parse_line("Key:"), Some(("Key", "")));
    assert_eq!(parse_line("no colon here"), None);
    assert_eq!(parse_line(": value"), None);
  }

  #[tokio::test]
  async fn reads_blocks_after_banner() {
    let wire: &[u8] = b"Asterisk Call Manager/5.0.1\r\n\
      Response: Success\r\nActionID: 1\r\nMessage: Authentication accepted\r\n\r\n\
      \r\n\
      Event: FullyBooted\r\nStatus: Fully Booted\r\n\r\n";
    let mut reader = BlockReader::new(wire);

    let first = reader.next_block().await.unwrap().unwrap();
    assert_eq!(first.response(), Some("Success"));
    assert_eq!(first.get("Message"), Some("Authentication accepted"));

    let second = reader.next_block().await.unwrap().unwrap();
    assert_eq!(second.event(), Some("FullyBooted"));

    assert!(reader.next_block().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn bare_lf_is_tolerated() {
    let wire: &[u8] = b"Event: Hangup\nUniqueid: abc\n\n";
    let block = BlockReader::new(wire).next_block().await.unwrap().unwrap();
    assert_eq!(block.get("Uniqueid"), Some("abc"));
  }

  #[tokio::test]
  async fn stream_ending_mid_block_is_an_error() {
    let wire: &[u8] = b"Event: Hangup\r\nUniqueid: abc\r\n";
    let err = BlockReader::new(wire).next_block().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
  }

  #[tokio::test]
  async fn oversized_blocks_are_rejected() {
    let mut wire = String::from("Banner\r\n");
    for i in 0..=MAX_FIELDS {
      wire.push_str(&format!("Key{i}: v\r\n"));
    }
    wire.push_str("\r\n");
    let err = BlockReader::new(wire.as_bytes()).next_block().await.unwrap_err();
    assert!(matches!(err, Error::MalformedBlock(_)));
  }

  #[tokio::test]
  async fn cancelled_read_keeps_the_partial_line() {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut reader = BlockReader::new(server);

    client.write_all(b"Event: Hang").await.unwrap();
    let cut = tokio::time::timeout(Duration::from_millis(20), reader.next_block()).await;
    assert!(cut.is_err());

    client.write_all(b"up\r\nUniqueid: abc\r\n\r\n").await.unwrap();
    let block = reader.next_block().await.unwrap().unwrap();
    assert_eq!(block.event(), Some("Hangup"));
    assert_eq!(block.get("Uniqueid"), Some("abc"));
  }

  #[tokio::test]
  async fn overlong_line_is_rejected_before_it_ends() {
    let (mut client, server) = tokio::io::duplex(4 * MAX_LINE);
    let mut reader = BlockReader::new(server);

    client.write_all(&vec![b'x'; MAX_LINE + 16]).await.unwrap();
    // The writer stays open and the line never ends.
    let err = tokio::time::timeout(Duration::from_secs(5), reader.next_block())
      .await
      .unwrap()
      .unwrap_err();
    assert!(matches!(err, Error::MalformedBlock(_)));
  }
}
