//! Channel-backed source fed by an external sensing process.
//!
//! The sensing loop runs at its own frame rate and pushes one reading per
//! frame. Each tick the controller drains whatever arrived since the last
//! tick and keeps only the newest reading, so many frames per second
//! collapse into a single sample.

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use super::{clamp_score, ScoreSource, SourceError};

/// Readings buffered between ticks before the producer blocks.
const CHANNEL_CAPACITY: usize = 1_024;

/// A source that reads the latest score pushed over a channel.
pub struct ChannelSource {
    receiver: Receiver<Option<u8>>,
}

impl ChannelSource {
    /// Create a source together with the sender the sensing loop writes to.
    pub fn new() -> (Sender<Option<u8>>, Self) {
        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        (sender, Self { receiver })
    }

    /// Wrap an existing receiver.
    pub fn from_receiver(receiver: Receiver<Option<u8>>) -> Self {
        Self { receiver }
    }

    /// Spawn a thread that parses one reading per line from `reader`.
    ///
    /// Blank lines and `none` mean "no face this frame". Lines that do not
    /// parse are skipped. The source disconnects when the reader hits EOF.
    pub fn spawn_line_reader<R>(reader: R) -> std::io::Result<(Self, LineReaderHandle)>
    where
        R: BufRead + Send + 'static,
    {
        let (sender, source) = Self::new();
        let handle = thread::Builder::new()
            .name("score-line-reader".into())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!("Score input read error: {}", e);
                            break;
                        }
                    };

                    let reading = match parse_reading(&line) {
                        Some(reading) => reading,
                        None => {
                            tracing::debug!("Skipping unparseable score line {:?}", line);
                            continue;
                        }
                    };

                    if sender.send(reading).is_err() {
                        break;
                    }
                }
                tracing::info!("Score input closed");
            })?;

        Ok((source, LineReaderHandle { handle }))
    }
}

impl ScoreSource for ChannelSource {
    fn current_score(&mut self) -> Result<Option<u8>, SourceError> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(reading) => latest = Some(reading),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return Err(SourceError::Disconnected);
                    }
                    break;
                }
            }
        }

        // Nothing new since the last tick counts as no signal.
        Ok(latest.flatten())
    }
}

/// Handle to the background line reader thread.
pub struct LineReaderHandle {
    handle: JoinHandle<()>,
}

impl LineReaderHandle {
    /// Whether the reader thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn parse_reading(line: &str) -> Option<Option<u8>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed == "-" {
        return Some(None);
    }
    trimmed.parse::<i64>().ok().map(|raw| Some(clamp_score(raw)))
}
