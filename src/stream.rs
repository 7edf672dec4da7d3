//! Streaming of generated text fragments to the caller.

use crossbeam_channel::{Receiver, Sender};

/// Receives text fragments as generation produces them.
///
/// Called on the generating thread while the session lock is held: an
/// observer must return promptly and must not call back into the session.
pub trait TokenObserver {
    fn on_token(&mut self, fragment: &str);
}

impl<F> TokenObserver for F
where
    F: FnMut(&str),
{
    fn on_token(&mut self, fragment: &str) {
        self(fragment)
    }
}

/// Forwards fragments over a channel so another thread can render them.
///
/// Once the receiver is gone, further fragments are dropped silently and
/// generation carries on.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<String>,
    disconnected: bool,
}

impl ChannelObserver {
    pub fn new(tx: Sender<String>) -> Self {
        Self {
            tx,
            disconnected: false,
        }
    }

    /// Observer plus the unbounded receiving end.
    pub fn channel() -> (Self, Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

impl TokenObserver for ChannelObserver {
    fn on_token(&mut self, fragment: &str) {
        if self.disconnected {
            return;
        }
        if self.tx.send(fragment.to_string()).is_err() {
            tracing::debug!("fragment receiver dropped, discarding further output");
            self.disconnected = true;
        }
    }
}

/// Delivers non-empty fragments to an optional observer.
pub(crate) struct StreamEmitter<'o> {
    observer: Option<&'o mut dyn TokenObserver>,
    emitted: usize,
}

impl<'o> StreamEmitter<'o> {
    pub(crate) fn new(observer: Option<&'o mut dyn TokenObserver>) -> Self {
        Self {
            observer,
            emitted: 0,
        }
    }

    pub(crate) fn emit(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.emitted += 1;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_token(fragment);
        }
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Forwards fragments up to the first occurrence of a stop sequence.
///
/// Text that could be the start of the stop sequence is held back until it
/// is ruled out; [`StopFilter::finish`] releases it when no match came.
pub(crate) struct StopFilter<'o> {
    stop: Option<String>,
    seen: String,
    forwarded: usize,
    stopped: bool,
    observer: Option<&'o mut dyn TokenObserver>,
}

impl<'o> StopFilter<'o> {
    pub(crate) fn new(stop: Option<&str>, observer: Option<&'o mut dyn TokenObserver>) -> Self {
        Self {
            stop: stop.filter(|s| !s.is_empty()).map(str::to_string),
            seen: String::new(),
            forwarded: 0,
            stopped: false,
            observer,
        }
    }

    /// Release held-back text unless the stop sequence was seen.
    pub(crate) fn finish(&mut self) {
        if !self.stopped {
            self.forward(self.seen.len());
        }
    }

    fn forward(&mut self, end: usize) {
        if end <= self.forwarded {
            return;
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_token(&self.seen[self.forwarded..end]);
        }
        self.forwarded = end;
    }
}

impl TokenObserver for StopFilter<'_> {
    fn on_token(&mut self, fragment: &str) {
        if self.stopped {
            return;
        }
        self.seen.push_str(fragment);

        let (end, matched) = match self.stop.as_deref() {
            None => (self.seen.len(), false),
            Some(stop) => match self.seen.find(stop) {
                Some(i) => (i, true),
                None => (self.seen.len() - partial_match(&self.seen, stop), false),
            },
        };
        self.forward(end);
        if matched {
            tracing::debug!("stop sequence reached, holding back the rest");
            self.stopped = true;
        }
    }
}

/// Length of the longest proper prefix of `stop` that `text` ends with.
fn partial_match(text: &str, stop: &str) -> usize {
    (1..stop.len())
        .rev()
        .find(|&k| stop.is_char_boundary(k) && text.ends_with(&stop[..k]))
        .unwrap_or(0)
}
