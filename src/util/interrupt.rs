//! Cooperative interruption of blocking waits.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// A cloneable interruption flag.
///
/// [`Interrupt::interrupt`] raises the flag; the next blocking wait that
/// watches it (see [`Task::wait`](super::Task::wait)) aborts with
/// `Cancelled` and clears the flag again.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Interrupt { tx, rx }
    }

    /// Raise the flag. Raising an already raised flag has no further effect.
    pub fn interrupt(&self) {
        let _ = self.tx.try_send(());
    }

    /// Whether the flag is currently raised, without clearing it.
    pub fn is_interrupted(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Clear the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
