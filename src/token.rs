/// Associates readiness events with the source that produced them.
///
/// `Token` is a wrapper around `usize` chosen by the caller at registration
/// time and handed back by [`Poll::poll`] inside each [`Event`], so a single
/// poller can watch many sources without a descriptor lookup table.
///
/// [`Poll::poll`]: crate::Poll::poll
/// [`Event`]: crate::event::Event
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}
