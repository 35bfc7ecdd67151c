//! Dispatch surface: a single binary-or-string handler, per spec.md §4.7.

/// The two mutually-exclusive handler shapes a node can register.
///
/// Setting one clears the other — there is no variant holding both, so
/// "binary and string handler both set" is unrepresentable rather than a
/// runtime invariant to maintain.
pub enum Handler<'b> {
    /// No handler registered: validated frames are dropped silently.
    None,
    /// `(header, payload)`.
    Binary(&'b mut dyn FnMut(&[u8], &[u8])),
    /// `(channel, payload)`, both valid UTF-8.
    Str(&'b mut dyn FnMut(&str, &str)),
}

impl<'b> Handler<'b> {
    /// Routes a validated frame. `header`/`payload` are the two slices
    /// `FrameBuf` exposes post-validation (the buffer's null separator has
    /// already been stripped out of both).
    ///
    /// For the string path, a header containing an embedded NUL is
    /// dropped rather than delivered, per spec.md §4.7: a NUL in a channel
    /// name would let a shorter registered channel alias a longer one.
    pub fn dispatch(&mut self, header: &[u8], payload: &[u8]) {
        match self {
            Handler::None => {}
            Handler::Binary(f) => f(header, payload),
            Handler::Str(f) => {
                if header.contains(&0) {
                    return;
                }
                if let (Ok(channel), Ok(text)) = (
                    core::str::from_utf8(header),
                    core::str::from_utf8(payload),
                ) {
                    f(channel, text);
                }
            }
        }
    }
}

impl<'b> Default for Handler<'b> {
    fn default() -> Self {
        Handler::None
    }
}
