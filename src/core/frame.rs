use bytes::Bytes;

/// In-band end-of-message marker
pub const DELIMITER: &str = "<EOF>";

/// Whether a frame arrived as text or inside an encryption envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Plaintext,
    Encrypted,
}

/// One complete unit read off a client stream.
///
/// `raw` is exactly what came over the wire and is what gets relayed for
/// ordinary messages. `text` is the decoded `"<sender>: <body><EOF>"` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    raw: Bytes,
    text: String,
}

impl Frame {
    pub fn plaintext(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: FrameKind::Plaintext,
            raw: Bytes::from(text.clone().into_bytes()),
            text,
        }
    }

    pub fn encrypted(raw: Bytes, text: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Encrypted,
            raw,
            text: text.into(),
        }
    }

    pub(crate) fn from_wire(kind: FrameKind, raw: Bytes, text: String) -> Self {
        Self { kind, raw, text }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_encrypted(&self) -> bool {
        self.kind == FrameKind::Encrypted
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_raw(self) -> Bytes {
        self.raw
    }
}
