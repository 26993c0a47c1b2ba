//! A payload is a pair of optional opaque buffers: metadata and data.
//!
//! Both sides are [`Bytes`], so cloning a payload is a reference-count bump
//! and slicing out of a frame never copies.

use bytes::Bytes;

/// The metadata/data pair carried by request and payload frames.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Payload {
    metadata: Option<Bytes>,
    data: Option<Bytes>,
}

impl Payload {
    /// Returns a [`PayloadBuilder`].
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::default()
    }

    /// An empty payload: no metadata, no data.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Splits the payload into its two halves.
    pub fn split(self) -> (Option<Bytes>, Option<Bytes>) {
        (self.metadata, self.data)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload {
            metadata: None,
            data: Some(data),
        }
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

/// Builder for [`Payload`].
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    metadata: Option<Bytes>,
    data: Option<Bytes>,
}

impl PayloadBuilder {
    pub fn set_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn set_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn build(self) -> Payload {
        Payload {
            metadata: self.metadata,
            data: self.data,
        }
    }
}
