//! Response body reader
//!
//! A body is read in a single pass. A bounded preview can be taken first and is
//! handed out again at the start of the stream. Content encodings are removed
//! on the fly, and the raw bytes can be captured for the cache pool, which
//! receives them once the stream reaches its end.

use crate::cache::{CacheEntry, CachePool};
use crate::BodyError;
use flate2::write::{GzDecoder, ZlibDecoder};
use reqwest::header::{HeaderMap, HeaderName, CONTENT_ENCODING, TRANSFER_ENCODING};
use std::io::Write;
use std::sync::Arc;

/// Compressed bytes handed to a decoder between output checks
const FEED_SLICE: usize = 256;

/// Where a body is in its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyState {
    /// Nothing has been read yet
    HeadOnly,
    Reading,

    /// Fully read; later reads return end-of-stream
    Eof,

    /// A read failed; later reads return the same error
    Error(BodyError),
}

enum Source {
    Empty,
    Memory(Option<Vec<u8>>),
    Network(reqwest::Response),
}

impl Source {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BodyError> {
        match self {
            Self::Empty => Ok(None),
            Self::Memory(data) => Ok(data.take()),
            Self::Network(response) => response
                .chunk()
                .await
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .map_err(|e| BodyError::Read(e.to_string())),
        }
    }
}

enum Decoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
    Invalid(BodyError),
}

impl Decoder {
    /// Chooses the decoder for a response's content coding
    fn for_headers(headers: &HeaderMap) -> Self {
        let encodings = content_encodings(headers);
        match encodings.as_slice() {
            [] => Self::Identity,
            [one] => match one.as_str() {
                "gzip" | "x-gzip" => Self::Gzip(GzDecoder::new(Vec::new())),
                "deflate" => Self::Deflate(ZlibDecoder::new(Vec::new())),
                other => Self::Invalid(BodyError::UnsupportedEncoding(other.to_string())),
            },
            _ => Self::Invalid(BodyError::TooManyEncodings(encodings)),
        }
    }

    /// Decodes one raw chunk, failing once the output exceeds `budget`
    ///
    /// Compressed input is written in small slices so a highly compressed chunk
    /// never inflates far past the budget.
    fn feed(&mut self, raw: Vec<u8>, budget: usize) -> Result<Vec<u8>, BodyError> {
        fn bounded<W: Write>(
            decoder: &mut W,
            output: impl Fn(&W) -> usize,
            raw: &[u8],
            budget: usize,
        ) -> Result<(), BodyError> {
            for slice in raw.chunks(FEED_SLICE) {
                decoder
                    .write_all(slice)
                    .map_err(|e| BodyError::Decode(e.to_string()))?;
                if output(decoder) > budget {
                    return Err(BodyError::TooLong { limit: budget });
                }
            }
            Ok(())
        }

        match self {
            Self::Identity => Ok(raw),
            Self::Gzip(d) => {
                bounded(d, |d| d.get_ref().len(), &raw, budget)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Self::Deflate(d) => {
                bounded(d, |d| d.get_ref().len(), &raw, budget)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Self::Invalid(e) => Err(e.clone()),
        }
    }

    /// Flushes the decoder at end of input; the decoder is spent afterwards
    fn finish(&mut self) -> Result<Vec<u8>, BodyError> {
        let decode = |e: std::io::Error| BodyError::Decode(e.to_string());
        let out = match self {
            Self::Identity => Vec::new(),
            Self::Gzip(d) => {
                d.try_finish().map_err(decode)?;
                std::mem::take(d.get_mut())
            }
            Self::Deflate(d) => {
                d.try_finish().map_err(decode)?;
                std::mem::take(d.get_mut())
            }
            Self::Invalid(e) => return Err(e.clone()),
        };
        *self = Self::Identity;
        Ok(out)
    }
}

/// Lists the content codings applied to a body
///
/// `Content-Encoding` is used when present; otherwise the transfer codings other
/// than `chunked` and `identity`.
pub fn content_encodings(headers: &HeaderMap) -> Vec<String> {
    let collect = |name: HeaderName| -> Vec<String> {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty() && v != "identity")
            .collect()
    };

    let content = collect(CONTENT_ENCODING);
    if !content.is_empty() {
        return content;
    }
    collect(TRANSFER_ENCODING)
        .into_iter()
        .filter(|v| v != "chunked")
        .collect()
}

/// Raw bytes collected for the cache pool
struct Capture {
    pool: Arc<CachePool>,
    entry: CacheEntry,
}

/// Single-pass reader over a response body
pub struct Body {
    source: Source,
    decoder: Decoder,
    state: BodyState,

    /// Maximum decoded length
    limit: usize,
    produced: usize,

    /// Decoded bytes read ahead by `preview` and not yet consumed
    pending: Vec<u8>,

    /// Whether any raw byte arrived from the source
    raw_seen: bool,

    capture: Option<Capture>,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("state", &self.state)
            .field("limit", &self.limit)
            .field("produced", &self.produced)
            .field("pending", &self.pending.len())
            .field("capturing", &self.capture.is_some())
            .finish()
    }
}

impl Body {
    fn with_source(source: Source, headers: &HeaderMap, limit: usize) -> Self {
        Self {
            source,
            decoder: Decoder::for_headers(headers),
            state: BodyState::HeadOnly,
            limit,
            produced: 0,
            pending: Vec::new(),
            raw_seen: false,
            capture: None,
        }
    }

    /// A body streamed from the network
    pub fn network(response: reqwest::Response, limit: usize) -> Self {
        let headers = response.headers().clone();
        Self::with_source(Source::Network(response), &headers, limit)
    }

    /// A body replayed from memory, still content-encoded as described by `headers`
    pub fn memory(raw: Vec<u8>, headers: &HeaderMap, limit: usize) -> Self {
        Self::with_source(Source::Memory(Some(raw)), headers, limit)
    }

    /// A body with no content
    pub fn empty() -> Self {
        Self::with_source(Source::Empty, &HeaderMap::new(), 0)
    }

    /// Captures the raw bytes and stores them in `pool` at end of stream
    ///
    /// `entry` carries everything but the body. Nothing is stored if the read
    /// fails or the body outgrows the pool.
    pub fn capture_into(&mut self, pool: Arc<CachePool>, entry: CacheEntry) {
        self.capture = Some(Capture { pool, entry });
    }

    pub fn state(&self) -> &BodyState {
        &self.state
    }

    /// Returns up to `n` leading decoded bytes without consuming them
    ///
    /// The returned bytes are delivered again by the following reads.
    pub async fn preview(&mut self, n: usize) -> Result<&[u8], BodyError> {
        while self.pending.len() < n {
            match self.pull().await? {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => break,
            }
        }
        let end = n.min(self.pending.len());
        Ok(&self.pending[..end])
    }

    /// Reads the next decoded chunk; `None` at end of stream
    pub async fn chunk(&mut self) -> Result<Option<Vec<u8>>, BodyError> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        self.pull().await
    }

    /// Appends the rest of the decoded body to `buf`
    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize, BodyError> {
        let start = buf.len();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.len() - start)
    }

    async fn pull(&mut self) -> Result<Option<Vec<u8>>, BodyError> {
        match &self.state {
            BodyState::Eof => return Ok(None),
            BodyState::Error(e) => return Err(e.clone()),
            BodyState::HeadOnly | BodyState::Reading => {}
        }
        self.state = BodyState::Reading;

        match self.next_decoded().await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.state = BodyState::Eof;
                self.store_capture();
                Ok(None)
            }
            Err(e) => {
                self.state = BodyState::Error(e.clone());
                self.capture = None;
                Err(e)
            }
        }
    }

    async fn next_decoded(&mut self) -> Result<Option<Vec<u8>>, BodyError> {
        loop {
            let out = match self.source.next_chunk().await? {
                Some(raw) => {
                    self.record_raw(&raw);
                    let budget = self.limit.saturating_sub(self.produced);
                    self.decoder
                        .feed(raw, budget)
                        .map_err(|e| match e {
                            BodyError::TooLong { .. } => BodyError::TooLong { limit: self.limit },
                            other => other,
                        })?
                }
                // An empty body has nothing to decode
                None if !self.raw_seen => return Ok(None),
                None => {
                    let out = self.decoder.finish()?;
                    if out.is_empty() {
                        return Ok(None);
                    }
                    out
                }
            };

            if out.is_empty() {
                continue;
            }
            self.produced += out.len();
            if self.produced > self.limit {
                return Err(BodyError::TooLong { limit: self.limit });
            }
            return Ok(Some(out));
        }
    }

    fn record_raw(&mut self, raw: &[u8]) {
        self.raw_seen = self.raw_seen || !raw.is_empty();
        let Some(capture) = &mut self.capture else {
            return;
        };
        if capture.entry.body.len() + raw.len() > capture.pool.max_bytes() {
            tracing::debug!("Body of {} outgrew the cache pool", capture.entry.url);
            self.capture = None;
            return;
        }
        capture.entry.body.extend_from_slice(raw);
    }

    fn store_capture(&mut self) {
        let Some(Capture { pool, entry }) = self.capture.take() else {
            return;
        };
        if entry.control.cache_type == crate::cache::CacheType::NeedValidate
            || !entry.control.is_expired()
        {
            tracing::trace!("Caching {} ({} bytes)", entry.url, entry.size());
            pool.set(entry);
        }
    }
}
