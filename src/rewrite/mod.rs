//! Response body rewriting
//!
//! Upstream responses embed absolute upstream URLs. Before a body is stored
//! it is streamed through a chain of [`Replacer`] stages that point those
//! URLs back at the proxy. Each stage holds bounded state, so bodies are
//! never buffered whole.
//!
//! | Kind | Stages |
//! |------|--------|
//! | Artifact | none |
//! | RoleVersionList | prepend on `next_link`, origin swap on `download_url` |
//! | everything else | upstream base URL → repository URL |

pub mod json;
pub mod string;

pub use json::JsonFieldReplacer;
pub use string::StringReplacer;

use crate::error::{ProxyError, ProxyResult};
use crate::kind::Rewrite;
use crate::repository::Repository;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read size used when piping bodies
pub const CHUNK_SIZE: usize = 8 * 1024;

/// One streaming substitution pass
pub trait Replacer: Send {
    /// Consume a chunk, appending whatever can already be emitted
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>);

    /// End of input: emit anything still held back
    fn finish(&mut self, out: &mut Vec<u8>);
}

/// Replacers applied in sequence, each seeing the previous one's output
#[derive(Default)]
pub struct ReplacerChain {
    stages: Vec<Box<dyn Replacer>>,
}

impl ReplacerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl Replacer + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn run(&mut self, input: &[u8], finishing: bool, out: &mut Vec<u8>) {
        let mut carry = input.to_vec();
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(carry.len());
            stage.feed(&carry, &mut next);
            if finishing {
                stage.finish(&mut next);
            }
            carry = next;
        }
        out.extend_from_slice(&carry);
    }
}

impl Replacer for ReplacerChain {
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.run(input, false, out);
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        self.run(&[], true, out);
    }
}

/// Build the stages for a rewrite strategy; `None` means pass-through
pub fn chain_for(rewrite: Rewrite, repository: &Repository) -> Option<ReplacerChain> {
    match rewrite {
        Rewrite::PassThrough => None,
        Rewrite::PagedVersionList => Some(
            ReplacerChain::new()
                .then(JsonFieldReplacer::prepend(
                    "next_link",
                    &repository.path_prefix(),
                ))
                .then(JsonFieldReplacer::replace(
                    "download_url",
                    &repository.role_download_url,
                    &format!("{}/download", repository.url),
                )),
        ),
        Rewrite::UpstreamUrl => Some(ReplacerChain::new().then(StringReplacer::new(
            repository.upstream_url.clone(),
            format!("{}/", repository.url),
        ))),
    }
}

/// Stream `reader` through `chain` into `writer`.
///
/// The reader is consumed and dropped on every path; the writer is flushed
/// and shut down on success. Returns the number of bytes written.
pub async fn pipe<R, W>(mut reader: R, mut chain: Option<ReplacerChain>, writer: &mut W) -> ProxyResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(CHUNK_SIZE);
    let mut written = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| ProxyError::io("reading body", e))?;
        if n == 0 {
            break;
        }

        out.clear();
        match chain.as_mut() {
            Some(chain) => chain.feed(&buf[..n], &mut out),
            None => out.extend_from_slice(&buf[..n]),
        }
        writer
            .write_all(&out)
            .await
            .map_err(|e| ProxyError::io("writing rewritten body", e))?;
        written += out.len() as u64;
    }

    out.clear();
    if let Some(chain) = chain.as_mut() {
        chain.finish(&mut out);
    }
    writer
        .write_all(&out)
        .await
        .map_err(|e| ProxyError::io("writing rewritten body", e))?;
    written += out.len() as u64;

    writer
        .shutdown()
        .await
        .map_err(|e| ProxyError::io("closing rewritten body", e))?;
    Ok(written)
}
