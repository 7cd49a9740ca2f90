//! Literal substring replacement

use crate::rewrite::Replacer;

/// Position of the first occurrence of `needle` in `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Replace every occurrence of `from` in a complete buffer
pub(crate) fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = find(rest, from) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Streaming replacement of a literal byte string.
///
/// Holds back at most `from.len() - 1` bytes between chunks so a match
/// split across a chunk boundary is still found.
#[derive(Debug, Clone)]
pub struct StringReplacer {
    from: Vec<u8>,
    to: Vec<u8>,
    pending: Vec<u8>,
}

impl StringReplacer {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into().into_bytes(),
            to: to.into().into_bytes(),
            pending: Vec::new(),
        }
    }
}

impl Replacer for StringReplacer {
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if self.from.is_empty() {
            out.extend_from_slice(input);
            return;
        }

        self.pending.extend_from_slice(input);

        let mut start = 0;
        while let Some(pos) = find(&self.pending[start..], &self.from) {
            out.extend_from_slice(&self.pending[start..start + pos]);
            out.extend_from_slice(&self.to);
            start += pos + self.from.len();
        }

        let keep = (self.from.len() - 1).min(self.pending.len() - start);
        let emit_end = self.pending.len() - keep;
        out.extend_from_slice(&self.pending[start..emit_end]);
        self.pending.drain(..emit_end);
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        out.append(&mut self.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(replacer: &mut StringReplacer, chunks: &[&[u8]]) -> String {
        let mut out = Vec::new();
        for chunk in chunks {
            replacer.feed(chunk, &mut out);
        }
        replacer.finish(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn replaces_every_occurrence() {
        let upstream = "https://galaxy.ansible.com/";
        let proxy = "http://nexus:8081/repository/galaxy/";
        let body = format!(
            "{{\"a\":\"{u}api/\",\"b\":[\"{u}x\",\"{u}y\"],\"c\":\"{u}\"}}",
            u = upstream
        );

        let mut replacer = StringReplacer::new(upstream, proxy);
        let out = run(&mut replacer, &[body.as_bytes()]);

        assert_eq!(out.matches(proxy).count(), 4);
        assert_eq!(out.matches(upstream).count(), 0);
    }

    #[test]
    fn match_split_across_chunks() {
        let mut replacer = StringReplacer::new("https://up/", "/proxy/");
        let out = run(&mut replacer, &[b"see htt", b"ps://u", b"p/path and https://up/"]);
        assert_eq!(out, "see /proxy/path and /proxy/");
    }

    #[test]
    fn byte_by_byte_feeding_matches_whole_feeding() {
        let body = b"aaab https://up/ aaa https://up/https://up/ tail";
        let mut whole = StringReplacer::new("https://up/", "X");
        let expected = run(&mut whole, &[body]);

        let chunks: Vec<&[u8]> = body.chunks(1).collect();
        let mut bytewise = StringReplacer::new("https://up/", "X");
        assert_eq!(run(&mut bytewise, &chunks), expected);
        assert_eq!(expected, "aaab X aaa XX tail");
    }

    #[test]
    fn partial_prefix_at_end_is_flushed() {
        let mut replacer = StringReplacer::new("https://up/", "X");
        assert_eq!(run(&mut replacer, &[b"ends with https://u"]), "ends with https://u");
    }

    #[test]
    fn replace_all_on_buffer() {
        assert_eq!(replace_all(b"a-b-c", b"-", b"+"), b"a+b+c");
        assert_eq!(replace_all(b"abc", b"", b"+"), b"abc");
    }
}
