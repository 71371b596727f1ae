//! Line-oriented editing of the forwarding configuration document.
//!
//! The file is modeled as an ordered run of lines. Blocks are located by
//! exact whole-line marker equality, never by substring containment, so rule
//! lines embedding the same address text can never be mistaken for
//! delimiters.

use crate::error::{ConfError, ConfResult};
use crate::model::{BEGIN_PREFIX, Endpoint, InstalledBlock, Transport, rule_line};

/// In-memory view of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Document {
    lines: Vec<String>,
}

impl Document {
    pub(crate) fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(ToOwned::to_owned).collect(),
        }
    }

    /// Render back to file content. Non-empty documents always end with a
    /// newline; empty documents render as zero bytes. A source file missing
    /// its final newline is therefore repaired, not reproduced, the next
    /// time a mutation rewrites it.
    pub(crate) fn render(&self) -> String {
        if self.lines.is_empty() {
            String::new()
        } else {
            let mut content = self.lines.join("\n");
            content.push('\n');
            content
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Locate the block for `endpoint` as an inclusive line-index range.
    ///
    /// A begin marker with no matching end marker leaves no safe deletion
    /// range and is reported as [`ConfError::CorruptBlock`].
    fn find_block(&self, endpoint: Endpoint) -> ConfResult<Option<(usize, usize)>> {
        let begin_marker = endpoint.begin_marker();
        let end_marker = endpoint.end_marker();
        let Some(begin) = self.lines.iter().position(|line| *line == begin_marker) else {
            return Ok(None);
        };
        let end = self.lines[begin + 1..]
            .iter()
            .position(|line| *line == end_marker)
            .map(|offset| begin + 1 + offset)
            .ok_or(ConfError::CorruptBlock {
                endpoint,
                line: begin + 1,
            })?;
        Ok(Some((begin, end)))
    }

    /// Whether a block for `endpoint` is present.
    pub(crate) fn contains_block(&self, endpoint: Endpoint) -> ConfResult<bool> {
        Ok(self.find_block(endpoint)?.is_some())
    }

    /// Delete the block for `endpoint` if present, then normalize blank
    /// lines. Returns whether anything was removed.
    pub(crate) fn remove_block(&mut self, endpoint: Endpoint) -> ConfResult<bool> {
        let Some((begin, end)) = self.find_block(endpoint)? else {
            return Ok(false);
        };
        self.lines.drain(begin..=end);
        self.normalize();
        Ok(true)
    }

    /// Append a freshly rendered block for `endpoint` at end-of-file,
    /// separated from existing content by a single blank line.
    pub(crate) fn append_block(
        &mut self,
        endpoint: Endpoint,
        transport: Transport,
        selectors: &[String],
    ) {
        if self.lines.last().is_some_and(|line| !is_blank(line)) {
            self.lines.push(String::new());
        }
        self.lines.push(endpoint.begin_marker());
        for selector in selectors {
            self.lines.push(rule_line(endpoint, transport, selector));
        }
        self.lines.push(endpoint.end_marker());
    }

    /// Post-deletion blank-line pass: collapse runs of blank lines to one,
    /// then strip leading and trailing blanks. Pre-existing stray blanks are
    /// repaired by the same pass, so removals round-trip the surrounding
    /// content byte for byte only when the input had none.
    fn normalize(&mut self) {
        let mut collapsed: Vec<String> = Vec::with_capacity(self.lines.len());
        for line in self.lines.drain(..) {
            if is_blank(&line) && collapsed.last().is_some_and(|prev| is_blank(prev)) {
                continue;
            }
            collapsed.push(line);
        }
        if collapsed.first().is_some_and(|line| is_blank(line)) {
            collapsed.remove(0);
        }
        if collapsed.last().is_some_and(|line| is_blank(line)) {
            collapsed.pop();
        }
        self.lines = collapsed;
    }

    /// Scan for every well-formed block in file order.
    ///
    /// Begin-marker lookalikes whose identity text is not canonical (and so
    /// could never be addressed by [`Endpoint::begin_marker`]) are unrelated
    /// content and are skipped.
    pub(crate) fn blocks(&self) -> ConfResult<Vec<InstalledBlock>> {
        let mut found = Vec::new();
        let mut index = 0;
        while index < self.lines.len() {
            let Some(endpoint) = parse_begin_marker(&self.lines[index]) else {
                index += 1;
                continue;
            };
            let end_marker = endpoint.end_marker();
            let body_start = index + 1;
            let end = self.lines[body_start..]
                .iter()
                .position(|line| *line == end_marker)
                .map(|offset| body_start + offset)
                .ok_or(ConfError::CorruptBlock {
                    endpoint,
                    line: index + 1,
                })?;
            let mut transport = None;
            let mut selectors = Vec::with_capacity(end - body_start);
            for body in &self.lines[body_start..end] {
                match body.rsplit_once(' ') {
                    Some((selector, target)) => {
                        if transport.is_none() {
                            transport = Transport::from_target(target);
                        }
                        selectors.push(selector.to_string());
                    }
                    None => selectors.push(body.clone()),
                }
            }
            found.push(InstalledBlock {
                endpoint,
                transport,
                selectors,
            });
            index = end + 1;
        }
        Ok(found)
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn parse_begin_marker(line: &str) -> Option<Endpoint> {
    let suffix = line.strip_prefix(BEGIN_PREFIX)?;
    let endpoint = suffix.parse::<Endpoint>().ok()?;
    (suffix == endpoint.to_string()).then_some(endpoint)
}
