//! Hierarchical field tree produced by dissection.
//!
//! Every [`FieldNode`] records where its bytes live in the original packet
//! buffer (absolute offset and length), so a consumer can highlight the
//! bytes behind any decoded field.
//!
//! Trees are built through [`TreeNode`] handles, which refuse to record a
//! range that leaves the cursor it was decoded from or the packet itself.
//! [`FieldTree::finalize`] consumes the builder and returns a read-only
//! [`FinalizedTree`].

mod field;

pub use field::{FieldValue, OwnedFieldValue};

use std::fmt::Write as _;
use std::ops::Range;

use compact_str::CompactString;

use crate::cursor::ByteCursor;
use crate::error::{DissectError, ErrorKind, Result};

/// Observations attached to the tree that are facts, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    /// The protocol claims `missing` more bytes than the capture holds.
    PartialData { missing: usize },
    /// A checksum did not match.
    ChecksumBad { expected: u32, actual: u32 },
    /// Too few captured bytes to verify a checksum.
    ChecksumNotComputed,
    /// The transaction was already requested in `first_frame`.
    DuplicateRequest { first_frame: u64 },
    /// The transaction was already answered in `first_response_frame`.
    DuplicateResponse { first_response_frame: u64 },
    /// A response with no matching request.
    UnsolicitedResponse,
    /// A response matched to its request.
    ResponseTo { request_frame: u64, latency_us: u64 },
}

impl Annotation {
    /// Label used when the annotation is added to the tree.
    pub fn label(&self) -> &'static str {
        match self {
            Annotation::PartialData { .. } => "partial data",
            Annotation::ChecksumBad { .. } => "bad checksum",
            Annotation::ChecksumNotComputed => "checksum not computed",
            Annotation::DuplicateRequest { .. } => "duplicate request",
            Annotation::DuplicateResponse { .. } => "duplicate response",
            Annotation::UnsolicitedResponse => "unsolicited response",
            Annotation::ResponseTo { .. } => "response to",
        }
    }
}

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A decoded field, or a field grouping other fields.
    Field,
    /// The top node of one protocol layer.
    Protocol,
    /// Bytes no dissector claimed.
    Unparsed,
    /// Bytes a dissector failed on.
    Malformed(ErrorKind),
    /// A non-fatal observation.
    Annotation(Annotation),
}

/// One node of the field tree.
#[derive(Debug, Clone)]
pub struct FieldNode<'a> {
    offset: usize,
    length: usize,
    label: CompactString,
    value: Option<FieldValue<'a>>,
    kind: NodeKind,
    children: Vec<FieldNode<'a>>,
}

impl<'a> FieldNode<'a> {
    fn new(
        offset: usize,
        length: usize,
        label: CompactString,
        value: Option<FieldValue<'a>>,
        kind: NodeKind,
    ) -> Self {
        Self {
            offset,
            length,
            label,
            value,
            kind,
            children: Vec::new(),
        }
    }

    /// Absolute offset into the packet buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Absolute byte range covered by the node.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> Option<&FieldValue<'a>> {
        self.value.as_ref()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn children(&self) -> &[FieldNode<'a>] {
        &self.children
    }

    /// Whether this node is a malformed-data leaf.
    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, NodeKind::Malformed(_))
    }

    /// First direct child with the given label.
    pub fn child(&self, label: &str) -> Option<&FieldNode<'a>> {
        self.children.iter().find(|c| c.label == label)
    }

    fn into_owned(self) -> FieldNode<'static> {
        FieldNode {
            offset: self.offset,
            length: self.length,
            label: self.label,
            value: self.value.map(|v| v.detach()),
            kind: self.kind,
            children: self.children.into_iter().map(FieldNode::into_owned).collect(),
        }
    }
}

/// Mutable field tree under construction.
#[derive(Debug)]
pub struct FieldTree<'a> {
    root: FieldNode<'a>,
    /// Reported length of the packet; no node may end past it.
    limit: usize,
}

impl<'a> FieldTree<'a> {
    /// Start a tree for a packet of `reported_len` bytes.
    pub fn new(label: &str, reported_len: usize) -> Self {
        Self {
            root: FieldNode::new(
                0,
                reported_len,
                CompactString::new(label),
                None,
                NodeKind::Protocol,
            ),
            limit: reported_len,
        }
    }

    /// Handle for appending top-level nodes.
    pub fn root_mut(&mut self) -> TreeNode<'_, 'a> {
        TreeNode {
            node: &mut self.root,
            limit: self.limit,
        }
    }

    /// Freeze the tree. No further mutation is possible.
    pub fn finalize(self) -> FinalizedTree<'a> {
        FinalizedTree { root: self.root }
    }
}

/// Mutable handle to one node of a [`FieldTree`].
///
/// Children appended through the handle are nested under its node.
#[derive(Debug)]
pub struct TreeNode<'t, 'a> {
    node: &'t mut FieldNode<'a>,
    limit: usize,
}

impl<'t, 'a> TreeNode<'t, 'a> {
    /// Validate a cursor-relative range and convert it to an absolute one.
    fn check(&self, cursor: &ByteCursor<'a>, offset: usize, length: usize) -> Result<usize> {
        let end = offset.checked_add(length).ok_or_else(|| {
            DissectError::invariant(format!("field length {length} at {offset} overflows"))
        })?;
        if end > cursor.reported_len() {
            return Err(DissectError::invariant(format!(
                "field [{offset}, {end}) outside its {}-byte cursor window",
                cursor.reported_len()
            )));
        }

        let absolute = cursor.absolute_offset(offset);
        if absolute + length > self.limit {
            return Err(DissectError::invariant(format!(
                "field [{absolute}, {}) outside the {}-byte packet",
                absolute + length,
                self.limit
            )));
        }
        Ok(absolute)
    }

    fn push(&mut self, node: FieldNode<'a>) -> TreeNode<'_, 'a> {
        self.node.children.push(node);
        let last = self.node.children.len() - 1;
        TreeNode {
            node: &mut self.node.children[last],
            limit: self.limit,
        }
    }

    /// Append a leaf covering `length` bytes at `offset` of `cursor`.
    pub fn add_leaf(
        &mut self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        length: usize,
        label: &str,
        value: FieldValue<'a>,
    ) -> Result<()> {
        let absolute = self.check(cursor, offset, length)?;
        self.push(FieldNode::new(
            absolute,
            length,
            CompactString::new(label),
            Some(value),
            NodeKind::Field,
        ));
        Ok(())
    }

    /// Append an interior node and return a handle to it.
    pub fn add_subtree(
        &mut self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        length: usize,
        label: &str,
    ) -> Result<TreeNode<'_, 'a>> {
        let absolute = self.check(cursor, offset, length)?;
        Ok(self.push(FieldNode::new(
            absolute,
            length,
            CompactString::new(label),
            None,
            NodeKind::Field,
        )))
    }

    /// Append a protocol-layer node and return a handle to it.
    pub fn add_protocol(
        &mut self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        length: usize,
        label: &str,
    ) -> Result<TreeNode<'_, 'a>> {
        let absolute = self.check(cursor, offset, length)?;
        Ok(self.push(FieldNode::new(
            absolute,
            length,
            CompactString::new(label),
            None,
            NodeKind::Protocol,
        )))
    }

    /// Append a non-fatal observation.
    pub fn add_annotation(
        &mut self,
        cursor: &ByteCursor<'a>,
        offset: usize,
        length: usize,
        annotation: Annotation,
    ) -> Result<()> {
        let absolute = self.check(cursor, offset, length)?;
        self.push(FieldNode::new(
            absolute,
            length,
            CompactString::new(annotation.label()),
            None,
            NodeKind::Annotation(annotation),
        ));
        Ok(())
    }

    /// Attach or replace the value of this node.
    pub fn set_value(&mut self, value: FieldValue<'a>) {
        self.node.value = Some(value);
    }

    /// Change the length of this node once its extent is known.
    pub fn set_length(&mut self, length: usize) -> Result<()> {
        if self.node.offset + length > self.limit {
            return Err(DissectError::invariant(format!(
                "node at {} cannot grow to {length} bytes in a {}-byte packet",
                self.node.offset, self.limit
            )));
        }
        self.node.length = length;
        Ok(())
    }

    /// Append a malformed-data leaf from `offset` to the end of `cursor`.
    ///
    /// Never fails: the range is clamped to the cursor window and packet.
    pub fn add_malformed(&mut self, cursor: &ByteCursor<'a>, offset: usize, error: &DissectError) {
        let (absolute, length) = self.clamp(cursor, offset);
        let bytes = cursor.as_slice().get(offset..).unwrap_or(&[]);
        let mut label = CompactString::default();
        let _ = write!(label, "{error}");
        self.push(FieldNode::new(
            absolute,
            length,
            label,
            Some(FieldValue::Bytes(bytes)),
            NodeKind::Malformed(error.kind()),
        ));
    }

    /// Append an opaque "data" leaf from `offset` to the end of `cursor`.
    ///
    /// Never fails: the range is clamped to the cursor window and packet.
    pub fn add_unparsed(&mut self, cursor: &ByteCursor<'a>, offset: usize) {
        let (absolute, length) = self.clamp(cursor, offset);
        let bytes = cursor.as_slice().get(offset..).unwrap_or(&[]);
        self.push(FieldNode::new(
            absolute,
            length,
            CompactString::new("data"),
            Some(FieldValue::Bytes(bytes)),
            NodeKind::Unparsed,
        ));
    }

    fn clamp(&self, cursor: &ByteCursor<'a>, offset: usize) -> (usize, usize) {
        let offset = offset.min(cursor.reported_len());
        let absolute = cursor.absolute_offset(offset).min(self.limit);
        let length = cursor
            .remaining_reported(offset)
            .min(self.limit - absolute);
        (absolute, length)
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.node.children.len()
    }

    /// Drop children appended after the first `len`.
    pub(crate) fn truncate_children(&mut self, len: usize) {
        self.node.children.truncate(len);
    }

    /// Absolute range of this node.
    pub fn range(&self) -> Range<usize> {
        self.node.range()
    }

    /// Reborrow the handle for a nested call.
    pub fn reborrow(&mut self) -> TreeNode<'_, 'a> {
        TreeNode {
            node: &mut *self.node,
            limit: self.limit,
        }
    }
}

/// Read-only field tree returned to the caller.
#[derive(Debug, Clone)]
pub struct FinalizedTree<'a> {
    root: FieldNode<'a>,
}

impl<'a> FinalizedTree<'a> {
    pub fn root(&self) -> &FieldNode<'a> {
        &self.root
    }

    /// Top-level nodes.
    pub fn children(&self) -> &[FieldNode<'a>] {
        &self.root.children
    }

    /// Depth-first walk yielding `(depth, node)`, top-level nodes at depth 0.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FieldNode<'a>)> {
        let mut stack: Vec<(usize, &FieldNode<'a>)> =
            self.root.children.iter().rev().map(|n| (0, n)).collect();
        std::iter::from_fn(move || {
            let (depth, node) = stack.pop()?;
            stack.extend(node.children.iter().rev().map(|c| (depth + 1, c)));
            Some((depth, node))
        })
    }

    /// First node, depth-first, with the given label.
    pub fn find(&self, label: &str) -> Option<&FieldNode<'a>> {
        self.iter().map(|(_, n)| n).find(|n| n.label == label)
    }

    /// Whether any node is a malformed-data leaf.
    pub fn has_malformed(&self) -> bool {
        self.iter().any(|(_, n)| n.is_malformed())
    }

    /// Merged, sorted byte ranges covered by top-level nodes.
    pub fn coverage(&self) -> Vec<Range<usize>> {
        let mut ranges: Vec<Range<usize>> = self
            .root
            .children
            .iter()
            .filter(|n| n.length > 0)
            .map(FieldNode::range)
            .collect();
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        merged
    }

    /// Indented text dump, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (depth, node) in self.iter() {
            let _ = write!(out, "{:indent$}{}", "", node.label, indent = depth * 2);
            if let Some(value) = &node.value {
                let _ = write!(out, ": {value}");
            }
            let _ = writeln!(out, " [{}..{}]", node.offset, node.offset + node.length);
        }
        out
    }

    /// Detach the tree from the packet buffer.
    pub fn into_owned(self) -> FinalizedTree<'static> {
        FinalizedTree {
            root: self.root.into_owned(),
        }
    }
}
